//! Core primitives for the Hierarchical Deep Research Planner.
//!
//! - configuration loading with guardrails
//! - shared error taxonomy
//! - tracing / telemetry bootstrap
//! - security helpers (environment-backed secrets)
//! - the data model, collaborator abstractions, and the four pipeline
//!   components: Planner, DAG Executor, Claim Verifier, Synthesiser

mod artifact;
mod collaborators;
mod config;
mod error;
mod executor;
mod logging;
mod planner;
mod security;
mod synthesiser;
mod telemetry;
mod types;
mod verifier;

pub use artifact::{write_bundle, BundleStatistics};
pub use collaborators::{
    Completion, CompletionError, DecompositionResponse, DynCompletion, DynEntailment, DynSearch,
    Entailment, EntailmentScore, HttpCompletion, HttpEntailment, HttpSearch, Search,
    SimulatedSearch, StubCompletion, StubEntailment, Subtask,
};
pub use config::{Config, ConfigLoader, ExecutorConfig, LoggingConfig, NliConfig, SearchConfig};
pub use error::{HdrpError, NodeFailure, NodeFailureKind};
pub use executor::{ExecutionReport, Executor};
pub use logging::log_event;
pub use planner::Planner;
pub use security::{require_env, SecretValue};
pub use synthesiser::{synthesise, SourceSummary, SynthesisContext, SynthesisOutput};
pub use telemetry::{init_telemetry, TelemetryOptions};
pub use types::{
    AtomicClaim, CritiqueResult, DecompositionMethod, Edge, Graph, GraphMetadata, Node, NodeStatus,
    NodeType, Query, RunId, SearchResult, MAX_DEPTH,
};
pub use verifier::{ClaimVerifier, EntailmentCache};
