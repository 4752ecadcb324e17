//! Abstract interfaces to the three external collaborators this system
//! treats as black boxes (ยง1, ยง6): search, LLM-based decomposition, and
//! textual-entailment scoring.
//!
//! Each trait follows the same shape this codebase already uses for its
//! `Retriever` collaborator: one production implementation backed by an
//! HTTP client, and one deterministic in-process stub so the pipeline is
//! fully exercisable without live credentials.

mod completion;
mod entailment;
mod search;

pub use completion::{
    CompletionError, DecompositionResponse, HttpCompletion, StubCompletion, Subtask,
};
pub use entailment::{EntailmentScore, HttpEntailment, StubEntailment};
pub use search::{HttpSearch, SimulatedSearch};

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::SearchResult;
use crate::HdrpError;

/// Decomposes a research query into a set of candidate subtasks. The
/// only production-grade caller (the Planner) always treats failure as
/// recoverable: any error here triggers the fallback linear DAG (ยง4.1).
#[async_trait]
pub trait Completion: Send + Sync {
    async fn decompose(&self, query: &str) -> Result<DecompositionResponse, CompletionError>;
}

pub type DynCompletion = Arc<dyn Completion>;

/// Returns ranked search results for a query (ยง6).
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, HdrpError>;
}

pub type DynSearch = Arc<dyn Search>;

/// Scores premise/hypothesis pairs for entailment, contradiction, and
/// neutrality (ยง4.3, ยง6).
#[async_trait]
pub trait Entailment: Send + Sync {
    async fn relation(
        &self,
        premise: &str,
        hypothesis: &str,
        variant: &str,
    ) -> Result<EntailmentScore, HdrpError>;
}

pub type DynEntailment = Arc<dyn Entailment>;
