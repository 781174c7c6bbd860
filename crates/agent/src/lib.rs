//! Conversational assistants of the carbon credit marketplace.
//!
//! The deterministic dialogue rules live in `carbonex-core`; this crate adds
//! everything that talks to the outside world:
//! - `llm` and `retrieval`: collaborator traits with HTTP implementations
//!   (OpenAI-compatible completions and embeddings, Qdrant search)
//! - `extraction`: reads questionnaire answers out of free text
//! - `calculator` and `formalities`: one dialogue turn in, text fragments and
//!   a terminal control message out (`stream`)
//! - `rag` and `guidance`: retrieval-grounded answers and workflow step guidance
//! - `ingest`: chunking and indexing of knowledge-base documents
//!
//! Collaborator failures are recovered where they happen. Only a failure
//! that leaves a turn without any reply reaches the caller, and then as an
//! error control message carrying the state the turn started from.

pub mod calculator;
pub mod extraction;
pub mod formalities;
pub mod guidance;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod rag;
pub mod retrieval;
pub mod runtime;
pub mod stream;

pub use calculator::{CalculationObserver, CalculatorAgent};
pub use formalities::FormalitiesAgent;
pub use llm::LlmClient;
pub use rag::{RagAnswer, RetrievalResponder};
pub use retrieval::{KnowledgeBase, VectorStore};
pub use runtime::{AgentRuntime, KnowledgeDomain};
pub use stream::{ControlMessage, TurnEvent, TurnReply, TurnSink, TurnStream};
