//! # Enforcement Search
//!
//! Question routing and retrieval-augmented answering over legal
//! enforcement documents (sanctions enforcement actions, guidance, licences
//! and expert commentary).
//!
//! A question is classified into one of four routes and dispatched to the
//! matching retrieval strategy. The orchestrator owns the lifecycle,
//! including retry of transient classification failures, per-call timeouts
//! and assembly of the final answer envelope.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   question ──────▶ │ Orchestrator │ ──▶ AnswerEnvelope
//!                    └──────┬───────┘
//!                           │ classify
//!                           ▼
//!                    ┌──────────────┐
//!                    │  Classifier  │ (chat model)
//!                    └──────┬───────┘
//!          ┌────────────────┼─────────────────┬───────────────┐
//!          ▼                ▼                 ▼               ▼
//!   ┌────────────┐  ┌──────────────┐  ┌─────────────┐  ┌──────────────┐
//!   │  Filter    │  │  Semantic    │  │ Statistical │  │Clarification │
//!   │  search    │  │  search+RAG  │  │   (stub)    │  │  follow-up   │
//!   └─────┬──────┘  └──────┬───────┘  └─────────────┘  └──────────────┘
//!         └───────┬────────┘
//!                 ▼
//!          ┌─────────────┐
//!          │ Search index│ (Azure AI Search or in-memory)
//!          └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Routes, filters, results and the answer envelope |
//! | [`error`] | Typed error taxonomy |
//! | [`http`] | Shared HTTP client and status mapping |
//! | [`llm`] | Chat-completion backends |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Search backends (Azure AI Search, in-memory) |
//! | [`prompts`] | Classification and grounded-answer prompts |
//! | [`classifier`] | Question classification and filter extraction |
//! | [`strategy`] | Filter, semantic and statistical retrieval strategies |
//! | [`orchestrator`] | Request state machine |
//! | [`trace`] | Span events and sinks |
//! | [`ask`] | CLI command implementations |

pub mod ask;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod index;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod strategy;
pub mod trace;
