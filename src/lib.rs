//! cogmem - Session working memory for event-driven coding assistants
//!
//! The host assistant invokes cogmem once per lifecycle event. Each
//! invocation is a short-lived process: it reads one JSON envelope, maps the
//! event onto a cognitive function, updates the persisted session document,
//! and answers with context to inject back into the assistant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Host assistant (events)                        │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ stdin envelope / stdout response
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │                       Cognitive Dispatcher                         │
//! │  ORIENT  PERCEIVE  ATTEND  ENCODE  DECIDE  INTEGRATE  HOLD  REFLECT│
//! └──────┬────────────────┬────────────────┬────────────────┬────────┘
//!        │                │                │                │
//! ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐
//! │  Session    │  │   Primer    │  │  Knowledge  │  │  Insight    │
//! │  Store      │  │   Recovery  │  │  Store      │  │  Pipeline   │
//! │ (lock+rename)│ │ (read once) │  │ (timeouts)  │  │ (staged)    │
//! └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: per-session working memory documents and their mutators
//! - [`primer`]: context carried across a compaction boundary
//! - [`hooks`]: envelope decoding, dispatch and responses
//! - [`knowledge`]: adapters for the external knowledge store
//! - [`insights`]: extraction, staging and promotion of durable insights
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod hooks;
pub mod insights;
pub mod knowledge;
pub mod primer;
pub mod session;
pub mod storage;
pub mod text;

pub use config::CogmemConfig;
pub use error::{Error, Result};
