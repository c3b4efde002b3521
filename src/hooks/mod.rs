//! Host event handling
//!
//! Every host event arrives as one JSON envelope on stdin. The envelope is
//! decoded into a typed [`HookEvent`], routed by the [`Dispatcher`] to one
//! cognitive function, and answered with a [`HookResponse`] on stdout.

pub mod cache;
pub mod dispatcher;
pub mod envelope;
pub mod git;
pub mod legacy;
pub mod response;
pub mod worker;

pub use cache::AttentionCache;
pub use dispatcher::{Dispatcher, Function};
pub use envelope::{
    ActionEvent, ActionResultEvent, CompactEvent, EventKind, HookEnvelope, HookEvent, PermissionEvent,
    RiskTier, SessionEndEvent, SessionStartEvent, SubagentEvent, UserPromptEvent,
};
pub use response::{HookResponse, PermissionDecision};
pub use worker::BackgroundPool;
