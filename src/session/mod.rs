//! Session working memory
//!
//! One JSON document per session id, mutated through locked, atomic
//! read-modify-write operations.

mod load;
mod state;
mod store;

pub use load::{load_level, CognitiveLoad, LoadComponents, LoadLevel, LoadThresholds};
pub use state::{
    validate_session_id, Activity, Commitment, Commitments, ContextItem, Decision,
    NarrativeEvent, Priority, SessionMetadata, SessionState, SessionSummary, WorkingMemory,
    MAX_FOCUS_ITEMS, SCHEMA_VERSION,
};
pub use store::SessionStore;
