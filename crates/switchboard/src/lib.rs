//! Switchboard: session store, message log, task tracking, and declarative input schemas
//! for MCP servers.

pub mod ledger;
pub mod registry;
pub mod schema;
pub mod session;
pub mod storage;
pub mod task;
pub mod types;

pub use ledger::Ledger;
pub use registry::{Named, Registry};
pub use schema::{FieldError, InputSchema, ParamType, Parameter};
pub use session::{Negotiation, SessionStore};
pub use storage::{SnapshotHeader, SnapshotReader, SnapshotWriter, StoreSnapshot};
pub use task::{
    TaskRequest, TaskTracker, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TASK_TTL_MS, MAX_TASK_TTL_MS,
};
pub use types::*;
