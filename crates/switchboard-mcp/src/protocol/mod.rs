//! MCP protocol handling: negotiation, validation, and dispatch.

pub mod dispatcher;
pub mod handler;
pub mod negotiation;
pub mod validator;

pub use dispatcher::{Dispatched, Dispatcher, Invocation, UnitKind};
pub use handler::ProtocolHandler;
pub use negotiation::{CapabilityNegotiator, IdentityTable, Profile, ProfileResolver, DEFAULT_PROFILE};
