//! Switchboard MCP Server: durable MCP sessions, validated tool and prompt
//! invocation, and long-running tasks over stdio or HTTP.

pub mod config;
pub mod prompts;
pub mod protocol;
pub mod render;
pub mod repl;
pub mod resources;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{resolve_store_path, ServerConfig};
pub use protocol::ProtocolHandler;
pub use session::SessionManager;
pub use transport::StdioTransport;
