//! Server-wide session state.

pub mod manager;

pub use manager::SessionManager;
