//! MCP notification method names.

pub mod methods {
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const INITIALIZED_LEGACY: &str = "initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const CANCEL_REQUEST_LEGACY: &str = "$/cancelRequest";

    pub fn is_initialized(method: &str) -> bool {
        method == INITIALIZED || method == INITIALIZED_LEGACY
    }

    /// True for either spelling of the cancellation notification.
    pub fn is_cancellation(method: &str) -> bool {
        method == CANCELLED || method == CANCEL_REQUEST_LEGACY
    }
}
