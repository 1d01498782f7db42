// ============================================================================
// WebSocket Handlers
// ============================================================================

pub mod admission;
pub mod connection;

pub use connection::handle_connection;
