//! HTTP server for content-addressed buffers.

pub mod api;
pub mod router;

pub use api::AppState;
pub use router::create_router;
