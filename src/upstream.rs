//! Upstream generation backend
//!
//! One outbound WebSocket per generation: send the request, stream back raw
//! payloads, close when done or abandoned.

mod error;
mod forwarder;
mod types;

pub use error::{UpstreamError, UpstreamErrorKind};
pub use forwarder::WsForwarder;
pub use types::UpstreamRequest;

/// Raw upstream payloads in arrival order
pub type UpstreamStream = tokio_stream::wrappers::ReceiverStream<String>;
