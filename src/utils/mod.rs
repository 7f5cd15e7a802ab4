//! Small data-structure helpers shared by the transport, replication, and
//! prediction layers.

pub mod ready_buffer;
pub mod rtt;
pub mod sequence_buffer;

pub use ready_buffer::ReadyBuffer;
pub use rtt::RttEstimator;
pub use sequence_buffer::SequenceBuffer;
