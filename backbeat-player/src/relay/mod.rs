//! Audio relay pipeline
//!
//! Decoder → frame buffer → fixed-cadence relay loop → sinks.

pub mod frame_buffer;
pub mod pipeline;
pub mod sink;

pub use frame_buffer::{frame_buffer, FrameConsumer, FrameProducer, FrameRead, WriterGuard};
pub use pipeline::{scale_frame, Relay, RelayCore, Volume};
pub use sink::{DirectSink, DirectTap, NullVoiceSink, RingDirectSink, SinkWrite, VoiceSink};
