pub mod client;
pub mod consumer;
pub mod events;
pub mod reveal;
pub mod scroll;

pub use client::{ClientError, RelayClient};
pub use consumer::{ConsumeOutcome, ConsumeStatus, RenderSink, ScrollEvent, StreamConsumer};
pub use events::{EventStream, StreamEventDecoder, decode_event_stream};
pub use reveal::{RevealState, RevealStep};
pub use scroll::AutoScroll;
