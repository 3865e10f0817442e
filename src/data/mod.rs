//! Reading storage: the circular buffer and the shared store built on it.
pub mod ring_buffer;
pub mod store;

pub use ring_buffer::ReadingBuffer;
pub use store::{ForcedValue, SensorStore, SharedStore, Snapshot};
