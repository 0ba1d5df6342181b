//! stream — вход декодера.
//!
//! - framer.rs — StreamFramer: поставки произвольной длины -> записи RECORD_SIZE.
//! - source.rs — ByteSource и реализации (Read, Vec, поток-производитель + mpsc), ожидание pipe.

pub mod framer;
pub mod source;

pub use framer::{Frames, RawRecord, StreamFramer};
pub use source::{spawn_producer, wait_for_source, ByteSource, ChannelSource, ReaderSource, VecSource};
