//! Serial Framing Engine
//!
//! This crate turns the raw byte stream read from a serial transport into
//! logical frames. Bytes are accumulated in a bounded [`InboundBuffer`] and
//! extracted according to a [`FramingPolicy`].
//!
//! # Example
//!
//! ```rust
//! use usbser_framing::{Framer, FramingPolicy};
//!
//! let mut framer = Framer::new(FramingPolicy::lines()).unwrap();
//! framer.feed(b"ab");
//! framer.feed(b"cd\nef");
//!
//! let frames: Vec<_> = framer.drain().collect();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].bytes, b"abcd");
//! assert_eq!(framer.pending(), b"ef");
//! ```

pub mod buffer;
pub mod error;
pub mod framer;

pub use buffer::{InboundBuffer, DEFAULT_BUFFER_CAPACITY};
pub use error::FramingError;
pub use framer::{Drain, Frame, Framer, FramingPolicy};
