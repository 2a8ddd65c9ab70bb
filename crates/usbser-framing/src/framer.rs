//! Frame extraction
//!
//! A [`Framer`] accumulates bytes from [`Framer::feed`] and hands out
//! [`Frame`]s through the lazy [`Framer::drain`] iterator.
//!
//! # Policies
//! - **Passthrough**: every fed chunk comes back as exactly one frame
//! - **Delimiter**: one frame per terminator occurrence; bytes after the
//!   last terminator (including a partial terminator) wait for the next feed.
//!   A run that fills the buffer without a terminator is split off as an
//!   incomplete frame, so the buffer never stays full.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::{InboundBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::error::FramingError;

/// How raw bytes are grouped into frames
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramingPolicy {
    /// Each fed chunk is one frame
    #[default]
    Passthrough,
    /// Frames end at a terminator sequence
    Delimiter {
        /// Terminator byte sequence (e.g. [0x0D, 0x0A] for CRLF)
        delimiter: Vec<u8>,
        /// Keep the terminator at the end of emitted frames
        #[serde(default)]
        include_delimiter: bool,
        /// Force a split once this many bytes arrive without a terminator
        #[serde(default)]
        max_frame_len: Option<usize>,
    },
}

impl FramingPolicy {
    /// Newline-terminated frames, terminator stripped
    pub fn lines() -> Self {
        Self::delimited(b"\n")
    }

    /// Frames ending in `delimiter`, terminator stripped
    pub fn delimited(delimiter: &[u8]) -> Self {
        Self::Delimiter {
            delimiter: delimiter.to_vec(),
            include_delimiter: false,
            max_frame_len: None,
        }
    }

    /// Check the policy is usable with a buffer of `capacity` bytes
    pub fn validate(&self, capacity: usize) -> Result<(), FramingError> {
        if capacity == 0 {
            return Err(FramingError::ZeroCapacity);
        }
        if let Self::Delimiter {
            delimiter,
            max_frame_len,
            ..
        } = self
        {
            if delimiter.is_empty() {
                return Err(FramingError::EmptyDelimiter);
            }
            if capacity < delimiter.len() {
                return Err(FramingError::CapacityBelowDelimiter {
                    capacity,
                    delimiter_len: delimiter.len(),
                });
            }
            if let Some(max) = *max_frame_len {
                if max < delimiter.len() {
                    return Err(FramingError::FrameLimitTooSmall {
                        max,
                        delimiter_len: delimiter.len(),
                    });
                }
                if capacity < max {
                    return Err(FramingError::CapacityBelowFrameLimit { capacity, max });
                }
            }
        }
        Ok(())
    }
}

/// One logical message from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes
    pub bytes: Vec<u8>,
    /// False for forced splits and flushed leftovers
    pub complete: bool,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 view of the frame
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Length of the longest proper prefix of `delimiter` that `data` ends with
fn partial_delimiter_len(data: &[u8], delimiter: &[u8]) -> usize {
    (1..delimiter.len())
        .rev()
        .find(|&k| data.ends_with(&delimiter[..k]))
        .unwrap_or(0)
}

/// Streaming framer over a bounded [`InboundBuffer`]
#[derive(Debug, Clone)]
pub struct Framer {
    policy: FramingPolicy,
    buffer: InboundBuffer,
    /// Passthrough chunk boundaries; sums to the buffer length
    chunks: VecDeque<usize>,
    /// Delimiter search resumes here
    scan_from: usize,
    rejected: u64,
}

impl Framer {
    /// Create a framer with the default buffer capacity
    pub fn new(policy: FramingPolicy) -> Result<Self, FramingError> {
        Self::with_capacity(policy, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a framer whose buffer holds at most `capacity` bytes
    pub fn with_capacity(policy: FramingPolicy, capacity: usize) -> Result<Self, FramingError> {
        policy.validate(capacity)?;
        Ok(Self {
            policy,
            buffer: InboundBuffer::new(capacity),
            chunks: VecDeque::new(),
            scan_from: 0,
            rejected: 0,
        })
    }

    pub fn policy(&self) -> &FramingPolicy {
        &self.policy
    }

    /// Bytes received but not yet part of an emitted frame
    pub fn pending(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Total bytes refused because the buffer was full
    pub fn rejected_bytes(&self) -> u64 {
        self.rejected
    }

    /// Append bytes; returns how many were accepted
    ///
    /// Fewer than `data.len()` means the buffer is full: drain, then feed
    /// the rest again. Draining a full buffer always yields a frame.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let accepted = self.buffer.push(data);
        if accepted > 0 && matches!(self.policy, FramingPolicy::Passthrough) {
            self.chunks.push_back(accepted);
        }
        if accepted < data.len() {
            let refused = data.len() - accepted;
            self.rejected += refused as u64;
            warn!(
                "Inbound buffer full ({} bytes), refused {} byte(s)",
                self.buffer.capacity(),
                refused
            );
        }
        accepted
    }

    /// Lazily yield every frame available right now
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { framer: self }
    }

    /// Extract the next frame, if one is complete
    pub fn next_frame(&mut self) -> Option<Frame> {
        match &self.policy {
            FramingPolicy::Passthrough => {
                let len = self.chunks.pop_front()?;
                Some(Frame {
                    bytes: self.buffer.take(len),
                    complete: true,
                })
            }
            FramingPolicy::Delimiter {
                delimiter,
                include_delimiter,
                max_frame_len,
            } => {
                // Without an explicit limit a full buffer forces the split
                let limit = max_frame_len.unwrap_or(self.buffer.capacity());
                let data = self.buffer.as_slice();
                let found = data[self.scan_from..]
                    .windows(delimiter.len())
                    .position(|w| w == delimiter.as_slice())
                    .map(|pos| pos + self.scan_from);

                match found {
                    Some(pos) if pos <= limit => {
                        let mut bytes = self.buffer.take(pos + delimiter.len());
                        if !include_delimiter {
                            bytes.truncate(pos);
                        }
                        self.scan_from = 0;
                        return Some(Frame {
                            bytes,
                            complete: true,
                        });
                    }
                    Some(_) => {}
                    None => {
                        // A partial terminator may sit at the tail; rescan it next time
                        self.scan_from = data.len().saturating_sub(delimiter.len() - 1);
                    }
                }

                if data.len() < limit {
                    return None;
                }
                let split_at = limit - partial_delimiter_len(&data[..limit], delimiter);
                debug!(
                    "No terminator within {} bytes, forcing split at {}",
                    limit, split_at
                );
                let bytes = self.buffer.take(split_at);
                self.scan_from = 0;
                Some(Frame {
                    bytes,
                    complete: false,
                })
            }
        }
    }

    /// Return all buffered bytes as one incomplete frame
    ///
    /// Meant for teardown, after [`Framer::drain`] has emptied the complete frames.
    pub fn flush(&mut self) -> Option<Frame> {
        self.chunks.clear();
        self.scan_from = 0;
        if self.buffer.is_empty() {
            return None;
        }
        Some(Frame {
            bytes: self.buffer.take_all(),
            complete: false,
        })
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.chunks.clear();
        self.scan_from = 0;
    }
}

/// Iterator returned by [`Framer::drain`]
///
/// Finite: it ends once no complete frame remains. Feed more bytes and call
/// `drain` again to continue.
pub struct Drain<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Drain<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.framer.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(framer: &mut Framer) -> Vec<Vec<u8>> {
        framer.drain().map(|f| f.bytes).collect()
    }

    #[test]
    fn test_newline_split_across_feeds() {
        let mut framer = Framer::new(FramingPolicy::lines()).unwrap();

        framer.feed(b"ab");
        assert!(framer.drain().next().is_none());

        framer.feed(b"cd\nef");
        assert_eq!(frames(&mut framer), vec![b"abcd".to_vec()]);
        assert_eq!(framer.pending(), b"ef");
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut framer = Framer::new(FramingPolicy::lines()).unwrap();
        framer.feed(b"one\ntwo\n\nthree");

        assert_eq!(
            frames(&mut framer),
            vec![b"one".to_vec(), b"two".to_vec(), Vec::new()]
        );
        assert_eq!(framer.pending(), b"three");
    }

    #[test]
    fn test_crlf_split_inside_delimiter() {
        let mut framer = Framer::new(FramingPolicy::delimited(b"\r\n")).unwrap();

        framer.feed(b"OK\r");
        assert!(framer.drain().next().is_none());
        assert_eq!(framer.pending(), b"OK\r");

        framer.feed(b"\nERROR\r\n");
        assert_eq!(frames(&mut framer), vec![b"OK".to_vec(), b"ERROR".to_vec()]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_include_delimiter() {
        let policy = FramingPolicy::Delimiter {
            delimiter: b";".to_vec(),
            include_delimiter: true,
            max_frame_len: None,
        };
        let mut framer = Framer::new(policy).unwrap();
        framer.feed(b"FA00014250000;MD2;");

        assert_eq!(
            frames(&mut framer),
            vec![b"FA00014250000;".to_vec(), b"MD2;".to_vec()]
        );
    }

    #[test]
    fn test_passthrough_keeps_chunks() {
        let mut framer = Framer::new(FramingPolicy::Passthrough).unwrap();
        framer.feed(b"\x01\x02");
        framer.feed(b"\x03");

        let out: Vec<Frame> = framer.drain().collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bytes, vec![0x01, 0x02]);
        assert_eq!(out[1].bytes, vec![0x03]);
        assert!(out.iter().all(|f| f.complete));
    }

    #[test]
    fn test_forced_split_marks_incomplete() {
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\n".to_vec(),
            include_delimiter: false,
            max_frame_len: Some(4),
        };
        let mut framer = Framer::new(policy).unwrap();
        framer.feed(b"abcdefg\n");

        let out: Vec<Frame> = framer.drain().collect();
        assert_eq!(out[0].bytes, b"abcd");
        assert!(!out[0].complete);
        assert_eq!(out[1].bytes, b"efg");
        assert!(out[1].complete);
    }

    #[test]
    fn test_forced_split_never_cuts_partial_delimiter() {
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\r\n".to_vec(),
            include_delimiter: false,
            max_frame_len: Some(4),
        };
        let mut framer = Framer::new(policy).unwrap();
        framer.feed(b"abc\r");

        let out: Vec<Frame> = framer.drain().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, b"abc");
        assert!(!out[0].complete);
        assert_eq!(framer.pending(), b"\r");

        framer.feed(b"\n");
        assert_eq!(frames(&mut framer), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_full_buffer_refuses_new_bytes() {
        let mut framer = Framer::with_capacity(FramingPolicy::Passthrough, 4).unwrap();
        assert_eq!(framer.feed(b"abcdef"), 4);
        assert_eq!(framer.rejected_bytes(), 2);
        assert_eq!(framer.pending(), b"abcd");
    }

    #[test]
    fn test_full_buffer_without_terminator_recovers() {
        let mut framer = Framer::with_capacity(FramingPolicy::lines(), 4).unwrap();
        assert_eq!(framer.feed(b"abcd"), 4);

        let out: Vec<Frame> = framer.drain().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, b"abcd");
        assert!(!out[0].complete);
        assert!(framer.pending().is_empty());

        // The terminator of the oversized line ends an empty frame
        assert_eq!(framer.feed(b"\nxy\n"), 4);
        assert_eq!(frames(&mut framer), vec![Vec::new(), b"xy".to_vec()]);
        assert_eq!(framer.rejected_bytes(), 0);
    }

    #[test]
    fn test_full_buffer_keeps_partial_terminator() {
        let mut framer = Framer::with_capacity(FramingPolicy::delimited(b"\r\n"), 4).unwrap();
        assert_eq!(framer.feed(b"abc\r\n"), 4);

        let out: Vec<Frame> = framer.drain().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, b"abc");
        assert!(!out[0].complete);
        assert_eq!(framer.pending(), b"\r");

        assert_eq!(framer.feed(b"\n"), 1);
        assert_eq!(frames(&mut framer), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_flush_returns_leftovers() {
        let mut framer = Framer::new(FramingPolicy::lines()).unwrap();
        framer.feed(b"line\npartial");
        assert_eq!(frames(&mut framer), vec![b"line".to_vec()]);

        let rest = framer.flush().unwrap();
        assert_eq!(rest.bytes, b"partial");
        assert!(!rest.complete);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_invalid_policies() {
        assert_eq!(
            Framer::new(FramingPolicy::delimited(b"")).unwrap_err(),
            FramingError::EmptyDelimiter
        );
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\r\n".to_vec(),
            include_delimiter: false,
            max_frame_len: Some(1),
        };
        assert!(matches!(
            Framer::new(policy),
            Err(FramingError::FrameLimitTooSmall { .. })
        ));
        assert_eq!(
            Framer::with_capacity(FramingPolicy::Passthrough, 0).unwrap_err(),
            FramingError::ZeroCapacity
        );
        assert_eq!(
            Framer::with_capacity(FramingPolicy::delimited(b"\r\n"), 1).unwrap_err(),
            FramingError::CapacityBelowDelimiter {
                capacity: 1,
                delimiter_len: 2
            }
        );
    }

    #[test]
    fn test_policy_from_json() {
        let policy: FramingPolicy =
            serde_json::from_str(r#"{"type":"delimiter","delimiter":[13,10]}"#).unwrap();
        assert_eq!(policy, FramingPolicy::delimited(b"\r\n"));

        let policy: FramingPolicy = serde_json::from_str(r#"{"type":"passthrough"}"#).unwrap();
        assert_eq!(policy, FramingPolicy::Passthrough);
    }
}
