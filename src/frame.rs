//! Extraction of length-prefixed frames from a non-blocking byte stream.
//!
//! The wire format is: a little-endian `u32` length prefix that must be
//! greater than zero, followed by that many payload bytes. [`FrameReader`]
//! owns a single growable buffer and runs a two-state loop — waiting for the
//! 4-byte length prefix, then waiting for the payload it announced — pulling
//! as many complete frames out of one `read()` as the buffer holds.

use log::{debug, trace, warn};
use std::{
	collections::VecDeque,
	io::{self, ErrorKind, Read},
};

const LENGTH_PREFIX_SIZE: usize = 4;
const INITIAL_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	ExpectLength,
	ExpectPayload(u32),
}

/// Extracts length-prefixed frames from a single stream, growing its
/// internal buffer (by doubling) whenever a single frame does not fit.
#[derive(Debug)]
pub struct FrameReader {
	buf: Vec<u8>,
	read_idx: usize,
	write_idx: usize,
	state: State,
	extracted: VecDeque<Vec<u8>>,
}

impl Default for FrameReader {
	fn default() -> Self {
		Self::new()
	}
}

impl FrameReader {
	pub fn new() -> Self {
		Self {
			buf: vec![0u8; INITIAL_BUFFER_SIZE],
			read_idx: 0,
			write_idx: 0,
			state: State::ExpectLength,
			extracted: VecDeque::new(),
		}
	}

	/// Pop the oldest fully-extracted frame payload, if any.
	pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
		self.extracted.pop_front()
	}

	fn compact(&mut self) {
		if self.read_idx == 0 {
			return;
		}
		self.buf.copy_within(self.read_idx..self.write_idx, 0);
		self.write_idx -= self.read_idx;
		self.read_idx = 0;
	}

	/// Ensure at least `want` bytes of room exist from `read_idx` onward,
	/// compacting first and then doubling the buffer until it fits.
	fn ensure_capacity(&mut self, want: usize) {
		self.compact();
		let required = self.read_idx + want;
		if self.buf.len() < required {
			let mut cap = self.buf.len().max(1);
			while cap < required {
				cap *= 2;
			}
			trace!("growing frame buffer from {} to {cap} bytes", self.buf.len());
			self.buf.resize(cap, 0);
		}
	}

	/// Read as much as is available from `stream` without blocking, and
	/// extract every complete frame the buffer now holds. Returns `Ok(true)`
	/// if the stream reported EOF (no more frames will ever arrive),
	/// `Ok(false)` if the read would block having made whatever progress it
	/// could, and `Err` for any other I/O failure, which is fatal to the
	/// connection that owns this reader.
	pub fn fill<S: Read>(&mut self, stream: &mut S) -> io::Result<bool> {
		loop {
			let want = match self.state {
				State::ExpectLength => LENGTH_PREFIX_SIZE,
				State::ExpectPayload(len) => len as usize,
			};
			self.ensure_capacity(want);

			while self.write_idx - self.read_idx < want {
				match stream.read(&mut self.buf[self.write_idx..]) {
					Ok(0) => {
						debug!("frame stream reached EOF");
						return Ok(true);
					},
					Ok(n) => {
						self.write_idx += n;
					},
					Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
					Err(err) if err.kind() == ErrorKind::Interrupted => continue,
					Err(err) => {
						warn!("frame stream read failed: {err}");
						return Err(err);
					},
				}
			}

			match self.state {
				State::ExpectLength => {
					let bytes = &self.buf[self.read_idx..self.read_idx + LENGTH_PREFIX_SIZE];
					let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
					self.read_idx += LENGTH_PREFIX_SIZE;
					if len == 0 {
						warn!("frame length prefix was zero");
						return Err(io::Error::new(ErrorKind::InvalidData, "frame length prefix must be nonzero"));
					}
					self.state = State::ExpectPayload(len);
				},
				State::ExpectPayload(len) => {
					let len = len as usize;
					let payload = self.buf[self.read_idx..self.read_idx + len].to_vec();
					self.read_idx += len;
					self.extracted.push_back(payload);
					self.state = State::ExpectLength;
					if self.read_idx == self.write_idx {
						self.compact();
					}
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct ChunkedStream {
		chunks: VecDeque<Vec<u8>>,
	}

	impl ChunkedStream {
		fn new(chunks: Vec<Vec<u8>>) -> Self {
			Self { chunks: chunks.into() }
		}
	}

	impl Read for ChunkedStream {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			match self.chunks.pop_front() {
				Some(chunk) => {
					let n = chunk.len().min(buf.len());
					buf[..n].copy_from_slice(&chunk[..n]);
					if n < chunk.len() {
						let mut rest = chunk;
						rest.drain(..n);
						self.chunks.push_front(rest);
					}
					Ok(n)
				},
				None => Err(ErrorKind::WouldBlock.into()),
			}
		}
	}

	fn frame(payload: &[u8]) -> Vec<u8> {
		let mut out = (payload.len() as u32).to_le_bytes().to_vec();
		out.extend_from_slice(payload);
		out
	}

	#[test]
	fn single_frame_in_one_chunk() {
		let mut stream = ChunkedStream::new(vec![frame(b"hello")]);
		let mut reader = FrameReader::new();
		assert!(!reader.fill(&mut stream).unwrap());
		assert_eq!(reader.pop_frame().unwrap(), b"hello".to_vec());
		assert!(reader.pop_frame().is_none());
	}

	#[test]
	fn frame_split_across_chunks_is_reassembled() {
		let whole = frame(b"abcdefgh");
		let (a, b) = whole.split_at(3);
		let mut stream = ChunkedStream::new(vec![a.to_vec(), b.to_vec()]);
		let mut reader = FrameReader::new();
		assert!(!reader.fill(&mut stream).unwrap());
		assert_eq!(reader.pop_frame().unwrap(), b"abcdefgh".to_vec());
	}

	#[test]
	fn multiple_frames_in_one_read() {
		let mut bytes = frame(b"one");
		bytes.extend(frame(b"two"));
		let mut stream = ChunkedStream::new(vec![bytes]);
		let mut reader = FrameReader::new();
		assert!(!reader.fill(&mut stream).unwrap());
		assert_eq!(reader.pop_frame().unwrap(), b"one".to_vec());
		assert_eq!(reader.pop_frame().unwrap(), b"two".to_vec());
	}

	#[test]
	fn zero_length_prefix_is_fatal() {
		crate::init_test_logging();
		let mut stream = ChunkedStream::new(vec![vec![0, 0, 0, 0]]);
		let mut reader = FrameReader::new();
		assert!(reader.fill(&mut stream).is_err());
	}

	#[test]
	fn large_payload_grows_the_buffer() {
		crate::init_test_logging();
		let payload = vec![0xabu8; INITIAL_BUFFER_SIZE * 3];
		let mut stream = ChunkedStream::new(vec![frame(&payload)]);
		let mut reader = FrameReader::new();
		assert!(!reader.fill(&mut stream).unwrap());
		assert_eq!(reader.pop_frame().unwrap(), payload);
	}

	#[test]
	fn eof_is_reported_once_stream_closes() {
		struct EofStream;
		impl Read for EofStream {
			fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
				Ok(0)
			}
		}
		let mut reader = FrameReader::new();
		assert!(reader.fill(&mut EofStream).unwrap());
	}
}
