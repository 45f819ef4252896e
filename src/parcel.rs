//! Length-prefixed, 4-byte-padded binary encoding used on the wire.
//!
//! A [`Parcel`] wraps a byte buffer together with a read/write cursor and a
//! sticky "malformed" flag: once any read runs past the end of the buffer,
//! every subsequent read becomes a no-op that returns a default value, and
//! the flag stays set for the lifetime of the parcel. Writes are unaffected
//! by reads running off the end, but a parcel that was handed to us already
//! malformed (e.g. after a short read from the wire) refuses further writes
//! too, since nothing sane could come of appending to it.
//!
//! Every int32-aligned length, and the string-length convention, follow the
//! Android `Parcel` wire format: all multi-byte integers are little-endian
//! except the UTF-16 code units of a string16, which are written and read in
//! the host's native byte order.

use std::{
	cell::{Ref, RefCell, RefMut},
	rc::Rc,
};

/// Round `n` up to the next multiple of 4.
pub fn pad4(n: usize) -> usize {
	(n + 3) & !3
}

#[derive(Debug)]
struct Inner {
	buf: Vec<u8>,
	position: usize,
	malformed: bool,
}

impl Inner {
	fn ensure_available(&mut self, size: usize) -> bool {
		if self.buf.len() - self.position >= size {
			true
		} else {
			self.malformed = true;
			false
		}
	}
}

/// A reference-counted, interior-mutable parcel buffer.
///
/// Cloning a [`Parcel`] shares the same underlying buffer and cursor; it
/// does not copy the bytes. This mirrors the wire-protocol convention of
/// passing a parcel by handle to whichever layer needs to keep reading or
/// writing it.
#[derive(Debug, Clone)]
pub struct Parcel(Rc<RefCell<Inner>>);

impl Default for Parcel {
	fn default() -> Self {
		Self::new()
	}
}

impl Parcel {
	/// Create an empty parcel, ready for writing.
	pub fn new() -> Self {
		Self(Rc::new(RefCell::new(Inner { buf: Vec::new(), position: 0, malformed: false })))
	}

	/// Wrap an existing byte buffer for reading, with the cursor at the start.
	pub fn from_bytes(buf: Vec<u8>) -> Self {
		Self(Rc::new(RefCell::new(Inner { buf, position: 0, malformed: false })))
	}

	pub fn size(&self) -> usize {
		self.0.borrow().buf.len()
	}

	pub fn available(&self) -> usize {
		let inner = self.0.borrow();
		inner.buf.len() - inner.position
	}

	pub fn position(&self) -> usize {
		self.0.borrow().position
	}

	pub fn is_malformed(&self) -> bool {
		self.0.borrow().malformed
	}

	fn mark_malformed(&self) {
		self.0.borrow_mut().malformed = true;
	}

	/// Reserve `len` unpadded bytes for reading, advancing the cursor by
	/// `pad4(len)`. Returns `None` (and marks the parcel malformed) if fewer
	/// than `pad4(len)` bytes remain, or if `len` is large enough that
	/// padding it would overflow.
	pub fn read_inplace(&self, len: usize) -> Option<Ref<'_, [u8]>> {
		let start = {
			let mut inner = self.0.borrow_mut();
			if inner.malformed {
				return None;
			}
			if len > usize::MAX - 3 {
				inner.malformed = true;
				return None;
			}
			let padded = pad4(len);
			if !inner.ensure_available(padded) {
				return None;
			}
			let start = inner.position;
			inner.position += padded;
			start
		};
		Some(Ref::map(self.0.borrow(), move |inner| &inner.buf[start..start + len]))
	}

	/// Copy `buf.len()` bytes out of the parcel. A no-op if the parcel is
	/// (or becomes) malformed.
	pub fn read(&self, buf: &mut [u8]) {
		if self.is_malformed() {
			return;
		}
		if let Some(p) = self.read_inplace(buf.len()) {
			buf.copy_from_slice(&p);
		}
	}

	/// Copy `len` bytes out of the parcel into a freshly allocated `Vec`.
	/// Returns `None` for `len == 0` as well as for a malformed parcel —
	/// mirroring `g_memdup`, which the original C implementation relies on
	/// to return `NULL` whenever the requested size is zero.
	pub fn read_dup(&self, len: usize) -> Option<Vec<u8>> {
		if self.is_malformed() || len == 0 {
			return None;
		}
		self.read_inplace(len).map(|p| p.to_vec())
	}

	/// Reserve `len` unpadded bytes for writing at the end of the buffer,
	/// zero-filling the padding, and advance the cursor. A no-op (returning
	/// `None`) if the parcel is already malformed.
	pub fn write_inplace(&self, len: usize) -> Option<RefMut<'_, [u8]>> {
		let start = {
			let mut inner = self.0.borrow_mut();
			if inner.malformed {
				return None;
			}
			if len > usize::MAX - 3 {
				inner.malformed = true;
				return None;
			}
			let padded = pad4(len);
			let start = inner.position;
			let new_len = inner.buf.len() + padded;
			inner.buf.resize(new_len, 0);
			inner.position += padded;
			start
		};
		Some(RefMut::map(self.0.borrow_mut(), move |inner| &mut inner.buf[start..start + len]))
	}

	/// Append `buf` to the parcel, zero-padded to a multiple of 4 bytes.
	pub fn write(&self, buf: &[u8]) {
		if self.is_malformed() || buf.is_empty() {
			return;
		}
		if let Some(mut p) = self.write_inplace(buf.len()) {
			p.copy_from_slice(buf);
		}
	}

	pub fn read_byte(&self) -> u8 {
		if self.is_malformed() {
			return 0;
		}
		// Explicit mask rather than a narrowing cast left implicit: the wire
		// value is a full int32, and only its low 8 bits are defined.
		(self.read_int32() as u32 & 0xff) as u8
	}

	pub fn write_byte(&self, value: u8) {
		if self.is_malformed() {
			return;
		}
		self.write_int32(value as i32);
	}

	pub fn read_byte_array(&self) -> Option<Vec<u8>> {
		if self.is_malformed() {
			return None;
		}
		let len = self.read_int32();
		if self.is_malformed() || len < 0 {
			self.mark_malformed();
			return None;
		}
		self.read_inplace(len as usize).map(|p| p.to_vec())
	}

	pub fn write_byte_array(&self, data: &[u8]) {
		self.write_byte_array_buf(data);
	}

	pub fn write_byte_array_buf(&self, data: &[u8]) {
		if self.is_malformed() {
			return;
		}
		self.write_int32(data.len() as i32);
		if data.is_empty() {
			return;
		}
		self.write(data);
	}

	pub fn read_int32(&self) -> i32 {
		if self.is_malformed() {
			return 0;
		}
		match self.read_inplace(4) {
			Some(bytes) => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
			None => 0,
		}
	}

	pub fn write_int32(&self, value: i32) {
		if self.is_malformed() {
			return;
		}
		if let Some(mut p) = self.write_inplace(4) {
			p.copy_from_slice(&value.to_le_bytes());
		}
	}

	pub fn read_int32_array(&self) -> Option<Vec<i32>> {
		if self.is_malformed() {
			return None;
		}
		let len = self.read_int32();
		if self.is_malformed() || len < 0 {
			self.mark_malformed();
			return None;
		}
		let len = len as usize;
		let byte_len = match len.checked_mul(4) {
			Some(n) => n,
			None => {
				self.mark_malformed();
				return None;
			},
		};
		let bytes = self.read_inplace(byte_len)?;
		Some(bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
	}

	pub fn write_int32_array(&self, data: &[i32]) {
		self.write_int32_array_buf(data);
	}

	pub fn write_int32_array_buf(&self, data: &[i32]) {
		if self.is_malformed() {
			return;
		}
		self.write_int32(data.len() as i32);
		if data.is_empty() {
			return;
		}
		if let Some(mut p) = self.write_inplace(data.len() * 4) {
			for (chunk, value) in p.chunks_mut(4).zip(data) {
				chunk.copy_from_slice(&value.to_le_bytes());
			}
		}
	}

	/// Read a UTF-16 string: an int32 code-unit count, then that many code
	/// units plus a trailing null unit, each in host byte order (not
	/// little-endian, unlike every other field on the wire). A negative
	/// count means "null string" and yields `None` without marking the
	/// parcel malformed; a count that decodes to invalid UTF-16 does mark it
	/// malformed.
	pub fn read_string16(&self) -> Option<String> {
		if self.is_malformed() {
			return None;
		}
		let len = self.read_int32();
		if self.is_malformed() || len < 0 {
			return None;
		}
		let len = len as usize;
		let byte_len = len.checked_add(1)?.checked_mul(2)?;
		let units: Vec<u16> = {
			let bytes = self.read_inplace(byte_len)?;
			bytes[..len * 2].chunks_exact(2).map(|c| u16::from_ne_bytes([c[0], c[1]])).collect()
		};
		match String::from_utf16(&units) {
			Ok(s) => Some(s),
			Err(_) => {
				self.mark_malformed();
				None
			},
		}
	}

	/// Write a UTF-16 string, or a null-string marker (`-1`) for `None`.
	pub fn write_string16(&self, value: Option<&str>) {
		if self.is_malformed() {
			return;
		}
		let value = match value {
			Some(s) => s,
			None => {
				self.write_int32(-1);
				return;
			},
		};
		let units: Vec<u16> = value.encode_utf16().collect();
		self.write_int32(units.len() as i32);
		if let Some(mut p) = self.write_inplace((units.len() + 1) * 2) {
			for (chunk, unit) in p.chunks_mut(2).zip(units.iter().chain(std::iter::once(&0u16))) {
				chunk.copy_from_slice(&unit.to_ne_bytes());
			}
		}
	}

	/// Read an array of (possibly null) UTF-16 strings. On any malformed
	/// element the whole read fails and `None` is returned — unlike the
	/// underlying per-element reads, this never leaves a caller holding a
	/// partially filled-in length.
	pub fn read_string16_array(&self) -> Option<Vec<Option<String>>> {
		if self.is_malformed() {
			return None;
		}
		let len = self.read_int32();
		if self.is_malformed() || len < 0 {
			self.mark_malformed();
			return None;
		}
		let len = len as usize;
		let mut out = Vec::with_capacity(len);
		for _ in 0..len {
			let s = self.read_string16();
			if self.is_malformed() {
				return None;
			}
			out.push(s);
		}
		Some(out)
	}

	pub fn write_string16_array(&self, items: &[Option<&str>]) {
		if self.is_malformed() {
			return;
		}
		self.write_int32(items.len() as i32);
		for item in items {
			self.write_string16(*item);
		}
	}
}
