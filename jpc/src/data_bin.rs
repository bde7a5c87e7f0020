//! Incrementally delivered byte stores and the readers over them.
//!
//! A [`DataBin`] is filled by the transport one delivery at a time and read
//! by the codec while it is still incomplete. Running out of delivered bytes
//! is reported as [`Unavailable`], which callers turn into a pause rather
//! than an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The bytes a read needs have not been delivered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailable;

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("data not yet available")
    }
}

/// Positioned reads from a possibly incomplete byte store.
///
/// Failed reads leave the position unchanged.
pub trait DataBinRead {
    fn seek(&mut self, offset: u64);

    fn position(&self) -> u64;

    /// Number of bytes currently resident, counted from offset 0.
    fn available(&self) -> u64;

    fn read_byte(&mut self) -> Result<u8, Unavailable>;

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), Unavailable>;
}

/// Growable, append-only byte buffer of one in-class identifier.
#[derive(Debug, Default)]
pub struct DataBin {
    in_class_id: u64,
    bytes: Mutex<Vec<u8>>,
    complete: AtomicBool,
}

impl DataBin {
    pub fn new(in_class_id: u64) -> Self {
        DataBin {
            in_class_id,
            ..Default::default()
        }
    }

    pub fn with_contents(in_class_id: u64, bytes: Vec<u8>, complete: bool) -> Self {
        DataBin {
            in_class_id,
            bytes: Mutex::new(bytes),
            complete: AtomicBool::new(complete),
        }
    }

    pub fn in_class_id(&self) -> u64 {
        self.in_class_id
    }

    fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        // The buffer is only ever appended to, a panicking writer cannot
        // leave it inconsistent.
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one delivery.
    pub fn append(&self, data: &[u8]) {
        self.bytes().extend_from_slice(data);
    }

    /// Appends the final delivery; the bin holds every byte afterwards.
    pub fn append_final(&self, data: &[u8]) {
        let mut bytes = self.bytes();
        bytes.extend_from_slice(data);
        self.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Copy of the bytes delivered so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes().clone()
    }

    /// Locks the bin against deliveries for a sequence of seeks and reads.
    /// The lock is released when the guard is dropped.
    pub fn lock(&self) -> DataBinGuard<'_> {
        DataBinGuard {
            bytes: self.bytes(),
            position: 0,
        }
    }
}

/// Exclusive reader over a [`DataBin`].
pub struct DataBinGuard<'a> {
    bytes: MutexGuard<'a, Vec<u8>>,
    position: u64,
}

impl DataBinRead for DataBinGuard<'_> {
    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn available(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_byte(&mut self) -> Result<u8, Unavailable> {
        let byte = *self.bytes.get(self.position as usize).ok_or(Unavailable)?;
        self.position += 1;
        Ok(byte)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), Unavailable> {
        read_slice(&self.bytes, &mut self.position, buf)
    }
}

/// Reader over bytes that are all in memory, e.g. the tile data of a whole
/// codestream.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    position: u64,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceReader { data, position: 0 }
    }
}

impl DataBinRead for SliceReader<'_> {
    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn available(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_byte(&mut self) -> Result<u8, Unavailable> {
        let byte = *self.data.get(self.position as usize).ok_or(Unavailable)?;
        self.position += 1;
        Ok(byte)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), Unavailable> {
        read_slice(self.data, &mut self.position, buf)
    }
}

fn read_slice(data: &[u8], position: &mut u64, buf: &mut [u8]) -> Result<(), Unavailable> {
    let start = usize::try_from(*position).map_err(|_| Unavailable)?;
    let end = start.checked_add(buf.len()).ok_or(Unavailable)?;
    let source = data.get(start..end).ok_or(Unavailable)?;
    buf.copy_from_slice(source);
    *position = end as u64;
    Ok(())
}

/// Bit position within a packet header, kept between decode attempts.
///
/// B.10.1: a byte following 0xFF carries only seven bits; its most
/// significant bit is a stuffed zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitCursor {
    /// Offset of the next byte to load.
    offset: u64,
    /// The most recently loaded byte.
    byte: u8,
    bits_left: u8,
}

impl BitCursor {
    pub fn new(offset: u64) -> Self {
        BitCursor {
            offset,
            byte: 0,
            bits_left: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_bit<R: DataBinRead + ?Sized>(&mut self, reader: &mut R) -> Result<bool, Unavailable> {
        if self.bits_left == 0 {
            reader.seek(self.offset);
            let byte = reader.read_byte()?;
            self.bits_left = if self.byte == 0xFF { 7 } else { 8 };
            self.byte = byte;
            self.offset += 1;
        }
        self.bits_left -= 1;
        Ok((self.byte >> self.bits_left) & 1 == 1)
    }

    /// Reads `n` bits, most significant first. On failure the cursor may
    /// have advanced; callers needing all or nothing keep a copy.
    pub fn read_bits<R: DataBinRead + ?Sized>(
        &mut self,
        reader: &mut R,
        n: u8,
    ) -> Result<u32, Unavailable> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit(reader)? as u32;
        }
        Ok(value)
    }

    /// Offset of the first byte after the header bits read so far.
    ///
    /// If the last byte was 0xFF, the next byte still carries a stuffed bit
    /// and belongs to the header, so it has to be available.
    pub fn end_offset<R: DataBinRead + ?Sized>(&self, reader: &mut R) -> Result<u64, Unavailable> {
        if self.byte == 0xFF {
            if reader.available() <= self.offset {
                return Err(Unavailable);
            }
            return Ok(self.offset + 1);
        }
        Ok(self.offset)
    }
}
