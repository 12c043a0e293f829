//! Streaming reader for block-compressed cache files.
//!
//! A cache file starts with a little-endian `capacity:i32` giving the
//! largest possible decompressed block size, followed by any number of
//! blocks, each a `cmpLen:i32` prefix and `cmpLen` bytes of LZ4-compressed
//! data. Every decompressed block is a concatenation of whole messages (see
//! [`crate::message`]); the producer never splits a message across blocks.
//!
//! [`CacheReader`] owns the byte source plus two buffers allocated once at
//! open: the decompressed block buffer of exactly `capacity` bytes and a
//! compressed staging buffer sized to the codec's worst case. Each call to
//! [`CacheReader::next`] yields a zero-copy [`MessageView`] into the block
//! buffer, loading and decompressing the next block when the cursor runs off
//! the current one.

use crate::message::{HEADER_LEN, MessageView};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Headroom added on top of the codec's worst-case compressed size when
/// sizing the staging buffer.
const CMP_SLACK: usize = 32;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The leading capacity field is not a positive block size.
    #[error("invalid block capacity ({0}) in cache header")]
    InvalidFormat(i32),
    /// The file cannot be trusted past this point.
    #[error("corrupt block: {0}")]
    CorruptBlock(String),
    /// The source ended inside a block that declared more bytes.
    #[error("unexpected end of stream inside a compressed block")]
    UnexpectedEof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scan,
    Done,
    Failed(Fault),
}

/// Error class remembered after a failure so later calls keep reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Corrupt,
    Truncated,
    Io,
}

impl Fault {
    fn of(err: &CacheError) -> Self {
        match err {
            CacheError::UnexpectedEof => Self::Truncated,
            CacheError::Io(_) => Self::Io,
            _ => Self::Corrupt,
        }
    }
}

/// Pull-based reader yielding one message view per call.
pub struct CacheReader<R = BufReader<File>> {
    src: R,
    /// Decompressed data of the current block; always `capacity` bytes long.
    buf: Vec<u8>,
    /// Staging area for one compressed block.
    cmp: Vec<u8>,
    /// Cursor into `buf`.
    offset: usize,
    /// Bytes of `buf` filled by the current block.
    block_len: usize,
    state: State,
}

impl CacheReader<BufReader<File>> {
    /// Open a cache file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let file = File::open(path)?;
        Self::from_source(BufReader::new(file))
    }
}

impl<R: Read> CacheReader<R> {
    /// Build a reader over any byte source positioned at the start of the
    /// cache stream. Reads the capacity field and allocates both buffers.
    pub fn from_source(mut src: R) -> Result<Self, CacheError> {
        let mut cap_bytes = [0u8; 4];
        src.read_exact(&mut cap_bytes)?;
        let capacity = i32::from_le_bytes(cap_bytes);
        if capacity <= 0 {
            return Err(CacheError::InvalidFormat(capacity));
        }
        let capacity = capacity as usize;
        Ok(Self {
            src,
            buf: vec![0u8; capacity],
            cmp: vec![0u8; lz4_flex::block::get_maximum_output_size(capacity) + CMP_SLACK],
            offset: 0,
            block_len: 0,
            state: State::Scan,
        })
    }

    /// Largest decompressed block size this file declares.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Advance to the next message.
    ///
    /// `Ok(None)` is clean end-of-stream (no more blocks, or the zero-size
    /// sentinel header was reached). Any error is final for this reader:
    /// later calls keep reporting the same error class instead of resuming.
    pub fn next(&mut self) -> Result<Option<MessageView<'_>>, CacheError> {
        match self.state {
            State::Done => return Ok(None),
            State::Failed(Fault::Corrupt) => {
                return Err(CacheError::CorruptBlock("reader already failed".into()));
            }
            State::Failed(Fault::Truncated) => return Err(CacheError::UnexpectedEof),
            State::Failed(Fault::Io) => {
                return Err(CacheError::Io(io::Error::other("reader already failed")));
            }
            State::Scan => {}
        }
        match self.step() {
            Ok(Some((start, end))) => MessageView::new(&self.buf[start..end])
                .map(Some)
                .ok_or_else(|| CacheError::CorruptBlock("message shorter than header".into())),
            Ok(None) => Ok(None),
            Err(e) => {
                self.state = State::Failed(Fault::of(&e));
                Err(e)
            }
        }
    }

    /// Move the cursor over one message and return its byte range in `buf`,
    /// or `None` at clean end-of-stream.
    fn step(&mut self) -> Result<Option<(usize, usize)>, CacheError> {
        while self.offset >= self.block_len {
            if !self.load_block()? {
                self.state = State::Done;
                return Ok(None);
            }
        }

        let at = self.offset;
        let header = MessageView::new(&self.buf[at..]).ok_or_else(|| {
            CacheError::CorruptBlock(format!(
                "message header at offset {at} runs past buffer capacity {}",
                self.buf.len()
            ))
        })?;
        let size = header.size() as usize;
        if size == 0 {
            // Sentinel header: the producer marks true end-of-file with it,
            // so the whole read ends here, not just the current block.
            self.state = State::Done;
            return Ok(None);
        }
        if size < HEADER_LEN {
            return Err(CacheError::CorruptBlock(format!(
                "message size {size} smaller than its header"
            )));
        }
        let end = at + size;
        if end > self.block_len {
            return Err(CacheError::CorruptBlock(format!(
                "message at offset {at} claims {size} bytes but block holds {}",
                self.block_len
            )));
        }
        self.offset = end;
        Ok(Some((at, end)))
    }

    /// Read and decompress the next block into `buf`.
    ///
    /// Returns `Ok(false)` at clean end-of-stream: no length prefix left, a
    /// short prefix, or a non-positive declared length.
    fn load_block(&mut self) -> Result<bool, CacheError> {
        let mut len_bytes = [0u8; 4];
        if let Err(e) = self.src.read_exact(&mut len_bytes) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Ok(false)
            } else {
                Err(e.into())
            };
        }
        let cmp_len = i32::from_le_bytes(len_bytes);
        if cmp_len <= 0 {
            return Ok(false);
        }
        let cmp_len = cmp_len as usize;
        if cmp_len > self.cmp.len() {
            return Err(CacheError::CorruptBlock(format!(
                "compressed length {cmp_len} exceeds staging capacity {}",
                self.cmp.len()
            )));
        }

        if let Err(e) = self.src.read_exact(&mut self.cmp[..cmp_len]) {
            return Err(if e.kind() == io::ErrorKind::UnexpectedEof {
                CacheError::UnexpectedEof
            } else {
                e.into()
            });
        }

        // Decompression refuses to write past `buf`, so a block bigger than
        // the declared capacity surfaces here as corruption.
        let block_len = lz4_flex::block::decompress_into(&self.cmp[..cmp_len], &mut self.buf)
            .map_err(|e| CacheError::CorruptBlock(format!("block decompression failed: {e}")))?;
        self.block_len = block_len;
        self.offset = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, TICK_LEN};
    use std::io::Cursor;

    fn encode_tick(ts: i64, id: i64, price: i64, volume: i64, side: u8) -> Vec<u8> {
        let mut b = Vec::with_capacity(TICK_LEN);
        b.extend_from_slice(&1i16.to_le_bytes());
        b.extend_from_slice(&(TICK_LEN as u16).to_le_bytes());
        b.extend_from_slice(&ts.to_le_bytes());
        b.extend_from_slice(&id.to_le_bytes());
        b.extend_from_slice(&price.to_le_bytes());
        b.extend_from_slice(&volume.to_le_bytes());
        b.push(side);
        b
    }

    fn sentinel() -> Vec<u8> {
        vec![0u8; crate::message::HEADER_LEN]
    }

    fn cache_bytes(capacity: i32, blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&capacity.to_le_bytes());
        for block in blocks {
            let cmp = lz4_flex::block::compress(block);
            out.extend_from_slice(&(cmp.len() as i32).to_le_bytes());
            out.extend_from_slice(&cmp);
        }
        out
    }

    fn reader_over(bytes: Vec<u8>) -> CacheReader<Cursor<Vec<u8>>> {
        CacheReader::from_source(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn rejects_non_positive_capacity() {
        for cap in [0i32, -5] {
            let err = CacheReader::from_source(Cursor::new(cap.to_le_bytes().to_vec()))
                .err()
                .unwrap();
            assert!(matches!(err, CacheError::InvalidFormat(c) if c == cap));
        }
    }

    #[test]
    fn empty_file_after_capacity_is_clean_eof() {
        let mut r = reader_over(cache_bytes(64, &[]));
        assert!(r.next().unwrap().is_none());
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn sentinel_ends_stream_without_losing_prior_messages() {
        let mut block = encode_tick(10, 1, 10_000, 5, 1);
        block.extend_from_slice(&sentinel());
        let mut r = reader_over(cache_bytes(64, &[block]));

        let msg = r.next().unwrap().unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::Tick));
        assert_eq!(msg.size() as usize, TICK_LEN);
        assert!(r.next().unwrap().is_none());
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn sentinel_skips_following_blocks() {
        // The sentinel ends the whole read, not just the block it sits in.
        let mut first = encode_tick(10, 1, 100, 1, 1);
        first.extend_from_slice(&sentinel());
        let second = encode_tick(11, 2, 200, 2, 2);
        let mut r = reader_over(cache_bytes(64, &[first, second]));

        assert!(r.next().unwrap().is_some());
        assert!(r.next().unwrap().is_none());
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn message_overrunning_block_is_corrupt() {
        // Header claims 60 bytes but the block only holds the header.
        let mut block = vec![0u8; crate::message::HEADER_LEN];
        block[2..4].copy_from_slice(&60u16.to_le_bytes());
        let mut r = reader_over(cache_bytes(64, &[block]));

        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
        // Failure is final.
        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
    }

    #[test]
    fn sub_header_size_is_corrupt() {
        let mut block = vec![0u8; crate::message::HEADER_LEN];
        block[2..4].copy_from_slice(&5u16.to_le_bytes());
        let mut r = reader_over(cache_bytes(64, &[block]));
        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
    }

    #[test]
    fn truncated_compressed_block_is_unexpected_eof() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&64i32.to_le_bytes());
        bytes.extend_from_slice(&50i32.to_le_bytes());
        bytes.extend_from_slice(&[0xAB; 10]); // 40 bytes short
        let mut r = reader_over(bytes);

        assert!(matches!(r.next(), Err(CacheError::UnexpectedEof)));
        assert!(matches!(r.next(), Err(CacheError::UnexpectedEof)));
    }

    #[test]
    fn oversized_declared_length_is_corrupt() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16i32.to_le_bytes());
        bytes.extend_from_slice(&100_000i32.to_le_bytes());
        let mut r = reader_over(bytes);
        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
    }

    #[test]
    fn block_decompressing_past_capacity_is_corrupt() {
        // 64 zero bytes compress small but decompress past capacity 16.
        let block = vec![0u8; 64];
        let mut r = reader_over(cache_bytes(16, &[block]));
        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
        assert!(matches!(r.next(), Err(CacheError::CorruptBlock(_))));
    }

    #[test]
    fn empty_blocks_are_skipped() {
        let blocks = vec![Vec::new(), encode_tick(7, 3, 500, 1, 2)];
        let mut r = reader_over(cache_bytes(64, &blocks));
        let msg = r.next().unwrap().unwrap();
        assert_eq!(msg.as_tick().unwrap().id(), 3);
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn buffers_are_sized_from_capacity() {
        let r = reader_over(cache_bytes(64, &[]));
        assert_eq!(r.capacity(), 64);
    }
}
