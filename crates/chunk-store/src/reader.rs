use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{ChunkStoreError, DEFAULT_CHUNK_SIZE};

/// One sequential piece of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub data: Vec<u8>,
    /// True exactly for the piece that reaches the end of the file.
    pub is_last: bool,
}

/// Reads a file in fixed-size pieces, one at a time, on demand.
///
/// The file size is captured at open; bytes appended afterwards are not
/// served by this reader.
#[derive(Debug)]
pub struct ChunkReader {
    file: tokio::fs::File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
    next_index: u32,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, ChunkStoreError> {
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE as usize
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
            next_index: 0,
        })
    }

    /// Skips ahead to `offset`, numbering the next piece `next_index` (for resume).
    pub async fn seek_to(&mut self, offset: u64, next_index: u32) -> Result<(), ChunkStoreError> {
        let offset = offset.min(self.file_size);
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        self.next_index = next_index;
        Ok(())
    }

    /// Reads the next piece. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ChunkStoreError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut data = vec![0u8; read_size];
        self.file.read_exact(&mut data).await?;

        self.offset += read_size as u64;
        let chunk = Chunk {
            index: self.next_index,
            data,
            is_last: self.offset >= self.file_size,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size captured at open.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}
