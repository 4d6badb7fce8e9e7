//! Read path: chunk fetch, decode, verify, and sub-chunk slicing
//!
//! One decoded chunk is cached at a time; sequential reads after a seek
//! hit the cache for every byte of the current chunk. Uncompressed chunks
//! carry a trailing Adler-32 which is verified here; a mismatch is not
//! fatal, it is recorded in the CRC-error list and the chunk is optionally
//! wiped.

use std::io::{Read, Seek, SeekFrom};

use tracing::warn;

use crate::common::checksum::chunk_checksum;
use crate::common::compress::ChunkDecompressor;
use crate::common::io_pool::FileIoPool;
use crate::error::{EwfError, Result};
use crate::media::{MediaInfo, SectorErrorList};
use crate::offset_table::OffsetTable;
use crate::segment_table::DeltaSegment;

/// Single-slot cache holding the current decoded chunk
pub struct ChunkCache {
    index: Option<u64>,
    data: Vec<u8>,
}

impl ChunkCache {
    fn new(chunk_size: usize) -> Self {
        Self {
            index: None,
            data: Vec::with_capacity(chunk_size),
        }
    }

    /// Drop the cached chunk (after a delta write shadows it)
    pub fn invalidate(&mut self) {
        self.index = None;
    }
}

/// Reusable read-side buffers and policy
pub struct ReadState {
    cache: ChunkCache,
    decompressor: ChunkDecompressor,
    /// Stored (possibly compressed) payload buffer, reused across chunks
    stored_buf: Vec<u8>,
    pub wipe_on_error: bool,
}

impl ReadState {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            cache: ChunkCache::new(chunk_size),
            decompressor: ChunkDecompressor::new(),
            stored_buf: Vec::with_capacity(chunk_size + 4),
            wipe_on_error: false,
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }
}

/// Length of chunk `chunk` given the media geometry (the final chunk may
/// be partial)
fn expected_chunk_len(media: &MediaInfo, chunk: u64) -> usize {
    let chunk_size = media.chunk_size() as u64;
    let start = chunk * chunk_size;
    (media.media_size() - start).min(chunk_size) as usize
}

/// Copy bytes out of the logical media into `buf`, starting at `position`.
/// Returns the bytes copied, short only at end of media.
#[allow(clippy::too_many_arguments)]
pub fn read_media(
    pool: &mut FileIoPool,
    offsets: &OffsetTable,
    media: &MediaInfo,
    crc_errors: &mut SectorErrorList,
    mut delta: Option<&mut DeltaSegment>,
    state: &mut ReadState,
    position: u64,
    buf: &mut [u8],
) -> Result<usize> {
    let media_size = media.media_size();
    if position >= media_size || buf.is_empty() {
        return Ok(0);
    }
    let chunk_size = media.chunk_size() as u64;
    let to_read = (buf.len() as u64).min(media_size - position) as usize;

    let mut total = 0usize;
    let mut pos = position;
    while total < to_read {
        let chunk = pos / chunk_size;
        let intra = (pos % chunk_size) as usize;

        ensure_chunk_cached(
            pool,
            offsets,
            media,
            crc_errors,
            delta.as_deref_mut(),
            state,
            chunk,
        )?;

        let data = &state.cache.data;
        let take = (data.len() - intra).min(to_read - total);
        buf[total..total + take].copy_from_slice(&data[intra..intra + take]);
        total += take;
        pos += take as u64;
    }
    Ok(total)
}

/// Fetch, decode, and verify one chunk into the cache slot
fn ensure_chunk_cached(
    pool: &mut FileIoPool,
    offsets: &OffsetTable,
    media: &MediaInfo,
    crc_errors: &mut SectorErrorList,
    delta: Option<&mut DeltaSegment>,
    state: &mut ReadState,
    chunk: u64,
) -> Result<()> {
    if state.cache.index == Some(chunk) {
        return Ok(());
    }
    state.cache.index = None;
    let expected_len = expected_chunk_len(media, chunk);

    // Corrected chunks shadow the primary segments
    if let Some(delta) = delta {
        if let Some(data) = delta.read_chunk(chunk)? {
            if data.len() != expected_len {
                return Err(EwfError::CorruptContainer(format!(
                    "delta chunk {} is {} bytes, expected {}",
                    chunk,
                    data.len(),
                    expected_len
                )));
            }
            state.cache.data = data;
            state.cache.index = Some(chunk);
            return Ok(());
        }
    }

    let location = offsets.get(chunk)?;

    let file = pool.get_file(location.segment as usize - 1)?;
    file.seek(SeekFrom::Start(location.file_offset))
        .map_err(|e| EwfError::io(format!("seek to chunk {}", chunk), e))?;
    state.stored_buf.resize(location.size as usize, 0);
    file.read_exact(&mut state.stored_buf)
        .map_err(|e| EwfError::io(format!("read chunk {}", chunk), e))?;

    if location.compressed {
        // The trailing bytes of the stored stream are zlib's own check,
        // not a chunk checksum; inflate failure is the corruption signal
        state.cache.data.resize(media.chunk_size() as usize, 0);
        let n = state
            .decompressor
            .decompress(&state.stored_buf, &mut state.cache.data)
            .map_err(|e| EwfError::ChunkCorrupt {
                chunk,
                detail: e.to_string(),
            })?;
        if n != expected_len {
            return Err(EwfError::ChunkCorrupt {
                chunk,
                detail: format!("decompressed to {} bytes, expected {}", n, expected_len),
            });
        }
        state.cache.data.truncate(n);
    } else {
        if (location.size as usize) != expected_len + 4 {
            return Err(EwfError::CorruptContainer(format!(
                "chunk {} stores {} bytes, expected {} plus checksum",
                chunk, location.size, expected_len
            )));
        }
        let data = &state.stored_buf[..expected_len];
        let stored_crc =
            u32::from_le_bytes(state.stored_buf[expected_len..].try_into().unwrap());

        state.cache.data.clear();
        state.cache.data.extend_from_slice(data);

        let computed = chunk_checksum(data);
        if stored_crc != computed {
            let start_sector = chunk * media.sectors_per_chunk as u64;
            let sectors = (expected_len as u64).div_ceil(media.bytes_per_sector as u64) as u32;
            warn!(
                chunk,
                start_sector,
                stored_crc,
                computed_crc = computed,
                "chunk checksum mismatch"
            );
            crc_errors.add(start_sector, sectors)?;
            if state.wipe_on_error {
                state.cache.data.iter_mut().for_each(|b| *b = 0);
            }
        }
    }

    state.cache.index = Some(chunk);
    Ok(())
}
