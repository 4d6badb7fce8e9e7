//! Write path: chunking, compression, segment budgeting, finalization
//!
//! User bytes accumulate in a chunk-sized staging buffer. Each full chunk
//! is compressed when the policy asks for it and profitable, appended to
//! the current segment's `sectors` body, and indexed. When the segment
//! cannot fit another chunk plus the projected table overhead, the tables
//! and a `next` marker are emitted and the writer rolls to a fresh
//! segment file. Finalize flushes the partial tail chunk, settles the
//! geometry, and emits the error/digest/hash/done tail.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use md5::{Digest, Md5};
use sha1::Sha1;
use tracing::{debug, trace};

use crate::common::checksum::chunk_checksum;
use crate::common::compress::ChunkCompressor;
use crate::common::filenames::default_segment_path;
use crate::common::FilenameGenerator;
use crate::error::{EwfError, Result};
use crate::format::{CompressionLevel, EwfFormat, ShortInputPolicy};
use crate::header_values::{self, ValueTable};
use crate::media::{DigestState, MediaInfo, SectorErrorList};
use crate::offset_table::{ChunkLocation, OffsetTable};
use crate::section::{self, SECTION_DESCRIPTOR_SIZE, TABLE_ENTRY_COMPRESSED, TABLE_HEADER_SIZE};
use crate::segment::SegmentWriter;

/// Default maximum size of one segment file
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 650 * 1024 * 1024;

/// Smallest accepted segment budget
pub const MIN_SEGMENT_FILE_SIZE: u64 = 1024 * 1024;

/// Table entries hold 31-bit offsets relative to their sectors section,
/// which caps how large a segment may grow
pub const MAX_SEGMENT_FILE_SIZE: u64 = 0x7FFF_FFFF;

/// Projected size of the section tail a segment must always have room
/// for: the table and table2 sections holding `entries` offsets plus a
/// terminal next/done descriptor
fn table_overhead(entries: u64) -> u64 {
    3 * SECTION_DESCRIPTOR_SIZE + 2 * (TABLE_HEADER_SIZE as u64 + 4 * entries + 4)
}

fn no_open_segment() -> EwfError {
    EwfError::InvalidArgument("no segment file is open".to_string())
}

/// Mutable views of the handle state the writer operates on
pub struct WriteContext<'a> {
    pub media: &'a mut MediaInfo,
    pub format: EwfFormat,
    pub header_values: &'a ValueTable,
    pub digests: &'a mut DigestState,
    pub acquiry_errors: &'a mut SectorErrorList,
    pub offsets: &'a mut OffsetTable,
}

struct OpenSegment {
    writer: SegmentWriter,
    /// Body offset of the open sectors section; table offsets are
    /// relative to it
    sectors_base: Option<u64>,
    pending_entries: Vec<u32>,
}

/// Write-side state owned by a write-mode handle
pub struct WriteState {
    pub segment_file_size: u64,
    pub input_size: Option<u64>,
    pub short_input_policy: ShortInputPolicy,
    pub compress_empty_block: bool,
    pub filename_generator: FilenameGenerator,
    base_path: PathBuf,
    staging: Vec<u8>,
    compress_buf: Vec<u8>,
    compressor: ChunkCompressor,
    md5: Md5,
    sha1: Sha1,
    chunks_written: u64,
    bytes_written: u64,
    segment_paths: Vec<PathBuf>,
    current: Option<OpenSegment>,
    /// Location of the volume body in segment 1, back-patched at finalize
    volume_patch: Option<(PathBuf, u64)>,
    initialized: bool,
    finalized: bool,
}

impl WriteState {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            input_size: None,
            short_input_policy: ShortInputPolicy::ZeroPad,
            compress_empty_block: false,
            filename_generator: Box::new(|base, number, format| {
                default_segment_path(base, number, format)
            }),
            base_path,
            staging: Vec::new(),
            compress_buf: Vec::new(),
            compressor: ChunkCompressor::new(flate2::Compression::fast()),
            md5: Md5::new(),
            sha1: Sha1::new(),
            chunks_written: 0,
            bytes_written: 0,
            segment_paths: Vec::new(),
            current: None,
            volume_patch: None,
            initialized: false,
            finalized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn amount_of_chunks_written(&self) -> u64 {
        self.chunks_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn segment_paths(&self) -> &[PathBuf] {
        &self.segment_paths
    }

    pub fn set_segment_file_size(&mut self, size: u64) -> Result<()> {
        if !(MIN_SEGMENT_FILE_SIZE..=MAX_SEGMENT_FILE_SIZE).contains(&size) {
            return Err(EwfError::InvalidArgument(format!(
                "segment file size {} outside {}..{}",
                size, MIN_SEGMENT_FILE_SIZE, MAX_SEGMENT_FILE_SIZE
            )));
        }
        self.segment_file_size = size;
        Ok(())
    }

    /// First-write initialization: freeze geometry, create segment 1 with
    /// its header and volume sections, and open the first sectors body
    pub fn initialize(&mut self, ctx: &mut WriteContext) -> Result<()> {
        debug_assert!(!self.initialized);
        ctx.media.validate()?;
        if let Some(input) = self.input_size {
            if input % ctx.media.bytes_per_sector as u64 != 0 {
                return Err(EwfError::InvalidArgument(format!(
                    "input size {} is not a whole number of {}-byte sectors",
                    input, ctx.media.bytes_per_sector
                )));
            }
            ctx.media.amount_of_sectors = input / ctx.media.bytes_per_sector as u64;
        } else {
            ctx.media.amount_of_sectors = 0;
        }

        let chunk_size = ctx.media.chunk_size() as usize;
        self.staging = Vec::with_capacity(chunk_size);
        // zlib worst case stays under src + src/1000 + 64
        self.compress_buf = vec![0u8; chunk_size + chunk_size / 16 + 128];
        self.compressor = ChunkCompressor::new(ctx.media.compression_level.to_zlib());

        self.open_segment(ctx, 1)?;
        self.initialized = true;
        debug!(
            format = %ctx.format,
            chunk_size,
            segment_file_size = self.segment_file_size,
            media_size = ctx.media.media_size(),
            "write initialized"
        );
        Ok(())
    }

    fn open_segment(&mut self, ctx: &mut WriteContext, number: u16) -> Result<()> {
        let path = (self.filename_generator)(&self.base_path, number, ctx.format);
        let mut writer = SegmentWriter::create(path, number)?;

        if number == 1 {
            if ctx.format.writes_header2() {
                let body = header_values::encode_header2(ctx.header_values)?;
                writer.append_section("header2", &body)?;
            }
            let body = header_values::encode_header(ctx.header_values)?;
            writer.append_section("header", &body)?;
            if ctx.format.writes_xheader() {
                let body = header_values::encode_xheader(ctx.header_values)?;
                writer.append_section("xheader", &body)?;
            }

            let chunk_count = self
                .input_size
                .map(|input| input.div_ceil(ctx.media.chunk_size() as u64))
                .unwrap_or(0);
            let volume = section::encode_volume(ctx.media, chunk_count)?;
            let start = writer.append_section("volume", &volume)?;
            self.volume_patch = Some((
                writer.path().to_path_buf(),
                start + SECTION_DESCRIPTOR_SIZE,
            ));
        } else if ctx.format.mirrors_data_section() {
            let chunk_count = self
                .input_size
                .map(|input| input.div_ceil(ctx.media.chunk_size() as u64))
                .unwrap_or(0);
            let volume = section::encode_volume(ctx.media, chunk_count)?;
            writer.append_section("data", &volume)?;
        }

        self.current = Some(OpenSegment {
            writer,
            sectors_base: None,
            pending_entries: Vec::new(),
        });
        Ok(())
    }

    /// Close the open sectors body and emit table/table2 for its chunks
    fn flush_tables(&mut self) -> Result<()> {
        let segment = self.current.as_mut().ok_or_else(no_open_segment)?;
        let Some(base) = segment.sectors_base.take() else {
            return Ok(());
        };
        segment.writer.end_sectors()?;
        let table = section::encode_table(&segment.pending_entries, base);
        segment.writer.append_section("table", &table)?;
        segment.writer.append_section("table2", &table)?;
        trace!(
            segment = segment.writer.segment_number(),
            entries = segment.pending_entries.len(),
            "tables flushed"
        );
        segment.pending_entries.clear();
        Ok(())
    }

    /// Emit tables and the `next` marker, then roll to a fresh segment
    fn roll_segment(&mut self, ctx: &mut WriteContext) -> Result<()> {
        self.flush_tables()?;
        let segment = self.current.as_mut().ok_or_else(no_open_segment)?;
        segment.writer.append_terminal("next")?;
        let number = segment.writer.segment_number();
        let open = self.current.take().expect("segment checked above");
        let (path, size) = open.writer.finish()?;
        debug!(segment = number, size, "segment rolled");
        self.segment_paths.push(path);
        self.open_segment(ctx, number + 1)
    }

    /// Append one chunk's stored payload, rolling segments as needed
    fn emit_chunk(&mut self, ctx: &mut WriteContext, data: &[u8]) -> Result<()> {
        self.md5.update(data);
        self.sha1.update(data);

        // Compression decision: honor the level, and collapse runs of one
        // byte even at level none when asked to
        let try_compress = ctx.media.compression_level != CompressionLevel::None
            || (self.compress_empty_block && data.iter().all(|&b| b == data[0]));
        let limit = data.len().saturating_sub(4);
        let compressed_size = if try_compress && limit > 0 {
            self.compressor
                .compress(data, &mut self.compress_buf)
                .map_err(|e| EwfError::io("compress chunk", e))?
                .filter(|&size| size < limit)
        } else {
            None
        };
        let stored_size = compressed_size.unwrap_or(data.len() + 4) as u64;

        loop {
            if self.current.is_none() {
                let next_number = self.segment_paths.len() as u16 + 1;
                self.open_segment(ctx, next_number)?;
            }
            let segment = self.current.as_mut().expect("no open segment");

            let placeholder = if segment.sectors_base.is_none() {
                SECTION_DESCRIPTOR_SIZE
            } else {
                0
            };
            let pending = segment.pending_entries.len() as u64;
            let needed = placeholder + stored_size + table_overhead(pending + 1);
            if segment.writer.offset() + needed > self.segment_file_size {
                if pending == 0 && segment.sectors_base.is_none() {
                    return Err(EwfError::InvalidArgument(format!(
                        "segment file size {} cannot hold a {}-byte chunk",
                        self.segment_file_size, stored_size
                    )));
                }
                self.roll_segment(ctx)?;
                continue;
            }

            if segment.sectors_base.is_none() {
                segment.sectors_base = Some(segment.writer.begin_sectors()?);
            }
            let base = segment.sectors_base.expect("sectors open");

            let offset = match compressed_size {
                Some(size) => segment.writer.append_chunk_payload(&self.compress_buf[..size])?,
                None => {
                    let offset = segment.writer.append_chunk_payload(data)?;
                    let crc = chunk_checksum(data);
                    segment.writer.append_chunk_payload(&crc.to_le_bytes())?;
                    offset
                }
            };

            let mut entry = (offset - base) as u32;
            if compressed_size.is_some() {
                entry |= TABLE_ENTRY_COMPRESSED;
            }
            segment.pending_entries.push(entry);
            ctx.offsets.push(ChunkLocation {
                segment: segment.writer.segment_number(),
                file_offset: offset,
                compressed: compressed_size.is_some(),
                size: stored_size as u32,
            });
            self.chunks_written += 1;

            if segment.pending_entries.len() as u32 >= ctx.format.max_table_entries() {
                self.flush_tables()?;
            }
            return Ok(());
        }
    }

    /// Accept user bytes, emitting chunks as the staging buffer fills.
    /// Returns the bytes accepted, short once the advertised input size is
    /// reached.
    pub fn write(&mut self, ctx: &mut WriteContext, buf: &[u8]) -> Result<usize> {
        if self.finalized {
            return Err(EwfError::InvalidArgument(
                "handle is already finalized".to_string(),
            ));
        }
        if !self.initialized {
            self.initialize(ctx)?;
        }

        let accept = match self.input_size {
            Some(limit) => ((limit - self.bytes_written).min(buf.len() as u64)) as usize,
            None => buf.len(),
        };

        let chunk_size = ctx.media.chunk_size() as usize;
        let mut consumed = 0usize;
        while consumed < accept {
            let take = (chunk_size - self.staging.len()).min(accept - consumed);
            self.staging.extend_from_slice(&buf[consumed..consumed + take]);
            consumed += take;
            if self.staging.len() == chunk_size {
                let chunk = std::mem::take(&mut self.staging);
                self.emit_chunk(ctx, &chunk)?;
                self.staging = chunk;
                self.staging.clear();
            }
        }
        self.bytes_written += accept as u64;
        Ok(accept)
    }

    /// Feed zero bytes through the chunker (short-input padding)
    fn pad_with_zeros(&mut self, ctx: &mut WriteContext, mut remaining: u64) -> Result<()> {
        let chunk_size = ctx.media.chunk_size() as usize;
        while remaining > 0 {
            let take = ((chunk_size - self.staging.len()) as u64).min(remaining) as usize;
            self.staging.resize(self.staging.len() + take, 0);
            remaining -= take as u64;
            if self.staging.len() == chunk_size {
                let chunk = std::mem::take(&mut self.staging);
                self.emit_chunk(ctx, &chunk)?;
                self.staging = chunk;
                self.staging.clear();
            }
        }
        Ok(())
    }

    /// Flush the tail chunk, settle geometry per the short-input policy,
    /// and emit the closing sections. Returns the media bytes flushed
    /// during finalization (tail chunk and padding).
    pub fn finalize(&mut self, ctx: &mut WriteContext) -> Result<u64> {
        if self.finalized {
            return Ok(0);
        }
        if !self.initialized {
            self.initialize(ctx)?;
        }

        let bytes_per_sector = ctx.media.bytes_per_sector as u64;
        let target_size = match (self.input_size, self.short_input_policy) {
            (Some(input), ShortInputPolicy::ZeroPad) => input,
            // Truncation still rounds the tail up to a whole sector
            _ => self.bytes_written.div_ceil(bytes_per_sector) * bytes_per_sector,
        };

        let mut flushed = self.staging.len() as u64;
        let missing = target_size - self.bytes_written;
        if missing > 0 {
            if self.input_size.is_some() && self.short_input_policy == ShortInputPolicy::ZeroPad {
                let start_sector = self.bytes_written / bytes_per_sector;
                let amount = (target_size / bytes_per_sector - start_sector) as u32;
                debug!(start_sector, amount, "input short of media size; padding");
                ctx.acquiry_errors.add(start_sector, amount)?;
            }
            self.pad_with_zeros(ctx, missing)?;
            flushed += missing;
        }
        if !self.staging.is_empty() {
            let chunk = std::mem::take(&mut self.staging);
            self.emit_chunk(ctx, &chunk)?;
            self.staging = chunk;
            self.staging.clear();
        }

        ctx.media.amount_of_sectors = target_size / bytes_per_sector;

        self.flush_tables()?;

        let md5_computed: [u8; 16] = self.md5.clone().finalize().into();
        let sha1_computed: [u8; 20] = self.sha1.clone().finalize().into();
        let md5_stored = ctx.digests.md5.unwrap_or(md5_computed);

        let error2_body = if ctx.format.writes_error2() && !ctx.acquiry_errors.is_empty() {
            let errors: Vec<_> = ctx.acquiry_errors.iter().copied().collect();
            Some(section::encode_error2(&errors))
        } else {
            None
        };
        let digest_body = ctx
            .format
            .writes_digest()
            .then(|| section::encode_digest(&md5_stored, &sha1_computed));
        let hash_body = section::encode_hash(&md5_stored, &ctx.digests.hash_tail);
        let xhash_body = if ctx.format.writes_xheader() {
            Some(section::encode_xhash(Some(&md5_stored), Some(&sha1_computed))?)
        } else {
            None
        };

        // The per-chunk reservation only guarantees room for the tables
        // and one terminal marker; when the closing sections do not fit,
        // they move to one more segment of their own
        let mut tail = SECTION_DESCRIPTOR_SIZE;
        for body in [
            error2_body.as_deref(),
            digest_body.as_deref(),
            Some(hash_body.as_slice()),
            xhash_body.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            tail += SECTION_DESCRIPTOR_SIZE + body.len() as u64;
        }

        let needs_roll = {
            let segment = self.current.as_mut().ok_or_else(no_open_segment)?;
            segment.writer.offset() + tail > self.segment_file_size
        };
        if needs_roll {
            let segment = self.current.as_mut().ok_or_else(no_open_segment)?;
            segment.writer.append_terminal("next")?;
            let open = self.current.take().expect("segment checked above");
            let number = open.writer.segment_number();
            let (path, size) = open.writer.finish()?;
            debug!(segment = number, size, "closing sections moved to a fresh segment");
            self.segment_paths.push(path);
            self.open_segment(ctx, number + 1)?;
        }

        let segment = self.current.as_mut().ok_or_else(no_open_segment)?;
        if let Some(body) = &error2_body {
            segment.writer.append_section("error2", body)?;
        }
        if let Some(body) = &digest_body {
            segment.writer.append_section("digest", body)?;
        }
        segment.writer.append_section("hash", &hash_body)?;
        if let Some(body) = &xhash_body {
            segment.writer.append_section("xhash", body)?;
        }
        segment.writer.append_terminal("done")?;

        let open = self.current.take().expect("no open segment");
        let (path, size) = open.writer.finish()?;
        debug!(path = %path.display(), size, "final segment closed");
        self.segment_paths.push(path);

        self.patch_volume(ctx)?;

        ctx.digests.md5 = Some(md5_stored);
        ctx.digests.sha1.get_or_insert(sha1_computed);
        self.finalized = true;
        debug!(
            chunks = self.chunks_written,
            segments = self.segment_paths.len(),
            md5 = %hex::encode(md5_stored),
            "write finalized"
        );
        Ok(flushed)
    }

    /// Rewrite the segment 1 volume body with the settled geometry
    fn patch_volume(&mut self, ctx: &mut WriteContext) -> Result<()> {
        let Some((path, body_offset)) = self.volume_patch.take() else {
            return Ok(());
        };
        let body = section::encode_volume(ctx.media, self.chunks_written)?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| EwfError::open(&path, e))?;
        file.seek(SeekFrom::Start(body_offset))
            .map_err(|e| EwfError::io("seek to volume body", e))?;
        file.write_all(&body)
            .map_err(|e| EwfError::io("patch volume body", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_overhead_grows_linearly() {
        let base = table_overhead(0);
        assert_eq!(base, 3 * 76 + 2 * 28);
        assert_eq!(table_overhead(10) - base, 2 * 40);
    }
}
