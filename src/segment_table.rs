//! Segment set loading and the delta segment
//!
//! Opening stitches the ordered segment files into one logical image:
//! each file is walked, its sections dispatched, and the offset table
//! grown in chunk order. A `table` whose CRC fails falls back to the
//! `table2` backup; if both fail the covered range stays unavailable.
//!
//! The delta segment is a separate file receiving corrected chunks when a
//! read-write handle writes back over a read-mostly image.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::common::checksum::chunk_checksum;
use crate::common::io_pool::FileIoPool;
use crate::error::{EwfError, Result};
use crate::format::EwfFormat;
use crate::media::{DigestState, MediaInfo, SectorErrorList};
use crate::offset_table::{resolve_table_entries, OffsetTable};
use crate::section::{self, SectionKind, TableDecodeError};
use crate::segment::{read_file_header, walk_sections, SegmentWriter, WalkEnd, WalkedSection};

/// Everything learned from walking a full segment set
pub struct LoadedImage {
    pub pool: FileIoPool,
    pub media: MediaInfo,
    pub chunk_count: u64,
    pub offsets: OffsetTable,
    pub raw_header: Option<Vec<u8>>,
    pub raw_header2: Option<Vec<u8>>,
    pub raw_xheader: Option<Vec<u8>>,
    pub digests: DigestState,
    pub acquiry_errors: SectorErrorList,
    saw_digest: bool,
    saw_data: bool,
}

impl LoadedImage {
    pub fn segment_count(&self) -> u16 {
        self.pool.file_count() as u16
    }

    /// Best-effort format inference from the sections present
    pub fn detect_format(&self) -> EwfFormat {
        if self.raw_xheader.is_some() {
            EwfFormat::Ewfx
        } else if self.raw_header2.is_some() {
            if self.saw_data {
                EwfFormat::EnCase6
            } else if self.saw_digest {
                EwfFormat::EnCase5
            } else {
                EwfFormat::EnCase4
            }
        } else {
            EwfFormat::EnCase3
        }
    }
}

/// A `table` section awaiting its `table2` backup before resolution
struct PendingTable {
    base_offset: u64,
    entries: Option<Vec<u32>>,
    /// Entry count recovered from a CRC-failed table, if its header held
    failed_count: Option<u32>,
    sectors_end: u64,
}

struct SegmentLoadState {
    last_sectors_end: Option<u64>,
    pending: Option<PendingTable>,
}

/// Open and walk every segment file of an image set
pub fn open_segment_set(paths: Vec<PathBuf>) -> Result<LoadedImage> {
    if paths.is_empty() {
        return Err(EwfError::InvalidArgument(
            "at least one segment file is required".to_string(),
        ));
    }
    if paths.len() > u16::MAX as usize {
        return Err(EwfError::InvalidArgument(format!(
            "{} segment files exceed the format's segment numbering",
            paths.len()
        )));
    }

    let file_count = paths.len();
    let mut image = LoadedImage {
        pool: FileIoPool::with_default_limit(paths),
        media: MediaInfo::default(),
        chunk_count: 0,
        offsets: OffsetTable::new(),
        raw_header: None,
        raw_header2: None,
        raw_xheader: None,
        digests: DigestState::default(),
        acquiry_errors: SectorErrorList::new(),
        saw_digest: false,
        saw_data: false,
    };
    let mut have_volume = false;

    for index in 0..file_count {
        let segment_number = (index + 1) as u16;
        let file = image.pool.get_file(index)?;
        let stored_number = read_file_header(file)?;
        if stored_number != segment_number {
            return Err(EwfError::CorruptContainer(format!(
                "segment file {} carries segment number {}",
                segment_number, stored_number
            )));
        }

        let (sections, end) = walk_sections(file, segment_number)?;
        let mut state = SegmentLoadState {
            last_sectors_end: None,
            pending: None,
        };

        for walked in &sections {
            dispatch_section(&mut image, &mut have_volume, &mut state, index, walked)?;
        }
        resolve_pending(&mut image, &mut state, segment_number)?;

        let is_last = index + 1 == file_count;
        match end {
            WalkEnd::Done if !is_last => {
                return Err(EwfError::CorruptContainer(format!(
                    "done marker in segment {} but {} segment files were supplied",
                    segment_number, file_count
                )));
            }
            WalkEnd::Next if is_last => {
                return Err(EwfError::CorruptContainer(
                    "last segment ends with next; the set is incomplete".to_string(),
                ));
            }
            _ => {}
        }
    }

    if !have_volume {
        return Err(EwfError::CorruptContainer(
            "no volume section in the segment set".to_string(),
        ));
    }

    if image.offsets.len() < image.chunk_count {
        let missing = image.chunk_count - image.offsets.len();
        warn!(missing, "offset table does not cover the full media");
        image.offsets.push_unavailable(missing);
    } else if image.offsets.len() > image.chunk_count {
        return Err(EwfError::CorruptContainer(format!(
            "offset table holds {} chunks but the volume declares {}",
            image.offsets.len(),
            image.chunk_count
        )));
    }
    image.offsets.validate_monotonic()?;

    debug!(
        segments = file_count,
        chunks = image.chunk_count,
        media_size = image.media.media_size(),
        "segment set opened"
    );
    Ok(image)
}

fn read_body(image: &mut LoadedImage, index: usize, walked: &WalkedSection) -> Result<Vec<u8>> {
    let file = image.pool.get_file(index)?;
    crate::common::binary::read_bytes_at(file, walked.body_offset, walked.body_size as usize)
}

fn dispatch_section(
    image: &mut LoadedImage,
    have_volume: &mut bool,
    state: &mut SegmentLoadState,
    index: usize,
    walked: &WalkedSection,
) -> Result<()> {
    let segment_number = (index + 1) as u16;
    match walked.kind {
        SectionKind::Header => {
            if image.raw_header.is_none() {
                image.raw_header = Some(read_body(image, index, walked)?);
            }
        }
        SectionKind::Header2 => {
            if image.raw_header2.is_none() {
                image.raw_header2 = Some(read_body(image, index, walked)?);
            }
        }
        SectionKind::Xheader => {
            if image.raw_xheader.is_none() {
                image.raw_xheader = Some(read_body(image, index, walked)?);
            }
        }
        SectionKind::Volume | SectionKind::Disk | SectionKind::Data => {
            if walked.kind == SectionKind::Data {
                image.saw_data = true;
            }
            if !*have_volume {
                let body = read_body(image, index, walked)?;
                let fields = section::decode_volume(&body)?;
                image.media = fields.media;
                image.chunk_count = fields.chunk_count;
                image.offsets.reserve(fields.chunk_count)?;
                *have_volume = true;
            }
        }
        SectionKind::Sectors => {
            resolve_pending(image, state, segment_number)?;
            state.last_sectors_end = Some(walked.body_offset + walked.body_size);
        }
        SectionKind::Table => {
            resolve_pending(image, state, segment_number)?;
            let sectors_end = state.last_sectors_end.ok_or_else(|| {
                EwfError::CorruptContainer(format!(
                    "table section in segment {} without a preceding sectors section",
                    segment_number
                ))
            })?;
            let body = read_body(image, index, walked)?;
            state.pending = Some(match section::decode_table(&body) {
                Ok((base_offset, entries)) => PendingTable {
                    base_offset,
                    entries: Some(entries),
                    failed_count: None,
                    sectors_end,
                },
                Err(TableDecodeError::Entries { count }) => {
                    warn!(segment = segment_number, count, "table entries CRC failed");
                    PendingTable {
                        base_offset: 0,
                        entries: None,
                        failed_count: Some(count),
                        sectors_end,
                    }
                }
                Err(TableDecodeError::Header) => {
                    warn!(segment = segment_number, "table header CRC failed");
                    PendingTable {
                        base_offset: 0,
                        entries: None,
                        failed_count: None,
                        sectors_end,
                    }
                }
                Err(TableDecodeError::Malformed(msg)) => {
                    return Err(EwfError::CorruptContainer(msg));
                }
            });
        }
        SectionKind::Table2 => {
            let Some(mut pending) = state.pending.take() else {
                warn!(segment = segment_number, "table2 without a preceding table");
                return Ok(());
            };
            if pending.entries.is_none() {
                warn!(segment = segment_number, "recovering offsets from table2");
                let body = read_body(image, index, walked)?;
                match section::decode_table(&body) {
                    Ok((base_offset, entries)) => {
                        pending.base_offset = base_offset;
                        pending.entries = Some(entries);
                    }
                    Err(TableDecodeError::Entries { count }) => {
                        pending.failed_count.get_or_insert(count);
                    }
                    Err(TableDecodeError::Header) => {}
                    Err(TableDecodeError::Malformed(msg)) => {
                        return Err(EwfError::CorruptContainer(msg));
                    }
                }
            }
            state.pending = Some(pending);
            resolve_pending(image, state, segment_number)?;
        }
        SectionKind::Error2 => {
            let body = read_body(image, index, walked)?;
            for error in section::decode_error2(&body)? {
                image
                    .acquiry_errors
                    .add(error.start_sector, error.amount_of_sectors)?;
            }
        }
        SectionKind::Hash => {
            let body = read_body(image, index, walked)?;
            let (md5, tail) = section::decode_hash(&body)?;
            if image.digests.md5.is_none() {
                image.digests.md5 = Some(md5);
            }
            image.digests.hash_tail = tail;
        }
        SectionKind::Digest => {
            image.saw_digest = true;
            let body = read_body(image, index, walked)?;
            let (md5, sha1) = section::decode_digest(&body)?;
            image.digests.md5.get_or_insert(md5);
            if sha1 != [0u8; 20] {
                image.digests.sha1.get_or_insert(sha1);
            }
        }
        SectionKind::Xhash => {
            let body = read_body(image, index, walked)?;
            let (md5, sha1) = section::decode_xhash(&body)?;
            if let Some(md5) = md5 {
                image.digests.md5.get_or_insert(md5);
            }
            if let Some(sha1) = sha1 {
                image.digests.sha1.get_or_insert(sha1);
            }
        }
        SectionKind::Next | SectionKind::Done => {}
        SectionKind::Session | SectionKind::Ltree | SectionKind::Ltypes | SectionKind::Unknown => {
            warn!(
                segment = segment_number,
                tag = %walked.tag,
                "skipping unhandled section"
            );
        }
    }
    Ok(())
}

/// Fold a pending table (after its table2 had a chance to repair it) into
/// the offset table
fn resolve_pending(
    image: &mut LoadedImage,
    state: &mut SegmentLoadState,
    segment_number: u16,
) -> Result<()> {
    let Some(pending) = state.pending.take() else {
        return Ok(());
    };
    match (pending.entries, pending.failed_count) {
        (Some(entries), _) => {
            let locations = resolve_table_entries(
                segment_number,
                pending.base_offset,
                &entries,
                pending.sectors_end,
            )?;
            image.offsets.reserve(locations.len() as u64)?;
            for location in locations {
                image.offsets.push(location);
            }
        }
        (None, Some(count)) => {
            image.offsets.push_unavailable(count as u64);
        }
        (None, None) => {
            return Err(EwfError::CorruptContainer(format!(
                "table and table2 in segment {} are both unreadable",
                segment_number
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Delta Segment
// =============================================================================

/// Write-back target for corrected chunks over a read-write open.
/// Chunks are stored uncompressed with their checksum; the in-memory map
/// shadows the primary offset table for the rest of the session.
pub struct DeltaSegment {
    writer: SegmentWriter,
    base_offset: u64,
    entries: HashMap<u64, (u64, u32)>,
    payload_offsets: Vec<u32>,
}

impl DeltaSegment {
    pub fn create(path: PathBuf) -> Result<Self> {
        let mut writer = SegmentWriter::create(path, 1)?;
        let base_offset = writer.begin_sectors()?;
        Ok(Self {
            writer,
            base_offset,
            entries: HashMap::new(),
            payload_offsets: Vec::new(),
        })
    }

    /// Store a corrected chunk; a chunk rewritten twice keeps the last copy
    pub fn write_chunk(&mut self, chunk: u64, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(data.len() + 4);
        payload.extend_from_slice(data);
        payload.extend_from_slice(&chunk_checksum(data).to_le_bytes());

        let offset = self.writer.append_chunk_payload(&payload)?;
        let relative = offset - self.base_offset;
        if relative > section::TABLE_ENTRY_OFFSET_MASK as u64 {
            return Err(EwfError::InvalidArgument(
                "delta segment grew past the table offset range".to_string(),
            ));
        }
        self.payload_offsets.push(relative as u32);
        self.entries.insert(chunk, (offset, payload.len() as u32));
        Ok(())
    }

    pub fn has_chunk(&self, chunk: u64) -> bool {
        self.entries.contains_key(&chunk)
    }

    /// Read back a corrected chunk, verifying its checksum
    pub fn read_chunk(&mut self, chunk: u64) -> Result<Option<Vec<u8>>> {
        let Some(&(offset, size)) = self.entries.get(&chunk) else {
            return Ok(None);
        };
        let payload = self.writer.read_back(offset, size as usize)?;
        let data_len = payload.len() - 4;
        let stored = u32::from_le_bytes(payload[data_len..].try_into().unwrap());
        if stored != chunk_checksum(&payload[..data_len]) {
            return Err(EwfError::CorruptContainer(format!(
                "delta chunk {} checksum mismatch",
                chunk
            )));
        }
        let mut data = payload;
        data.truncate(data_len);
        Ok(Some(data))
    }

    /// Close the delta file with its table and done marker
    pub fn finalize(mut self) -> Result<PathBuf> {
        self.writer.end_sectors()?;
        let table = section::encode_table(&self.payload_offsets, self.base_offset);
        self.writer.append_section("table", &table)?;
        self.writer.append_section("table2", &table)?;
        self.writer.append_terminal("done")?;
        let (path, _) = self.writer.finish()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn delta_segment_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut delta = DeltaSegment::create(dir.path().join("img.d01")).unwrap();

        let chunk_a = vec![0xAAu8; 512];
        let chunk_b = vec![0xBBu8; 512];
        delta.write_chunk(4, &chunk_a).unwrap();
        delta.write_chunk(9, &chunk_b).unwrap();

        assert!(delta.has_chunk(4));
        assert!(!delta.has_chunk(5));
        assert_eq!(delta.read_chunk(4).unwrap().unwrap(), chunk_a);
        assert_eq!(delta.read_chunk(9).unwrap().unwrap(), chunk_b);
        assert!(delta.read_chunk(5).unwrap().is_none());

        // Rewriting a chunk keeps the newest copy
        let chunk_a2 = vec![0xCCu8; 512];
        delta.write_chunk(4, &chunk_a2).unwrap();
        assert_eq!(delta.read_chunk(4).unwrap().unwrap(), chunk_a2);

        let path = delta.finalize().unwrap();
        assert!(path.exists());
        assert!(crate::segment::check_signature(&path).unwrap());
    }
}
