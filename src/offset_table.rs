//! Offset table: chunk index → physical chunk location
//!
//! A dense array indexed by chunk number. Reads populate it from the
//! `table`/`table2` sections of each segment; chunks covered only by
//! corrupt tables stay unavailable. Writes append entries in chunk order
//! as payloads land in the current `sectors` section.

use tracing::warn;

use crate::error::{EwfError, Result};

/// Physical location of one stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// 1-based segment number owning the chunk
    pub segment: u16,
    /// Absolute offset of the stored payload within the segment file
    pub file_offset: u64,
    pub compressed: bool,
    /// Stored payload size (compressed stream, or data plus 4-byte checksum)
    pub size: u32,
}

#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: Vec<Option<ChunkLocation>>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the table; allocation failure surfaces as `OutOfMemory`
    pub fn reserve(&mut self, additional: u64) -> Result<()> {
        self.entries.try_reserve(additional as usize)?;
        Ok(())
    }

    pub fn push(&mut self, location: ChunkLocation) {
        self.entries.push(Some(location));
    }

    /// Record `count` chunks with no readable location
    pub fn push_unavailable(&mut self, count: u64) {
        if count > 0 {
            warn!(count, "marking chunk range unavailable");
        }
        for _ in 0..count {
            self.entries.push(None);
        }
    }

    pub fn get(&self, chunk: u64) -> Result<ChunkLocation> {
        match self.entries.get(chunk as usize) {
            Some(Some(location)) => Ok(*location),
            _ => Err(EwfError::ChunkUnavailable { chunk }),
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify entries are strictly increasing in (segment, offset) order
    pub fn validate_monotonic(&self) -> Result<()> {
        let mut previous: Option<(u16, u64)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let Some(location) = entry else { continue };
            let key = (location.segment, location.file_offset);
            if let Some(prev) = previous {
                if key <= prev {
                    return Err(EwfError::CorruptContainer(format!(
                        "offset table entry {} at segment {} offset {} is not after its predecessor",
                        index, location.segment, location.file_offset
                    )));
                }
            }
            previous = Some(key);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Option<&ChunkLocation>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (index as u64, entry.as_ref()))
    }
}

/// Turn one decoded table section into chunk locations.
///
/// Raw entries hold a 31-bit offset relative to `base_offset` plus the
/// compressed flag; the stored size of each chunk is the distance to the
/// next entry, and for the final entry the distance to `sectors_end` (the
/// file offset just past the owning `sectors` payload).
pub fn resolve_table_entries(
    segment: u16,
    base_offset: u64,
    raw_entries: &[u32],
    sectors_end: u64,
) -> Result<Vec<ChunkLocation>> {
    let mut locations = Vec::with_capacity(raw_entries.len());
    for (index, &raw) in raw_entries.iter().enumerate() {
        let offset = base_offset + (raw & crate::section::TABLE_ENTRY_OFFSET_MASK) as u64;
        let end = match raw_entries.get(index + 1) {
            Some(&next_raw) => {
                base_offset + (next_raw & crate::section::TABLE_ENTRY_OFFSET_MASK) as u64
            }
            None => sectors_end,
        };
        if end <= offset {
            return Err(EwfError::CorruptContainer(format!(
                "table entry {} in segment {} has non-increasing offsets ({} -> {})",
                index, segment, offset, end
            )));
        }
        let size = end - offset;
        if size > u32::MAX as u64 {
            return Err(EwfError::CorruptContainer(format!(
                "table entry {} in segment {} spans {} bytes",
                index, segment, size
            )));
        }
        locations.push(ChunkLocation {
            segment,
            file_offset: offset,
            compressed: raw & crate::section::TABLE_ENTRY_COMPRESSED != 0,
            size: size as u32,
        });
    }
    Ok(locations)
}
