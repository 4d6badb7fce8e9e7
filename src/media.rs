//! Media geometry, media flags, and sector-error bookkeeping

use serde::Serialize;

use crate::error::{EwfError, Result};
use crate::format::CompressionLevel;

/// Media flag bits stored in the volume section
pub mod media_flags {
    /// The acquired device had media present
    pub const MEDIA_PRESENT: u8 = 0x01;
    /// Physical device rather than a logical volume
    pub const PHYSICAL: u8 = 0x02;
}

/// Kind of media the image was acquired from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Memory,
}

impl MediaType {
    pub fn as_u8(self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Memory => 0x10,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(MediaType::Removable),
            0x01 => Ok(MediaType::Fixed),
            0x03 => Ok(MediaType::Optical),
            0x10 => Ok(MediaType::Memory),
            other => Err(EwfError::UnsupportedFormat(format!(
                "media type {:#04x}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Removable => "removable",
            MediaType::Fixed => "fixed",
            MediaType::Optical => "optical",
            MediaType::Memory => "memory",
        }
    }
}

/// Media geometry and identity, frozen once the first volume section is
/// seen (read) or written (write)
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub amount_of_sectors: u64,
    pub media_type: MediaType,
    pub media_flags: u8,
    pub error_granularity: u32,
    pub compression_level: CompressionLevel,
    pub guid: [u8; 16],
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 0,
            media_type: MediaType::Fixed,
            media_flags: media_flags::MEDIA_PRESENT | media_flags::PHYSICAL,
            error_granularity: 64,
            compression_level: CompressionLevel::None,
            guid: [0u8; 16],
        }
    }
}

impl MediaInfo {
    pub fn chunk_size(&self) -> u32 {
        self.sectors_per_chunk * self.bytes_per_sector
    }

    pub fn media_size(&self) -> u64 {
        self.amount_of_sectors * self.bytes_per_sector as u64
    }

    /// Number of chunks covering the media, the last possibly partial
    pub fn chunk_count(&self) -> u64 {
        let chunk_size = self.chunk_size() as u64;
        if chunk_size == 0 {
            return 0;
        }
        self.media_size().div_ceil(chunk_size)
    }

    /// Whether the image was taken from a physical device
    pub fn is_physical(&self) -> bool {
        self.media_flags & media_flags::PHYSICAL != 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.sectors_per_chunk == 0 || self.bytes_per_sector == 0 {
            return Err(EwfError::InvalidArgument(
                "sectors per chunk and bytes per sector must be non-zero".to_string(),
            ));
        }
        let chunk_size = self.sectors_per_chunk as u64 * self.bytes_per_sector as u64;
        if chunk_size > 32 * 1024 * 1024 {
            return Err(EwfError::InvalidArgument(format!(
                "chunk size {} exceeds the 32 MiB ceiling",
                chunk_size
            )));
        }
        Ok(())
    }
}

/// Format a GUID as the usual 8-4-4-4-12 string
pub fn format_guid(bytes: &[u8; 16]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..16]),
    )
}

// =============================================================================
// Sector Error Lists
// =============================================================================

/// A run of bad sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectorError {
    pub start_sector: u64,
    pub amount_of_sectors: u32,
}

/// Insertion-ordered list of sector error runs, deduplicated by start
/// sector. Used for both acquisition errors (persisted in `error2`) and
/// read-side CRC errors (in-memory only).
#[derive(Debug, Clone, Default)]
pub struct SectorErrorList {
    entries: Vec<SectorError>,
}

impl SectorErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run. A run starting at an already-recorded sector widens the
    /// existing entry instead of duplicating it.
    pub fn add(&mut self, start_sector: u64, amount_of_sectors: u32) -> Result<()> {
        if amount_of_sectors == 0 {
            return Err(EwfError::InvalidArgument(
                "error run must cover at least one sector".to_string(),
            ));
        }
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.start_sector == start_sector)
        {
            existing.amount_of_sectors = existing.amount_of_sectors.max(amount_of_sectors);
            return Ok(());
        }
        self.entries.push(SectorError {
            start_sector,
            amount_of_sectors,
        });
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<SectorError> {
        self.entries.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorError> {
        self.entries.iter()
    }
}

/// Digests embedded in the image, plus the undocumented trailer bytes of
/// the `hash` section which are preserved verbatim
#[derive(Debug, Clone, Default)]
pub struct DigestState {
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
    pub hash_tail: [u8; 16],
}
