//! Output format variants and their section plans
//!
//! The format chosen for a write decides which header encodings are
//! emitted, whether digest/error2 sections appear, and how many offsets a
//! single table section may hold.

use std::fmt;

use serde::Serialize;

/// EWF format variant produced on write (and inferred on read)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EwfFormat {
    EnCase1,
    EnCase2,
    EnCase3,
    EnCase4,
    EnCase5,
    EnCase6,
    /// FTK SMART (EWF-S01)
    Smart,
    FtkImager,
    LinEn,
    /// Extended format carrying xheader/xhash sections
    Ewfx,
}

impl EwfFormat {
    /// Whether the UTF-16 `header2` section is written
    pub fn writes_header2(&self) -> bool {
        matches!(
            self,
            EwfFormat::EnCase4 | EwfFormat::EnCase5 | EwfFormat::EnCase6 | EwfFormat::FtkImager
        )
    }

    /// Whether the XML `xheader`/`xhash` sections are written
    pub fn writes_xheader(&self) -> bool {
        matches!(self, EwfFormat::Ewfx)
    }

    /// Whether a `digest` section (MD5 + SHA1) is written at finalize
    pub fn writes_digest(&self) -> bool {
        matches!(
            self,
            EwfFormat::EnCase5 | EwfFormat::EnCase6 | EwfFormat::FtkImager | EwfFormat::Ewfx
        )
    }

    /// Whether acquisition errors are persisted in an `error2` section
    pub fn writes_error2(&self) -> bool {
        !matches!(self, EwfFormat::EnCase1 | EwfFormat::EnCase2 | EwfFormat::Smart)
    }

    /// Whether segments after the first start with a `data` section
    /// mirroring the volume
    pub fn mirrors_data_section(&self) -> bool {
        matches!(self, EwfFormat::EnCase6)
    }

    /// Maximum number of offsets in one table section
    pub fn max_table_entries(&self) -> u32 {
        match self {
            EwfFormat::EnCase6 => 65534,
            _ => 16384,
        }
    }

    /// First letter of the segment file extension (`E01` vs `s01`)
    pub fn uses_lowercase_extension(&self) -> bool {
        matches!(self, EwfFormat::Smart)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EwfFormat::EnCase1 => "EnCase 1",
            EwfFormat::EnCase2 => "EnCase 2",
            EwfFormat::EnCase3 => "EnCase 3",
            EwfFormat::EnCase4 => "EnCase 4",
            EwfFormat::EnCase5 => "EnCase 5",
            EwfFormat::EnCase6 => "EnCase 6",
            EwfFormat::Smart => "FTK SMART",
            EwfFormat::FtkImager => "FTK Imager",
            EwfFormat::LinEn => "LinEn",
            EwfFormat::Ewfx => "EWFX",
        }
    }
}

impl fmt::Display for EwfFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chunk compression setting for writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

impl CompressionLevel {
    /// The zlib level used when a chunk is compressed. Level `None` still
    /// maps to a real level for the forced empty-block path.
    pub fn to_zlib(self) -> flate2::Compression {
        match self {
            CompressionLevel::None | CompressionLevel::Best => flate2::Compression::best(),
            CompressionLevel::Fast => flate2::Compression::fast(),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CompressionLevel::Fast,
            2 => CompressionLevel::Best,
            _ => CompressionLevel::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionLevel::None => "none",
            CompressionLevel::Fast => "good (fast)",
            CompressionLevel::Best => "best",
        }
    }
}

/// What to do when the bytes written fall short of the advertised media size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortInputPolicy {
    /// Pad the remainder with zero chunks and record the missing range as
    /// an acquisition error
    ZeroPad,
    /// Shrink the sector count to the bytes actually written
    Truncate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_plans_follow_format_generations() {
        assert!(!EwfFormat::EnCase1.writes_header2());
        assert!(EwfFormat::EnCase4.writes_header2());
        assert!(!EwfFormat::EnCase4.writes_digest());
        assert!(EwfFormat::EnCase5.writes_digest());
        assert!(!EwfFormat::Smart.writes_error2());
        assert!(EwfFormat::EnCase3.writes_error2());
        assert!(EwfFormat::Ewfx.writes_xheader());
        assert!(!EwfFormat::EnCase6.writes_xheader());
    }

    #[test]
    fn table_limits() {
        assert_eq!(EwfFormat::EnCase5.max_table_entries(), 16384);
        assert_eq!(EwfFormat::EnCase6.max_table_entries(), 65534);
    }

    #[test]
    fn compression_levels_roundtrip() {
        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Best,
        ] {
            assert_eq!(CompressionLevel::from_u8(level.as_u8()), level);
        }
    }
}
