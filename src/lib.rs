//! ewfkit - reader and writer for EWF (Expert Witness Format) forensic
//! disk images
//!
//! An EWF image is an ordered set of segment files (`.E01`, `.E02`, ...)
//! storing the acquired media in compressed, checksummed chunks, indexed
//! by per-segment offset tables and wrapped in CRC-checked sections. This
//! crate exposes the media as a seekable byte stream and produces new
//! segment sets in the EnCase/SMART/EWFX format family.
//!
//! ```rust,no_run
//! use ewfkit::{EwfHandle, OpenMode};
//!
//! # fn main() -> ewfkit::Result<()> {
//! let mut image = EwfHandle::open_glob("evidence.E01", OpenMode::Read)?;
//! let mut sector = vec![0u8; image.get_bytes_per_sector() as usize];
//! image.seek_offset(0)?;
//! image.read_buffer(&mut sector)?;
//! image.close()?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod error;
pub mod format;
pub mod handle;
pub mod header_values;
pub mod logging;
pub mod media;
pub mod offset_table;
pub mod read;
pub mod section;
pub mod segment;
pub mod segment_table;
pub mod write;

pub use error::{EwfError, Result};
pub use format::{CompressionLevel, EwfFormat, ShortInputPolicy};
pub use handle::{copy_header_values, EwfHandle, ImageInfo, OpenMode, VerifyOutcome};
pub use header_values::DateFormat;
pub use media::{MediaType, SectorError};
pub use segment::check_signature;
