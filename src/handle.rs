//! The image handle: open/close/seek/read/write and the metadata surface
//!
//! A handle owns every segment file of one image set from `open` to
//! `close`. Read handles expose the media as a seekable byte stream;
//! write handles accept one and produce a fresh segment set; read-write
//! handles serve reads from the primary set while corrected chunks go to
//! a delta segment.

use std::io;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Serialize;
use tracing::{debug, warn};

use crate::common::filenames::{default_delta_path, glob_segment_files};
use crate::common::io_pool::FileIoPool;
use crate::error::{EwfError, Result};
use crate::format::{CompressionLevel, EwfFormat, ShortInputPolicy};
use crate::header_values::{self, DateFormat, ValueTable};
use crate::media::{format_guid, media_flags, DigestState, MediaInfo, MediaType, SectorError, SectorErrorList};
use crate::offset_table::OffsetTable;
use crate::read::{read_media, ReadState};
use crate::segment_table::{open_segment_set, DeltaSegment};
use crate::write::{WriteContext, WriteState};

/// Access mode requested at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    /// Read the primary segments, redirect writes to a delta segment
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Opened,
    WriteInitialized,
    Finalized,
}

/// Summary of an opened image, serializable for embedding applications
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub format: String,
    pub segment_count: u32,
    pub chunk_count: u64,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub amount_of_sectors: u64,
    pub media_size: u64,
    pub media_type: String,
    pub compression: String,
    pub guid: String,
    pub stored_md5: Option<String>,
    pub stored_sha1: Option<String>,
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub examiner_name: Option<String>,
    pub evidence_number: Option<String>,
    pub notes: Option<String>,
    pub acquiry_date: Option<String>,
    pub system_date: Option<String>,
    pub acquiry_errors: u32,
}

/// Result of verifying the media stream against the stored MD5
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub computed_md5: String,
    pub stored_md5: Option<String>,
    pub matches: Option<bool>,
}

struct ReadSide {
    pool: FileIoPool,
    offsets: OffsetTable,
    state: ReadState,
    position: u64,
}

/// Handle to one EWF image set
pub struct EwfHandle {
    mode: OpenMode,
    state: HandleState,
    format: EwfFormat,
    media: MediaInfo,
    header_values: ValueTable,
    hash_values: ValueTable,
    raw_header: Option<Vec<u8>>,
    raw_header2: Option<Vec<u8>>,
    raw_xheader: Option<Vec<u8>>,
    digests: DigestState,
    acquiry_errors: SectorErrorList,
    crc_errors: SectorErrorList,
    read_side: Option<ReadSide>,
    write_side: Option<WriteState>,
    /// Offset table grown by the write path, mirroring what the emitted
    /// table sections describe
    write_offsets: OffsetTable,
    delta: Option<DeltaSegment>,
    delta_path: Option<PathBuf>,
}

impl EwfHandle {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open an image from its ordered segment file paths.
    ///
    /// `Read`/`ReadWrite` walk the existing set; `Write` remembers the
    /// first path as the base the segment filenames are generated from.
    pub fn open<P: AsRef<Path>>(paths: &[P], mode: OpenMode) -> Result<Self> {
        if paths.is_empty() {
            return Err(EwfError::InvalidArgument(
                "at least one filename is required".to_string(),
            ));
        }
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let base = paths[0].clone();

        match mode {
            OpenMode::Read | OpenMode::ReadWrite => {
                let loaded = open_segment_set(paths)?;
                let format = loaded.detect_format();
                let declared = loaded.chunk_count;
                let derived = loaded.media.chunk_count();
                if declared != derived {
                    warn!(declared, derived, "volume chunk count disagrees with geometry");
                }
                let chunk_size = loaded.media.chunk_size() as usize;
                debug!(mode = ?mode, format = %format, "image opened");
                Ok(Self {
                    mode,
                    state: HandleState::Opened,
                    format,
                    media: loaded.media,
                    header_values: ValueTable::new(),
                    hash_values: ValueTable::new(),
                    raw_header: loaded.raw_header,
                    raw_header2: loaded.raw_header2,
                    raw_xheader: loaded.raw_xheader,
                    digests: loaded.digests,
                    acquiry_errors: loaded.acquiry_errors,
                    crc_errors: SectorErrorList::new(),
                    read_side: Some(ReadSide {
                        pool: loaded.pool,
                        offsets: loaded.offsets,
                        state: ReadState::new(chunk_size),
                        position: 0,
                    }),
                    write_side: None,
                    write_offsets: OffsetTable::new(),
                    delta: None,
                    delta_path: (mode == OpenMode::ReadWrite)
                        .then(|| default_delta_path(&base)),
                })
            }
            OpenMode::Write => {
                let mut header_values = ValueTable::new();
                let now = chrono::Utc::now().timestamp().to_string();
                header_values.set("acquiry_date", &now);
                header_values.set("system_date", &now);
                header_values.set(
                    "acquiry_software_version",
                    env!("CARGO_PKG_VERSION"),
                );
                header_values.set("acquiry_operating_system", std::env::consts::OS);

                Ok(Self {
                    mode,
                    state: HandleState::Opened,
                    format: EwfFormat::EnCase5,
                    media: MediaInfo::default(),
                    header_values,
                    hash_values: ValueTable::new(),
                    raw_header: None,
                    raw_header2: None,
                    raw_xheader: None,
                    digests: DigestState::default(),
                    acquiry_errors: SectorErrorList::new(),
                    crc_errors: SectorErrorList::new(),
                    read_side: None,
                    write_side: Some(WriteState::new(base)),
                    write_offsets: OffsetTable::new(),
                    delta: None,
                    delta_path: None,
                })
            }
        }
    }

    /// Open for reading, discovering the full segment set from the first
    /// segment's path
    pub fn open_glob<P: AsRef<Path>>(first: P, mode: OpenMode) -> Result<Self> {
        if mode == OpenMode::Write {
            return Err(EwfError::InvalidArgument(
                "glob open applies to existing images".to_string(),
            ));
        }
        let paths = glob_segment_files(first.as_ref())?;
        Self::open(&paths, mode)
    }

    /// Close the handle. A write handle not yet finalized is finalized
    /// implicitly; an open delta segment is sealed.
    pub fn close(mut self) -> Result<()> {
        if self.mode == OpenMode::Write && self.state != HandleState::Finalized {
            self.write_finalize()?;
        }
        if let Some(delta) = self.delta.take() {
            let path = delta.finalize()?;
            debug!(path = %path.display(), "delta segment sealed");
        }
        if let Some(read) = self.read_side.as_mut() {
            read.pool.close_all();
        }
        Ok(())
    }

    // =========================================================================
    // Read / Seek
    // =========================================================================

    fn read_side_mut(&mut self) -> Result<&mut ReadSide> {
        self.read_side.as_mut().ok_or_else(|| {
            EwfError::InvalidArgument("handle is not open for reading".to_string())
        })
    }

    /// Position the media stream. Offsets up to and including the media
    /// size are valid; reads at the end return zero bytes.
    pub fn seek_offset(&mut self, offset: u64) -> Result<u64> {
        let media_size = self.media.media_size();
        let read = self.read_side_mut()?;
        if offset > media_size {
            return Err(EwfError::InvalidArgument(format!(
                "offset {} past media size {}",
                offset, media_size
            )));
        }
        read.position = offset;
        Ok(offset)
    }

    /// Read media bytes at the current position, short only at end of
    /// media
    pub fn read_buffer(&mut self, buf: &mut [u8]) -> Result<usize> {
        let media = self.media.clone();
        let delta = self.delta.as_mut();
        let read = self.read_side.as_mut().ok_or_else(|| {
            EwfError::InvalidArgument("handle is not open for reading".to_string())
        })?;
        let n = read_media(
            &mut read.pool,
            &read.offsets,
            &media,
            &mut self.crc_errors,
            delta,
            &mut read.state,
            read.position,
            buf,
        )?;
        read.position += n as u64;
        Ok(n)
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Accept media bytes. In write mode they stream through the chunk
    /// pipeline; in read-write mode they must overwrite whole chunks and
    /// land in the delta segment.
    pub fn write_buffer(&mut self, buf: &[u8]) -> Result<usize> {
        match self.mode {
            OpenMode::Write => {
                let was_initialized = self
                    .write_side
                    .as_ref()
                    .map(|w| w.is_initialized())
                    .unwrap_or(false);
                let n = {
                    let (mut ctx, write) = split_write(self)?;
                    write.write(&mut ctx, buf)?
                };
                if !was_initialized {
                    self.state = HandleState::WriteInitialized;
                }
                Ok(n)
            }
            OpenMode::ReadWrite => self.write_delta(buf),
            OpenMode::Read => Err(EwfError::InvalidArgument(
                "handle is open read-only".to_string(),
            )),
        }
    }

    /// Flush the tail chunk and emit the closing sections. Returns the
    /// media bytes flushed during finalization.
    pub fn write_finalize(&mut self) -> Result<u64> {
        if self.mode != OpenMode::Write {
            return Err(EwfError::InvalidArgument(
                "finalize applies to write handles".to_string(),
            ));
        }
        let n = {
            let (mut ctx, write) = split_write(self)?;
            write.finalize(&mut ctx)?
        };
        self.state = HandleState::Finalized;
        Ok(n)
    }

    /// Chunk-aligned write-back of corrected data over a read-write open
    fn write_delta(&mut self, buf: &[u8]) -> Result<usize> {
        let chunk_size = self.media.chunk_size() as u64;
        let media_size = self.media.media_size();
        let read = self.read_side.as_ref().ok_or_else(|| {
            EwfError::InvalidArgument("handle is not open for reading".to_string())
        })?;
        let position = read.position;

        if position % chunk_size != 0 {
            return Err(EwfError::InvalidArgument(format!(
                "write-back must start on a chunk boundary (offset {})",
                position
            )));
        }
        if position + buf.len() as u64 > media_size {
            return Err(EwfError::InvalidArgument(
                "write-back extends past the media".to_string(),
            ));
        }

        if self.delta.is_none() {
            let path = self
                .delta_path
                .clone()
                .expect("read-write handles carry a delta path");
            self.delta = Some(DeltaSegment::create(path)?);
        }
        let delta = self.delta.as_mut().unwrap();

        let mut consumed = 0usize;
        let mut chunk = position / chunk_size;
        while consumed < buf.len() {
            let start = chunk * chunk_size;
            let expected = (media_size - start).min(chunk_size) as usize;
            let remaining = buf.len() - consumed;
            if remaining < expected {
                return Err(EwfError::InvalidArgument(format!(
                    "write-back must cover whole chunks ({} bytes left, chunk holds {})",
                    remaining, expected
                )));
            }
            delta.write_chunk(chunk, &buf[consumed..consumed + expected])?;
            consumed += expected;
            chunk += 1;
        }

        let read = self.read_side.as_mut().unwrap();
        read.state.invalidate_cache();
        read.position = position + consumed as u64;
        Ok(consumed)
    }

    // =========================================================================
    // Setter Gates
    // =========================================================================

    fn settings(&mut self) -> Result<&mut WriteState> {
        if self.mode != OpenMode::Write {
            return Err(EwfError::InvalidArgument(
                "setting applies to write handles".to_string(),
            ));
        }
        if self.state != HandleState::Opened {
            return Err(EwfError::InvalidArgument(
                "geometry is frozen after the first write".to_string(),
            ));
        }
        Ok(self.write_side.as_mut().unwrap())
    }

    pub fn set_sectors_per_chunk(&mut self, sectors_per_chunk: u32) -> Result<()> {
        self.settings()?;
        self.media.sectors_per_chunk = sectors_per_chunk;
        self.media.validate()
    }

    pub fn set_bytes_per_sector(&mut self, bytes_per_sector: u32) -> Result<()> {
        self.settings()?;
        self.media.bytes_per_sector = bytes_per_sector;
        self.media.validate()
    }

    pub fn set_write_segment_file_size(&mut self, size: u64) -> Result<()> {
        self.settings()?.set_segment_file_size(size)
    }

    /// GUID is write-once
    pub fn set_guid(&mut self, guid: [u8; 16]) -> Result<()> {
        self.settings()?;
        if self.media.guid != [0u8; 16] {
            return Err(EwfError::InvalidArgument(
                "GUID is already set".to_string(),
            ));
        }
        self.media.guid = guid;
        Ok(())
    }

    /// MD5 is write-once; when set it overrides the computed digest in
    /// the hash section
    pub fn set_md5_hash(&mut self, md5: [u8; 16]) -> Result<()> {
        self.settings()?;
        if self.digests.md5.is_some() {
            return Err(EwfError::InvalidArgument(
                "MD5 hash is already set".to_string(),
            ));
        }
        self.digests.md5 = Some(md5);
        Ok(())
    }

    pub fn set_write_compression_values(
        &mut self,
        level: CompressionLevel,
        compress_empty_block: bool,
    ) -> Result<()> {
        let write = self.settings()?;
        write.compress_empty_block = compress_empty_block;
        self.media.compression_level = level;
        Ok(())
    }

    pub fn set_write_media_type(&mut self, media_type: MediaType, physical: bool) -> Result<()> {
        self.settings()?;
        self.media.media_type = media_type;
        if physical {
            self.media.media_flags |= media_flags::PHYSICAL;
        } else {
            self.media.media_flags &= !media_flags::PHYSICAL;
        }
        Ok(())
    }

    pub fn set_write_format(&mut self, format: EwfFormat) -> Result<()> {
        self.settings()?;
        self.format = format;
        Ok(())
    }

    /// Advertise the media size the writer should expect
    pub fn set_write_input_size(&mut self, input_size: u64) -> Result<()> {
        self.settings()?.input_size = Some(input_size);
        Ok(())
    }

    pub fn set_write_error_granularity(&mut self, granularity: u32) -> Result<()> {
        self.settings()?;
        self.media.error_granularity = granularity;
        Ok(())
    }

    pub fn set_short_input_policy(&mut self, policy: ShortInputPolicy) -> Result<()> {
        self.settings()?.short_input_policy = policy;
        Ok(())
    }

    /// Replace the segment filename callback
    pub fn set_segment_filename_generator(
        &mut self,
        generator: crate::common::FilenameGenerator,
    ) -> Result<()> {
        self.settings()?.filename_generator = generator;
        Ok(())
    }

    /// Zero the affected sectors when a chunk checksum fails on read
    pub fn set_read_wipe_chunk_on_error(&mut self, wipe: bool) -> Result<()> {
        let read = self.read_side_mut()?;
        read.state.wipe_on_error = wipe;
        Ok(())
    }

    pub fn set_delta_segment_filename<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.mode != OpenMode::ReadWrite {
            return Err(EwfError::InvalidArgument(
                "delta filenames apply to read-write handles".to_string(),
            ));
        }
        if self.delta.is_some() {
            return Err(EwfError::InvalidArgument(
                "delta segment is already in use".to_string(),
            ));
        }
        self.delta_path = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    pub fn set_header_value(&mut self, identifier: &str, value: &str) -> Result<()> {
        self.settings()?;
        self.header_values.set(identifier, value);
        Ok(())
    }

    pub fn set_hash_value(&mut self, identifier: &str, value: &str) -> Result<()> {
        if self.mode != OpenMode::Write || self.state == HandleState::Finalized {
            return Err(EwfError::InvalidArgument(
                "hash values are set on write handles before finalize".to_string(),
            ));
        }
        if identifier == "sha1" {
            if let Ok(raw) = hex::decode(value) {
                if let Ok(sha1) = <[u8; 20]>::try_from(raw.as_slice()) {
                    self.digests.sha1 = Some(sha1);
                }
            }
        }
        self.hash_values.set(identifier, value);
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn get_sectors_per_chunk(&self) -> u32 {
        self.media.sectors_per_chunk
    }

    pub fn get_bytes_per_sector(&self) -> u32 {
        self.media.bytes_per_sector
    }

    pub fn get_amount_of_sectors(&self) -> u64 {
        self.media.amount_of_sectors
    }

    pub fn get_chunk_size(&self) -> u32 {
        self.media.chunk_size()
    }

    pub fn get_media_size(&self) -> u64 {
        self.media.media_size()
    }

    pub fn get_media_type(&self) -> MediaType {
        self.media.media_type
    }

    pub fn get_media_flags(&self) -> u8 {
        self.media.media_flags
    }

    /// Physical device vs logical volume, from the media flags
    pub fn is_physical_volume(&self) -> bool {
        self.media.is_physical()
    }

    pub fn get_error_granularity(&self) -> u32 {
        self.media.error_granularity
    }

    pub fn get_compression_level(&self) -> CompressionLevel {
        self.media.compression_level
    }

    pub fn get_format(&self) -> EwfFormat {
        self.format
    }

    pub fn get_guid(&self) -> [u8; 16] {
        self.media.guid
    }

    pub fn get_md5_hash(&self) -> Option<[u8; 16]> {
        self.digests.md5
    }

    pub fn get_sha1_hash(&self) -> Option<[u8; 20]> {
        self.digests.sha1
    }

    pub fn get_amount_of_acquiry_errors(&self) -> u32 {
        self.acquiry_errors.len() as u32
    }

    pub fn get_acquiry_error(&self, index: u32) -> Result<SectorError> {
        self.acquiry_errors.get(index as usize).ok_or_else(|| {
            EwfError::InvalidArgument(format!("acquiry error index {} out of range", index))
        })
    }

    pub fn add_acquiry_error(&mut self, start_sector: u64, amount_of_sectors: u32) -> Result<()> {
        if self.state == HandleState::Finalized {
            return Err(EwfError::InvalidArgument(
                "handle is already finalized".to_string(),
            ));
        }
        self.acquiry_errors.add(start_sector, amount_of_sectors)
    }

    pub fn get_amount_of_crc_errors(&self) -> u32 {
        self.crc_errors.len() as u32
    }

    pub fn get_crc_error(&self, index: u32) -> Result<SectorError> {
        self.crc_errors.get(index as usize).ok_or_else(|| {
            EwfError::InvalidArgument(format!("CRC error index {} out of range", index))
        })
    }

    pub fn add_crc_error(&mut self, start_sector: u64, amount_of_sectors: u32) -> Result<()> {
        self.crc_errors.add(start_sector, amount_of_sectors)
    }

    pub fn get_write_amount_of_chunks(&self) -> u64 {
        self.write_side
            .as_ref()
            .map(|w| w.amount_of_chunks_written())
            .unwrap_or(0)
    }

    /// Paths of the segment files produced so far by a write handle
    pub fn get_segment_paths(&self) -> &[PathBuf] {
        self.write_side
            .as_ref()
            .map(|w| w.segment_paths())
            .unwrap_or(&[])
    }

    pub fn get_amount_of_header_values(&self) -> u32 {
        self.header_values.len() as u32
    }

    pub fn get_header_value_identifier(&self, index: u32) -> Result<&str> {
        self.header_values.identifier_at(index as usize).ok_or_else(|| {
            EwfError::InvalidArgument(format!("header value index {} out of range", index))
        })
    }

    pub fn get_header_value(&self, identifier: &str) -> Option<&str> {
        self.header_values.get(identifier)
    }

    pub fn get_amount_of_hash_values(&self) -> u32 {
        self.hash_values.len() as u32
    }

    pub fn get_hash_value_identifier(&self, index: u32) -> Result<&str> {
        self.hash_values.identifier_at(index as usize).ok_or_else(|| {
            EwfError::InvalidArgument(format!("hash value index {} out of range", index))
        })
    }

    pub fn get_hash_value(&self, identifier: &str) -> Option<&str> {
        self.hash_values.get(identifier)
    }

    /// Path the delta segment uses (or would use) in read-write mode
    pub fn get_delta_segment_filename(&self) -> Option<&Path> {
        self.delta_path.as_deref()
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    /// Decode the stored header sections into the queryable value table,
    /// preferring `xheader` over `header2` over `header`, and render the
    /// date values per `date_format`
    pub fn parse_header_values(&mut self, date_format: DateFormat) -> Result<()> {
        let decoded = if let Some(raw) = self.raw_xheader.as_deref() {
            Some(header_values::decode_xheader(raw)?)
        } else if let Some(raw) = self.raw_header2.as_deref() {
            Some(header_values::decode_header2(raw)?)
        } else if let Some(raw) = self.raw_header.as_deref() {
            Some(header_values::decode_header(raw)?)
        } else {
            None
        };
        if let Some(decoded) = decoded {
            self.header_values = decoded;
        }
        header_values::apply_date_format(&mut self.header_values, date_format);
        Ok(())
    }

    /// Populate the hash value table from the stored digests
    pub fn parse_hash_values(&mut self) -> Result<()> {
        if let Some(md5) = self.digests.md5 {
            self.hash_values.set("md5", &hex::encode(md5));
        }
        if let Some(sha1) = self.digests.sha1 {
            self.hash_values.set("sha1", &hex::encode(sha1));
        }
        Ok(())
    }

    /// Summarize the image. Header values are decoded first when the
    /// table is still empty.
    pub fn info(&mut self) -> Result<ImageInfo> {
        if self.header_values.is_empty()
            && (self.raw_header.is_some()
                || self.raw_header2.is_some()
                || self.raw_xheader.is_some())
        {
            self.parse_header_values(DateFormat::Iso8601)?;
        }
        let chunk_count = match self.read_side.as_ref() {
            Some(read) => read.offsets.len(),
            None => self.get_write_amount_of_chunks(),
        };
        let segment_count = match self.read_side.as_ref() {
            Some(read) => read.pool.file_count() as u32,
            None => self.get_segment_paths().len() as u32,
        };
        let value = |id: &str| self.header_values.get(id).map(|v| v.to_string());
        Ok(ImageInfo {
            format: self.format.name().to_string(),
            segment_count,
            chunk_count,
            sectors_per_chunk: self.media.sectors_per_chunk,
            bytes_per_sector: self.media.bytes_per_sector,
            amount_of_sectors: self.media.amount_of_sectors,
            media_size: self.media.media_size(),
            media_type: self.media.media_type.name().to_string(),
            compression: self.media.compression_level.name().to_string(),
            guid: format_guid(&self.media.guid),
            stored_md5: self.digests.md5.map(hex::encode),
            stored_sha1: self.digests.sha1.map(hex::encode),
            case_number: value("case_number"),
            description: value("description"),
            examiner_name: value("examiner_name"),
            evidence_number: value("evidence_number"),
            notes: value("notes"),
            acquiry_date: value("acquiry_date"),
            system_date: value("system_date"),
            acquiry_errors: self.acquiry_errors.len() as u32,
        })
    }

    /// Stream the full media through the read path and compare its MD5
    /// against the stored digest
    pub fn verify_md5(&mut self) -> Result<VerifyOutcome> {
        let media_size = self.media.media_size();
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; self.media.chunk_size().max(512) as usize];
        let mut position = 0u64;
        while position < media_size {
            let previous = self.seek_offset(position)?;
            debug_assert_eq!(previous, position);
            let n = self.read_buffer(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            position += n as u64;
        }
        let computed: [u8; 16] = hasher.finalize().into();
        let stored = self.digests.md5;
        Ok(VerifyOutcome {
            computed_md5: hex::encode(computed),
            stored_md5: stored.map(hex::encode),
            matches: stored.map(|s| s == computed),
        })
    }

    /// Write the decoded media to a flat raw file, returning the bytes
    /// extracted
    pub fn extract_to<P: AsRef<Path>>(&mut self, output: P) -> Result<u64> {
        use std::io::Write;
        let mut file = std::fs::File::create(output.as_ref())
            .map_err(|e| EwfError::open(&output.as_ref().to_path_buf(), e))?;
        let media_size = self.media.media_size();
        let mut buf = vec![0u8; self.media.chunk_size().max(512) as usize];
        self.seek_offset(0)?;
        let mut total = 0u64;
        while total < media_size {
            let n = self.read_buffer(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .map_err(|e| EwfError::io("write extracted media", e))?;
            total += n as u64;
        }
        Ok(total)
    }
}

/// Copy the source handle's header values into the destination, keeping
/// their insertion order. The destination must be a write handle that has
/// not been written to yet.
pub fn copy_header_values(destination: &mut EwfHandle, source: &EwfHandle) -> Result<()> {
    for (identifier, value) in source.header_values.iter() {
        destination.set_header_value(identifier, value)?;
    }
    Ok(())
}

/// Split the handle into the writer and the context it mutates. Separate
/// fields keep the borrows disjoint.
fn split_write(handle: &mut EwfHandle) -> Result<(WriteContext<'_>, &mut WriteState)> {
    let EwfHandle {
        media,
        format,
        header_values,
        digests,
        acquiry_errors,
        write_side,
        write_offsets,
        ..
    } = handle;
    let write = write_side.as_mut().ok_or_else(|| {
        EwfError::InvalidArgument("handle is not open for writing".to_string())
    })?;
    Ok((
        WriteContext {
            media,
            format: *format,
            header_values,
            digests,
            acquiry_errors,
            offsets: write_offsets,
        },
        write,
    ))
}

// =============================================================================
// std::io Adapters
// =============================================================================

fn to_io_error(error: EwfError) -> io::Error {
    match &error {
        EwfError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, error),
        EwfError::Io { .. } => io::Error::new(io::ErrorKind::Other, error),
        _ => io::Error::new(io::ErrorKind::InvalidData, error),
    }
}

impl io::Read for EwfHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_buffer(buf).map_err(to_io_error)
    }
}

impl io::Seek for EwfHandle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let current = self
            .read_side
            .as_ref()
            .map(|r| r.position)
            .unwrap_or(0);
        let media_size = self.media.media_size();
        let target = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::Current(delta) => current as i64 + delta,
            io::SeekFrom::End(delta) => media_size as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the media",
            ));
        }
        self.seek_offset(target as u64).map_err(to_io_error)
    }
}
