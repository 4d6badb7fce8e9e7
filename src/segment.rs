//! One physical segment file
//!
//! A segment starts with the 8-byte `EVF\x09\r\n\xff\x00` signature and a
//! 5-byte field block (`1`, segment number u16, `0` u16), followed by the
//! section chain. The walker visits descriptors until `done` (image end)
//! or `next` (continues in the following segment); the writer appends
//! sections and keeps the running offset and the open `sectors` body.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::common::binary::read_bytes_at;
use crate::error::{EwfError, Result};
use crate::section::{SectionDescriptor, SectionKind, SECTION_DESCRIPTOR_SIZE};

/// EWF version 1 signature
pub const EVF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";

/// Signature plus start/number/end fields
pub const FILE_HEADER_SIZE: u64 = 13;

/// Walk guard against descriptor cycles
const MAX_SECTIONS_PER_SEGMENT: usize = 65536;

// =============================================================================
// File Header
// =============================================================================

pub fn encode_file_header(segment_number: u16) -> [u8; 13] {
    let mut raw = [0u8; 13];
    raw[..8].copy_from_slice(EVF_SIGNATURE);
    raw[8] = 1;
    raw[9..11].copy_from_slice(&segment_number.to_le_bytes());
    raw
}

/// Read and validate the 13-byte file header, returning the segment number
pub fn read_file_header(file: &mut File) -> Result<u16> {
    let raw = read_bytes_at(file, 0, FILE_HEADER_SIZE as usize)?;
    if &raw[..8] != EVF_SIGNATURE {
        return Err(EwfError::CorruptContainer(
            "file signature is not EVF".to_string(),
        ));
    }
    if raw[8] != 1 || raw[11] != 0 || raw[12] != 0 {
        return Err(EwfError::CorruptContainer(
            "file header fields are malformed".to_string(),
        ));
    }
    Ok(u16::from_le_bytes([raw[9], raw[10]]))
}

/// Check whether the file at `path` carries the EWF signature.
/// Files too short to hold a header are simply not EWF.
pub fn check_signature(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).map_err(|e| EwfError::open(&path.to_path_buf(), e))?;
    let mut raw = [0u8; 13];
    match file.read_exact(&mut raw) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
        Err(e) => return Err(EwfError::io("read signature", e)),
    }
    Ok(&raw[..8] == EVF_SIGNATURE && raw[8] == 1 && raw[11] == 0 && raw[12] == 0)
}

// =============================================================================
// Section Walk
// =============================================================================

/// One section encountered during a walk
#[derive(Debug, Clone)]
pub struct WalkedSection {
    pub kind: SectionKind,
    pub tag: String,
    /// Offset of the descriptor within the segment file
    pub start: u64,
    /// Offset of the payload within the segment file
    pub body_offset: u64,
    /// Payload size (section size minus the descriptor)
    pub body_size: u64,
}

/// How a segment's section chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// `done`: the image ends in this segment
    Done,
    /// `next`: the chain continues in the following segment
    Next,
}

/// Walk the section chain of one segment file
pub fn walk_sections(file: &mut File, segment_number: u16) -> Result<(Vec<WalkedSection>, WalkEnd)> {
    let mut sections = Vec::new();
    let mut current = FILE_HEADER_SIZE;

    for _ in 0..MAX_SECTIONS_PER_SEGMENT {
        let descriptor = SectionDescriptor::read(file, current)?;
        let kind = descriptor.kind();
        let tag = descriptor.type_str();
        trace!(
            segment = segment_number,
            offset = current,
            tag = %tag,
            size = descriptor.size,
            "section"
        );

        let terminal = descriptor.next_offset == current;
        if !terminal {
            if descriptor.size < SECTION_DESCRIPTOR_SIZE
                || descriptor.next_offset != current + descriptor.size
            {
                return Err(EwfError::CorruptContainer(format!(
                    "section '{}' at offset {} in segment {} declares size {} but next offset {}",
                    tag, current, segment_number, descriptor.size, descriptor.next_offset
                )));
            }
        }

        sections.push(WalkedSection {
            kind,
            tag,
            start: current,
            body_offset: current + SECTION_DESCRIPTOR_SIZE,
            body_size: descriptor.size.saturating_sub(SECTION_DESCRIPTOR_SIZE),
        });

        if terminal {
            return match kind {
                SectionKind::Done => Ok((sections, WalkEnd::Done)),
                SectionKind::Next => Ok((sections, WalkEnd::Next)),
                _ => Err(EwfError::CorruptContainer(format!(
                    "segment {} chain ends in '{}' instead of done/next",
                    segment_number,
                    sections.last().map(|s| s.tag.as_str()).unwrap_or("?")
                ))),
            };
        }
        current = descriptor.next_offset;
    }

    Err(EwfError::CorruptContainer(format!(
        "segment {} section chain does not terminate",
        segment_number
    )))
}

// =============================================================================
// Segment Writer
// =============================================================================

/// Appends sections to one segment file being produced
pub struct SegmentWriter {
    file: File,
    path: PathBuf,
    segment_number: u16,
    current_offset: u64,
    open_sectors: Option<u64>,
}

impl SegmentWriter {
    /// Create the segment file and write its 13-byte header
    pub fn create(path: PathBuf, segment_number: u16) -> Result<Self> {
        debug!(segment = segment_number, path = %path.display(), "creating segment file");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| EwfError::open(&path, e))?;
        file.write_all(&encode_file_header(segment_number))
            .map_err(|e| EwfError::io("write file header", e))?;
        Ok(Self {
            file,
            path,
            segment_number,
            current_offset: FILE_HEADER_SIZE,
            open_sectors: None,
        })
    }

    pub fn segment_number(&self) -> u16 {
        self.segment_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current physical offset, equal to the bytes written so far
    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    /// Append a section with a fully-formed body. Returns the offset of
    /// the section descriptor.
    pub fn append_section(&mut self, tag: &str, body: &[u8]) -> Result<u64> {
        debug_assert!(self.open_sectors.is_none(), "sectors section left open");
        let start = self.current_offset;
        let size = SECTION_DESCRIPTOR_SIZE + body.len() as u64;
        let descriptor = SectionDescriptor::encode(tag, start + size, size);
        self.file
            .write_all(&descriptor)
            .map_err(|e| EwfError::io(format!("write {} descriptor", tag), e))?;
        self.file
            .write_all(body)
            .map_err(|e| EwfError::io(format!("write {} body", tag), e))?;
        self.current_offset = start + size;
        trace!(segment = self.segment_number, tag, offset = start, size, "appended section");
        Ok(start)
    }

    /// Append a terminal `done`/`next` section, whose next-offset points
    /// at itself
    pub fn append_terminal(&mut self, tag: &str) -> Result<()> {
        let start = self.current_offset;
        let descriptor = SectionDescriptor::encode(tag, start, SECTION_DESCRIPTOR_SIZE);
        self.file
            .write_all(&descriptor)
            .map_err(|e| EwfError::io(format!("write {} descriptor", tag), e))?;
        self.current_offset = start + SECTION_DESCRIPTOR_SIZE;
        trace!(segment = self.segment_number, tag, offset = start, "appended terminal section");
        Ok(())
    }

    /// Open a `sectors` section whose body will be streamed chunk by
    /// chunk. A placeholder descriptor is written and back-patched by
    /// `end_sectors`.
    pub fn begin_sectors(&mut self) -> Result<u64> {
        let start = self.current_offset;
        self.file
            .write_all(&[0u8; SECTION_DESCRIPTOR_SIZE as usize])
            .map_err(|e| EwfError::io("write sectors placeholder", e))?;
        self.current_offset = start + SECTION_DESCRIPTOR_SIZE;
        self.open_sectors = Some(start);
        Ok(self.current_offset)
    }

    /// Append one stored chunk payload to the open `sectors` body,
    /// returning its file offset
    pub fn append_chunk_payload(&mut self, payload: &[u8]) -> Result<u64> {
        debug_assert!(self.open_sectors.is_some(), "no sectors section open");
        let offset = self.current_offset;
        self.file
            .write_all(payload)
            .map_err(|e| EwfError::io("write chunk payload", e))?;
        self.current_offset = offset + payload.len() as u64;
        Ok(offset)
    }

    /// Close the open `sectors` section, back-patching its descriptor
    pub fn end_sectors(&mut self) -> Result<()> {
        let start = self.open_sectors.take().ok_or_else(|| {
            EwfError::InvalidArgument("no sectors section open".to_string())
        })?;
        let size = self.current_offset - start;
        let descriptor = SectionDescriptor::encode("sectors", start + size, size);
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|e| EwfError::io("seek to sectors descriptor", e))?;
        self.file
            .write_all(&descriptor)
            .map_err(|e| EwfError::io("patch sectors descriptor", e))?;
        self.file
            .seek(SeekFrom::Start(self.current_offset))
            .map_err(|e| EwfError::io("seek past sectors body", e))?;
        trace!(segment = self.segment_number, offset = start, size, "closed sectors section");
        Ok(())
    }

    pub fn sectors_open(&self) -> bool {
        self.open_sectors.is_some()
    }

    /// Read back bytes written earlier, restoring the append position.
    /// Used by the delta path to serve corrected chunks.
    pub fn read_back(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EwfError::io("seek for read-back", e))?;
        let mut buf = vec![0u8; length];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| EwfError::io("read-back", e))?;
        self.file
            .seek(SeekFrom::Start(self.current_offset))
            .map_err(|e| EwfError::io("seek to append position", e))?;
        Ok(buf)
    }

    /// Overwrite bytes written earlier (volume back-patching), restoring
    /// the append position
    pub fn patch(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EwfError::io("seek for patch", e))?;
        self.file
            .write_all(data)
            .map_err(|e| EwfError::io("patch bytes", e))?;
        self.file
            .seek(SeekFrom::Start(self.current_offset))
            .map_err(|e| EwfError::io("seek to append position", e))?;
        Ok(())
    }

    /// Finish the segment, returning its path and final size
    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        debug_assert!(self.open_sectors.is_none(), "sectors section left open");
        self.file
            .flush()
            .map_err(|e| EwfError::io("flush segment", e))?;
        debug!(
            segment = self.segment_number,
            path = %self.path.display(),
            size = self.current_offset,
            "finished segment file"
        );
        Ok((self.path, self.current_offset))
    }
}
