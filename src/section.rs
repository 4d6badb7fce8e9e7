//! Section descriptor and payload codecs
//!
//! Every section starts with a 76-byte descriptor: a 16-byte NUL-padded
//! type tag, the absolute offset of the next descriptor, the section size
//! (descriptor included), 40 padding bytes, and a CRC-32 over the
//! preceding 76 - 4 bytes. Payload layouts are fixed per type; all
//! integers are little-endian.

use std::fs::File;

use flate2::Compression;

use crate::common::binary::{
    bytes_to_string, get_u32_le, get_u64_le, put_padding, put_u32_le, put_u64_le, read_bytes_at,
    string_to_array,
};
use crate::common::checksum::section_crc;
use crate::common::compress::{zlib_compress_vec, zlib_decompress_vec};
use crate::error::{EwfError, Result};
use crate::format::CompressionLevel;
use crate::media::{MediaInfo, MediaType};

/// Size of the section descriptor preceding every payload
pub const SECTION_DESCRIPTOR_SIZE: u64 = 76;

/// Fixed size of the volume/disk/data section body
pub const VOLUME_BODY_SIZE: usize = 1052;

/// Size of the table section header preceding the offset entries
pub const TABLE_HEADER_SIZE: usize = 24;

/// High bit of a table entry marks the chunk as compressed
pub const TABLE_ENTRY_COMPRESSED: u32 = 0x8000_0000;

/// Mask of the offset bits of a table entry
pub const TABLE_ENTRY_OFFSET_MASK: u32 = 0x7FFF_FFFF;

// =============================================================================
// Section Descriptor
// =============================================================================

#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub type_tag: [u8; 16],
    pub next_offset: u64,
    pub size: u64,
}

impl SectionDescriptor {
    /// Read and CRC-check a descriptor at `offset`
    pub fn read(file: &mut File, offset: u64) -> Result<Self> {
        let raw = read_bytes_at(file, offset, SECTION_DESCRIPTOR_SIZE as usize)?;

        let stored_crc = get_u32_le(&raw, 72);
        let computed = section_crc(&raw[..72]);
        if stored_crc != computed {
            return Err(EwfError::CorruptContainer(format!(
                "section descriptor CRC mismatch at offset {} (stored {:#010x}, computed {:#010x})",
                offset, stored_crc, computed
            )));
        }

        let mut type_tag = [0u8; 16];
        type_tag.copy_from_slice(&raw[..16]);
        Ok(Self {
            type_tag,
            next_offset: get_u64_le(&raw, 16),
            size: get_u64_le(&raw, 24),
        })
    }

    /// Encode a descriptor, filling padding and CRC
    pub fn encode(type_tag: &str, next_offset: u64, size: u64) -> [u8; 76] {
        let mut raw = [0u8; 76];
        let tag: [u8; 16] = string_to_array(type_tag);
        raw[..16].copy_from_slice(&tag);
        raw[16..24].copy_from_slice(&next_offset.to_le_bytes());
        raw[24..32].copy_from_slice(&size.to_le_bytes());
        let crc = section_crc(&raw[..72]);
        raw[72..76].copy_from_slice(&crc.to_le_bytes());
        raw
    }

    pub fn type_str(&self) -> String {
        bytes_to_string(&self.type_tag)
    }

    pub fn kind(&self) -> SectionKind {
        SectionKind::from_tag(&self.type_str())
    }
}

/// Typed dispatch over the known section tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Header,
    Header2,
    Xheader,
    Volume,
    Disk,
    Data,
    Sectors,
    Table,
    Table2,
    Next,
    Done,
    Error2,
    Hash,
    Digest,
    Xhash,
    Session,
    Ltree,
    Ltypes,
    Unknown,
}

impl SectionKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "header" => SectionKind::Header,
            "header2" => SectionKind::Header2,
            "xheader" => SectionKind::Xheader,
            "volume" => SectionKind::Volume,
            "disk" => SectionKind::Disk,
            "data" => SectionKind::Data,
            "sectors" => SectionKind::Sectors,
            "table" => SectionKind::Table,
            "table2" => SectionKind::Table2,
            "next" => SectionKind::Next,
            "done" => SectionKind::Done,
            "error2" => SectionKind::Error2,
            "hash" => SectionKind::Hash,
            "digest" => SectionKind::Digest,
            "xhash" => SectionKind::Xhash,
            "session" => SectionKind::Session,
            "ltree" => SectionKind::Ltree,
            "ltypes" => SectionKind::Ltypes,
            _ => SectionKind::Unknown,
        }
    }
}

// =============================================================================
// volume / disk / data
// =============================================================================

/// Decoded fields of a volume-bearing section
#[derive(Debug, Clone)]
pub struct VolumeFields {
    pub media: MediaInfo,
    pub chunk_count: u64,
}

pub fn encode_volume(media: &MediaInfo, chunk_count: u64) -> Result<Vec<u8>> {
    if media.amount_of_sectors > u32::MAX as u64 {
        return Err(EwfError::InvalidArgument(format!(
            "sector count {} does not fit the volume section",
            media.amount_of_sectors
        )));
    }

    let mut body = Vec::with_capacity(VOLUME_BODY_SIZE);
    put_u32_le(&mut body, (chunk_count & 0xFFFF_FFFF) as u32);
    put_u32_le(&mut body, media.sectors_per_chunk);
    put_u32_le(&mut body, media.bytes_per_sector);
    put_u32_le(&mut body, media.amount_of_sectors as u32);
    body.push(media.media_type.as_u8());
    put_padding(&mut body, 3);
    put_u32_le(&mut body, (chunk_count >> 32) as u32);
    body.push(media.compression_level.as_u8());
    put_padding(&mut body, 3);
    put_u32_le(&mut body, media.error_granularity);
    body.push(media.media_flags);
    put_padding(&mut body, 3);
    body.extend_from_slice(&media.guid);
    let pad_len = VOLUME_BODY_SIZE - 4 - body.len();
    put_padding(&mut body, pad_len);
    let crc = section_crc(&body);
    put_u32_le(&mut body, crc);
    debug_assert_eq!(body.len(), VOLUME_BODY_SIZE);
    Ok(body)
}

pub fn decode_volume(body: &[u8]) -> Result<VolumeFields> {
    if body.len() < VOLUME_BODY_SIZE {
        return Err(EwfError::CorruptContainer(format!(
            "volume section body is {} bytes, expected {}",
            body.len(),
            VOLUME_BODY_SIZE
        )));
    }
    let stored_crc = get_u32_le(body, VOLUME_BODY_SIZE - 4);
    let computed = section_crc(&body[..VOLUME_BODY_SIZE - 4]);
    if stored_crc != computed {
        return Err(EwfError::CorruptContainer(
            "volume section CRC mismatch".to_string(),
        ));
    }

    let chunk_count_low = get_u32_le(body, 0) as u64;
    let chunk_count_high = get_u32_le(body, 20) as u64;
    let media = MediaInfo {
        sectors_per_chunk: get_u32_le(body, 4),
        bytes_per_sector: get_u32_le(body, 8),
        amount_of_sectors: get_u32_le(body, 12) as u64,
        media_type: MediaType::from_u8(body[16])?,
        media_flags: body[32],
        error_granularity: get_u32_le(body, 28),
        compression_level: CompressionLevel::from_u8(body[24]),
        guid: body[36..52].try_into().unwrap(),
    };
    media.validate()?;
    Ok(VolumeFields {
        media,
        chunk_count: (chunk_count_high << 32) | chunk_count_low,
    })
}

// =============================================================================
// table / table2
// =============================================================================

/// Why a table body could not be decoded; drives the table2 fallback
#[derive(Debug)]
pub enum TableDecodeError {
    /// The 24-byte table header failed its CRC; the entry count is unknown
    Header,
    /// The header was intact but the entry array failed its CRC
    Entries { count: u32 },
    /// The body is structurally impossible
    Malformed(String),
}

pub fn encode_table(entries: &[u32], base_offset: u64) -> Vec<u8> {
    let mut body = Vec::with_capacity(TABLE_HEADER_SIZE + entries.len() * 4 + 4);
    put_u32_le(&mut body, entries.len() as u32);
    put_padding(&mut body, 4);
    put_u64_le(&mut body, base_offset);
    put_padding(&mut body, 4);
    let header_crc = section_crc(&body[..20]);
    put_u32_le(&mut body, header_crc);

    let entries_start = body.len();
    for &entry in entries {
        put_u32_le(&mut body, entry);
    }
    let entries_crc = section_crc(&body[entries_start..]);
    put_u32_le(&mut body, entries_crc);
    body
}

pub fn decode_table(body: &[u8]) -> std::result::Result<(u64, Vec<u32>), TableDecodeError> {
    if body.len() < TABLE_HEADER_SIZE {
        return Err(TableDecodeError::Malformed(format!(
            "table body is {} bytes, header alone is {}",
            body.len(),
            TABLE_HEADER_SIZE
        )));
    }
    let stored_header_crc = get_u32_le(body, 20);
    if stored_header_crc != section_crc(&body[..20]) {
        return Err(TableDecodeError::Header);
    }

    let count = get_u32_le(body, 0);
    let base_offset = get_u64_le(body, 8);
    let entries_end = TABLE_HEADER_SIZE + count as usize * 4;
    if body.len() < entries_end + 4 {
        return Err(TableDecodeError::Malformed(format!(
            "table body is {} bytes but declares {} entries",
            body.len(),
            count
        )));
    }

    let entries_bytes = &body[TABLE_HEADER_SIZE..entries_end];
    let stored_entries_crc = get_u32_le(body, entries_end);
    if stored_entries_crc != section_crc(entries_bytes) {
        return Err(TableDecodeError::Entries { count });
    }

    let entries = entries_bytes
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes(raw.try_into().unwrap()))
        .collect();
    Ok((base_offset, entries))
}

// =============================================================================
// error2
// =============================================================================

pub fn encode_error2(errors: &[crate::media::SectorError]) -> Vec<u8> {
    let mut body = Vec::with_capacity(12 + errors.len() * 12 + 4);
    put_u32_le(&mut body, errors.len() as u32);
    put_padding(&mut body, 4);
    let header_crc = section_crc(&body[..8]);
    put_u32_le(&mut body, header_crc);

    let entries_start = body.len();
    for error in errors {
        put_u64_le(&mut body, error.start_sector);
        put_u32_le(&mut body, error.amount_of_sectors);
    }
    let entries_crc = section_crc(&body[entries_start..]);
    put_u32_le(&mut body, entries_crc);
    body
}

pub fn decode_error2(body: &[u8]) -> Result<Vec<crate::media::SectorError>> {
    if body.len() < 12 {
        return Err(EwfError::CorruptContainer(
            "error2 section body shorter than its header".to_string(),
        ));
    }
    if get_u32_le(body, 8) != section_crc(&body[..8]) {
        return Err(EwfError::CorruptContainer(
            "error2 header CRC mismatch".to_string(),
        ));
    }
    let count = get_u32_le(body, 0) as usize;
    let entries_end = 12 + count * 12;
    if body.len() < entries_end + 4 {
        return Err(EwfError::CorruptContainer(format!(
            "error2 body is {} bytes but declares {} entries",
            body.len(),
            count
        )));
    }
    if get_u32_le(body, entries_end) != section_crc(&body[12..entries_end]) {
        return Err(EwfError::CorruptContainer(
            "error2 entries CRC mismatch".to_string(),
        ));
    }

    let mut errors = Vec::with_capacity(count);
    for index in 0..count {
        let at = 12 + index * 12;
        errors.push(crate::media::SectorError {
            start_sector: get_u64_le(body, at),
            amount_of_sectors: get_u32_le(body, at + 8),
        });
    }
    Ok(errors)
}

// =============================================================================
// hash / digest / xhash
// =============================================================================

pub fn encode_hash(md5: &[u8; 16], tail: &[u8; 16]) -> Vec<u8> {
    let mut body = Vec::with_capacity(36);
    body.extend_from_slice(md5);
    body.extend_from_slice(tail);
    let crc = section_crc(&body);
    put_u32_le(&mut body, crc);
    body
}

pub fn decode_hash(body: &[u8]) -> Result<([u8; 16], [u8; 16])> {
    if body.len() < 36 {
        return Err(EwfError::CorruptContainer(
            "hash section body shorter than 36 bytes".to_string(),
        ));
    }
    if get_u32_le(body, 32) != section_crc(&body[..32]) {
        return Err(EwfError::CorruptContainer(
            "hash section CRC mismatch".to_string(),
        ));
    }
    Ok((body[..16].try_into().unwrap(), body[16..32].try_into().unwrap()))
}

pub fn encode_digest(md5: &[u8; 16], sha1: &[u8; 20]) -> Vec<u8> {
    let mut body = Vec::with_capacity(80);
    body.extend_from_slice(md5);
    body.extend_from_slice(sha1);
    put_padding(&mut body, 40);
    let crc = section_crc(&body);
    put_u32_le(&mut body, crc);
    body
}

pub fn decode_digest(body: &[u8]) -> Result<([u8; 16], [u8; 20])> {
    if body.len() < 80 {
        return Err(EwfError::CorruptContainer(
            "digest section body shorter than 80 bytes".to_string(),
        ));
    }
    if get_u32_le(body, 76) != section_crc(&body[..76]) {
        return Err(EwfError::CorruptContainer(
            "digest section CRC mismatch".to_string(),
        ));
    }
    Ok((body[..16].try_into().unwrap(), body[16..36].try_into().unwrap()))
}

pub fn encode_xhash(md5: Option<&[u8; 16]>, sha1: Option<&[u8; 20]>) -> Result<Vec<u8>> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xhash>\n");
    if let Some(md5) = md5 {
        xml.push_str(&format!("\t<md5>{}</md5>\n", hex::encode(md5)));
    }
    if let Some(sha1) = sha1 {
        xml.push_str(&format!("\t<sha1>{}</sha1>\n", hex::encode(sha1)));
    }
    xml.push_str("</xhash>\n");
    zlib_compress_vec(xml.as_bytes(), Compression::default())
        .map_err(|e| EwfError::io("compress xhash", e))
}

pub fn decode_xhash(body: &[u8]) -> Result<(Option<[u8; 16]>, Option<[u8; 20]>)> {
    let raw = zlib_decompress_vec(body)
        .map_err(|_| EwfError::CorruptContainer("xhash section does not inflate".to_string()))?;
    let xml = String::from_utf8_lossy(&raw);

    let grab = |tag: &str| -> Option<Vec<u8>> {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        let start = xml.find(&open)? + open.len();
        let end = xml[start..].find(&close)? + start;
        hex::decode(xml[start..end].trim()).ok()
    };

    let md5 = grab("md5").and_then(|raw| <[u8; 16]>::try_from(raw.as_slice()).ok());
    let sha1 = grab("sha1").and_then(|raw| <[u8; 20]>::try_from(raw.as_slice()).ok());
    Ok((md5, sha1))
}
