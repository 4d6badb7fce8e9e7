// Little-endian binary primitives for the segment file codec
//
// The read side operates on `File` at the current position or a given
// offset; the write side appends to in-memory section bodies before they
// are flushed in one write.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{EwfError, Result};

// =============================================================================
// Read Functions (from current position)
// =============================================================================

/// Read a single byte from file at current position
pub fn read_u8(file: &mut File) -> Result<u8> {
    let mut buf = [0u8; 1];
    file.read_exact(&mut buf)
        .map_err(|e| EwfError::io("read u8", e))?;
    Ok(buf[0])
}

/// Read u16 little-endian from file at current position
pub fn read_u16_le(file: &mut File) -> Result<u16> {
    let mut buf = [0u8; 2];
    file.read_exact(&mut buf)
        .map_err(|e| EwfError::io("read u16", e))?;
    Ok(u16::from_le_bytes(buf))
}

/// Read u32 little-endian from file at current position
pub fn read_u32_le(file: &mut File) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|e| EwfError::io("read u32", e))?;
    Ok(u32::from_le_bytes(buf))
}

/// Read u64 little-endian from file at current position
pub fn read_u64_le(file: &mut File) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)
        .map_err(|e| EwfError::io("read u64", e))?;
    Ok(u64::from_le_bytes(buf))
}

/// Read exact bytes from current position
pub fn read_bytes(file: &mut File, length: usize) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf)
        .map_err(|e| EwfError::io(format!("read {} bytes", length), e))?;
    Ok(buf)
}

/// Read exact bytes at specific offset
pub fn read_bytes_at(file: &mut File, offset: u64, length: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| EwfError::io(format!("seek to {}", offset), e))?;
    read_bytes(file, length)
}

// =============================================================================
// Write Functions (append to an in-memory body)
// =============================================================================

pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64_le(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append `count` zero bytes (reserved/padding fields)
pub fn put_padding(buf: &mut Vec<u8>, count: usize) {
    buf.resize(buf.len() + count, 0);
}

// =============================================================================
// Slice Decoding
// =============================================================================

pub fn get_u32_le(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub fn get_u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Convert NUL-padded bytes to a string, stopping at the first NUL
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Copy string bytes into a fixed-size NUL-padded array
pub fn string_to_array<const N: usize>(value: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}
