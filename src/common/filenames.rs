// Segment filename policy
//
// Extensions run .E01 through .E99, then .EAA .. .EZZ, .FAA .. and so on;
// SMART images use the lowercase .s01 series and delta segments the .d01
// series. Discovery walks an existing set forward from the first segment,
// trying the exact-case name first and a lowercase fallback second.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{EwfError, Result};
use crate::format::EwfFormat;

/// Callback producing the path of a segment file about to be created.
/// Receives the base path handed to `open`, the 1-based segment number,
/// and the output format.
pub type FilenameGenerator = Box<dyn Fn(&Path, u16, EwfFormat) -> PathBuf + Send>;

/// Letters available for the extension's first character after E99/e99
const LETTER_SERIES_SPAN: u16 = 26 * 26;

fn extension(first_letter: char, segment_number: u16) -> Result<String> {
    if segment_number == 0 {
        return Err(EwfError::InvalidArgument(
            "segment numbers start at 1".to_string(),
        ));
    }
    if segment_number < 100 {
        return Ok(format!("{}{:02}", first_letter, segment_number));
    }

    let n = segment_number - 100;
    let series = n / LETTER_SERIES_SPAN;
    let within = n % LETTER_SERIES_SPAN;
    let first = first_letter as u8 + series as u8;
    let last_letter = if first_letter.is_ascii_lowercase() { b'z' } else { b'Z' };
    if first > last_letter {
        return Err(EwfError::InvalidArgument(format!(
            "segment number {} exceeds the filename extension scheme",
            segment_number
        )));
    }
    let base = if first_letter.is_ascii_lowercase() { b'a' } else { b'A' };
    let second = base + (within / 26) as u8;
    let third = base + (within % 26) as u8;
    Ok(format!(
        "{}{}{}",
        first as char, second as char, third as char
    ))
}

/// Extension for a segment of the given format (`E01`, `s01`, ...)
pub fn extension_for_segment(segment_number: u16, format: EwfFormat) -> Result<String> {
    let first = if format.uses_lowercase_extension() { 's' } else { 'E' };
    extension(first, segment_number)
}

/// Extension for a delta segment (`d01`, ...)
pub fn delta_extension(segment_number: u16) -> Result<String> {
    extension('d', segment_number)
}

fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let mut path = base.to_path_buf();
    path.set_file_name(format!("{}.{}", stem, ext));
    path
}

/// Default path for segment `segment_number` of a set rooted at `base`
pub fn default_segment_path(base: &Path, segment_number: u16, format: EwfFormat) -> PathBuf {
    match extension_for_segment(segment_number, format) {
        Ok(ext) => with_extension(base, &ext),
        // Exhausting the scheme is caught when the segment is created;
        // the generator itself stays infallible
        Err(_) => with_extension(base, &format!("E{}", segment_number)),
    }
}

/// Default path for a delta segment next to `base`
pub fn default_delta_path(base: &Path) -> PathBuf {
    match delta_extension(1) {
        Ok(ext) => with_extension(base, &ext),
        Err(_) => with_extension(base, "d01"),
    }
}

/// Discover the ordered segment set starting from the first segment path
pub fn glob_segment_files(first: &Path) -> Result<Vec<PathBuf>> {
    debug!(path = %first.display(), "discovering segment files");
    if !first.exists() {
        return Err(EwfError::InvalidArgument(format!(
            "segment file not found: {}",
            first.display()
        )));
    }

    // The first segment's extension fixes the series case
    let lowercase = first
        .extension()
        .map(|e| e.to_string_lossy().starts_with('s'))
        .unwrap_or(false);
    let first_letter = if lowercase { 's' } else { 'E' };

    let mut paths = vec![first.to_path_buf()];
    for number in 2..u16::MAX {
        let ext = match extension(first_letter, number) {
            Ok(ext) => ext,
            Err(_) => break,
        };
        let candidate = with_extension(first, &ext);
        if candidate.exists() {
            trace!(segment = number, path = %candidate.display(), "found segment");
            paths.push(candidate);
            continue;
        }
        let lower = with_extension(first, &ext.to_lowercase());
        if lower != candidate && lower.exists() {
            trace!(segment = number, path = %lower.display(), "found segment (lowercase)");
            paths.push(lower);
            continue;
        }
        break;
    }

    debug!(segment_count = paths.len(), "segments discovered");
    Ok(paths)
}

/// Total on-disk size of a discovered segment set
pub fn segment_set_size(paths: &[PathBuf]) -> Result<u64> {
    let mut total = 0u64;
    for path in paths {
        total += fs::metadata(path)
            .map_err(|e| EwfError::io(format!("stat {}", path.display()), e))?
            .len();
    }
    Ok(total)
}
