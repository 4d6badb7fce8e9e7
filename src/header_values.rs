//! Header metadata values and the header section codecs
//!
//! Case metadata travels in up to three encodings of the same table:
//! `header` (zlib'd ASCII), `header2` (zlib'd UTF-16LE), and `xheader`
//! (zlib'd XML, EWFX only). The table preserves insertion order so a
//! copied or re-emitted header enumerates identically.

use flate2::Compression;
use tracing::trace;

use crate::common::compress::{zlib_compress_vec, zlib_decompress_vec};
use crate::error::{EwfError, Result};

/// Date rendering requested by `parse_header_values`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    DayMonthYear,
    MonthDayYear,
    Iso8601,
    CTime,
}

/// Known value identifiers and their single/double letter codes in the
/// `header` table line
const IDENTIFIER_CODES: &[(&str, &str)] = &[
    ("case_number", "c"),
    ("evidence_number", "n"),
    ("description", "a"),
    ("examiner_name", "e"),
    ("notes", "t"),
    ("acquiry_software_version", "av"),
    ("acquiry_operating_system", "ov"),
    ("acquiry_date", "m"),
    ("system_date", "u"),
    ("password", "p"),
    ("compression_type", "r"),
];

fn code_for(identifier: &str) -> Option<&'static str> {
    IDENTIFIER_CODES
        .iter()
        .find(|(id, _)| *id == identifier)
        .map(|(_, code)| *code)
}

fn identifier_for(code: &str) -> Option<&'static str> {
    IDENTIFIER_CODES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(id, _)| *id)
}

/// Insertion-ordered identifier → value table
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    entries: Vec<(String, String)>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, replacing in place to preserve enumeration order
    pub fn set(&mut self, identifier: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| id == identifier) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((identifier.to_string(), value.to_string()));
        }
    }

    pub fn identifier_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, v)| (id.as_str(), v.as_str()))
    }
}

// =============================================================================
// Date Rendering
// =============================================================================

/// Render a stored epoch-seconds value per the requested format. Values
/// that do not parse as a timestamp pass through unchanged.
pub fn render_date(raw: &str, format: DateFormat) -> String {
    let Ok(secs) = raw.trim().parse::<i64>() else {
        return raw.to_string();
    };
    let Some(datetime) = chrono::DateTime::from_timestamp(secs, 0) else {
        return raw.to_string();
    };
    let pattern = match format {
        DateFormat::DayMonthYear => "%d/%m/%Y %H:%M:%S",
        DateFormat::MonthDayYear => "%m/%d/%Y %H:%M:%S",
        DateFormat::Iso8601 => "%Y-%m-%dT%H:%M:%S",
        DateFormat::CTime => "%a %b %e %H:%M:%S %Y",
    };
    datetime.format(pattern).to_string()
}

/// Identifiers whose stored value is an epoch timestamp
pub const DATE_IDENTIFIERS: &[&str] = &["acquiry_date", "system_date"];

// =============================================================================
// header (ASCII) codec
// =============================================================================

fn build_header_text(values: &ValueTable) -> String {
    let mut codes = Vec::new();
    let mut row = Vec::new();
    for (identifier, value) in values.iter() {
        // Unknown identifiers cannot be expressed in the coded table; they
        // still survive through xheader
        if let Some(code) = code_for(identifier) {
            codes.push(code.to_string());
            row.push(value.replace(['\t', '\n'], " "));
        }
    }
    format!("1\nmain\n{}\n{}\n\n", codes.join("\t"), row.join("\t"))
}

fn parse_header_text(text: &str) -> Result<ValueTable> {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() < 4 {
        return Err(EwfError::CorruptContainer(
            "header table has fewer than four lines".to_string(),
        ));
    }
    let codes: Vec<&str> = lines[2].split('\t').collect();
    let row: Vec<&str> = lines[3].split('\t').collect();

    let mut values = ValueTable::new();
    for (index, code) in codes.iter().enumerate() {
        let value = row.get(index).copied().unwrap_or("");
        if value.is_empty() {
            continue;
        }
        match identifier_for(code.trim()) {
            Some(identifier) => values.set(identifier, value),
            None => trace!(code, "ignoring unknown header value code"),
        }
    }
    Ok(values)
}

/// Encode the `header` section body
pub fn encode_header(values: &ValueTable) -> Result<Vec<u8>> {
    zlib_compress_vec(build_header_text(values).as_bytes(), Compression::default())
        .map_err(|e| EwfError::io("compress header", e))
}

/// Decode a `header` section body
pub fn decode_header(body: &[u8]) -> Result<ValueTable> {
    let text = zlib_decompress_vec(body)
        .map_err(|_| EwfError::CorruptContainer("header section does not inflate".to_string()))?;
    parse_header_text(&String::from_utf8_lossy(&text))
}

// =============================================================================
// header2 (UTF-16LE) codec
// =============================================================================

fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFE]; // BOM
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn decode_utf16le(data: &[u8]) -> String {
    let body = if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xFE {
        &data[2..]
    } else {
        data
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode the `header2` section body
pub fn encode_header2(values: &ValueTable) -> Result<Vec<u8>> {
    let utf16 = encode_utf16le(&build_header_text(values));
    zlib_compress_vec(&utf16, Compression::default())
        .map_err(|e| EwfError::io("compress header2", e))
}

/// Decode a `header2` section body
pub fn decode_header2(body: &[u8]) -> Result<ValueTable> {
    let raw = zlib_decompress_vec(body)
        .map_err(|_| EwfError::CorruptContainer("header2 section does not inflate".to_string()))?;
    parse_header_text(&decode_utf16le(&raw))
}

// =============================================================================
// xheader (XML) codec
// =============================================================================

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Encode the `xheader` section body
pub fn encode_xheader(values: &ValueTable) -> Result<Vec<u8>> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
    for (identifier, value) in values.iter() {
        xml.push_str(&format!(
            "\t<{}>{}</{}>\n",
            identifier,
            xml_escape(value),
            identifier
        ));
    }
    xml.push_str("</xheader>\n");
    zlib_compress_vec(xml.as_bytes(), Compression::default())
        .map_err(|e| EwfError::io("compress xheader", e))
}

/// Decode an `xheader` section body by scanning its flat element list
pub fn decode_xheader(body: &[u8]) -> Result<ValueTable> {
    let raw = zlib_decompress_vec(body)
        .map_err(|_| EwfError::CorruptContainer("xheader section does not inflate".to_string()))?;
    let xml = String::from_utf8_lossy(&raw);

    let mut values = ValueTable::new();
    let mut rest = xml.as_ref();
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        if rest.starts_with('?') || rest.starts_with('/') || rest.starts_with("xheader") {
            match rest.find('>') {
                Some(close) => rest = &rest[close + 1..],
                None => break,
            }
            continue;
        }
        let Some(name_end) = rest.find('>') else { break };
        let name = rest[..name_end].trim().to_string();
        rest = &rest[name_end + 1..];
        let closing = format!("</{}>", name);
        let Some(value_end) = rest.find(&closing) else {
            return Err(EwfError::CorruptContainer(format!(
                "xheader element <{}> is not closed",
                name
            )));
        };
        values.set(&name, &xml_unescape(rest[..value_end].trim()));
        rest = &rest[value_end + closing.len()..];
    }
    Ok(values)
}

/// Apply a date format to the date-valued identifiers of a parsed table
pub fn apply_date_format(values: &mut ValueTable, format: DateFormat) {
    for identifier in DATE_IDENTIFIERS {
        if let Some(raw) = values.get(identifier) {
            let rendered = render_date(raw, format);
            values.set(identifier, &rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> ValueTable {
        let mut values = ValueTable::new();
        values.set("case_number", "2024-077");
        values.set("examiner_name", "D. Sartain");
        values.set("description", "seized laptop");
        values.set("acquiry_date", "1199145600");
        values
    }

    #[test]
    fn table_preserves_insertion_order() {
        let values = sample_values();
        assert_eq!(values.identifier_at(0), Some("case_number"));
        assert_eq!(values.identifier_at(1), Some("examiner_name"));
        assert_eq!(values.identifier_at(2), Some("description"));

        let mut updated = values.clone();
        updated.set("case_number", "2024-078");
        assert_eq!(updated.identifier_at(0), Some("case_number"));
        assert_eq!(updated.get("case_number"), Some("2024-078"));
    }

    #[test]
    fn header_roundtrip() {
        let values = sample_values();
        let body = encode_header(&values).unwrap();
        let decoded = decode_header(&body).unwrap();
        assert_eq!(decoded.get("case_number"), Some("2024-077"));
        assert_eq!(decoded.get("examiner_name"), Some("D. Sartain"));
        assert_eq!(decoded.get("acquiry_date"), Some("1199145600"));
    }

    #[test]
    fn header2_roundtrip() {
        let values = sample_values();
        let body = encode_header2(&values).unwrap();
        let decoded = decode_header2(&body).unwrap();
        assert_eq!(decoded.get("description"), Some("seized laptop"));
    }

    #[test]
    fn xheader_roundtrip_with_escapes() {
        let mut values = sample_values();
        values.set("notes", "cable <damaged> & resoldered");
        let body = encode_xheader(&values).unwrap();
        let decoded = decode_xheader(&body).unwrap();
        assert_eq!(decoded.get("notes"), Some("cable <damaged> & resoldered"));
        // xheader keeps identifiers the coded table cannot express
        assert_eq!(decoded.identifier_at(0), Some("case_number"));
    }

    #[test]
    fn date_rendering() {
        assert_eq!(
            render_date("1199145600", DateFormat::Iso8601),
            "2008-01-01T00:00:00"
        );
        assert_eq!(
            render_date("1199145600", DateFormat::DayMonthYear),
            "01/01/2008 00:00:00"
        );
        assert_eq!(
            render_date("1199145600", DateFormat::MonthDayYear),
            "01/01/2008 00:00:00"
        );
        // Non-numeric values pass through
        assert_eq!(render_date("unknown", DateFormat::Iso8601), "unknown");
    }

    #[test]
    fn apply_date_format_touches_only_dates() {
        let mut values = sample_values();
        apply_date_format(&mut values, DateFormat::Iso8601);
        assert_eq!(values.get("acquiry_date"), Some("2008-01-01T00:00:00"));
        assert_eq!(values.get("case_number"), Some("2024-077"));
    }

    #[test]
    fn corrupt_header_is_rejected() {
        assert!(matches!(
            decode_header(&[1, 2, 3, 4]),
            Err(EwfError::CorruptContainer(_))
        ));
    }
}
