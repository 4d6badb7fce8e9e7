//! End-to-end scenarios: write a segment set, reopen it, and check the
//! media stream, metadata, and failure behavior against the format's
//! guarantees.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};
use tempfile::TempDir;

use ewfkit::common::{chunk_checksum, glob_segment_files};
use ewfkit::offset_table::{resolve_table_entries, ChunkLocation};
use ewfkit::section::{decode_table, SectionKind};
use ewfkit::segment::walk_sections;
use ewfkit::{
    check_signature, copy_header_values, CompressionLevel, EwfHandle, OpenMode, ShortInputPolicy,
};

/// Deterministic incompressible-ish filler (xorshift64*)
fn pattern_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

fn write_image<F>(base: &Path, data: &[u8], configure: F) -> ewfkit::Result<()>
where
    F: FnOnce(&mut EwfHandle) -> ewfkit::Result<()>,
{
    let mut handle = EwfHandle::open(&[base], OpenMode::Write)?;
    handle.set_write_input_size(data.len() as u64)?;
    configure(&mut handle)?;
    let mut written = 0;
    while written < data.len() {
        let n = handle.write_buffer(&data[written..])?;
        assert!(n > 0, "write made no progress");
        written += n;
    }
    handle.close()
}

fn read_all(first_segment: &Path) -> Vec<u8> {
    let mut handle = EwfHandle::open_glob(first_segment, OpenMode::Read).unwrap();
    let mut out = vec![0u8; handle.get_media_size() as usize];
    handle.seek_offset(0).unwrap();
    let mut total = 0;
    while total < out.len() {
        let n = handle.read_buffer(&mut out[total..]).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, out.len());
    handle.close().unwrap();
    out
}

/// Reconstruct every chunk location by walking the produced segment
/// files, the way a reader does
fn chunk_locations(first_segment: &Path) -> Vec<ChunkLocation> {
    let paths = glob_segment_files(first_segment).unwrap();
    let mut locations = Vec::new();
    for (index, path) in paths.iter().enumerate() {
        let segment_number = (index + 1) as u16;
        let mut file = File::open(path).unwrap();
        let (sections, _) = walk_sections(&mut file, segment_number).unwrap();
        let mut sectors_end = 0u64;
        for section in sections {
            match section.kind {
                SectionKind::Sectors => {
                    sectors_end = section.body_offset + section.body_size;
                }
                SectionKind::Table => {
                    file.seek(SeekFrom::Start(section.body_offset)).unwrap();
                    let mut body = vec![0u8; section.body_size as usize];
                    file.read_exact(&mut body).unwrap();
                    let (base, entries) = decode_table(&body).unwrap();
                    locations.extend(
                        resolve_table_entries(segment_number, base, &entries, sectors_end)
                            .unwrap(),
                    );
                }
                _ => {}
            }
        }
    }
    locations
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn empty_image_has_one_segment_and_the_empty_md5() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("empty");
    write_image(&base, &[], |_| Ok(())).unwrap();

    let first = dir.path().join("empty.E01");
    assert!(first.exists());
    assert!(!dir.path().join("empty.E02").exists());

    let mut handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    assert_eq!(handle.get_media_size(), 0);

    let mut buf = [0u8; 512];
    assert_eq!(handle.read_buffer(&mut buf).unwrap(), 0);

    // MD5 of the empty stream
    assert_eq!(
        hex::encode(handle.get_md5_hash().unwrap()),
        "d41d8cd98f00b204e9800998ecf8427e"
    );
    handle.close().unwrap();
}

#[test]
fn zero_chunk_collapses_when_empty_block_compression_is_on() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("zeros");
    let data = vec![0u8; 32768];
    write_image(&base, &data, |handle| {
        handle.set_write_compression_values(CompressionLevel::None, true)
    })
    .unwrap();

    let first = dir.path().join("zeros.E01");
    let locations = chunk_locations(&first);
    assert_eq!(locations.len(), 1);
    assert!(locations[0].compressed);
    assert!(
        locations[0].size <= 128,
        "zero chunk stored as {} bytes",
        locations[0].size
    );

    assert_eq!(read_all(&first), data);

    let handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    let expected = hex::encode(Md5::digest(&data));
    assert_eq!(hex::encode(handle.get_md5_hash().unwrap()), expected);
    handle.close().unwrap();
}

#[test]
fn ten_mebibyte_image_splits_into_bounded_segments() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("split");
    let data = pattern_bytes(10 * 1024 * 1024, 0x5EED);
    write_image(&base, &data, |handle| {
        handle.set_write_segment_file_size(4 * 1024 * 1024)
    })
    .unwrap();

    let first = dir.path().join("split.E01");
    let segments = glob_segment_files(&first).unwrap();
    assert!(segments.len() >= 3, "only {} segments", segments.len());
    for segment in &segments {
        let size = std::fs::metadata(segment).unwrap().len();
        assert!(size <= 4 * 1024 * 1024, "{} is {} bytes", segment.display(), size);
    }

    // The offset table covers every chunk, in (segment, offset) order
    let locations = chunk_locations(&first);
    assert_eq!(locations.len() as u64, (data.len() as u64).div_ceil(32768));
    let mut previous = (0u16, 0u64);
    for location in &locations {
        let key = (location.segment, location.file_offset);
        assert!(key > previous, "offset table not increasing at {:?}", key);
        previous = key;
    }

    // A read crossing the segment boundary matches the input
    let mut handle = EwfHandle::open(&segments, OpenMode::Read).unwrap();
    let offset = 5 * 1024 * 1024;
    handle.seek_offset(offset as u64).unwrap();
    let mut tail = vec![0u8; 128 * 1024];
    let mut total = 0;
    while total < tail.len() {
        let n = handle.read_buffer(&mut tail[total..]).unwrap();
        assert!(n > 0);
        total += n;
    }
    assert_eq!(tail, data[offset..offset + tail.len()]);
    handle.close().unwrap();
}

#[test]
fn tampered_chunk_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tamper");
    let data = pattern_bytes(1024 * 1024, 0xBAD5EED);
    write_image(&base, &data, |_| Ok(())).unwrap();

    let first = dir.path().join("tamper.E01");
    let locations = chunk_locations(&first);
    let victim = locations[5];
    assert!(!victim.compressed);

    // The stored chunk ends in its Adler-32
    {
        let mut file = File::open(&first).unwrap();
        file.seek(SeekFrom::Start(victim.file_offset)).unwrap();
        let mut stored = vec![0u8; victim.size as usize];
        file.read_exact(&mut stored).unwrap();
        let payload_len = stored.len() - 4;
        let crc = u32::from_le_bytes(stored[payload_len..].try_into().unwrap());
        assert_eq!(crc, chunk_checksum(&stored[..payload_len]));
    }

    // Flip one payload byte of chunk 5
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&first).unwrap();
        file.seek(SeekFrom::Start(victim.file_offset + 100)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xFF;
        file.seek(SeekFrom::Start(victim.file_offset + 100)).unwrap();
        file.write_all(&byte).unwrap();
    }

    // wipe_on_error off: data comes back altered, one CRC error recorded
    let mut handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    let mut out = vec![0u8; data.len()];
    handle.seek_offset(0).unwrap();
    let mut total = 0;
    while total < out.len() {
        let n = handle.read_buffer(&mut out[total..]).unwrap();
        assert!(n > 0);
        total += n;
    }
    assert_ne!(out[5 * 32768..6 * 32768], data[5 * 32768..6 * 32768]);
    assert_eq!(out[..5 * 32768], data[..5 * 32768]);
    assert_eq!(out[6 * 32768..], data[6 * 32768..]);

    assert_eq!(handle.get_amount_of_crc_errors(), 1);
    let error = handle.get_crc_error(0).unwrap();
    assert_eq!(error.start_sector, 5 * 64);
    assert_eq!(error.amount_of_sectors, 64);
    handle.close().unwrap();

    // wipe_on_error on: the affected sectors come back zeroed, and the
    // rest of the image still reads clean
    let mut handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    handle.set_read_wipe_chunk_on_error(true).unwrap();
    handle.seek_offset(5 * 32768).unwrap();
    let mut chunk = vec![0xFFu8; 32768];
    let mut total = 0;
    while total < chunk.len() {
        let n = handle.read_buffer(&mut chunk[total..]).unwrap();
        assert!(n > 0);
        total += n;
    }
    assert!(chunk.iter().all(|&b| b == 0));
    assert_eq!(handle.get_amount_of_crc_errors(), 1);

    handle.seek_offset(7 * 32768).unwrap();
    let mut clean = vec![0u8; 32768];
    handle.read_buffer(&mut clean).unwrap();
    assert_eq!(clean[..], data[7 * 32768..8 * 32768]);
    handle.close().unwrap();
}

#[test]
fn acquiry_errors_roundtrip_through_error2() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("errors");
    let data = pattern_bytes(256 * 1024, 0xACE);

    let mut handle = EwfHandle::open(&[&base], OpenMode::Write).unwrap();
    handle.set_write_input_size(data.len() as u64).unwrap();
    handle.write_buffer(&data).unwrap();
    handle.add_acquiry_error(100, 8).unwrap();
    handle.add_acquiry_error(200, 16).unwrap();
    handle.add_acquiry_error(300, 32).unwrap();
    // A duplicate start sector does not add an entry
    handle.add_acquiry_error(100, 8).unwrap();
    handle.close().unwrap();

    let handle = EwfHandle::open(&[dir.path().join("errors.E01")], OpenMode::Read).unwrap();
    assert_eq!(handle.get_amount_of_acquiry_errors(), 3);
    let expected = [(100u64, 8u32), (200, 16), (300, 32)];
    for (index, (sector, amount)) in expected.iter().enumerate() {
        let error = handle.get_acquiry_error(index as u32).unwrap();
        assert_eq!(error.start_sector, *sector);
        assert_eq!(error.amount_of_sectors, *amount);
    }
    handle.close().unwrap();
}

#[test]
fn header_values_copy_in_insertion_order() {
    let dir = TempDir::new().unwrap();
    let mut source =
        EwfHandle::open(&[dir.path().join("src")], OpenMode::Write).unwrap();
    source.set_header_value("case_number", "A").unwrap();
    source.set_header_value("examiner_name", "X").unwrap();

    let mut destination =
        EwfHandle::open(&[dir.path().join("dst")], OpenMode::Write).unwrap();
    copy_header_values(&mut destination, &source).unwrap();

    assert_eq!(
        source.get_amount_of_header_values(),
        destination.get_amount_of_header_values()
    );
    for index in 0..source.get_amount_of_header_values() {
        let identifier = source.get_header_value_identifier(index).unwrap().to_string();
        assert_eq!(
            destination.get_header_value_identifier(index).unwrap(),
            identifier
        );
        assert_eq!(
            destination.get_header_value(&identifier),
            source.get_header_value(&identifier)
        );
    }
    assert_eq!(destination.get_header_value("case_number"), Some("A"));
    assert_eq!(destination.get_header_value("examiner_name"), Some("X"));

    // Unwritten write handles still need closing; they produce empty images
    source.close().unwrap();
    destination.close().unwrap();
}

#[test]
fn header_values_survive_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("meta");
    let data = pattern_bytes(64 * 1024, 3);
    write_image(&base, &data, |handle| {
        handle.set_header_value("case_number", "2024-077")?;
        handle.set_header_value("examiner_name", "D. Sartain")?;
        handle.set_header_value("notes", "bench test")
    })
    .unwrap();

    let mut handle = EwfHandle::open(&[dir.path().join("meta.E01")], OpenMode::Read).unwrap();
    handle
        .parse_header_values(ewfkit::DateFormat::Iso8601)
        .unwrap();
    assert_eq!(handle.get_header_value("case_number"), Some("2024-077"));
    assert_eq!(handle.get_header_value("examiner_name"), Some("D. Sartain"));
    assert_eq!(handle.get_header_value("notes"), Some("bench test"));

    let info = handle.info().unwrap();
    assert_eq!(info.case_number.as_deref(), Some("2024-077"));
    assert_eq!(info.media_size, data.len() as u64);
    assert_eq!(info.segment_count, 1);
    handle.close().unwrap();
}

// =============================================================================
// Round-trip Properties
// =============================================================================

#[test]
fn roundtrip_across_formats() {
    use ewfkit::EwfFormat;
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(200 * 1024, 0xF0F0);

    for (index, format) in [
        EwfFormat::EnCase1,
        EwfFormat::EnCase3,
        EwfFormat::EnCase4,
        EwfFormat::EnCase5,
        EwfFormat::EnCase6,
        EwfFormat::FtkImager,
        EwfFormat::LinEn,
        EwfFormat::Ewfx,
    ]
    .iter()
    .enumerate()
    {
        let base = dir.path().join(format!("fmt{}", index));
        write_image(&base, &data, |handle| {
            handle.set_write_format(*format)?;
            handle.set_write_compression_values(CompressionLevel::Fast, false)
        })
        .unwrap();
        let first = dir.path().join(format!("fmt{}.E01", index));
        assert_eq!(read_all(&first), data, "format {:?}", format);

        let mut handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
        let outcome = handle.verify_md5().unwrap();
        assert_eq!(outcome.matches, Some(true), "format {:?}", format);
        handle.close().unwrap();
    }
}

#[test]
fn roundtrip_smart_format_uses_its_extension() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(96 * 1024, 11);
    write_image(&dir.path().join("smartimg"), &data, |handle| {
        handle.set_write_format(ewfkit::EwfFormat::Smart)
    })
    .unwrap();

    let first = dir.path().join("smartimg.s01");
    assert!(first.exists());
    assert_eq!(read_all(&first), data);
}

#[test]
fn roundtrip_odd_geometry_and_partial_final_chunk() {
    let dir = TempDir::new().unwrap();
    // 16 x 4096 = 64 KiB chunks; 100 KiB of media leaves a partial tail
    let data = pattern_bytes(100 * 1024, 77);
    let base = dir.path().join("odd");
    write_image(&base, &data, |handle| {
        handle.set_sectors_per_chunk(16)?;
        handle.set_bytes_per_sector(4096)?;
        handle.set_write_compression_values(CompressionLevel::Best, false)
    })
    .unwrap();

    let first = dir.path().join("odd.E01");
    assert_eq!(read_all(&first), data);

    let handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    assert_eq!(handle.get_sectors_per_chunk(), 16);
    assert_eq!(handle.get_bytes_per_sector(), 4096);
    assert_eq!(handle.get_chunk_size(), 64 * 1024);
    handle.close().unwrap();
}

#[test]
fn seek_then_read_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(256 * 1024, 21);
    let base = dir.path().join("seek");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let mut handle = EwfHandle::open(&[dir.path().join("seek.E01")], OpenMode::Read).unwrap();
    for offset in [0u64, 1, 511, 32768, 32769, 100_000, 250_000] {
        let mut first = vec![0u8; 4096];
        handle.seek_offset(offset).unwrap();
        let n1 = handle.read_buffer(&mut first).unwrap();

        let mut second = vec![0u8; 4096];
        handle.seek_offset(offset).unwrap();
        let n2 = handle.read_buffer(&mut second).unwrap();

        assert_eq!(n1, n2);
        assert_eq!(first, second);
        assert_eq!(first[..n1], data[offset as usize..offset as usize + n1]);
    }
    handle.close().unwrap();
}

#[test]
fn short_input_zero_pad_records_the_missing_range() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(512 * 1024, 5);

    let base = dir.path().join("short");
    let mut handle = EwfHandle::open(&[&base], OpenMode::Write).unwrap();
    handle.set_write_input_size(1024 * 1024).unwrap();
    handle
        .set_short_input_policy(ShortInputPolicy::ZeroPad)
        .unwrap();
    handle.write_buffer(&data).unwrap();
    handle.close().unwrap();

    let first = dir.path().join("short.E01");
    let media = read_all(&first);
    assert_eq!(media.len(), 1024 * 1024);
    assert_eq!(media[..data.len()], data[..]);
    assert!(media[data.len()..].iter().all(|&b| b == 0));

    let handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    assert_eq!(handle.get_amount_of_acquiry_errors(), 1);
    let error = handle.get_acquiry_error(0).unwrap();
    assert_eq!(error.start_sector, (512 * 1024) / 512);
    assert_eq!(error.amount_of_sectors, ((1024 * 1024 - 512 * 1024) / 512) as u32);
    handle.close().unwrap();
}

#[test]
fn short_input_truncate_shrinks_the_media() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(512 * 1024, 6);

    let base = dir.path().join("trunc");
    let mut handle = EwfHandle::open(&[&base], OpenMode::Write).unwrap();
    handle.set_write_input_size(1024 * 1024).unwrap();
    handle
        .set_short_input_policy(ShortInputPolicy::Truncate)
        .unwrap();
    handle.write_buffer(&data).unwrap();
    handle.close().unwrap();

    let first = dir.path().join("trunc.E01");
    let media = read_all(&first);
    assert_eq!(media, data);

    let handle = EwfHandle::open(&[&first], OpenMode::Read).unwrap();
    assert_eq!(handle.get_amount_of_sectors(), (512 * 1024) / 512);
    assert_eq!(handle.get_amount_of_acquiry_errors(), 0);
    handle.close().unwrap();
}

#[test]
fn writes_beyond_the_advertised_input_are_refused() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("capped");
    let mut handle = EwfHandle::open(&[&base], OpenMode::Write).unwrap();
    handle.set_write_input_size(32768).unwrap();

    let data = pattern_bytes(40000, 9);
    let accepted = handle.write_buffer(&data).unwrap();
    assert_eq!(accepted, 32768);
    assert_eq!(handle.write_buffer(&data[accepted..]).unwrap(), 0);
    handle.close().unwrap();

    assert_eq!(read_all(&dir.path().join("capped.E01")), data[..32768]);
}

// =============================================================================
// Read-write Delta
// =============================================================================

#[test]
fn delta_writes_shadow_the_primary_chunks() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(128 * 1024, 42);
    let base = dir.path().join("delta");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let first = dir.path().join("delta.E01");
    let correction = vec![0xEEu8; 32768];

    let mut handle = EwfHandle::open(&[&first], OpenMode::ReadWrite).unwrap();
    handle.seek_offset(2 * 32768).unwrap();
    assert_eq!(handle.write_buffer(&correction).unwrap(), correction.len());

    // The corrected chunk reads back through the same handle
    handle.seek_offset(2 * 32768).unwrap();
    let mut out = vec![0u8; 32768];
    let mut total = 0;
    while total < out.len() {
        let n = handle.read_buffer(&mut out[total..]).unwrap();
        assert!(n > 0);
        total += n;
    }
    assert_eq!(out, correction);

    // Neighboring chunks are untouched
    handle.seek_offset(0).unwrap();
    let mut head = vec![0u8; 32768];
    handle.read_buffer(&mut head).unwrap();
    assert_eq!(head[..], data[..32768]);
    handle.close().unwrap();

    // The delta landed in its own segment file; the primary set still
    // carries the original bytes
    let delta_path = dir.path().join("delta.d01");
    assert!(delta_path.exists());
    assert!(check_signature(&delta_path).unwrap());
    assert_eq!(read_all(&first)[2 * 32768..3 * 32768], data[2 * 32768..3 * 32768]);
}

#[test]
fn misaligned_delta_writes_are_rejected() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(64 * 1024, 43);
    let base = dir.path().join("align");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let mut handle =
        EwfHandle::open(&[dir.path().join("align.E01")], OpenMode::ReadWrite).unwrap();
    handle.seek_offset(100).unwrap();
    assert!(handle.write_buffer(&[0u8; 32768]).is_err());
    handle.seek_offset(0).unwrap();
    assert!(handle.write_buffer(&[0u8; 100]).is_err());
    handle.close().unwrap();
}

// =============================================================================
// State Machine and Misc
// =============================================================================

#[test]
fn geometry_freezes_after_the_first_write() {
    let dir = TempDir::new().unwrap();
    let mut handle = EwfHandle::open(&[dir.path().join("frozen")], OpenMode::Write).unwrap();
    handle.set_write_input_size(65536).unwrap();
    handle.write_buffer(&[0u8; 512]).unwrap();

    assert!(handle.set_sectors_per_chunk(32).is_err());
    assert!(handle.set_bytes_per_sector(4096).is_err());
    assert!(handle.set_write_input_size(1024).is_err());
    assert!(handle.set_guid([1u8; 16]).is_err());
    handle.close().unwrap();
}

#[test]
fn guid_and_md5_are_write_once() {
    let dir = TempDir::new().unwrap();
    let mut handle = EwfHandle::open(&[dir.path().join("once")], OpenMode::Write).unwrap();
    handle.set_guid([1u8; 16]).unwrap();
    assert!(handle.set_guid([2u8; 16]).is_err());
    handle.set_md5_hash([3u8; 16]).unwrap();
    assert!(handle.set_md5_hash([4u8; 16]).is_err());
    handle.close().unwrap();
}

#[test]
fn read_handles_refuse_writes_and_setters() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(64 * 1024, 17);
    let base = dir.path().join("ro");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let mut handle = EwfHandle::open(&[dir.path().join("ro.E01")], OpenMode::Read).unwrap();
    assert!(handle.write_buffer(&data).is_err());
    assert!(handle.set_write_format(ewfkit::EwfFormat::Ewfx).is_err());
    assert!(handle.set_header_value("case_number", "B").is_err());
    handle.close().unwrap();
}

#[test]
fn guid_roundtrips_through_the_volume() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(64 * 1024, 23);
    let guid = [
        0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
        0x77, 0x88,
    ];
    let base = dir.path().join("guid");
    write_image(&base, &data, |handle| handle.set_guid(guid)).unwrap();

    let handle = EwfHandle::open(&[dir.path().join("guid.E01")], OpenMode::Read).unwrap();
    assert_eq!(handle.get_guid(), guid);
    handle.close().unwrap();
}

#[test]
fn signature_check_distinguishes_ewf_files() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(32 * 1024, 29);
    let base = dir.path().join("sig");
    write_image(&base, &data, |_| Ok(())).unwrap();

    assert!(check_signature(&dir.path().join("sig.E01")).unwrap());

    let other = dir.path().join("plain.bin");
    std::fs::write(&other, b"just bytes").unwrap();
    assert!(!check_signature(&other).unwrap());
}

#[test]
fn extraction_writes_the_raw_media() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(96 * 1024, 31);
    let base = dir.path().join("extract");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let mut handle =
        EwfHandle::open(&[dir.path().join("extract.E01")], OpenMode::Read).unwrap();
    let raw_path = dir.path().join("extract.raw");
    let written = handle.extract_to(&raw_path).unwrap();
    handle.close().unwrap();

    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&raw_path).unwrap(), data);
}

#[test]
fn io_trait_adapters_read_the_stream() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(64 * 1024, 37);
    let base = dir.path().join("traits");
    write_image(&base, &data, |_| Ok(())).unwrap();

    let mut handle =
        EwfHandle::open(&[dir.path().join("traits.E01")], OpenMode::Read).unwrap();
    handle.seek(SeekFrom::Start(1000)).unwrap();
    let mut buf = vec![0u8; 500];
    handle.read_exact(&mut buf).unwrap();
    assert_eq!(buf[..], data[1000..1500]);

    let end = handle.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(end, data.len() as u64);
    handle.close().unwrap();
}

/// A crash between writes leaves the last segment without a done marker;
/// such a set must not open
#[test]
fn incomplete_sets_are_rejected() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(10 * 1024 * 1024, 0x5EED);
    let base = dir.path().join("crash");
    write_image(&base, &data, |handle| {
        handle.set_write_segment_file_size(4 * 1024 * 1024)
    })
    .unwrap();

    // Opening only the first segments of a multi-segment set fails
    let first = dir.path().join("crash.E01");
    let second = dir.path().join("crash.E02");
    let result = EwfHandle::open(&[&first, &second], OpenMode::Read);
    assert!(result.is_err());
}

#[test]
fn table2_recovers_a_corrupted_table() {
    let dir = TempDir::new().unwrap();
    let data = pattern_bytes(128 * 1024, 0x7AB1E);
    let base = dir.path().join("fallback");
    write_image(&base, &data, |_| Ok(())).unwrap();

    // Corrupt the table section's entry array, leaving table2 intact
    let first = dir.path().join("fallback.E01");
    let table_body_offset = {
        let mut file = File::open(&first).unwrap();
        let (sections, _) = walk_sections(&mut file, 1).unwrap();
        sections
            .iter()
            .find(|s| s.kind == SectionKind::Table)
            .unwrap()
            .body_offset
    };
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&first).unwrap();
        // 24-byte table header, then the first entry
        file.seek(SeekFrom::Start(table_body_offset + 24)).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
    }

    assert_eq!(read_all(&first), data);
}
