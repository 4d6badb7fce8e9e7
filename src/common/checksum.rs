// Checksums used by the container format
//
// Section descriptors and section bodies carry a CRC-32 over the preceding
// bytes. Chunk payloads carry an Adler-32 started from 1, the same rolling
// sum zlib uses internally.

/// Largest run of bytes the Adler sums can absorb before the modulo must
/// be applied to stay within u32
const ADLER_NMAX: usize = 5552;
const ADLER_MOD: u32 = 65521;

/// CRC-32 over a section descriptor or section body
pub fn section_crc(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Adler-32 (seed 1) over an uncompressed chunk payload
pub fn chunk_checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for block in data.chunks(ADLER_NMAX) {
        for &byte in block {
            a += byte as u32;
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}
