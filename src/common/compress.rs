// Zlib compression adapters
//
// Chunk payloads and header text are zlib streams. The chunk paths reuse
// one `Compress`/`Decompress` state per handle so the hot loop does not
// allocate; the header text paths are one-shot.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Reusable zlib compressor for chunk payloads
pub struct ChunkCompressor {
    compress: Compress,
}

impl ChunkCompressor {
    pub fn new(level: Compression) -> Self {
        Self {
            compress: Compress::new(level, true),
        }
    }

    /// Compress `src` into `dst`. Returns the compressed size, or `None`
    /// when the stream does not fit in `dst`.
    pub fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<Option<usize>> {
        self.compress.reset();
        loop {
            let in_offset = (self.compress.total_in() as usize).min(src.len());
            let out_offset = (self.compress.total_out() as usize).min(dst.len());
            let status = self
                .compress
                .compress(&src[in_offset..], &mut dst[out_offset..], FlushCompress::Finish)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            match status {
                Status::StreamEnd => return Ok(Some(self.compress.total_out() as usize)),
                Status::Ok => {
                    if self.compress.total_out() as usize >= dst.len() {
                        return Ok(None);
                    }
                }
                Status::BufError => return Ok(None),
            }
        }
    }
}

/// Reusable zlib decompressor for chunk payloads
pub struct ChunkDecompressor {
    decompress: Decompress,
}

impl ChunkDecompressor {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
        }
    }

    /// Inflate `src` into `dst`, returning the decompressed size. A stream
    /// that is malformed, truncated, or larger than `dst` is an error.
    pub fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        self.decompress.reset(true);
        loop {
            let in_offset = (self.decompress.total_in() as usize).min(src.len());
            let out_offset = (self.decompress.total_out() as usize).min(dst.len());
            let status = self
                .decompress
                .decompress(&src[in_offset..], &mut dst[out_offset..], FlushDecompress::Finish)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            match status {
                Status::StreamEnd => return Ok(self.decompress.total_out() as usize),
                Status::Ok => continue,
                Status::BufError => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "zlib stream truncated or output too large",
                    ));
                }
            }
        }
    }
}

impl Default for ChunkDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// One-shot helpers for header text sections
// =============================================================================

pub fn zlib_compress_vec(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn zlib_decompress_vec(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
