// Shared utilities for the EWF storage core

pub mod binary;
pub mod checksum;
pub mod compress;
pub mod filenames;
pub mod io_pool;

pub use checksum::{chunk_checksum, section_crc};
pub use filenames::{default_segment_path, glob_segment_files, FilenameGenerator};
pub use io_pool::{FileIoPool, DEFAULT_MAX_OPEN_FILES};
