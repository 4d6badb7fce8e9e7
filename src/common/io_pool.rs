// File I/O pool for read-side segment file handles
//
// Multi-segment images can span hundreds of files; the pool keeps at most
// `max_open` descriptors alive and reopens evicted segments on demand,
// keyed by segment index.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{EwfError, Result};

/// Default maximum number of simultaneously open file handles
pub const DEFAULT_MAX_OPEN_FILES: usize = 32;

/// Manages segment file handles with LRU eviction
pub struct FileIoPool {
    /// Paths to all segment files in order
    file_paths: Vec<PathBuf>,
    /// Currently open file handles (file_index -> File)
    open_handles: HashMap<usize, File>,
    /// LRU queue for file handle management
    lru_queue: VecDeque<usize>,
    /// Maximum number of simultaneously open files
    max_open: usize,
}

impl FileIoPool {
    pub fn new(file_paths: Vec<PathBuf>, max_open: usize) -> Self {
        Self {
            file_paths,
            open_handles: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open: max_open.max(1),
        }
    }

    pub fn with_default_limit(file_paths: Vec<PathBuf>) -> Self {
        Self::new(file_paths, DEFAULT_MAX_OPEN_FILES)
    }

    /// Get a file handle, opening it if necessary and managing the LRU cache
    pub fn get_file(&mut self, file_index: usize) -> Result<&mut File> {
        if file_index >= self.file_paths.len() {
            return Err(EwfError::InvalidArgument(format!(
                "segment index {} out of range (have {} files)",
                file_index,
                self.file_paths.len()
            )));
        }

        if self.open_handles.contains_key(&file_index) {
            self.lru_queue.retain(|&x| x != file_index);
            self.lru_queue.push_front(file_index);
            trace!(file_index, "segment handle cache hit");
            return Ok(self.open_handles.get_mut(&file_index).unwrap());
        }

        if self.open_handles.len() >= self.max_open {
            if let Some(lru_index) = self.lru_queue.pop_back() {
                trace!(lru_index, "evicting LRU segment handle");
                self.open_handles.remove(&lru_index);
            }
        }

        let file_path = &self.file_paths[file_index];
        debug!(file_index, ?file_path, "opening segment handle");
        let file = File::open(file_path).map_err(|e| EwfError::open(file_path, e))?;

        self.open_handles.insert(file_index, file);
        self.lru_queue.push_front(file_index);

        Ok(self.open_handles.get_mut(&file_index).unwrap())
    }

    pub fn file_count(&self) -> usize {
        self.file_paths.len()
    }

    pub fn path(&self, file_index: usize) -> Option<&Path> {
        self.file_paths.get(file_index).map(|p| p.as_path())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.file_paths
    }

    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        self.open_handles.clear();
        self.lru_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_file_pool_basic() {
        let temp_dir = TempDir::new().unwrap();
        let mut paths = Vec::new();

        for i in 0..5 {
            let path = temp_dir.path().join(format!("test_{}.bin", i));
            let mut file = File::create(&path).unwrap();
            file.write_all(&[i as u8; 100]).unwrap();
            paths.push(path);
        }

        let mut pool = FileIoPool::new(paths, 3);

        assert_eq!(pool.file_count(), 5);
        assert_eq!(pool.open_count(), 0);

        pool.get_file(0).unwrap();
        pool.get_file(1).unwrap();
        pool.get_file(2).unwrap();
        assert_eq!(pool.open_count(), 3);

        // Opening a 4th should evict the LRU (file 0)
        pool.get_file(3).unwrap();
        assert_eq!(pool.open_count(), 3);

        // Re-opening file 1 should work (still cached)
        pool.get_file(1).unwrap();
        assert_eq!(pool.open_count(), 3);

        // File 0 reopens transparently after eviction
        pool.get_file(0).unwrap();
        assert_eq!(pool.open_count(), 3);
    }

    #[test]
    fn test_file_pool_out_of_range() {
        let mut pool = FileIoPool::new(Vec::new(), 3);
        assert!(matches!(
            pool.get_file(0),
            Err(EwfError::InvalidArgument(_))
        ));
    }
}
