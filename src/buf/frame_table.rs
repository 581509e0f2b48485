use std::collections::HashMap;

use super::error::{BufferError, BufferResult};
use crate::file::{FileHandle, PageId};

/// Directory mapping resident pages to their frames.
///
/// Keyed by (file handle, page number); file handles compare by identity, so
/// two opens of the same path share one set of entries. Exactly one entry
/// exists per valid frame.
pub struct FrameTable {
    map: HashMap<(FileHandle, PageId), usize>,
}

impl FrameTable {
    /// Capacity follows the pool size: 1.2x the frame count, rounded up to odd.
    pub fn for_pool(num_bufs: usize) -> Self {
        let mut capacity = num_bufs + num_bufs.div_ceil(5);
        if capacity % 2 == 0 {
            capacity += 1;
        }
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Map a page to a frame. The page must not already be mapped.
    pub fn insert(&mut self, file: FileHandle, page_no: PageId, frame: usize) -> BufferResult<()> {
        if self.map.contains_key(&(file, page_no)) {
            return Err(BufferError::FrameTable(format!(
                "duplicate mapping for page {page_no} of file {}",
                file.as_usize()
            )));
        }
        self.map.insert((file, page_no), frame);
        Ok(())
    }

    pub fn lookup(&self, file: FileHandle, page_no: PageId) -> Option<usize> {
        self.map.get(&(file, page_no)).copied()
    }

    pub fn remove(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<()> {
        self.map
            .remove(&(file, page_no))
            .map(|_| ())
            .ok_or(BufferError::PageNotFound(page_no))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn open_handle(dir: &TempDir, name: &str, manager: &mut PagedFileManager) -> FileHandle {
        let path = dir.path().join(name);
        manager.create_file(&path).unwrap();
        manager.open_file(&path).unwrap()
    }

    #[test]
    fn test_insert_lookup_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = PagedFileManager::new();
        let file = open_handle(&dir, "a.db", &mut fm);

        let mut table = FrameTable::for_pool(10);
        assert_eq!(table.lookup(file, 3), None);

        table.insert(file, 3, 7).unwrap();
        assert_eq!(table.lookup(file, 3), Some(7));
        assert_eq!(table.len(), 1);

        table.remove(file, 3).unwrap();
        assert_eq!(table.lookup(file, 3), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = PagedFileManager::new();
        let file = open_handle(&dir, "a.db", &mut fm);

        let mut table = FrameTable::for_pool(10);
        table.insert(file, 0, 1).unwrap();
        let result = table.insert(file, 0, 2);
        assert!(matches!(result, Err(BufferError::FrameTable(_))));
        // The earlier mapping survives the failed insert
        assert_eq!(table.lookup(file, 0), Some(1));
    }

    #[test]
    fn test_remove_absent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = PagedFileManager::new();
        let file = open_handle(&dir, "a.db", &mut fm);

        let mut table = FrameTable::for_pool(10);
        let result = table.remove(file, 9);
        assert!(matches!(result, Err(BufferError::PageNotFound(9))));
    }

    #[test]
    fn test_same_page_number_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = PagedFileManager::new();
        let file1 = open_handle(&dir, "a.db", &mut fm);
        let file2 = open_handle(&dir, "b.db", &mut fm);

        let mut table = FrameTable::for_pool(10);
        table.insert(file1, 0, 1).unwrap();
        table.insert(file2, 0, 2).unwrap();
        assert_eq!(table.lookup(file1, 0), Some(1));
        assert_eq!(table.lookup(file2, 0), Some(2));
    }
}
