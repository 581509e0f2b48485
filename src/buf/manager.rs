use log::{debug, error};

use super::error::{BufferError, BufferResult};
use super::frame_table::FrameTable;
use crate::file::{FileHandle, PAGE_SIZE, PagedFileManager, PageId};

/// Index of a frame in the buffer pool.
///
/// Returned from the pinning operations and valid exactly as long as the pin
/// is held; unpinning invalidates it.
pub type FrameId = usize;

/// Bookkeeping for one buffer frame
#[derive(Debug, Clone, Copy)]
struct FrameDesc {
    /// File the frame is bound to, when valid
    file: Option<FileHandle>,
    page_no: PageId,
    valid: bool,
    /// Non-zero forbids eviction
    pin_count: u32,
    /// In-memory copy differs from disk
    dirty: bool,
    /// Second-chance indicator for the clock sweep
    ref_bit: bool,
}

impl FrameDesc {
    fn empty() -> Self {
        Self {
            file: None,
            page_no: 0,
            valid: false,
            pin_count: 0,
            dirty: false,
            ref_bit: false,
        }
    }

    /// Bind to a page with an initial pin
    fn set(&mut self, file: FileHandle, page_no: PageId) {
        self.file = Some(file);
        self.page_no = page_no;
        self.valid = true;
        self.pin_count = 1;
        self.dirty = false;
        self.ref_bit = false;
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }
}

/// Buffer pool of a fixed number of page frames.
///
/// Arbitrates which page of which file resides in which frame. Pages are
/// pinned by `read_page`/`alloc_page` and released by `unpin_page`; a pinned
/// page is never chosen as a replacement victim. At most one frame is ever
/// bound to a given (file, page) pair.
pub struct BufferManager {
    file_manager: PagedFileManager,
    /// Frame descriptors, parallel to `pool`
    frames: Vec<FrameDesc>,
    /// Page contents, one page-sized slot per frame
    pool: Vec<[u8; PAGE_SIZE]>,
    /// Directory of resident pages
    table: FrameTable,
    /// Clock hand of the replacement sweep
    clock_hand: usize,
}

impl BufferManager {
    /// Create a buffer manager with `num_bufs` frames over the given file store
    pub fn new(file_manager: PagedFileManager, num_bufs: usize) -> Self {
        assert!(num_bufs > 0, "buffer pool needs at least one frame");
        Self {
            file_manager,
            frames: vec![FrameDesc::empty(); num_bufs],
            pool: vec![[0u8; PAGE_SIZE]; num_bufs],
            table: FrameTable::for_pool(num_bufs),
            clock_hand: num_bufs - 1,
        }
    }

    /// Number of frames in the pool
    pub fn num_bufs(&self) -> usize {
        self.frames.len()
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Page contents of a frame.
    ///
    /// The caller must hold a pin on the page bound to this frame and must not
    /// keep the borrow past the unpin.
    pub fn contents(&self, frame: FrameId) -> &[u8] {
        &self.pool[frame]
    }

    /// Mutable page contents of a frame.
    ///
    /// Same contract as [`contents`](Self::contents). Writing through this
    /// borrow does not mark the page dirty; dirtiness is reported at unpin.
    pub fn contents_mut(&mut self, frame: FrameId) -> &mut [u8] {
        &mut self.pool[frame]
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.frames.len();
    }

    /// Choose a frame for (re)binding using the clock sweep.
    ///
    /// On success the selected frame is invalid, unpinned, clean, and has no
    /// directory entry. Fails with `BufferExceeded` when a whole sweep
    /// observes only pinned frames, and with the underlying I/O error when a
    /// dirty victim cannot be written through (the victim then keeps its
    /// contents and its dirty bit).
    fn alloc_buf(&mut self) -> BufferResult<FrameId> {
        let mut pinned_this_sweep = 0;
        loop {
            if pinned_this_sweep == self.frames.len() {
                return Err(BufferError::BufferExceeded);
            }
            self.advance_clock();
            let idx = self.clock_hand;
            let desc = self.frames[idx];

            if !desc.valid {
                self.frames[idx].clear();
                return Ok(idx);
            }
            if desc.ref_bit {
                // Second chance: at least one more full tick before this
                // frame becomes a victim
                self.frames[idx].ref_bit = false;
                pinned_this_sweep = 0;
                continue;
            }
            if desc.pin_count > 0 {
                pinned_this_sweep += 1;
                continue;
            }

            let file = desc.file.ok_or(BufferError::BadBuffer(idx))?;
            if desc.dirty {
                debug!(
                    "evicting dirty page {} from frame {idx}, writing through",
                    desc.page_no
                );
                self.file_manager
                    .write_page(file, desc.page_no, &self.pool[idx])?;
            }
            self.table.remove(file, desc.page_no)?;
            self.frames[idx].clear();
            return Ok(idx);
        }
    }

    /// Pin a page and return the frame holding it.
    ///
    /// A resident page is pinned in place; otherwise a victim frame is chosen
    /// and the page is read through the file store. A failed read leaves no
    /// directory entry and no frame binding behind.
    pub fn read_page(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<FrameId> {
        if let Some(frame) = self.table.lookup(file, page_no) {
            let desc = &mut self.frames[frame];
            desc.ref_bit = true;
            desc.pin_count += 1;
            return Ok(frame);
        }

        let frame = self.alloc_buf()?;
        self.file_manager
            .read_page(file, page_no, &mut self.pool[frame])?;
        self.table.insert(file, page_no, frame)?;
        self.frames[frame].set(file, page_no);
        Ok(frame)
    }

    /// Allocate a fresh page in the file and pin it.
    ///
    /// Returns the new page number together with the frame holding it.
    pub fn alloc_page(&mut self, file: FileHandle) -> BufferResult<(PageId, FrameId)> {
        let page_no = self.file_manager.allocate_page(file)?;
        let frame = self.alloc_buf()?;
        self.table.insert(file, page_no, frame)?;
        self.frames[frame].set(file, page_no);
        self.pool[frame].fill(0);
        Ok((page_no, frame))
    }

    /// Release one pin on a page.
    ///
    /// `dirty` is sticky: once a page has been unpinned dirty, a later unpin
    /// with `dirty = false` does not clear the flag.
    pub fn unpin_page(
        &mut self,
        file: FileHandle,
        page_no: PageId,
        dirty: bool,
    ) -> BufferResult<()> {
        let frame = self
            .table
            .lookup(file, page_no)
            .ok_or(BufferError::PageNotFound(page_no))?;
        let desc = &mut self.frames[frame];
        if desc.pin_count == 0 {
            return Err(BufferError::PageNotPinned(page_no));
        }
        if dirty {
            desc.dirty = true;
        }
        desc.pin_count -= 1;
        Ok(())
    }

    /// Drop any in-memory binding of a page and deallocate it in the file store
    pub fn dispose_page(&mut self, file: FileHandle, page_no: PageId) -> BufferResult<()> {
        if let Some(frame) = self.table.lookup(file, page_no) {
            self.frames[frame].clear();
            self.table.remove(file, page_no)?;
        }
        self.file_manager.dispose_page(file, page_no)?;
        Ok(())
    }

    /// Write back every dirty page of a file and unbind all of its frames.
    ///
    /// Fails with `PagePinned` if any page of the file is still pinned; the
    /// caller must unpin first. `BadBuffer` reports an invalid frame whose
    /// file field still references the file.
    pub fn flush_file(&mut self, file: FileHandle) -> BufferResult<()> {
        for idx in 0..self.frames.len() {
            let desc = self.frames[idx];
            if desc.valid && desc.file == Some(file) {
                if desc.pin_count > 0 {
                    return Err(BufferError::PagePinned(desc.page_no));
                }
                if desc.dirty {
                    debug!("flushing page {} from frame {idx}", desc.page_no);
                    self.file_manager
                        .write_page(file, desc.page_no, &self.pool[idx])?;
                    self.frames[idx].dirty = false;
                }
                self.table.remove(file, desc.page_no)?;
                self.frames[idx].clear();
            } else if !desc.valid && desc.file == Some(file) {
                return Err(BufferError::BadBuffer(idx));
            }
        }
        self.file_manager.sync_file(file)?;
        Ok(())
    }

    #[cfg(test)]
    fn frame_desc(&self, frame: FrameId) -> &FrameDesc {
        &self.frames[frame]
    }

    /// Directory and frame array must describe each other exactly: every
    /// valid frame has the one entry that points back at it.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let valid = self.frames.iter().filter(|d| d.valid).count();
        assert_eq!(valid, self.table.len(), "directory size != valid frames");
        for (idx, desc) in self.frames.iter().enumerate() {
            if desc.valid {
                let file = desc.file.expect("valid frame with no file");
                assert_eq!(
                    self.table.lookup(file, desc.page_no),
                    Some(idx),
                    "frame {idx} not mapped to itself"
                );
            }
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Write through every dirty page still resident
        for idx in 0..self.frames.len() {
            let desc = self.frames[idx];
            if desc.valid
                && desc.dirty
                && let Some(file) = desc.file
            {
                debug!(
                    "flushing page {} from frame {idx} at teardown",
                    desc.page_no
                );
                if let Err(err) = self
                    .file_manager
                    .write_page(file, desc.page_no, &self.pool[idx])
                {
                    error!("failed to write page {} at teardown: {err}", desc.page_no);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_pool(num_bufs: usize) -> (TempDir, BufferManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        (temp_dir, BufferManager::new(file_manager, num_bufs), handle)
    }

    #[test]
    fn test_read_page_miss_then_hit() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        let mut buffer = vec![0u8; PAGE_SIZE];
        buffer[0] = 42;
        bm.file_manager_mut().write_page(file, 0, &buffer).unwrap();

        // Miss: load from disk, pinned once
        let frame = bm.read_page(file, 0).unwrap();
        assert_eq!(bm.contents(frame)[0], 42);
        assert_eq!(bm.frame_desc(frame).pin_count, 1);
        assert!(!bm.frame_desc(frame).ref_bit);

        // Hit: same frame, pin count bumps, reference bit set
        let frame2 = bm.read_page(file, 0).unwrap();
        assert_eq!(frame, frame2);
        assert_eq!(bm.frame_desc(frame).pin_count, 2);
        assert!(bm.frame_desc(frame).ref_bit);

        bm.unpin_page(file, 0, false).unwrap();
        bm.unpin_page(file, 0, false).unwrap();
        bm.assert_consistent();
    }

    #[test]
    fn test_alloc_page_pins_fresh_page() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        let (page_no, frame) = bm.alloc_page(file).unwrap();
        assert_eq!(page_no, 0);
        assert_eq!(bm.frame_desc(frame).pin_count, 1);
        assert!(!bm.frame_desc(frame).dirty);
        assert!(bm.contents(frame).iter().all(|&b| b == 0));

        let (page_no, _) = bm.alloc_page(file).unwrap();
        assert_eq!(page_no, 1);
        bm.assert_consistent();
    }

    #[test]
    fn test_unpin_errors() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        // Not resident at all
        let result = bm.unpin_page(file, 7, false);
        assert!(matches!(result, Err(BufferError::PageNotFound(7))));

        let (page_no, _) = bm.alloc_page(file).unwrap();
        bm.unpin_page(file, page_no, false).unwrap();
        let result = bm.unpin_page(file, page_no, false);
        assert!(matches!(result, Err(BufferError::PageNotPinned(_))));
    }

    #[test]
    fn test_dirty_bit_is_sticky() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        let (page_no, frame) = bm.alloc_page(file).unwrap();
        bm.contents_mut(frame)[0] = 0xAB;
        bm.unpin_page(file, page_no, true).unwrap();

        // A clean unpin afterwards must not lose the earlier write
        bm.read_page(file, page_no).unwrap();
        bm.unpin_page(file, page_no, false).unwrap();
        assert!(bm.frame_desc(frame).dirty);

        bm.flush_file(file).unwrap();
        let mut buffer = vec![0u8; PAGE_SIZE];
        bm.file_manager_mut()
            .read_page(file, page_no, &mut buffer)
            .unwrap();
        assert_eq!(buffer[0], 0xAB);
    }

    #[test]
    fn test_buffer_exceeded_when_all_pinned() {
        let (_temp_dir, mut bm, file) = setup_pool(3);

        for _ in 0..3 {
            bm.alloc_page(file).unwrap();
        }
        let result = bm.alloc_page(file);
        assert!(matches!(result, Err(BufferError::BufferExceeded)));

        // Releasing one pin makes allocation possible again
        bm.unpin_page(file, 0, false).unwrap();
        bm.alloc_page(file).unwrap();
        bm.assert_consistent();
    }

    #[test]
    fn test_clock_selects_every_frame_once() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        // Fill the pool with clean, unpinned pages whose reference bits are
        // all set (the second read of each page is a hit and sets the bit).
        for page_no in 0..4 {
            bm.read_page(file, page_no).unwrap();
            bm.read_page(file, page_no).unwrap();
            bm.unpin_page(file, page_no, false).unwrap();
            bm.unpin_page(file, page_no, false).unwrap();
        }

        let mut victims = Vec::new();
        for _ in 0..4 {
            victims.push(bm.alloc_buf().unwrap());
        }
        victims.sort_unstable();
        victims.dedup();
        assert_eq!(victims.len(), 4, "each frame evicted exactly once");
    }

    #[test]
    fn test_eviction_writes_dirty_pages_through() {
        let (_temp_dir, mut bm, file) = setup_pool(2);

        // Dirty two pages, then force their eviction with four more reads
        for page_no in 0..2 {
            let (allocated, frame) = bm.alloc_page(file).unwrap();
            assert_eq!(allocated, page_no);
            bm.contents_mut(frame)[0] = page_no as u8 + 1;
            bm.unpin_page(file, page_no, true).unwrap();
        }
        for page_no in 2..6 {
            bm.read_page(file, page_no).unwrap();
            bm.unpin_page(file, page_no, false).unwrap();
        }

        for page_no in 0..2u32 {
            let mut buffer = vec![0u8; PAGE_SIZE];
            bm.file_manager_mut()
                .read_page(file, page_no, &mut buffer)
                .unwrap();
            assert_eq!(buffer[0], page_no as u8 + 1);
        }
        bm.assert_consistent();
    }

    #[test]
    fn test_pinned_pages_survive_eviction_pressure() {
        let (_temp_dir, mut bm, file) = setup_pool(3);

        let (page_no, frame) = bm.alloc_page(file).unwrap();
        bm.contents_mut(frame)[0] = 0x5A;

        // Churn the two remaining frames well past a full sweep
        for other in 1..10 {
            bm.read_page(file, other).unwrap();
            bm.unpin_page(file, other, false).unwrap();
        }

        // The pinned page is still in its frame, untouched
        assert_eq!(bm.contents(frame)[0], 0x5A);
        assert_eq!(bm.frame_desc(frame).pin_count, 1);
        bm.unpin_page(file, page_no, false).unwrap();
        bm.assert_consistent();
    }

    #[test]
    fn test_dispose_page_unbinds_and_deallocates() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        let (page_no, frame) = bm.alloc_page(file).unwrap();
        bm.contents_mut(frame)[0] = 9;
        bm.unpin_page(file, page_no, true).unwrap();

        bm.dispose_page(file, page_no).unwrap();
        bm.assert_consistent();

        // The page store copy is gone too
        let mut buffer = vec![0u8; PAGE_SIZE];
        bm.file_manager_mut()
            .read_page(file, page_no, &mut buffer)
            .unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_flush_file_refuses_pinned_pages() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        let (page_no, _) = bm.alloc_page(file).unwrap();
        let result = bm.flush_file(file);
        assert!(matches!(result, Err(BufferError::PagePinned(p)) if p == page_no));

        bm.unpin_page(file, page_no, false).unwrap();
        bm.flush_file(file).unwrap();
        bm.assert_consistent();
    }

    #[test]
    fn test_flush_file_writes_and_unbinds() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        for page_no in 0..3 {
            let (_, frame) = bm.alloc_page(file).unwrap();
            bm.contents_mut(frame)[0] = page_no as u8 + 1;
            bm.unpin_page(file, page_no, true).unwrap();
        }

        bm.flush_file(file).unwrap();
        bm.assert_consistent();

        for page_no in 0..3u32 {
            let mut buffer = vec![0u8; PAGE_SIZE];
            bm.file_manager_mut()
                .read_page(file, page_no, &mut buffer)
                .unwrap();
            assert_eq!(buffer[0], page_no as u8 + 1);
        }

        // Nothing left to flush; a second call is a no-op
        bm.flush_file(file).unwrap();
    }

    #[test]
    fn test_teardown_writes_dirty_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        {
            let mut file_manager = PagedFileManager::new();
            file_manager.create_file(&test_file).unwrap();
            let file = file_manager.open_file(&test_file).unwrap();
            let mut bm = BufferManager::new(file_manager, 4);

            let (page_no, frame) = bm.alloc_page(file).unwrap();
            bm.contents_mut(frame)[0] = 88;
            bm.unpin_page(file, page_no, true).unwrap();
            // bm dropped here, must write the dirty page through
        }

        let mut file_manager = PagedFileManager::new();
        let file = file_manager.open_file(&test_file).unwrap();
        let mut buffer = vec![0u8; PAGE_SIZE];
        file_manager.read_page(file, 0, &mut buffer).unwrap();
        assert_eq!(buffer[0], 88);
    }

    #[test]
    fn test_failed_read_leaves_no_binding() {
        let (_temp_dir, mut bm, file) = setup_pool(4);

        // Close the file underneath the pool; the read must fail cleanly
        bm.file_manager_mut().close_file(file).unwrap();
        let result = bm.read_page(file, 0);
        assert!(matches!(
            result,
            Err(BufferError::File(crate::file::FileError::InvalidHandle(_)))
        ));
        bm.assert_consistent();
    }
}
