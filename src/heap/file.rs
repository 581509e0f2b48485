use std::path::Path;
use std::sync::{Arc, Mutex};

use log::error;

use super::error::{HeapError, HeapResult};
use super::page::{DataPage, Rid};
use crate::buf::{BufferError, BufferManager, FrameId};
use crate::file::{FileHandle, PageId};

/// Longest file name the header page stores
pub const MAX_NAME_LEN: usize = 128;

const HDR_NAME_LEN: usize = 0;
const HDR_NAME: usize = 2;
const HDR_FIRST_PAGE: usize = HDR_NAME + MAX_NAME_LEN;
const HDR_LAST_PAGE: usize = HDR_FIRST_PAGE + 4;
const HDR_PAGE_CNT: usize = HDR_LAST_PAGE + 4;
const HDR_REC_CNT: usize = HDR_PAGE_CNT + 4;

/// Header-page record of a heap file: the identity of the file plus the
/// bounds of its data-page chain.
#[derive(Debug, Clone)]
pub(super) struct FileHeader {
    pub(super) file_name: String,
    /// Head of the data-page chain
    pub(super) first_page: PageId,
    /// Tail of the data-page chain; its next link is always "none"
    pub(super) last_page: PageId,
    /// Data pages in the chain (the header page is not counted)
    pub(super) page_cnt: u32,
    pub(super) rec_cnt: u32,
}

impl FileHeader {
    fn serialize_into(&self, buffer: &mut [u8]) {
        let name = self.file_name.as_bytes();
        buffer[HDR_NAME_LEN..HDR_NAME].copy_from_slice(&(name.len() as u16).to_le_bytes());
        buffer[HDR_NAME..HDR_NAME + MAX_NAME_LEN].fill(0);
        buffer[HDR_NAME..HDR_NAME + name.len()].copy_from_slice(name);
        buffer[HDR_FIRST_PAGE..HDR_FIRST_PAGE + 4]
            .copy_from_slice(&self.first_page.to_le_bytes());
        buffer[HDR_LAST_PAGE..HDR_LAST_PAGE + 4].copy_from_slice(&self.last_page.to_le_bytes());
        buffer[HDR_PAGE_CNT..HDR_PAGE_CNT + 4].copy_from_slice(&self.page_cnt.to_le_bytes());
        buffer[HDR_REC_CNT..HDR_REC_CNT + 4].copy_from_slice(&self.rec_cnt.to_le_bytes());
    }

    fn deserialize(buffer: &[u8]) -> HeapResult<Self> {
        let read_u32 = |offset: usize| {
            u32::from_le_bytes([
                buffer[offset],
                buffer[offset + 1],
                buffer[offset + 2],
                buffer[offset + 3],
            ])
        };

        let name_len = u16::from_le_bytes([buffer[HDR_NAME_LEN], buffer[HDR_NAME_LEN + 1]]) as usize;
        if name_len > MAX_NAME_LEN {
            return Err(HeapError::Deserialization(format!(
                "Header file name length {name_len} exceeds {MAX_NAME_LEN}"
            )));
        }
        let file_name = String::from_utf8(buffer[HDR_NAME..HDR_NAME + name_len].to_vec())
            .map_err(|err| HeapError::Deserialization(format!("Header file name: {err}")))?;

        Ok(Self {
            file_name,
            first_page: read_u32(HDR_FIRST_PAGE),
            last_page: read_u32(HDR_LAST_PAGE),
            page_cnt: read_u32(HDR_PAGE_CNT),
            rec_cnt: read_u32(HDR_REC_CNT),
        })
    }
}

/// A data page pinned on behalf of an open heap file
pub(super) struct CurPage {
    pub(super) frame: FrameId,
    pub(super) page_no: PageId,
    pub(super) dirty: bool,
}

/// An open heap file: a paged file presented as a growable collection of
/// variable-length records addressed by record id.
///
/// The header page stays pinned for the whole session; at most one data page
/// is pinned besides it. Dropping the heap file releases both pins, writes
/// the header back if it changed, and flushes the file.
pub struct HeapFile {
    pub(super) buf_mgr: Arc<Mutex<BufferManager>>,
    pub(super) file: FileHandle,
    pub(super) header_page_no: PageId,
    pub(super) header_frame: FrameId,
    pub(super) header: FileHeader,
    pub(super) hdr_dirty: bool,
    pub(super) cur: Option<CurPage>,
    pub(super) cur_rec: Option<Rid>,
}

impl HeapFile {
    /// Create a heap file: a header page plus one empty data page.
    ///
    /// Fails with `FileAlreadyExists` if the name is taken. The file is
    /// flushed and closed before returning.
    pub fn create<P: AsRef<Path>>(
        buf_mgr: &Arc<Mutex<BufferManager>>,
        path: P,
    ) -> HeapResult<()> {
        let file_name = path.as_ref().display().to_string();
        if file_name.len() > MAX_NAME_LEN {
            return Err(HeapError::NameTooLong(file_name));
        }

        let mut mgr = buf_mgr.lock().unwrap();
        mgr.file_manager_mut().create_file(&path)?;
        let file = mgr.file_manager_mut().open_file(&path)?;

        let (header_page_no, header_frame) = mgr.alloc_page(file)?;
        let (data_page_no, data_frame) = mgr.alloc_page(file)?;
        DataPage::init(mgr.contents_mut(data_frame), data_page_no)?;

        let header = FileHeader {
            file_name,
            first_page: data_page_no,
            last_page: data_page_no,
            page_cnt: 1,
            rec_cnt: 0,
        };
        header.serialize_into(mgr.contents_mut(header_frame));

        mgr.unpin_page(file, header_page_no, true)?;
        mgr.unpin_page(file, data_page_no, true)?;
        mgr.flush_file(file)?;
        mgr.file_manager_mut().close_file(file)?;
        Ok(())
    }

    /// Delete a heap file from the file store
    pub fn destroy<P: AsRef<Path>>(
        buf_mgr: &Arc<Mutex<BufferManager>>,
        path: P,
    ) -> HeapResult<()> {
        let mut mgr = buf_mgr.lock().unwrap();
        mgr.file_manager_mut().remove_file(path)?;
        Ok(())
    }

    /// Open an existing heap file, pinning its header page and the head of
    /// its data-page chain.
    pub fn open<P: AsRef<Path>>(
        buf_mgr: Arc<Mutex<BufferManager>>,
        path: P,
    ) -> HeapResult<Self> {
        let mut mgr = buf_mgr.lock().unwrap();
        let file = mgr.file_manager_mut().open_file(&path)?;

        match Self::pin_initial_pages(&mut mgr, file) {
            Ok((header_page_no, header_frame, header, cur)) => {
                drop(mgr);
                Ok(Self {
                    buf_mgr,
                    file,
                    header_page_no,
                    header_frame,
                    header,
                    hdr_dirty: false,
                    cur: Some(cur),
                    cur_rec: None,
                })
            }
            Err(err) => {
                let _ = mgr.file_manager_mut().close_file(file);
                Err(err)
            }
        }
    }

    fn pin_initial_pages(
        mgr: &mut BufferManager,
        file: FileHandle,
    ) -> HeapResult<(PageId, FrameId, FileHeader, CurPage)> {
        let header_page_no = mgr.file_manager_mut().first_page(file)?;
        let header_frame = mgr.read_page(file, header_page_no)?;

        let header = match FileHeader::deserialize(mgr.contents(header_frame)) {
            Ok(header) => header,
            Err(err) => {
                let _ = mgr.unpin_page(file, header_page_no, false);
                return Err(err);
            }
        };

        let first_page = header.first_page;
        match mgr.read_page(file, first_page) {
            Ok(frame) => Ok((
                header_page_no,
                header_frame,
                header,
                CurPage {
                    frame,
                    page_no: first_page,
                    dirty: false,
                },
            )),
            Err(err) => {
                let _ = mgr.unpin_page(file, header_page_no, false);
                Err(err.into())
            }
        }
    }

    /// Name recorded in the header page
    pub fn file_name(&self) -> &str {
        &self.header.file_name
    }

    /// Number of records in the file
    pub fn record_count(&self) -> u32 {
        self.header.rec_cnt
    }

    /// Number of data pages in the chain
    pub fn page_count(&self) -> u32 {
        self.header.page_cnt
    }

    /// Head of the data-page chain
    pub fn first_page(&self) -> PageId {
        self.header.first_page
    }

    /// Tail of the data-page chain
    pub fn last_page(&self) -> PageId {
        self.header.last_page
    }

    /// Make `page_no` the pinned current page, releasing the previous one
    /// with its dirty flag. Returns the frame holding the page.
    pub(super) fn move_to(
        &mut self,
        mgr: &mut BufferManager,
        page_no: PageId,
    ) -> HeapResult<FrameId> {
        if let Some(cur) = &self.cur
            && cur.page_no == page_no
        {
            return Ok(cur.frame);
        }
        if let Some(cur) = self.cur.take() {
            mgr.unpin_page(self.file, cur.page_no, cur.dirty)?;
        }
        let frame = mgr.read_page(self.file, page_no)?;
        self.cur = Some(CurPage {
            frame,
            page_no,
            dirty: false,
        });
        Ok(frame)
    }

    /// Fetch an arbitrary record by record id.
    ///
    /// If the record is not on the currently pinned page, that page is
    /// released and the record's page becomes the current page.
    pub fn get_record(&mut self, rid: Rid) -> HeapResult<Vec<u8>> {
        let buf_mgr = Arc::clone(&self.buf_mgr);
        let mut mgr = buf_mgr.lock().unwrap();

        let frame = self.move_to(&mut mgr, rid.page_no)?;
        self.cur_rec = Some(rid);
        let page = DataPage::from_buffer(mgr.contents_mut(frame))?;
        Ok(page.record(rid)?.to_vec())
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let buf_mgr = Arc::clone(&self.buf_mgr);
        let mut mgr = match buf_mgr.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(cur) = self.cur.take()
            && let Err(err) = mgr.unpin_page(self.file, cur.page_no, cur.dirty)
        {
            error!("failed to unpin data page {}: {err}", cur.page_no);
        }

        // The cached header goes back into its still-pinned frame before the
        // pin is released
        if self.hdr_dirty {
            self.header.serialize_into(mgr.contents_mut(self.header_frame));
        }
        if let Err(err) = mgr.unpin_page(self.file, self.header_page_no, self.hdr_dirty) {
            error!("failed to unpin header page {}: {err}", self.header_page_no);
        }

        match mgr.flush_file(self.file) {
            Ok(()) => {}
            Err(BufferError::PagePinned(_)) => {
                // another session still holds pages of this file; its close
                // will write them back
            }
            Err(err) => error!("failed to flush {}: {err}", self.header.file_name),
        }
        if let Err(err) = mgr.file_manager_mut().close_file(self.file) {
            error!("failed to close {}: {err}", self.header.file_name);
        }
    }
}
