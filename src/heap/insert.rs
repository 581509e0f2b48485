use std::path::Path;
use std::sync::{Arc, Mutex};

use super::error::{HeapError, HeapResult};
use super::file::{CurPage, HeapFile};
use super::page::{DataPage, MAX_RECORD_LEN, Rid};
use crate::buf::BufferManager;

/// Insert session on a heap file.
///
/// Inserts always target the tail of the data-page chain; when the tail
/// fills up, a fresh page is allocated, linked in, and becomes the new tail.
pub struct InsertFileScan {
    heap: HeapFile,
}

impl InsertFileScan {
    /// Open an insert session on an existing heap file
    pub fn open<P: AsRef<Path>>(
        buf_mgr: Arc<Mutex<BufferManager>>,
        path: P,
    ) -> HeapResult<Self> {
        Ok(Self {
            heap: HeapFile::open(buf_mgr, path)?,
        })
    }

    /// The underlying heap file
    pub fn heap_file(&self) -> &HeapFile {
        &self.heap
    }

    /// Insert a record and return its record id.
    ///
    /// Records longer than [`MAX_RECORD_LEN`] are rejected up front with
    /// `InvalidRecordLength`.
    pub fn insert_record(&mut self, rec: &[u8]) -> HeapResult<Rid> {
        if rec.len() > MAX_RECORD_LEN {
            return Err(HeapError::InvalidRecordLength(rec.len()));
        }

        let buf_mgr = Arc::clone(&self.heap.buf_mgr);
        let mut mgr = buf_mgr.lock().unwrap();

        // Inserts go to the tail of the chain
        let (frame, page_no) = match &self.heap.cur {
            Some(cur) => (cur.frame, cur.page_no),
            None => {
                let last = self.heap.header.last_page;
                let frame = mgr.read_page(self.heap.file, last)?;
                self.heap.cur = Some(CurPage {
                    frame,
                    page_no: last,
                    dirty: false,
                });
                (frame, last)
            }
        };

        let first_try = {
            let mut page = DataPage::from_buffer(mgr.contents_mut(frame))?;
            page.insert_record(rec)
        };

        match first_try {
            Ok(rid) => {
                self.record_inserted(rid);
                Ok(rid)
            }
            Err(HeapError::NoSpace(_)) => {
                // Grow the chain: allocate a new tail, link the old one to it
                let (new_page_no, new_frame) = mgr.alloc_page(self.heap.file)?;
                DataPage::init(mgr.contents_mut(new_frame), new_page_no)?;

                {
                    let mut old_tail = DataPage::from_buffer(mgr.contents_mut(frame))?;
                    old_tail.set_next_page(Some(new_page_no));
                }
                self.heap.header.last_page = new_page_no;
                self.heap.header.page_cnt += 1;
                self.heap.hdr_dirty = true;

                mgr.unpin_page(self.heap.file, page_no, true)?;
                self.heap.cur = Some(CurPage {
                    frame: new_frame,
                    page_no: new_page_no,
                    dirty: false,
                });

                // Must fit now: the record passed the size check and the new
                // page is empty
                let rid = {
                    let mut page = DataPage::from_buffer(mgr.contents_mut(new_frame))?;
                    page.insert_record(rec)?
                };
                self.record_inserted(rid);
                Ok(rid)
            }
            Err(err) => Err(err),
        }
    }

    fn record_inserted(&mut self, rid: Rid) {
        self.heap.header.rec_cnt += 1;
        self.heap.hdr_dirty = true;
        self.heap.cur_rec = Some(rid);
        if let Some(cur) = &mut self.heap.cur {
            cur.dirty = true;
        }
    }
}
