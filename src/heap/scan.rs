use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::error;

use super::error::{HeapError, HeapResult};
use super::file::{CurPage, HeapFile};
use super::page::{DataPage, Rid};
use crate::buf::BufferManager;
use crate::file::PageId;

/// Type of the attribute a scan filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Float,
    Str,
}

/// Comparison operator of a scan predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

/// Single-attribute scan predicate: compare `length` bytes at `offset` of
/// every record against `value`.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    pub offset: usize,
    pub length: usize,
    pub attr_type: AttrType,
    pub op: CompOp,
    pub value: Vec<u8>,
}

struct ScanMark {
    page_no: PageId,
    rec: Option<Rid>,
}

/// Stateful, optionally filtered iteration over the records of a heap file.
///
/// The scan keeps at most one data page pinned and walks the page chain in
/// order, returning record ids whose record matches the predicate.
pub struct HeapFileScan {
    heap: HeapFile,
    filter: Option<ScanFilter>,
    mark: Option<ScanMark>,
}

impl HeapFileScan {
    /// Open a scan over an existing heap file
    pub fn open<P: AsRef<Path>>(
        buf_mgr: Arc<Mutex<BufferManager>>,
        path: P,
    ) -> HeapResult<Self> {
        Ok(Self {
            heap: HeapFile::open(buf_mgr, path)?,
            filter: None,
            mark: None,
        })
    }

    /// The underlying heap file
    pub fn heap_file(&self) -> &HeapFile {
        &self.heap
    }

    /// Install the scan predicate. `None` matches every record.
    ///
    /// Fails with `BadScanParam` when the filter is malformed: zero length, a
    /// value of the wrong size, or a numeric type whose length is not the
    /// scalar's size.
    pub fn start_scan(&mut self, filter: Option<ScanFilter>) -> HeapResult<()> {
        if let Some(filter) = &filter {
            if filter.length == 0 {
                return Err(HeapError::BadScanParam(
                    "filter length must be at least 1".to_string(),
                ));
            }
            match filter.attr_type {
                AttrType::Int if filter.length != size_of::<i32>() => {
                    return Err(HeapError::BadScanParam(format!(
                        "integer filter length must be {}, got {}",
                        size_of::<i32>(),
                        filter.length
                    )));
                }
                AttrType::Float if filter.length != size_of::<f32>() => {
                    return Err(HeapError::BadScanParam(format!(
                        "float filter length must be {}, got {}",
                        size_of::<f32>(),
                        filter.length
                    )));
                }
                _ => {}
            }
            if filter.value.len() != filter.length {
                return Err(HeapError::BadScanParam(format!(
                    "filter value has {} bytes, length says {}",
                    filter.value.len(),
                    filter.length
                )));
            }
        }
        self.filter = filter;
        Ok(())
    }

    /// Advance to the next record satisfying the predicate and return its id.
    ///
    /// Returns `FileEof` once the chain is exhausted. Pages emptied by
    /// deletions are skipped.
    pub fn scan_next(&mut self) -> HeapResult<Rid> {
        let buf_mgr = Arc::clone(&self.heap.buf_mgr);
        let mut mgr = buf_mgr.lock().unwrap();

        // A fresh scan (or one resumed after end_scan) starts at the chain head
        if self.heap.cur.is_none() {
            let first = self.heap.header.first_page;
            let frame = mgr.read_page(self.heap.file, first)?;
            self.heap.cur = Some(CurPage {
                frame,
                page_no: first,
                dirty: false,
            });
            self.heap.cur_rec = None;
        }

        loop {
            let (frame, page_no, dirty) = match &self.heap.cur {
                Some(cur) => (cur.frame, cur.page_no, cur.dirty),
                None => return Err(HeapError::FileEof),
            };

            let page = DataPage::from_buffer(mgr.contents_mut(frame))?;
            let positioned = match self.heap.cur_rec {
                Some(cur_rec) => page.next_record(cur_rec),
                None => page.first_record(),
            };

            match positioned {
                Some(rid) => {
                    self.heap.cur_rec = Some(rid);
                    let rec = page.record(rid)?;
                    if matches(self.filter.as_ref(), rec) {
                        return Ok(rid);
                    }
                }
                None => {
                    let next_page = page.next_page();
                    let Some(next_page) = next_page else {
                        return Err(HeapError::FileEof);
                    };
                    mgr.unpin_page(self.heap.file, page_no, dirty)?;
                    self.heap.cur = None;
                    self.heap.cur_rec = None;
                    let frame = mgr.read_page(self.heap.file, next_page)?;
                    self.heap.cur = Some(CurPage {
                        frame,
                        page_no: next_page,
                        dirty: false,
                    });
                }
            }
        }
    }

    /// Snapshot the scan position for a later `reset_scan`.
    ///
    /// Marking a scan that holds no page snapshots the chain head.
    pub fn mark_scan(&mut self) {
        self.mark = Some(match &self.heap.cur {
            Some(cur) => ScanMark {
                page_no: cur.page_no,
                rec: self.heap.cur_rec,
            },
            None => ScanMark {
                page_no: self.heap.header.first_page,
                rec: None,
            },
        });
    }

    /// Return the scan to the last marked position. Without a prior
    /// `mark_scan` this is a no-op.
    pub fn reset_scan(&mut self) -> HeapResult<()> {
        let Some(mark) = &self.mark else {
            return Ok(());
        };
        let (page_no, rec) = (mark.page_no, mark.rec);

        let on_marked_page = self
            .heap
            .cur
            .as_ref()
            .is_some_and(|cur| cur.page_no == page_no);
        if !on_marked_page {
            let buf_mgr = Arc::clone(&self.heap.buf_mgr);
            let mut mgr = buf_mgr.lock().unwrap();
            self.heap.move_to(&mut mgr, page_no)?;
        }
        self.heap.cur_rec = rec;
        Ok(())
    }

    /// Fetch the record the scan is positioned on
    pub fn current_record(&mut self) -> HeapResult<Vec<u8>> {
        let rid = self.heap.cur_rec.ok_or(HeapError::NoCurrentRecord)?;
        let frame = match &self.heap.cur {
            Some(cur) => cur.frame,
            None => return Err(HeapError::NoCurrentRecord),
        };

        let buf_mgr = Arc::clone(&self.heap.buf_mgr);
        let mut mgr = buf_mgr.lock().unwrap();
        let page = DataPage::from_buffer(mgr.contents_mut(frame))?;
        Ok(page.record(rid)?.to_vec())
    }

    /// Delete the record the scan is positioned on.
    ///
    /// The current page is marked dirty and the file's record count drops.
    pub fn delete_record(&mut self) -> HeapResult<()> {
        let rid = self.heap.cur_rec.ok_or(HeapError::NoCurrentRecord)?;
        let cur = self.heap.cur.as_mut().ok_or(HeapError::NoCurrentRecord)?;
        let frame = cur.frame;

        let buf_mgr = Arc::clone(&self.heap.buf_mgr);
        let mut mgr = buf_mgr.lock().unwrap();
        let mut page = DataPage::from_buffer(mgr.contents_mut(frame))?;
        page.delete_record(rid)?;

        cur.dirty = true;
        self.heap.header.rec_cnt = self.heap.header.rec_cnt.saturating_sub(1);
        self.heap.hdr_dirty = true;
        Ok(())
    }

    /// Mark the scan's current page dirty
    pub fn mark_dirty(&mut self) -> HeapResult<()> {
        let cur = self.heap.cur.as_mut().ok_or(HeapError::NoCurrentRecord)?;
        cur.dirty = true;
        Ok(())
    }

    /// Release the scan's data-page pin and forget the position.
    ///
    /// The scan can be restarted afterwards; `scan_next` will begin at the
    /// chain head again.
    pub fn end_scan(&mut self) -> HeapResult<()> {
        if let Some(cur) = self.heap.cur.take() {
            let buf_mgr = Arc::clone(&self.heap.buf_mgr);
            let mut mgr = buf_mgr.lock().unwrap();
            mgr.unpin_page(self.heap.file, cur.page_no, cur.dirty)?;
        }
        self.heap.cur_rec = None;
        Ok(())
    }
}

impl Drop for HeapFileScan {
    fn drop(&mut self) {
        if let Err(err) = self.end_scan() {
            error!("failed to end scan on {}: {err}", self.heap.file_name());
        }
    }
}

/// Evaluate the predicate against one record.
///
/// A missing filter matches everything; an attribute extending past the end
/// of the record matches nothing. Attribute and filter bytes are copied into
/// aligned scalars before comparing.
fn matches(filter: Option<&ScanFilter>, rec: &[u8]) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some(end) = filter.offset.checked_add(filter.length) else {
        return false;
    };
    if end > rec.len() {
        return false;
    }
    let attr = &rec[filter.offset..end];

    let ordering = match filter.attr_type {
        AttrType::Int => {
            let mut a = [0u8; 4];
            let mut f = [0u8; 4];
            a.copy_from_slice(attr);
            f.copy_from_slice(&filter.value);
            Some(i32::from_ne_bytes(a).cmp(&i32::from_ne_bytes(f)))
        }
        AttrType::Float => {
            let mut a = [0u8; 4];
            let mut f = [0u8; 4];
            a.copy_from_slice(attr);
            f.copy_from_slice(&filter.value);
            f32::from_ne_bytes(a).partial_cmp(&f32::from_ne_bytes(f))
        }
        AttrType::Str => Some(attr.cmp(&filter.value[..])),
    };

    match ordering {
        Some(ordering) => match filter.op {
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Lte => ordering != Ordering::Greater,
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::Gte => ordering != Ordering::Less,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Ne => ordering != Ordering::Equal,
        },
        // Unordered float comparison: only "not equal" holds
        None => filter.op == CompOp::Ne,
    }
}
