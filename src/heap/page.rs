use super::error::{HeapError, HeapResult};
use crate::file::{PAGE_SIZE, PageId};

/// Page header stored at the beginning of each data page
///
/// Layout (little-endian):
/// - `page_no: u32` - this page's own number
/// - `next_page: i32` - chain link, -1 = end of chain
/// - `slot_cnt: u16` - slot entries allocated so far (used or freed)
/// - `free_ptr: u16` - offset where the next record's bytes go
/// - `free_space: u16` - bytes left between record data and the slot array
/// - 2 bytes padding
const HEADER_SIZE: usize = 16;

/// Slot entry: `offset: u16`, `len: u16`, stored from the page end growing
/// backward. A freed slot keeps its entry with `offset == FREE_SLOT`.
const SLOT_SIZE: usize = 4;

const FREE_SLOT: u16 = u16::MAX;

const OFF_PAGE_NO: usize = 0;
const OFF_NEXT_PAGE: usize = 4;
const OFF_SLOT_CNT: usize = 8;
const OFF_FREE_PTR: usize = 10;
const OFF_FREE_SPACE: usize = 12;

/// Largest record a data page can hold: a whole page minus the header and one
/// slot entry.
pub const MAX_RECORD_LEN: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: PageId,
    pub slot_no: u16,
}

impl Rid {
    pub fn new(page_no: PageId, slot_no: u16) -> Self {
        Self { page_no, slot_no }
    }
}

/// Zero-copy wrapper interpreting a buffer-pool frame as a slotted data page.
///
/// Records of varying length grow forward from the header; the slot array
/// grows backward from the page end. Deleting a record frees its slot entry
/// for reuse but does not move the bytes of its neighbors, so record ids stay
/// stable for the life of the record.
pub struct DataPage<'a> {
    buffer: &'a mut [u8],
}

impl<'a> DataPage<'a> {
    /// Format a buffer as a fresh, empty page with no successor
    pub fn init(buffer: &'a mut [u8], page_no: PageId) -> HeapResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(HeapError::Deserialization(format!(
                "Buffer must be {} bytes, got {}",
                PAGE_SIZE,
                buffer.len()
            )));
        }

        buffer.fill(0);
        let mut page = Self { buffer };
        page.write_u32(OFF_PAGE_NO, page_no);
        page.write_i32(OFF_NEXT_PAGE, -1);
        page.write_u16(OFF_FREE_PTR, HEADER_SIZE as u16);
        page.write_u16(OFF_FREE_SPACE, (PAGE_SIZE - HEADER_SIZE) as u16);
        Ok(page)
    }

    /// Wrap an existing page buffer (zero-copy)
    pub fn from_buffer(buffer: &'a mut [u8]) -> HeapResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(HeapError::Deserialization(format!(
                "Invalid page size: {} bytes",
                buffer.len()
            )));
        }

        let page = Self { buffer };
        let free_ptr = page.free_ptr() as usize;
        let free_space = page.free_space() as usize;
        let slot_bytes = page.slot_cnt() as usize * SLOT_SIZE;

        // Data region, free region and slot array must tile the page exactly
        if free_ptr < HEADER_SIZE || free_ptr + free_space + slot_bytes != PAGE_SIZE {
            return Err(HeapError::Deserialization(format!(
                "Page layout does not add up: free_ptr={free_ptr}, free_space={free_space}, slots={}",
                page.slot_cnt()
            )));
        }

        Ok(page)
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.buffer[offset], self.buffer[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.buffer[offset],
            self.buffer[offset + 1],
            self.buffer[offset + 2],
            self.buffer[offset + 3],
        ])
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        self.write_u32(offset, value as u32);
    }

    /// This page's own number
    pub fn page_no(&self) -> PageId {
        self.read_u32(OFF_PAGE_NO)
    }

    /// Successor in the page chain, `None` at the tail
    pub fn next_page(&self) -> Option<PageId> {
        let raw = self.read_i32(OFF_NEXT_PAGE);
        if raw < 0 { None } else { Some(raw as PageId) }
    }

    /// Set the successor link; `None` marks the tail
    pub fn set_next_page(&mut self, next: Option<PageId>) {
        match next {
            Some(page_no) => self.write_i32(OFF_NEXT_PAGE, page_no as i32),
            None => self.write_i32(OFF_NEXT_PAGE, -1),
        }
    }

    fn slot_cnt(&self) -> u16 {
        self.read_u16(OFF_SLOT_CNT)
    }

    fn free_ptr(&self) -> u16 {
        self.read_u16(OFF_FREE_PTR)
    }

    fn free_space(&self) -> u16 {
        self.read_u16(OFF_FREE_SPACE)
    }

    fn slot_offset(slot_no: u16) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot_no as usize + 1)
    }

    fn slot(&self, slot_no: u16) -> (u16, u16) {
        let base = Self::slot_offset(slot_no);
        (self.read_u16(base), self.read_u16(base + 2))
    }

    fn set_slot(&mut self, slot_no: u16, offset: u16, len: u16) {
        let base = Self::slot_offset(slot_no);
        self.write_u16(base, offset);
        self.write_u16(base + 2, len);
    }

    fn slot_in_use(&self, slot_no: u16) -> bool {
        slot_no < self.slot_cnt() && self.slot(slot_no).0 != FREE_SLOT
    }

    /// Lowest-numbered record on the page, `None` if the page is empty
    pub fn first_record(&self) -> Option<Rid> {
        (0..self.slot_cnt())
            .find(|&slot_no| self.slot_in_use(slot_no))
            .map(|slot_no| Rid::new(self.page_no(), slot_no))
    }

    /// Record following `cur` on this page, `None` when `cur` was the last
    pub fn next_record(&self, cur: Rid) -> Option<Rid> {
        (cur.slot_no.saturating_add(1)..self.slot_cnt())
            .find(|&slot_no| self.slot_in_use(slot_no))
            .map(|slot_no| Rid::new(self.page_no(), slot_no))
    }

    /// Get record bytes by record id
    pub fn record(&self, rid: Rid) -> HeapResult<&[u8]> {
        if rid.page_no != self.page_no() || !self.slot_in_use(rid.slot_no) {
            return Err(HeapError::InvalidSlot {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        let (offset, len) = self.slot(rid.slot_no);
        Ok(&self.buffer[offset as usize..offset as usize + len as usize])
    }

    /// Insert a record, reusing a freed slot entry when one exists.
    ///
    /// Fails with `NoSpace` when the record bytes (plus a new slot entry if
    /// none is free) do not fit.
    pub fn insert_record(&mut self, rec: &[u8]) -> HeapResult<Rid> {
        let free_space = self.free_space() as usize;
        let reusable = (0..self.slot_cnt()).find(|&slot_no| !self.slot_in_use(slot_no));

        let slot_no = match reusable {
            Some(slot_no) => {
                if rec.len() > free_space {
                    return Err(HeapError::NoSpace(self.page_no()));
                }
                slot_no
            }
            None => {
                if rec.len() + SLOT_SIZE > free_space {
                    return Err(HeapError::NoSpace(self.page_no()));
                }
                let slot_no = self.slot_cnt();
                self.write_u16(OFF_SLOT_CNT, slot_no + 1);
                self.write_u16(OFF_FREE_SPACE, (free_space - SLOT_SIZE) as u16);
                slot_no
            }
        };

        let offset = self.free_ptr();
        self.buffer[offset as usize..offset as usize + rec.len()].copy_from_slice(rec);
        self.set_slot(slot_no, offset, rec.len() as u16);
        self.write_u16(OFF_FREE_PTR, offset + rec.len() as u16);
        let free_space = self.free_space() as usize - rec.len();
        self.write_u16(OFF_FREE_SPACE, free_space as u16);

        Ok(Rid::new(self.page_no(), slot_no))
    }

    /// Delete a record. Its slot entry becomes reusable; the record bytes are
    /// not reclaimed until the page is reformatted.
    pub fn delete_record(&mut self, rid: Rid) -> HeapResult<()> {
        if rid.page_no != self.page_no() || !self.slot_in_use(rid.slot_no) {
            return Err(HeapError::InvalidSlot {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        self.set_slot(rid.slot_no, FREE_SLOT, 0);
        Ok(())
    }

    /// Number of live records on the page
    pub fn record_count(&self) -> usize {
        (0..self.slot_cnt())
            .filter(|&slot_no| self.slot_in_use(slot_no))
            .count()
    }
}
