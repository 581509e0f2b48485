use thiserror::Error;

use crate::buf::BufferError;
use crate::file::{FileError, PageId};

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("End of file reached")]
    FileEof,

    #[error("Record of {0} bytes can never fit on a page")]
    InvalidRecordLength(usize),

    #[error("Invalid scan parameters: {0}")]
    BadScanParam(String),

    #[error("No space left on page {0}")]
    NoSpace(PageId),

    #[error("Invalid slot: page {page_no}, slot {slot_no}")]
    InvalidSlot { page_no: PageId, slot_no: u16 },

    #[error("Scan has no current record")]
    NoCurrentRecord,

    #[error("File name too long: {0}")]
    NameTooLong(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type HeapResult<T> = Result<T, HeapError>;
