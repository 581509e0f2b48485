pub mod buf;
pub mod file;
pub mod heap;

pub use buf::{BufferError, BufferManager, BufferResult, FrameId};
pub use file::{FileError, FileHandle, FileResult, PAGE_SIZE, PagedFileManager, PageId};
pub use heap::{
    AttrType, CompOp, DataPage, HeapError, HeapFile, HeapFileScan, HeapResult, InsertFileScan,
    MAX_RECORD_LEN, Rid, ScanFilter,
};
