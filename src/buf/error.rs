use thiserror::Error;

use crate::file::{FileError, PageId};

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("All buffer frames are pinned")]
    BufferExceeded,

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Page {0} is still pinned")]
    PagePinned(PageId),

    #[error("Buffer state inconsistency in frame {0}")]
    BadBuffer(usize),

    #[error("Page {0} is not in the buffer pool")]
    PageNotFound(PageId),

    #[error("Frame directory error: {0}")]
    FrameTable(String),
}

pub type BufferResult<T> = Result<T, BufferError>;
