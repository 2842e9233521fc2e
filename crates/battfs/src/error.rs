use thiserror::Error;

use crate::file::FileHandle;
use crate::{Inode, PageId};

#[derive(Error, Debug)]
pub enum BattFsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read on page {page}: expected {expected} bytes, got {got}")]
    ShortRead {
        page: PageId,
        expected: usize,
        got: usize,
    },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("out of space: no free pages available")]
    OutOfSpace,

    #[error("file {0} not found")]
    NotFound(Inode),

    #[error("unknown file handle {0}")]
    BadHandle(FileHandle),

    #[error("file not opened for reading")]
    NotReadable,

    #[error("file not opened for writing")]
    NotWritable,

    #[error("seek to negative offset {0}")]
    InvalidSeek(i64),

    #[error("corrupt allocation index: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, BattFsError>;
