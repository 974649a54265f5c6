use std::io;

/// Every way a table read, write or decode can fail.
///
/// Narrower than the teacher's `failure::Error` on purpose: callers of a
/// search-engine table layer need to match `NotFound` against a missing
/// term without downcasting an opaque error.
#[derive(Debug, Fail)]
pub enum TableError {
    #[fail(display = "key not found")]
    NotFound,

    #[fail(display = "document index {} out of range, table has {} documents", index, len)]
    IndexError { index: u64, len: u64 },

    #[fail(display = "keys must increase: {:?} <= {:?}", last, new)]
    KeysOutOfOrder { last: Vec<u8>, new: Vec<u8> },

    #[fail(display = "bad file format: {}", _0)]
    FormatError(String),

    #[fail(display = "io error: {}", _0)]
    IoError(#[fail(cause)] io::Error),

    #[fail(display = "writer already finalized or poisoned")]
    PoisonedWriter,
}

impl From<io::Error> for TableError {
    fn from(e: io::Error) -> Self {
        TableError::IoError(e)
    }
}

pub type Result<T> = std::result::Result<T, TableError>;
