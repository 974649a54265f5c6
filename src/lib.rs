//! On-disk table layer for a full-text search engine: an immutable,
//! single-writer/many-reader CDB-derived hash table with an optional
//! sorted side index, typed key/value codecs layered on top of it, and the
//! term index, term vector, field length and stored field formats built
//! from those primitives.
//!
//! Every format here is write-once: a writer builds a complete file and
//! `close()`s it; a reader then opens that frozen file and never mutates
//! it. There is no in-place update, compaction, deletion or recovery from
//! a partial write; see the Non-goals noted in each module.

extern crate byteorder;
extern crate env_logger;
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
extern crate memmap2;

#[cfg(test)]
extern crate proptest;
#[cfg(test)]
extern crate tempfile;

pub mod coded;
pub mod error;
pub mod hash;
pub mod io;
pub mod length;
pub mod ordered;
pub mod stored;
pub mod term_index;
pub mod term_info;
pub mod term_vector;

pub use coded::{CodedHashReader, CodedHashWriter, CodedOrderedReader, CodedOrderedWriter, Coder, Decoder};
pub use error::{Result, TableError};
pub use hash::{cdb_hash, HashReader, HashWriter};
pub use io::{LoadOption, TableData};
pub use length::{byte_to_length, length_to_byte, LengthReader, LengthWriter};
pub use ordered::{OrderedHashReader, OrderedHashWriter};
pub use stored::{StoredFieldReader, StoredFieldWriter, StoredValue};
pub use term_index::{FieldMap, TermIndexReader, TermIndexWriter, UNKNOWN_FIELD};
pub use term_info::{Postings, TermInfo};
pub use term_vector::{TermVectorReader, TermVectorWriter};
