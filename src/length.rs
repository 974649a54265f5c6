//! Per-document, per-field length table: how many tokens document N has in
//! field F, stored as a single lossily-encoded byte so the whole table for
//! a large corpus stays small enough to keep resident. Grounded on
//! `LengthWriter`/`LengthReader` in `whoosh/filedb/filetables.py`, which
//! hold one dense `array('B')` per field indexed by document number.
//!
//! File layout: `<u16 field_count>` followed by `field_count` entries of
//! `<u16 name_len><name bytes><u32 doc_count><doc_count bytes>`. There is
//! no standalone document-count field; a reader recovers it from the
//! first field's array length.

use std::collections::HashMap;
use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::io::{get_array, get_string, get_u16, TableData, TableWriter};

/// Clamps a field length into a single byte. Lossy above 255 tokens by
/// design (this is a scoring heuristic, not an exact count); values below
/// 256 round-trip exactly.
pub fn length_to_byte(length: u32) -> u8 {
    if length > 255 {
        255
    } else {
        length as u8
    }
}

pub fn byte_to_length(b: u8) -> u32 {
    b as u32
}

/// Builds the length table for a fixed, known-in-advance document count.
/// Each field's byte array is allocated the first time a length is
/// recorded for it.
pub struct LengthWriter<W: Write + Seek> {
    file: TableWriter<W>,
    doc_count: u32,
    fields: HashMap<String, Vec<u8>>,
    order: Vec<String>,
}

impl<W: Write + Seek> LengthWriter<W> {
    pub fn new(file: W, doc_count: u32) -> Result<Self> {
        Ok(LengthWriter {
            file: TableWriter::new(file),
            doc_count,
            fields: HashMap::new(),
            order: Vec::new(),
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn add(&mut self, docnum: u32, fieldname: &str, length: u32) -> Result<()> {
        if docnum >= self.doc_count {
            return Err(TableError::IndexError {
                index: docnum as u64,
                len: self.doc_count as u64,
            });
        }
        if !self.fields.contains_key(fieldname) {
            self.fields.insert(fieldname.to_string(), vec![0u8; self.doc_count as usize]);
            self.order.push(fieldname.to_string());
        }
        let arr = self.fields.get_mut(fieldname).expect("just inserted");
        arr[docnum as usize] = length_to_byte(length);
        Ok(())
    }

    pub fn close(mut self) -> Result<W> {
        self.file.write_u16(self.order.len() as u16)?;
        for name in &self.order {
            self.file.write_string(name)?;
            self.file.write_array(&self.fields[name])?;
        }
        self.file.flush()?;
        Ok(self.file.into_inner())
    }

    /// Hands the in-memory length table straight to a reader without a
    /// round trip through disk, for callers (indexing in progress) that
    /// want to query lengths before `close()`.
    pub fn into_reader(self) -> LengthReader {
        LengthReader {
            doc_count: self.doc_count,
            fields: self.fields,
        }
    }
}

/// Read-only view over a length table, either parsed from a frozen file or
/// handed over directly from a `LengthWriter`.
pub struct LengthReader {
    doc_count: u32,
    fields: HashMap<String, Vec<u8>>,
}

impl LengthReader {
    pub fn open(data: TableData) -> Result<Self> {
        let bytes = data.as_ref();
        let field_count = get_u16(bytes, 0)? as usize;
        let mut pos = 2u64;

        let mut fields = HashMap::with_capacity(field_count);
        let mut doc_count = None;
        for _ in 0..field_count {
            let (name, next) = get_string(bytes, pos)?;
            pos = next;
            let (arr, next) = get_array(bytes, pos)?;
            pos = next;
            if doc_count.is_none() {
                doc_count = Some(arr.len() as u32);
            }
            fields.insert(name, arr);
        }
        // The file layout has no standalone doc_count field (only each
        // field's array-length prefix); the first field's length stands in
        // for it, same as every field's array is sized to doc_count.
        Ok(LengthReader {
            doc_count: doc_count.unwrap_or(0),
            fields,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Length of `fieldname` in `docnum`, or 0 if that field was never
    /// populated for any document (matching the original's default array
    /// fill value).
    pub fn length(&self, docnum: u32, fieldname: &str) -> Result<u32> {
        if docnum >= self.doc_count {
            return Err(TableError::IndexError {
                index: docnum as u64,
                len: self.doc_count as u64,
            });
        }
        match self.fields.get(fieldname) {
            Some(arr) => Ok(byte_to_length(arr[docnum as usize])),
            None => Ok(0),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_disk() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = LengthWriter::new(&mut cursor, 3).unwrap();
            w.add(0, "body", 100).unwrap();
            w.add(1, "body", 250).unwrap();
            w.add(2, "title", 4).unwrap();
            w.close().unwrap();
        }
        let reader = LengthReader::open(TableData::from(cursor.into_inner())).unwrap();
        assert_eq!(reader.length(0, "body").unwrap(), 100);
        assert_eq!(reader.length(1, "body").unwrap(), 250);
        assert_eq!(reader.length(2, "title").unwrap(), 4);
        assert_eq!(reader.length(0, "title").unwrap(), 0);
        assert_eq!(reader.length(2, "body").unwrap(), 0);
    }

    #[test]
    fn on_disk_layout_has_no_leading_doc_count_field() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = LengthWriter::new(&mut cursor, 2).unwrap();
            w.add(0, "body", 5).unwrap();
            w.add(1, "body", 9).unwrap();
            w.close().unwrap();
        }
        let bytes = cursor.into_inner();
        // <u16 field_count=1><u16 name_len=4>"body"<u32 doc_count=2><5,9>
        assert_eq!(get_u16(&bytes, 0).unwrap(), 1);
        let (name, pos) = get_string(&bytes, 2).unwrap();
        assert_eq!(name, "body");
        let (arr, _) = get_array(&bytes, pos).unwrap();
        assert_eq!(arr, vec![5u8, 9u8]);
    }

    #[test]
    fn into_reader_skips_disk() {
        let cursor = Cursor::new(Vec::new());
        let mut w = LengthWriter::new(cursor, 2).unwrap();
        w.add(0, "body", 12).unwrap();
        let reader = w.into_reader();
        assert_eq!(reader.length(0, "body").unwrap(), 12);
        assert_eq!(reader.length(1, "body").unwrap(), 0);
    }

    #[test]
    fn clamps_lengths_above_255() {
        assert_eq!(length_to_byte(300), 255);
        assert_eq!(byte_to_length(255), 255);
        assert_eq!(length_to_byte(10), 10);
    }

    #[test]
    fn rejects_out_of_range_docnum() {
        let cursor = Cursor::new(Vec::new());
        let mut w = LengthWriter::new(cursor, 2).unwrap();
        assert!(matches!(w.add(5, "body", 1), Err(TableError::IndexError { .. })));
    }
}
