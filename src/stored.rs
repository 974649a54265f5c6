//! Per-document stored field blobs: a fixed, schema-known list of named
//! fields plus an open-ended set of dynamically named `(name, value)`
//! pairs, appended one document at a time and indexed by a directory
//! written at `close()`. Grounded on `StoredFieldWriter`/`StoredFieldReader`
//! in `whoosh/filedb/filetables.py`, whose per-document record is a pickled
//! `(fixed_list, dynamic_dict)` tuple keyed against a `names` list pickled
//! once for the whole file; this crate replaces the pickle with the tagged
//! `StoredValue` encoding below and writes that `names` list as an explicit
//! `FieldMap`-shaped block (same `<u16 count><name>...` block `term_index`
//! uses) spliced between the doc blobs and the directory, the same
//! staged-write shape `TermIndexWriter::close()` uses to splice its field
//! map in between the sorted index and the header rewrite.
//!
//! File layout: `<i64 name_map_offset><u32 doc_count><doc blobs>...
//! <name_map><directory>`, where `name_map` is `<u16 name_count><name>...`
//! and `directory` is `<u32 count>` followed by `count` `<i64 offset><u32
//! length>` entries, one per document in document-number order. A caller
//! only ever sees the merged `{name: value}` view: `append` takes an
//! arbitrary field-name-to-value mapping and projects it against the
//! writer's fixed `names` list (any name not in that list becomes a
//! dynamic pair), and `get` zips the parsed `names` list back against the
//! decoded positional values and layers the dynamic pairs on top.

use std::collections::HashMap;
use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::io::{get_byte, get_i64, get_string, get_u16, get_u32, slice_at, TableData, TableWriter};

#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    None,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

fn encode_value(out: &mut Vec<u8>, v: &StoredValue) {
    match v {
        StoredValue::None => out.push(0),
        StoredValue::Bool(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        StoredValue::U64(n) => {
            out.push(2);
            out.extend_from_slice(&n.to_be_bytes());
        }
        StoredValue::I64(n) => {
            out.push(3);
            out.extend_from_slice(&n.to_be_bytes());
        }
        StoredValue::F64(f) => {
            out.push(4);
            out.extend_from_slice(&f.to_be_bytes());
        }
        StoredValue::Str(s) => {
            out.push(5);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        StoredValue::Bytes(b) => {
            out.push(6);
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
        }
    }
}

fn decode_value(bytes: &[u8], pos: u64) -> Result<(StoredValue, u64)> {
    let tag = get_byte(bytes, pos)?;
    let pos = pos + 1;
    let (value, pos) = match tag {
        0 => (StoredValue::None, pos),
        1 => (StoredValue::Bool(get_byte(bytes, pos)? != 0), pos + 1),
        2 => (StoredValue::U64(crate::io::get_u64(bytes, pos)?), pos + 8),
        3 => (StoredValue::I64(get_i64(bytes, pos)?), pos + 8),
        4 => {
            let raw: [u8; 8] = slice_at(bytes, pos, 8)?.try_into().unwrap();
            (StoredValue::F64(f64::from_be_bytes(raw)), pos + 8)
        }
        5 => {
            let len = get_u32(bytes, pos)? as usize;
            let s = std::str::from_utf8(slice_at(bytes, pos + 4, len)?)
                .map_err(|_| TableError::FormatError("stored string value is not valid utf-8".to_string()))?
                .to_string();
            (StoredValue::Str(s), pos + 4 + len as u64)
        }
        6 => {
            let len = get_u32(bytes, pos)? as usize;
            let b = slice_at(bytes, pos + 4, len)?.to_vec();
            (StoredValue::Bytes(b), pos + 4 + len as u64)
        }
        other => return Err(TableError::FormatError(format!("unknown stored value tag {}", other))),
    };
    Ok((value, pos))
}

fn encode_doc(fixed: &[StoredValue], dynamic: &[(String, StoredValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(fixed.len() as u16).to_be_bytes());
    for v in fixed {
        encode_value(&mut out, v);
    }
    out.extend_from_slice(&(dynamic.len() as u16).to_be_bytes());
    for (name, v) in dynamic {
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        encode_value(&mut out, v);
    }
    out
}

fn decode_doc(bytes: &[u8]) -> Result<(Vec<StoredValue>, Vec<(String, StoredValue)>)> {
    let fixed_count = get_u16(bytes, 0)? as usize;
    let mut pos = 2u64;
    let mut fixed = Vec::with_capacity(fixed_count);
    for _ in 0..fixed_count {
        let (v, next) = decode_value(bytes, pos)?;
        pos = next;
        fixed.push(v);
    }
    let dynamic_count = get_u16(bytes, pos)? as usize;
    pos += 2;
    let mut dynamic = Vec::with_capacity(dynamic_count);
    for _ in 0..dynamic_count {
        let (name, next) = get_string(bytes, pos)?;
        pos = next;
        let (v, next) = decode_value(bytes, pos)?;
        pos = next;
        dynamic.push((name, v));
    }
    Ok((fixed, dynamic))
}

/// `<u16 count><name>...`, the same shape as `term_index::FieldMap`'s wire
/// block but positional rather than a name<->number bijection: a stored
/// field's position in this list is its index into a document's fixed
/// value list.
fn write_name_list<W: Write + Seek>(w: &mut TableWriter<W>, names: &[String]) -> Result<()> {
    w.write_u16(names.len() as u16)?;
    for name in names {
        w.write_string(name)?;
    }
    Ok(())
}

fn read_name_list(data: &[u8], pos: u64) -> Result<(Vec<String>, u64)> {
    let count = get_u16(data, pos)? as usize;
    let mut pos = pos + 2;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let (name, next) = get_string(data, pos)?;
        pos = next;
        names.push(name);
    }
    Ok((names, pos))
}

/// Appends one document blob at a time; the directory mapping document
/// number to `(offset, length)` and the field-name list are only known (or
/// only need to be durable) once every document has been written, so both
/// are buffered and flushed at `close()`, the same staged-write shape
/// `HashWriter::close()` uses for its bucket directory.
pub struct StoredFieldWriter<W: Write + Seek> {
    file: TableWriter<W>,
    names: Vec<String>,
    directory: Vec<(u64, u32)>,
}

impl<W: Write + Seek> StoredFieldWriter<W> {
    /// `names` is the fixed, positional field schema every document is
    /// projected against; any key passed to `append` that isn't in `names`
    /// is carried as a dynamic `(name, value)` pair instead.
    pub fn new(file: W, names: Vec<String>) -> Result<Self> {
        let mut file = TableWriter::new(file);
        file.seek(0)?;
        // Reserved header: <i64 name_map_offset><u32 doc_count>, rewritten
        // in place once the name map's real position is known.
        file.write_bytes(&[0u8; 12])?;
        Ok(StoredFieldWriter {
            file,
            names,
            directory: Vec::new(),
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.directory.len() as u32
    }

    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    /// Appends one document, projecting an arbitrary `{name: value}`
    /// mapping against the writer's fixed field list: a name in that list
    /// becomes a positional fixed value (absent names encode as `None`),
    /// everything else becomes a dynamic pair. Returns the document's
    /// assigned, monotonically increasing document number.
    pub fn append(&mut self, values: &HashMap<String, StoredValue>) -> Result<u32> {
        let mut remaining = values.clone();
        let fixed: Vec<StoredValue> = self
            .names
            .iter()
            .map(|name| remaining.remove(name).unwrap_or(StoredValue::None))
            .collect();
        let mut dynamic: Vec<(String, StoredValue)> = remaining.into_iter().collect();
        dynamic.sort_by(|a, b| a.0.cmp(&b.0));

        let pos = self.file.tell()?;
        let blob = encode_doc(&fixed, &dynamic);
        self.file.write_bytes(&blob)?;
        let docnum = self.directory.len() as u32;
        self.directory.push((pos, blob.len() as u32));
        Ok(docnum)
    }

    pub fn close(mut self) -> Result<W> {
        let namemap_pos = self.file.tell()?;
        write_name_list(&mut self.file, &self.names)?;

        self.file.write_u32(self.directory.len() as u32)?;
        for &(off, len) in &self.directory {
            self.file.write_i64(off as i64)?;
            self.file.write_u32(len)?;
        }

        self.file.seek(0)?;
        self.file.write_i64(namemap_pos as i64)?;
        self.file.write_u32(self.directory.len() as u32)?;
        self.file.flush()?;
        Ok(self.file.into_inner())
    }
}

/// Immutable reader: the field name list and directory are small enough to
/// parse fully in `open()`, unlike the doc blobs which stay mmap-resident.
pub struct StoredFieldReader {
    data: TableData,
    names: Vec<String>,
    directory: Vec<(u64, u32)>,
}

impl StoredFieldReader {
    pub fn open(data: TableData) -> Result<Self> {
        let bytes = data.as_ref();
        let namemap_pos = get_i64(bytes, 0)? as u64;
        let doc_count = get_u32(bytes, 8)? as usize;

        let (names, pos) = read_name_list(bytes, namemap_pos)?;

        let stored_count = get_u32(bytes, pos)? as usize;
        if stored_count != doc_count {
            return Err(TableError::FormatError(format!(
                "stored-field directory count {} disagrees with header doc count {}",
                stored_count, doc_count
            )));
        }
        let mut pos = pos + 4;

        let mut directory = Vec::with_capacity(stored_count);
        for _ in 0..stored_count {
            let off = get_i64(bytes, pos)? as u64;
            pos += 8;
            let len = get_u32(bytes, pos)?;
            pos += 4;
            directory.push((off, len));
        }

        Ok(StoredFieldReader { data, names, directory })
    }

    pub fn doc_count(&self) -> u32 {
        self.directory.len() as u32
    }

    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    /// The stored fields of `docnum` merged into one `{name: value}` view:
    /// the fixed positional values zipped against the field name list,
    /// with the dynamic pairs layered on top.
    pub fn get(&self, docnum: u32) -> Result<HashMap<String, StoredValue>> {
        let &(off, len) = self.directory.get(docnum as usize).ok_or(TableError::IndexError {
            index: docnum as u64,
            len: self.directory.len() as u64,
        })?;
        let blob = slice_at(self.data.as_ref(), off, len as usize)?;
        let (fixed, dynamic) = decode_doc(blob)?;

        let mut merged = HashMap::with_capacity(fixed.len() + dynamic.len());
        for (name, value) in self.names.iter().zip(fixed.into_iter()) {
            merged.insert(name.clone(), value);
        }
        for (name, value) in dynamic {
            merged.insert(name, value);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn map(pairs: &[(&str, StoredValue)]) -> HashMap<String, StoredValue> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn round_trips_fixed_and_dynamic_fields() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = StoredFieldWriter::new(&mut cursor, names(&["title", "year"])).unwrap();
            let doc0 = w
                .append(&map(&[
                    ("title", StoredValue::Str("title one".to_string())),
                    ("year", StoredValue::U64(2026)),
                    ("tag", StoredValue::Str("rust".to_string())),
                ]))
                .unwrap();
            assert_eq!(doc0, 0);
            w.append(&map(&[
                ("title", StoredValue::Str("title two".to_string())),
                ("year", StoredValue::U64(2025)),
            ]))
            .unwrap();
            w.close().unwrap();
        }

        let reader = StoredFieldReader::open(TableData::from(cursor.into_inner())).unwrap();
        assert_eq!(reader.doc_count(), 2);

        let doc0 = reader.get(0).unwrap();
        assert_eq!(doc0.get("title"), Some(&StoredValue::Str("title one".to_string())));
        assert_eq!(doc0.get("year"), Some(&StoredValue::U64(2026)));
        assert_eq!(doc0.get("tag"), Some(&StoredValue::Str("rust".to_string())));

        let doc1 = reader.get(1).unwrap();
        assert_eq!(doc1.get("year"), Some(&StoredValue::U64(2025)));
        assert_eq!(doc1.get("tag"), None);
    }

    /// Seed scenario: `StoredFieldWriter(names=["a","b"])`, then
    /// `append({"a":1,"b":2})` must come back out as `{"a":1,"b":2}`
    /// without the caller pre-splitting fixed vs. dynamic fields itself.
    #[test]
    fn append_projects_arbitrary_map_against_fixed_names() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = StoredFieldWriter::new(&mut cursor, names(&["a", "b"])).unwrap();
            w.append(&map(&[("a", StoredValue::U64(1)), ("b", StoredValue::U64(2))]))
                .unwrap();
            w.close().unwrap();
        }
        let reader = StoredFieldReader::open(TableData::from(cursor.into_inner())).unwrap();
        let doc0 = reader.get(0).unwrap();
        assert_eq!(doc0.len(), 2);
        assert_eq!(doc0.get("a"), Some(&StoredValue::U64(1)));
        assert_eq!(doc0.get("b"), Some(&StoredValue::U64(2)));
    }

    #[test]
    fn missing_fixed_field_defaults_to_none() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = StoredFieldWriter::new(&mut cursor, names(&["a", "b"])).unwrap();
            w.append(&map(&[("a", StoredValue::U64(1))])).unwrap();
            w.close().unwrap();
        }
        let reader = StoredFieldReader::open(TableData::from(cursor.into_inner())).unwrap();
        let doc0 = reader.get(0).unwrap();
        assert_eq!(doc0.get("a"), Some(&StoredValue::U64(1)));
        assert_eq!(doc0.get("b"), Some(&StoredValue::None));
    }

    #[test]
    fn out_of_range_doc_is_index_error() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let w = StoredFieldWriter::new(&mut cursor, Vec::new()).unwrap();
            w.close().unwrap();
        }
        let reader = StoredFieldReader::open(TableData::from(cursor.into_inner())).unwrap();
        assert!(matches!(reader.get(0), Err(TableError::IndexError { .. })));
    }

    #[test]
    fn all_value_kinds_round_trip() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = StoredFieldWriter::new(&mut cursor, names(&["a", "b", "c", "d", "e"])).unwrap();
            w.append(&map(&[
                ("a", StoredValue::None),
                ("b", StoredValue::Bool(true)),
                ("c", StoredValue::I64(-7)),
                ("d", StoredValue::F64(1.5)),
                ("e", StoredValue::Bytes(vec![1, 2, 3])),
            ]))
            .unwrap();
            w.close().unwrap();
        }
        let reader = StoredFieldReader::open(TableData::from(cursor.into_inner())).unwrap();
        let doc0 = reader.get(0).unwrap();
        assert_eq!(doc0.get("a"), Some(&StoredValue::None));
        assert_eq!(doc0.get("b"), Some(&StoredValue::Bool(true)));
        assert_eq!(doc0.get("c"), Some(&StoredValue::I64(-7)));
        assert_eq!(doc0.get("d"), Some(&StoredValue::F64(1.5)));
        assert_eq!(doc0.get("e"), Some(&StoredValue::Bytes(vec![1, 2, 3])));
    }
}
