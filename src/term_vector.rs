//! Per-document term vectors: `(doc_number, field_number) -> postings
//! offset`, sorted the same way the term index is, and sharing its
//! `FieldMap`. Grounded on `TermVectorWriter`/`TermVectorReader` in
//! `whoosh/filedb/filetables.py`. Unlike `TermIndexReader`, the original's
//! `TermVectorReader.keycoder` looks the field number up with a plain dict
//! index rather than a sentinel default, so an unknown field name is a
//! lookup failure here, not a silently-unmatchable key; that's reproduced
//! by making `key_for` fallible and letting `contains` swallow the error.

use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::io::get_i64;
use crate::ordered::{OrderedHashReader, OrderedHashWriter};
use crate::term_index::FieldMap;

const KEY_SIZE: usize = 4 + 2; // docnum(u32) + field number(u16)

fn encode_key(docnum: u32, field_number: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_SIZE);
    out.extend_from_slice(&docnum.to_be_bytes());
    out.extend_from_slice(&field_number.to_be_bytes());
    out
}

fn decode_key(field_map: &FieldMap, bytes: &[u8]) -> Result<(u32, String)> {
    if bytes.len() != KEY_SIZE {
        return Err(TableError::FormatError(format!(
            "term vector key is {} bytes, expected {}",
            bytes.len(),
            KEY_SIZE
        )));
    }
    let docnum = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let number = u16::from_be_bytes([bytes[4], bytes[5]]);
    let name = field_map.name_of(number)?.to_string();
    Ok((docnum, name))
}

pub struct TermVectorWriter<W: Write + Seek> {
    ordered: OrderedHashWriter<W>,
    field_map: FieldMap,
}

impl<W: Write + Seek> TermVectorWriter<W> {
    pub fn new(file: W) -> Result<Self> {
        Ok(TermVectorWriter {
            ordered: OrderedHashWriter::new(file)?,
            field_map: FieldMap::new(),
        })
    }

    /// `(docnum, fieldname)` pairs must be added in increasing order, same
    /// requirement as the underlying `OrderedHashWriter`.
    pub fn add(&mut self, docnum: u32, fieldname: &str, postings_offset: i64) -> Result<()> {
        let fnum = self.field_map.intern(fieldname);
        let key = encode_key(docnum, fnum);
        self.ordered.add(&key, &postings_offset.to_be_bytes())
    }

    pub fn close(self) -> Result<W> {
        let TermVectorWriter { mut ordered, field_map } = self;
        let (directory, end_of_hashes) = ordered.finalize_hash_zone_and_index()?;
        field_map.write(ordered.writer_mut())?;
        ordered.finish(&directory, end_of_hashes)
    }
}

pub struct TermVectorReader {
    ordered: OrderedHashReader,
    field_map: FieldMap,
}

impl TermVectorReader {
    pub fn open(data: crate::io::TableData) -> Result<Self> {
        let ordered = OrderedHashReader::open(data)?;
        let field_map = FieldMap::read(ordered.hr_data(), ordered.index_end())?;
        Ok(TermVectorReader { ordered, field_map })
    }

    fn key_for(&self, docnum: u32, fieldname: &str) -> Result<Vec<u8>> {
        let fnum = self.field_map.number_of(fieldname).ok_or(TableError::NotFound)?;
        Ok(encode_key(docnum, fnum))
    }

    pub fn get(&self, docnum: u32, fieldname: &str) -> Result<i64> {
        let key = self.key_for(docnum, fieldname)?;
        let bytes = self.ordered.get(&key)?;
        Ok(get_i64(&bytes, 0)?)
    }

    pub fn contains(&self, docnum: u32, fieldname: &str) -> Result<bool> {
        match self.key_for(docnum, fieldname) {
            Ok(key) => self.ordered.contains(&key),
            Err(_) => Ok(false),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = Result<((u32, String), i64)>> + '_ {
        self.ordered.items().map(move |r| {
            r.and_then(|(k, v)| {
                let key = decode_key(&self.field_map, &k)?;
                let offset = get_i64(&v, 0)?;
                Ok((key, offset))
            })
        })
    }

    pub fn items_from(&self, docnum: u32, fieldname: &str) -> Result<impl Iterator<Item = Result<((u32, String), i64)>> + '_> {
        let key = self.key_for(docnum, fieldname)?;
        Ok(self.ordered.items_from(&key)?.map(move |r| {
            r.and_then(|(k, v)| {
                let key = decode_key(&self.field_map, &k)?;
                let offset = get_i64(&v, 0)?;
                Ok((key, offset))
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::TableData;
    use std::io::Cursor;

    fn build() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = TermVectorWriter::new(&mut cursor).unwrap();
            w.add(0, "body", 100).unwrap();
            w.add(0, "title", 200).unwrap();
            w.add(1, "body", 300).unwrap();
            w.close().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn looks_up_by_doc_and_field() {
        let reader = TermVectorReader::open(TableData::from(build())).unwrap();
        assert_eq!(reader.get(0, "body").unwrap(), 100);
        assert_eq!(reader.get(1, "body").unwrap(), 300);
        assert!(matches!(reader.get(1, "title"), Err(TableError::NotFound)));
    }

    #[test]
    fn unknown_field_contains_is_false_not_error() {
        let reader = TermVectorReader::open(TableData::from(build())).unwrap();
        assert!(!reader.contains(0, "nonexistent").unwrap());
    }

    #[test]
    fn full_iteration_decodes_keys() {
        let reader = TermVectorReader::open(TableData::from(build())).unwrap();
        let items: Vec<((u32, String), i64)> = reader.items().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].0, (0, "body".to_string()));
    }
}
