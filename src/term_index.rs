//! Sorted (field, term) -> `TermInfo` table, the term dictionary proper.
//! Keys are encoded `<u16 field number><UTF-8 term bytes>` so lexicographic
//! byte order on the key groups all terms of a field together and sorts
//! them inside the group, letting `OrderedHashReader`'s binary search serve
//! prefix/range queries. Grounded on `TermIndexWriter`/`TermIndexReader` in
//! `whoosh/filedb/filetables.py`; the field-name <-> number map the
//! original pickles alongside the table is written here as a small
//! explicit `<count><name><number>` block instead.

use std::collections::HashMap;
use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::io::{get_string, get_u16, TableData, TableWriter};
use crate::ordered::{OrderedHashReader, OrderedHashWriter};
use crate::term_info::TermInfo;

/// First-seen-order bijection between field names and the `u16` numbers
/// used inside term keys, so term keys stay 2 bytes shorter than the field
/// name they represent.
pub struct FieldMap {
    by_name: HashMap<String, u16>,
    by_number: Vec<String>,
}

/// Sentinel field number a reader substitutes for a name it has never
/// seen; it cannot collide with a real assignment since assignments are
/// dense from 0, and it simply never matches any stored key.
pub const UNKNOWN_FIELD: u16 = 0xFFFF;

impl FieldMap {
    pub fn new() -> Self {
        FieldMap {
            by_name: HashMap::new(),
            by_number: Vec::new(),
        }
    }

    pub fn intern(&mut self, name: &str) -> u16 {
        if let Some(&n) = self.by_name.get(name) {
            return n;
        }
        let n = self.by_number.len() as u16;
        self.by_name.insert(name.to_string(), n);
        self.by_number.push(name.to_string());
        n
    }

    pub fn number_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn number_or_unknown(&self, name: &str) -> u16 {
        self.number_of(name).unwrap_or(UNKNOWN_FIELD)
    }

    pub fn name_of(&self, number: u16) -> Result<&str> {
        self.by_number
            .get(number as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| TableError::FormatError(format!("no field registered with number {}", number)))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.by_number.iter().map(|s| s.as_str())
    }

    pub(crate) fn write<W: Write + Seek>(&self, w: &mut TableWriter<W>) -> Result<()> {
        w.write_u16(self.by_number.len() as u16)?;
        for (number, name) in self.by_number.iter().enumerate() {
            w.write_string(name)?;
            w.write_u16(number as u16)?;
        }
        Ok(())
    }

    pub(crate) fn read(data: &[u8], pos: u64) -> Result<Self> {
        let count = get_u16(data, pos)? as usize;
        let mut pos = pos + 2;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let (name, next) = get_string(data, pos)?;
            pos = next;
            let number = get_u16(data, pos)?;
            pos += 2;
            pairs.push((number, name));
        }
        let size = pairs.iter().map(|(n, _)| *n as usize + 1).max().unwrap_or(0);
        let mut by_number = vec![String::new(); size];
        let mut by_name = HashMap::with_capacity(pairs.len());
        for (number, name) in pairs {
            by_name.insert(name.clone(), number);
            by_number[number as usize] = name;
        }
        Ok(FieldMap { by_name, by_number })
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_term_key(field_number: u16, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + text.len());
    out.extend_from_slice(&field_number.to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

fn decode_term_key(field_map: &FieldMap, bytes: &[u8]) -> Result<(String, String)> {
    if bytes.len() < 2 {
        return Err(TableError::FormatError("term key shorter than the 2-byte field number prefix".to_string()));
    }
    let number = u16::from_be_bytes([bytes[0], bytes[1]]);
    let name = field_map.name_of(number)?.to_string();
    let text = std::str::from_utf8(&bytes[2..])
        .map_err(|_| TableError::FormatError("term text is not valid utf-8".to_string()))?
        .to_string();
    Ok((name, text))
}

/// Writer: bypasses `CodedOrderedWriter` since closing must splice the
/// field-name map in between the sorted index and the header rewrite,
/// a step the generic wrapper has no hook for.
pub struct TermIndexWriter<W: Write + Seek> {
    ordered: OrderedHashWriter<W>,
    field_map: FieldMap,
}

impl<W: Write + Seek> TermIndexWriter<W> {
    pub fn new(file: W) -> Result<Self> {
        Ok(TermIndexWriter {
            ordered: OrderedHashWriter::new(file)?,
            field_map: FieldMap::new(),
        })
    }

    /// Keys must be added in increasing `(fieldname, text)` order, same as
    /// the underlying `OrderedHashWriter`; field numbers are assigned in
    /// first-seen order as a side effect.
    pub fn add(&mut self, fieldname: &str, text: &str, info: &TermInfo) -> Result<()> {
        let fnum = self.field_map.intern(fieldname);
        let key = encode_term_key(fnum, text);
        let value = info.to_bytes();
        self.ordered.add(&key, &value)
    }

    pub fn close(self) -> Result<W> {
        let TermIndexWriter { mut ordered, field_map } = self;
        let (directory, end_of_hashes) = ordered.finalize_hash_zone_and_index()?;
        field_map.write(ordered.writer_mut())?;
        ordered.finish(&directory, end_of_hashes)
    }
}

/// Reader: the field map is parsed once in `open()`, so this can freely
/// wrap the already-simple `OrderedHashReader`.
pub struct TermIndexReader {
    ordered: OrderedHashReader,
    field_map: FieldMap,
}

impl TermIndexReader {
    pub fn open(data: TableData) -> Result<Self> {
        let ordered = OrderedHashReader::open(data)?;
        let field_map = FieldMap::read(ordered.hr_data(), ordered.index_end())?;
        Ok(TermIndexReader { ordered, field_map })
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    /// Unknown field names encode to the sentinel number rather than
    /// failing, since they can never match a stored key; lookups against
    /// them simply come back not-found.
    fn key_for(&self, fieldname: &str, text: &str) -> Vec<u8> {
        encode_term_key(self.field_map.number_or_unknown(fieldname), text)
    }

    pub fn get(&self, fieldname: &str, text: &str) -> Result<TermInfo> {
        let bytes = self.ordered.get(&self.key_for(fieldname, text))?;
        TermInfo::from_bytes(&bytes)
    }

    pub fn contains(&self, fieldname: &str, text: &str) -> Result<bool> {
        self.ordered.contains(&self.key_for(fieldname, text))
    }

    pub fn items(&self) -> impl Iterator<Item = Result<((String, String), TermInfo)>> + '_ {
        self.ordered.items().map(move |r| {
            r.and_then(|(k, v)| {
                let key = decode_term_key(&self.field_map, &k)?;
                let info = TermInfo::from_bytes(&v)?;
                Ok((key, info))
            })
        })
    }

    pub fn items_from(
        &self,
        fieldname: &str,
        text: &str,
    ) -> Result<impl Iterator<Item = Result<((String, String), TermInfo)>> + '_> {
        let key = self.key_for(fieldname, text);
        Ok(self.ordered.items_from(&key)?.map(move |r| {
            r.and_then(|(k, v)| {
                let key = decode_term_key(&self.field_map, &k)?;
                let info = TermInfo::from_bytes(&v)?;
                Ok((key, info))
            })
        }))
    }

    /// Every term from `fromkey` onward (or the whole table, if `fromkey`
    /// is `None`), paired with its `(frequency, doc_frequency)` without
    /// decoding postings. Grounded on `TermIndexReader.terms_and_freqs`.
    pub fn terms_and_freqs<'r>(
        &'r self,
        fromkey: Option<(&str, &str)>,
    ) -> Result<Box<dyn Iterator<Item = Result<((String, String), (f32, u32))>> + 'r>> {
        let data = self.ordered.hr_data();
        let ranges: Box<dyn Iterator<Item = Result<(u64, u64, u64, u64)>> + 'r> = match fromkey {
            Some((fieldname, text)) => {
                let key = self.key_for(fieldname, text);
                Box::new(self.ordered.ranges_from_key(&key)?)
            }
            None => Box::new(self.ordered.ranges()),
        };
        Ok(Box::new(ranges.map(move |r| {
            r.and_then(|(kp, kl, dp, _dl)| {
                let kbytes = crate::io::slice_at(data, kp, kl as usize)?;
                let key = decode_term_key(&self.field_map, kbytes)?;
                let freq = TermInfo::read_frequency(data, dp)?;
                let df = TermInfo::read_doc_freq(data, dp)?;
                Ok((key, (freq, df)))
            })
        })))
    }

    pub fn frequency(&self, fieldname: &str, text: &str) -> Result<f32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        TermInfo::read_frequency(self.ordered.hr_data(), datapos)
    }

    pub fn doc_frequency(&self, fieldname: &str, text: &str) -> Result<u32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        TermInfo::read_doc_freq(self.ordered.hr_data(), datapos)
    }

    pub fn min_length(&self, fieldname: &str, text: &str) -> Result<u32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        Ok(TermInfo::read_min_and_max_length(self.ordered.hr_data(), datapos)?.0)
    }

    pub fn max_length(&self, fieldname: &str, text: &str) -> Result<u32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        Ok(TermInfo::read_min_and_max_length(self.ordered.hr_data(), datapos)?.1)
    }

    pub fn max_weight(&self, fieldname: &str, text: &str) -> Result<f32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        TermInfo::read_max_weight(self.ordered.hr_data(), datapos)
    }

    pub fn max_wol(&self, fieldname: &str, text: &str) -> Result<f32> {
        let (datapos, _) = self.ordered.range_for_key(&self.key_for(fieldname, text))?;
        TermInfo::read_max_wol(self.ordered.hr_data(), datapos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term_info::Postings;
    use std::io::Cursor;

    fn build() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = TermIndexWriter::new(&mut cursor).unwrap();
            w.add("body", "alpha", &TermInfo::new(1.0, 2, 3, 10, 1.0, 0.5, Postings::Offset(10)))
                .unwrap();
            w.add("body", "beta", &TermInfo::new(2.0, 4, 3, 10, 2.0, 0.75, Postings::Offset(20)))
                .unwrap();
            w.add("title", "alpha", &TermInfo::new(0.5, 1, 1, 1, 0.5, 0.5, Postings::Offset(30)))
                .unwrap();
            w.close().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn looks_up_terms_by_field() {
        let reader = TermIndexReader::open(TableData::from(build())).unwrap();
        let ti = reader.get("body", "beta").unwrap();
        assert_eq!(ti.doc_freq, 4);
        assert!(matches!(ti.postings, Postings::Offset(20)));
        assert!(reader.contains("title", "alpha").unwrap());
        assert!(!reader.contains("title", "missing").unwrap());
    }

    #[test]
    fn unknown_field_lookup_is_not_found_not_error() {
        let reader = TermIndexReader::open(TableData::from(build())).unwrap();
        assert!(!reader.contains("nonexistent", "alpha").unwrap());
        assert!(matches!(reader.get("nonexistent", "alpha"), Err(TableError::NotFound)));
    }

    #[test]
    fn lazy_accessors_match_get() {
        let reader = TermIndexReader::open(TableData::from(build())).unwrap();
        let ti = reader.get("body", "alpha").unwrap();
        assert_eq!(reader.frequency("body", "alpha").unwrap(), ti.frequency());
        assert_eq!(reader.doc_frequency("body", "alpha").unwrap(), ti.doc_frequency());
        assert_eq!(reader.max_weight("body", "alpha").unwrap(), ti.max_weight());
    }

    #[test]
    fn terms_and_freqs_walks_everything_in_key_order() {
        let reader = TermIndexReader::open(TableData::from(build())).unwrap();
        let all: Vec<((String, String), (f32, u32))> =
            reader.terms_and_freqs(None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(all.len(), 3);
        // field 0 ("body") sorts before field 1 ("title") by field number.
        assert_eq!(all[0].0, ("body".to_string(), "alpha".to_string()));
        assert_eq!(all[2].0, ("title".to_string(), "alpha".to_string()));
    }
}
