//! Extends the core hash table with a sorted offset index appended after
//! the hash zone, enabling binary-search lower-bound seeks and ordered
//! iteration from a key. Grounded on `OrderedHashWriter`/`OrderedHashReader`
//! in `whoosh/filedb/filetables.py`; `cdb_rs` has no ordered variant, so the
//! write/read sequencing here generalizes `HashWriter`/`HashReader`'s
//! phased `close()`/`open()` to add the sorted-index phase.

use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::hash::{HashReader, HashWriter, Ranges};
use crate::io::{get_i64, get_u32, TableData, TableWriter};

const I64_SIZE: u64 = 8;
const U32_SIZE: u64 = 4;

/// A hash writer that additionally requires strictly increasing keys and
/// records each accepted record's offset, so the reader can binary-search
/// for a lower bound instead of scanning.
pub struct OrderedHashWriter<W: Write + Seek> {
    pub(crate) hw: HashWriter<W>,
    index: Vec<u64>,
    lastkey: Option<Vec<u8>>,
}

impl<W: Write + Seek> OrderedHashWriter<W> {
    pub fn new(file: W) -> Result<Self> {
        Ok(OrderedHashWriter {
            hw: HashWriter::new(file)?,
            index: Vec::new(),
            lastkey: None,
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(lk) = &self.lastkey {
            if key <= lk.as_slice() {
                return Err(TableError::KeysOutOfOrder {
                    last: lk.clone(),
                    new: key.to_vec(),
                });
            }
        }
        let pos = self.hw.write_record(key, value)?;
        self.index.push(pos);
        self.lastkey = Some(key.to_vec());
        Ok(())
    }

    pub fn add_all<'a, I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        for (k, v) in items {
            self.add(k, v)?;
        }
        Ok(())
    }

    pub(crate) fn write_sorted_index(&mut self) -> Result<()> {
        self.hw.file.write_u32(self.index.len() as u32)?;
        for &off in &self.index {
            self.hw.file.write_i64(off as i64)?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<W> {
        let (directory, end_of_hashes) = self.hw.write_hash_zone()?;
        self.write_sorted_index()?;
        self.hw.write_header(&directory, end_of_hashes)?;
        self.hw.file.flush()?;
        self.hw.closed = true;
        Ok(self.hw.file.into_inner())
    }
}

/// Exposes the pieces `TableWriter` needs during its own `close()` when it
/// layers more data (a field map, for instance) after the sorted index and
/// before the header.
impl<W: Write + Seek> OrderedHashWriter<W> {
    pub(crate) fn writer_mut(&mut self) -> &mut TableWriter<W> {
        &mut self.hw.file
    }

    pub(crate) fn finalize_hash_zone_and_index(&mut self) -> Result<(Vec<(u64, u32)>, u64)> {
        let (directory, end_of_hashes) = self.hw.write_hash_zone()?;
        self.write_sorted_index()?;
        Ok((directory, end_of_hashes))
    }

    pub(crate) fn write_header(&mut self, directory: &[(u64, u32)], end_of_hashes: u64) -> Result<()> {
        self.hw.write_header(directory, end_of_hashes)
    }

    pub(crate) fn finish(mut self, directory: &[(u64, u32)], end_of_hashes: u64) -> Result<W> {
        self.hw.write_header(directory, end_of_hashes)?;
        self.hw.file.flush()?;
        self.hw.closed = true;
        Ok(self.hw.file.into_inner())
    }
}

/// Reader counterpart: locates the sorted index right after the hash zone
/// and supports `closest_key_offset`/`items_from`.
pub struct OrderedHashReader {
    pub(crate) hr: HashReader,
    length: u64,
    indexbase: u64,
}

impl OrderedHashReader {
    pub fn open(data: TableData) -> Result<Self> {
        let hr = HashReader::open(data)?;
        let (length, indexbase) = Self::read_index_header(&hr)?;
        Ok(OrderedHashReader { hr, length, indexbase })
    }

    pub(crate) fn read_index_header(hr: &HashReader) -> Result<(u64, u64)> {
        let pos = hr.end_of_hashes();
        let bytes = hr.data();
        let length = get_u32(bytes, pos)? as u64;
        Ok((length, pos + U32_SIZE))
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn offset_at(&self, index: u64) -> Result<u64> {
        Ok(get_i64(self.hr.data(), self.indexbase + index * I64_SIZE)? as u64)
    }

    /// Binary search for the smallest record offset whose key is >= `key`,
    /// or `None` if every stored key is smaller.
    pub fn closest_key_offset(&self, key: &[u8]) -> Result<Option<u64>> {
        let mut lo = 0u64;
        let mut hi = self.length;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let pos = self.offset_at(mid)?;
            let midkey = self.hr.key_at(pos)?;
            if midkey.as_slice() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.length {
            Ok(None)
        } else {
            Ok(Some(self.offset_at(lo)?))
        }
    }

    pub fn closest_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.closest_key_offset(key)? {
            Some(pos) => Ok(Some(self.hr.key_at(pos)?)),
            None => Ok(None),
        }
    }

    /// `Ranges` over every record whose key is >= `key`, following the same
    /// `(keypos, keylen, datapos, datalen)` shape as `HashReader::ranges`.
    /// Used by coded readers (e.g. `TermIndexReader::terms_and_freqs`) that
    /// need the raw ranges rather than decoded key/value pairs.
    pub(crate) fn ranges_from_key(&self, key: &[u8]) -> Result<EmptyableRanges> {
        let pos = self.closest_key_offset(key)?;
        Ok(EmptyableRanges::new(&self.hr, pos))
    }

    pub(crate) fn ranges(&self) -> Ranges {
        self.hr.ranges()
    }

    /// Raw bytes backing this table, for readers layered on top
    /// (`TermIndexReader`'s lazy `TermInfo` field accessors) that need to
    /// read individual fields without going through `get`/`items`.
    pub(crate) fn hr_data(&self) -> &[u8] {
        self.hr.data()
    }

    pub(crate) fn range_for_key(&self, key: &[u8]) -> Result<(u64, u64)> {
        self.hr.range_for_key(key)
    }

    /// File position immediately after the sorted index, i.e. where a
    /// trailing field map (`TermIndex`/`TermVector`) is written.
    pub(crate) fn index_end(&self) -> u64 {
        self.indexbase + self.length * I64_SIZE
    }

    pub fn items_from(&self, key: &[u8]) -> Result<impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
        let pos = self.closest_key_offset(key)?;
        Ok(EmptyableRanges::new(&self.hr, pos).map(move |r| {
            r.and_then(|(kp, kl, dp, dl)| {
                let k = crate::io::slice_at(self.hr.data(), kp, kl as usize)?.to_vec();
                let v = crate::io::slice_at(self.hr.data(), dp, dl as usize)?.to_vec();
                Ok((k, v))
            })
        }))
    }

    pub fn keys_from(&self, key: &[u8]) -> Result<impl Iterator<Item = Result<Vec<u8>>> + '_> {
        let pos = self.closest_key_offset(key)?;
        Ok(EmptyableRanges::new(&self.hr, pos)
            .map(move |r| r.and_then(|(kp, kl, _, _)| Ok(crate::io::slice_at(self.hr.data(), kp, kl as usize)?.to_vec()))))
    }

    pub fn values_from(&self, key: &[u8]) -> Result<impl Iterator<Item = Result<Vec<u8>>> + '_> {
        let pos = self.closest_key_offset(key)?;
        Ok(EmptyableRanges::new(&self.hr, pos)
            .map(move |r| r.and_then(|(_, _, dp, dl)| Ok(crate::io::slice_at(self.hr.data(), dp, dl as usize)?.to_vec()))))
    }

    pub fn items(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.hr.items()
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.hr.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.hr.contains(key)
    }
}

/// `Ranges` starting from an `Option<offset>`, yielding nothing when the
/// offset is `None` (the probe key is greater than every stored key).
pub(crate) struct EmptyableRanges<'r> {
    inner: Option<Ranges<'r>>,
}

impl<'r> EmptyableRanges<'r> {
    pub(crate) fn new(hr: &'r HashReader, pos: Option<u64>) -> Self {
        EmptyableRanges {
            inner: pos.map(|p| hr.ranges_from(p)),
        }
    }
}

impl<'r> Iterator for EmptyableRanges<'r> {
    type Item = Result<(u64, u64, u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut().and_then(|r| r.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_ordered(keys: &[String]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = OrderedHashWriter::new(&mut cursor).unwrap();
            for k in keys {
                w.add(k.as_bytes(), k.as_bytes()).unwrap();
            }
            w.close().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn rejects_out_of_order_keys_without_finalizing() {
        let mut cursor = Cursor::new(Vec::new());
        let mut w = OrderedHashWriter::new(&mut cursor).unwrap();
        w.add(b"b", b"1").unwrap();
        let err = w.add(b"a", b"2").unwrap_err();
        assert!(matches!(err, TableError::KeysOutOfOrder { .. }));
    }

    #[test]
    fn items_from_yields_suffix() {
        let keys: Vec<String> = (0..10_000).map(|i| format!("k{:05}", i)).collect();
        let bytes = build_ordered(&keys);
        let reader = OrderedHashReader::open(TableData::from(bytes)).unwrap();

        let suffix: Vec<(Vec<u8>, Vec<u8>)> = reader
            .items_from(b"k04999")
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(suffix.len(), 5001);
        assert_eq!(suffix[0].0, b"k04999".to_vec());
        assert_eq!(suffix[0].1, b"k04999".to_vec());
        assert_eq!(suffix.last().unwrap().0, b"k09999".to_vec());
    }

    #[test]
    fn items_from_past_end_is_empty() {
        let keys: Vec<String> = (0..100).map(|i| format!("k{:03}", i)).collect();
        let bytes = build_ordered(&keys);
        let reader = OrderedHashReader::open(TableData::from(bytes)).unwrap();
        let suffix: Vec<_> = reader.items_from(b"zzz").unwrap().collect();
        assert!(suffix.is_empty());
    }

    #[test]
    fn full_iteration_matches_input_order() {
        let keys: Vec<String> = vec!["a", "b", "c", "d"].into_iter().map(String::from).collect();
        let bytes = build_ordered(&keys);
        let reader = OrderedHashReader::open(TableData::from(bytes)).unwrap();
        let got: Vec<Vec<u8>> = reader.items().map(|r| r.unwrap().0).collect();
        let want: Vec<Vec<u8>> = keys.into_iter().map(|k| k.into_bytes()).collect();
        assert_eq!(got, want);
    }
}
