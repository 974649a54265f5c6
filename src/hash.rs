//! Core CDB-derived immutable hash table: bytes -> bytes, multiple values
//! per key, O(1) expected lookup via two hash stages and external
//! open-addressed probing. Grounded directly on `cdb_rs`'s `CDBHash`,
//! `Bucket`, `Writer` and `Reader`, adjusted to the spec's big-endian,
//! magic-prefixed, 12-byte-slot layout instead of the teacher's
//! little-endian classic-cdb layout.

use std::io::{Seek, Write};

use crate::error::{Result, TableError};
use crate::io::{get_i64, get_u32, slice_at, TableData, TableWriter};

pub const STARTING_HASH: u32 = 5381;
pub const MAIN_TABLE_SIZE: usize = 256;
pub const BUCKET_ENTRY_SIZE: u64 = 12; // <i64 pos><u32 num_slots>
pub const HEADER_PREFIX_SIZE: u64 = 16; // magic(4) + reserved u32(4) + end_of_hashes i64(8)
pub const HEADER_SIZE: u64 = HEADER_PREFIX_SIZE + (MAIN_TABLE_SIZE as u64) * BUCKET_ENTRY_SIZE;
pub const SLOT_SIZE: u64 = 12; // <u32 hash><i64 offset>
pub const LENGTHS_SIZE: u64 = 8; // <u32 keylen><u32 datalen>
pub const MAGIC: &[u8; 4] = b"HASH";
const LEGACY_HEADER_SIZE: u64 = (MAIN_TABLE_SIZE as u64) * 12;

/// The DJB-XOR hash used to place every key. Must match bit-for-bit across
/// implementations since it determines on-disk slot positions, not just an
/// in-memory bucket choice.
pub fn cdb_hash(key: &[u8]) -> u32 {
    let mut h: u32 = STARTING_HASH;
    for &b in key {
        h = h.wrapping_shl(5).wrapping_add(h) ^ (b as u32);
    }
    h
}

#[inline]
fn table_index(h: u32) -> usize {
    (h & 0xFF) as usize
}

#[inline]
fn initial_slot(h: u32, num_slots: u32) -> u64 {
    (h >> 8) as u64 % num_slots as u64
}

/// Single-writer builder of a frozen hash table. Buffers per-bucket
/// `(hash, offset)` entries in memory and defers all table construction to
/// `close()`, since the slot count per bucket (and therefore every slot
/// position) isn't known until every key has been seen.
pub struct HashWriter<W: Write + Seek> {
    pub(crate) file: TableWriter<W>,
    hashes: Vec<Vec<(u32, u64)>>,
    pub(crate) closed: bool,
}

impl<W: Write + Seek> HashWriter<W> {
    pub fn new(file: W) -> Result<Self> {
        let mut file = TableWriter::new(file);
        file.seek(0)?;
        file.write_bytes(&vec![0u8; HEADER_SIZE as usize])?;
        Ok(HashWriter {
            file,
            hashes: vec![Vec::new(); MAIN_TABLE_SIZE],
            closed: false,
        })
    }

    /// Appends one record and remembers its `(hash, offset)` for the
    /// eventual bucket it belongs to. Returns the record's offset so
    /// callers like `OrderedHashWriter` can track it separately.
    pub(crate) fn write_record(&mut self, key: &[u8], value: &[u8]) -> Result<u64> {
        if self.closed {
            return Err(TableError::PoisonedWriter);
        }
        let pos = self.file.tell()?;
        self.file.write_u32(key.len() as u32)?;
        self.file.write_u32(value.len() as u32)?;
        self.file.write_bytes(key)?;
        self.file.write_bytes(value)?;

        let h = cdb_hash(key);
        self.hashes[table_index(h)].push((h, pos));
        Ok(pos)
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(key, value)?;
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

    /// Phase 1 of `close()`: for each of the 256 buckets, build a
    /// `2 * len` slot table via double hashing with linear probing, write
    /// it at the current end of file, and remember `(pos, slot_count)` for
    /// the bucket directory. Returns the directory and the file position
    /// immediately after the hash zone.
    pub(crate) fn write_hash_zone(&mut self) -> Result<(Vec<(u64, u32)>, u64)> {
        let mut directory = Vec::with_capacity(MAIN_TABLE_SIZE);
        self.file.seek_end()?;

        for entries in &self.hashes {
            let n = (entries.len() * 2) as u32;
            let pos = self.file.tell()?;
            directory.push((pos, n));

            if n > 0 {
                let mut table: Vec<(u32, u64)> = vec![(0, 0); n as usize];
                for &(h, off) in entries {
                    let mut idx = initial_slot(h, n) as usize;
                    loop {
                        if table[idx].1 == 0 {
                            table[idx] = (h, off);
                            break;
                        }
                        idx = (idx + 1) % n as usize;
                    }
                }
                for (h, off) in table {
                    self.file.write_u32(h)?;
                    self.file.write_i64(off as i64)?;
                }
            }
        }

        let end_of_hashes = self.file.tell()?;
        Ok((directory, end_of_hashes))
    }

    /// Phase 3: rewrite the reserved header in place.
    pub(crate) fn write_header(&mut self, directory: &[(u64, u32)], end_of_hashes: u64) -> Result<()> {
        self.file.seek(0)?;
        self.file.write_bytes(MAGIC)?;
        self.file.write_u32(0)?;
        self.file.write_i64(end_of_hashes as i64)?;
        for &(pos, n) in directory {
            self.file.write_i64(pos as i64)?;
            self.file.write_u32(n)?;
        }
        self.file.flush()?;
        let end = self.file.tell()?;
        if end != HEADER_SIZE {
            return Err(TableError::FormatError(format!(
                "header write ended at {}, expected {}",
                end, HEADER_SIZE
            )));
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<W> {
        let (directory, end_of_hashes) = self.write_hash_zone()?;
        self.write_header(&directory, end_of_hashes)?;
        self.file.flush()?;
        self.closed = true;
        debug!("closed hash table, end_of_hashes {}", end_of_hashes);
        Ok(self.file.into_inner())
    }
}

/// One bucket's directory entry: where its slot table starts and how many
/// slots it has.
#[derive(Copy, Clone, Debug, Default)]
struct Bucket {
    pos: u64,
    num_slots: u32,
}

/// Immutable, mmap-backed (or heap-backed) reader over a frozen hash
/// table. All state here is read-only after construction and safe to share
/// across threads.
pub struct HashReader {
    data: TableData,
    buckets: [Bucket; MAIN_TABLE_SIZE],
    end_of_hashes: u64,
    start_of_hashes: u64,
}

impl HashReader {
    pub fn open(data: TableData) -> Result<Self> {
        let bytes = data.as_ref();
        if (bytes.len() as u64) < 4 {
            return Err(TableError::FormatError("file too small to contain a magic number".to_string()));
        }
        if &bytes[0..4] != MAGIC {
            let hint = if (bytes.len() as u64) >= LEGACY_HEADER_SIZE {
                "looks like a legacy cdb table (native-hash, unprefixed header); this reader only accepts the HASH-magic format"
            } else {
                "not a recognizable table file"
            };
            warn!("rejecting table open: bad magic {:?}: {}", &bytes[0..4.min(bytes.len())], hint);
            return Err(TableError::FormatError(format!(
                "bad magic {:?}: {}",
                &bytes[0..4.min(bytes.len())],
                hint
            )));
        }

        let end_of_hashes = get_i64(bytes, 8)? as u64;
        if end_of_hashes < HEADER_SIZE {
            return Err(TableError::FormatError(format!(
                "end_of_hashes {} is smaller than header size {}",
                end_of_hashes, HEADER_SIZE
            )));
        }

        let mut buckets = [Bucket::default(); MAIN_TABLE_SIZE];
        let mut pos = HEADER_PREFIX_SIZE;
        for bucket in buckets.iter_mut() {
            let p = get_i64(bytes, pos)? as u64;
            let n = get_u32(bytes, pos + 8)?;
            *bucket = Bucket { pos: p, num_slots: n };
            pos += BUCKET_ENTRY_SIZE;
        }

        // Per spec open question: an all-empty table still gives bucket 0's
        // recorded position, which is the true end of the (empty) record
        // region, so no extra fallback is needed.
        let start_of_hashes = buckets[0].pos;

        debug!(
            "opened hash table: {} bytes, end_of_hashes {}, start_of_hashes {}",
            bytes.len(),
            end_of_hashes,
            start_of_hashes
        );

        Ok(HashReader {
            data,
            buckets,
            end_of_hashes,
            start_of_hashes,
        })
    }

    pub fn end_of_hashes(&self) -> u64 {
        self.end_of_hashes
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn bucket_for_hash(&self, h: u32) -> Bucket {
        self.buckets[table_index(h)]
    }

    pub(crate) fn key_at(&self, pos: u64) -> Result<Vec<u8>> {
        let bytes = self.data.as_ref();
        let keylen = get_u32(bytes, pos)? as usize;
        Ok(slice_at(bytes, pos + LENGTHS_SIZE, keylen)?.to_vec())
    }

    pub fn ranges_for_key<'r>(&'r self, key: &[u8]) -> RangesForKey<'r> {
        let hash = cdb_hash(key);
        let bucket = self.bucket_for_hash(hash);
        let slot_pos = if bucket.num_slots == 0 {
            bucket.pos
        } else {
            bucket.pos + initial_slot(hash, bucket.num_slots) * SLOT_SIZE
        };
        RangesForKey {
            reader: self,
            key: key.to_vec(),
            hash,
            bucket_pos: bucket.pos,
            num_slots: bucket.num_slots,
            slot_pos,
            steps_left: bucket.num_slots,
            done: false,
        }
    }

    /// First matching record's `(datapos, datalen)`, for callers that want
    /// to read individual fields out of the raw bytes instead of decoding
    /// the whole value (`TermIndexReader`'s lazy accessors).
    pub(crate) fn range_for_key(&self, key: &[u8]) -> Result<(u64, u64)> {
        match self.ranges_for_key(key).next() {
            Some(r) => r,
            None => Err(TableError::NotFound),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.ranges_for_key(key).next() {
            Some(Ok((pos, len))) => Ok(slice_at(self.data(), pos, len as usize)?.to_vec()),
            Some(Err(e)) => Err(e),
            None => Err(TableError::NotFound),
        }
    }

    pub fn get_opt(&self, key: &[u8], default: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        match self.ranges_for_key(key).next() {
            Some(Ok((pos, len))) => Ok(Some(slice_at(self.data(), pos, len as usize)?.to_vec())),
            Some(Err(e)) => Err(e),
            None => Ok(default),
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        match self.ranges_for_key(key).next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    pub fn all<'r>(&'r self, key: &[u8]) -> impl Iterator<Item = Result<Vec<u8>>> + 'r {
        self.ranges_for_key(key)
            .map(move |r| r.and_then(|(pos, len)| Ok(slice_at(self.data(), pos, len as usize)?.to_vec())))
    }

    pub(crate) fn ranges_from(&self, pos: u64) -> Ranges {
        Ranges {
            reader: self,
            pos,
            end: self.start_of_hashes,
        }
    }

    pub fn ranges(&self) -> Ranges {
        self.ranges_from(HEADER_SIZE)
    }

    pub fn items(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.ranges().map(move |r| {
            r.and_then(|(kp, kl, dp, dl)| {
                let k = slice_at(self.data(), kp, kl as usize)?.to_vec();
                let v = slice_at(self.data(), dp, dl as usize)?.to_vec();
                Ok((k, v))
            })
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = Result<Vec<u8>>> + '_ {
        self.ranges()
            .map(move |r| r.and_then(|(kp, kl, _, _)| Ok(slice_at(self.data(), kp, kl as usize)?.to_vec())))
    }

    pub fn values(&self) -> impl Iterator<Item = Result<Vec<u8>>> + '_ {
        self.ranges()
            .map(move |r| r.and_then(|(_, _, dp, dl)| Ok(slice_at(self.data(), dp, dl as usize)?.to_vec())))
    }
}

/// Iterator over `(datapos, datalen)` for every record matching `key`,
/// continuing the probe past the first match so `HashReader::all` can
/// yield duplicate-key values in insertion order.
pub struct RangesForKey<'r> {
    reader: &'r HashReader,
    key: Vec<u8>,
    hash: u32,
    bucket_pos: u64,
    num_slots: u32,
    slot_pos: u64,
    steps_left: u32,
    done: bool,
}

impl<'r> Iterator for RangesForKey<'r> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.num_slots == 0 {
            return None;
        }
        while self.steps_left > 0 {
            self.steps_left -= 1;
            let bytes = self.reader.data();
            // None of the three outcomes ("found", "empty slot, stop", "hash
            // mismatch, keep probing") share a representation, so probe one
            // slot as Result<Option<Option<(u64,u64)>>>: outer None means
            // "empty slot", Some(None) means "mismatch", Some(Some(p)) means
            // "found".
            let step = (|| -> Result<Option<Option<(u64, u64)>>> {
                let h = get_u32(bytes, self.slot_pos)?;
                let off = get_i64(bytes, self.slot_pos + 4)? as u64;

                self.slot_pos += SLOT_SIZE;
                if self.slot_pos == self.bucket_pos + (self.num_slots as u64) * SLOT_SIZE {
                    self.slot_pos = self.bucket_pos;
                }

                if off == 0 {
                    trace!("bucket probe: empty slot at {}, stopping", self.slot_pos);
                    return Ok(None);
                }
                if h == self.hash {
                    let keylen = get_u32(bytes, off)? as usize;
                    if keylen == self.key.len() {
                        let kbytes = slice_at(bytes, off + LENGTHS_SIZE, keylen)?;
                        if kbytes == &self.key[..] {
                            let datalen = get_u32(bytes, off + 4)? as u64;
                            let datapos = off + LENGTHS_SIZE + keylen as u64;
                            return Ok(Some(Some((datapos, datalen))));
                        }
                    }
                }
                Ok(Some(None))
            })();

            match step {
                Ok(Some(Some(pair))) => return Some(Ok(pair)),
                Ok(Some(None)) => continue,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Sequential walk over the record region, decoding `(keylen, datalen)`
/// headers as it goes. Used both for full-table iteration (`HashReader::items`)
/// and, by `OrderedHashReader`, for walking from a binary-searched offset.
pub struct Ranges<'r> {
    reader: &'r HashReader,
    pos: u64,
    end: u64,
}

impl<'r> Iterator for Ranges<'r> {
    type Item = Result<(u64, u64, u64, u64)>; // keypos, keylen, datapos, datalen

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let bytes = self.reader.data();
        let keylen = match get_u32(bytes, self.pos) {
            Ok(v) => v as u64,
            Err(e) => {
                self.pos = self.end;
                return Some(Err(e));
            }
        };
        let datalen = match get_u32(bytes, self.pos + 4) {
            Ok(v) => v as u64,
            Err(e) => {
                self.pos = self.end;
                return Some(Err(e));
            }
        };
        let keypos = self.pos + LENGTHS_SIZE;
        let datapos = keypos + keylen;
        self.pos = datapos + datalen;
        Some(Ok((keypos, keylen, datapos, datalen)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = HashWriter::new(&mut cursor).unwrap();
            for (k, v) in pairs {
                w.add(k.as_bytes(), v.as_bytes()).unwrap();
            }
            w.close().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn seed_scenario_basic_lookup() {
        let bytes = build(&[("alpha", "1"), ("beta", "2"), ("gamma", "3")]);
        let reader = HashReader::open(TableData::from(bytes)).unwrap();

        assert_eq!(reader.get(b"beta").unwrap(), b"2");
        assert!(matches!(reader.get(b"missing"), Err(TableError::NotFound)));

        let mut keys: Vec<Vec<u8>> = reader.keys().map(|k| k.unwrap()).collect();
        keys.sort();
        assert_eq!(keys, vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
    }

    #[test]
    fn empty_table_is_header_only() {
        let bytes = build(&[]);
        assert_eq!(bytes.len() as u64, HEADER_SIZE);
        let reader = HashReader::open(TableData::from(bytes)).unwrap();
        assert!(matches!(reader.get(b"anything"), Err(TableError::NotFound)));
        assert_eq!(reader.items().count(), 0);
    }

    #[test]
    fn duplicate_keys_preserve_insertion_order() {
        let bytes = build(&[("k", "v1"), ("k", "v2")]);
        let reader = HashReader::open(TableData::from(bytes)).unwrap();
        assert_eq!(reader.get(b"k").unwrap(), b"v1");
        let all: Vec<Vec<u8>> = reader.all(b"k").map(|v| v.unwrap()).collect();
        assert_eq!(all, vec![b"v1".to_vec(), b"v2".to_vec()]);
    }

    #[test]
    fn empty_key_and_value() {
        let bytes = build(&[("", ""), ("x", "y")]);
        let reader = HashReader::open(TableData::from(bytes)).unwrap();
        assert_eq!(reader.get(b"").unwrap(), b"");
        assert_eq!(reader.get(b"x").unwrap(), b"y");
    }

    #[test]
    fn bucket_collision_robustness() {
        // Find several keys whose low byte of cdb_hash collides.
        let mut by_bucket: std::collections::HashMap<u8, Vec<String>> = std::collections::HashMap::new();
        for i in 0..20000u32 {
            let k = format!("k{}", i);
            let h = cdb_hash(k.as_bytes());
            by_bucket.entry((h & 0xFF) as u8).or_default().push(k);
        }
        let (_, keys) = by_bucket.into_iter().max_by_key(|(_, v)| v.len()).unwrap();
        assert!(keys.len() >= 4, "expected a bucket with several colliding keys");

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = HashWriter::new(&mut cursor).unwrap();
            for k in &keys {
                w.add(k.as_bytes(), k.as_bytes()).unwrap();
            }
            w.close().unwrap();
        }
        let reader = HashReader::open(TableData::from(cursor.into_inner())).unwrap();
        for k in &keys {
            assert_eq!(reader.get(k.as_bytes()).unwrap(), k.as_bytes());
        }
    }

    #[test]
    fn rejects_non_hash_magic() {
        let bytes = vec![0u8; HEADER_SIZE as usize];
        let err = HashReader::open(TableData::from(bytes)).unwrap_err();
        assert!(matches!(err, TableError::FormatError(_)));
    }
}
