//! Transparent key/value codecs layered over the hash table and ordered
//! hash table. The on-disk layout is exactly the one `hash`/`ordered`
//! already define; this module only changes the types at the API boundary,
//! mirroring `CodedHashWriter`/`CodedHashReader`/`CodedOrderedWriter`/
//! `CodedOrderedReader` in `whoosh/filedb/filetables.py`.

use std::io::{Seek, Write};

use crate::error::Result;
use crate::hash::{HashReader, HashWriter};
use crate::ordered::{OrderedHashReader, OrderedHashWriter};

/// Write-side coding. Mutable because the concrete field-number codecs
/// (`TermIndex`, `TermVector`) assign a field number the first time they
/// see a field name, which is a side effect of encoding.
pub trait Coder {
    type Key;
    type Value;

    fn encode_key(&mut self, key: &Self::Key) -> Vec<u8>;
    fn encode_value(&self, value: &Self::Value) -> Vec<u8>;
}

/// Read-side coding. `encode_key` is fallible: looking up a key naming an
/// unknown field is a lookup failure, never an insertion, and must not
/// mutate any field map.
pub trait Decoder {
    type Key;
    type Value;

    fn encode_key(&self, key: &Self::Key) -> Result<Vec<u8>>;
    fn decode_key(&self, bytes: &[u8]) -> Result<Self::Key>;
    fn decode_value(&self, bytes: &[u8]) -> Result<Self::Value>;
}

pub struct CodedHashWriter<W: Write + Seek, C: Coder> {
    inner: HashWriter<W>,
    coder: C,
}

impl<W: Write + Seek, C: Coder> CodedHashWriter<W, C> {
    pub fn new(file: W, coder: C) -> Result<Self> {
        Ok(CodedHashWriter {
            inner: HashWriter::new(file)?,
            coder,
        })
    }

    pub fn add(&mut self, key: &C::Key, value: &C::Value) -> Result<()> {
        let k = self.coder.encode_key(key);
        let v = self.coder.encode_value(value);
        self.inner.add(&k, &v)
    }

    pub fn close(self) -> Result<W> {
        self.inner.close()
    }
}

pub struct CodedHashReader<C: Decoder> {
    inner: HashReader,
    coder: C,
}

impl<C: Decoder> CodedHashReader<C> {
    pub fn new(inner: HashReader, coder: C) -> Self {
        CodedHashReader { inner, coder }
    }

    pub fn get(&self, key: &C::Key) -> Result<C::Value> {
        let k = self.coder.encode_key(key)?;
        let v = self.inner.get(&k)?;
        self.coder.decode_value(&v)
    }

    pub fn contains(&self, key: &C::Key) -> Result<bool> {
        match self.coder.encode_key(key) {
            Ok(k) => self.inner.contains(&k),
            Err(_) => Ok(false),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = Result<(C::Key, C::Value)>> + '_ {
        self.inner
            .items()
            .map(move |r| r.and_then(|(k, v)| Ok((self.coder.decode_key(&k)?, self.coder.decode_value(&v)?))))
    }

    pub fn coder(&self) -> &C {
        &self.coder
    }

    pub fn inner(&self) -> &HashReader {
        &self.inner
    }
}

/// Ordered counterpart. Writers holding extra close-time state (a trailing
/// field-name map, for `TermIndexWriter`/`TermVectorWriter`) drive
/// `OrderedHashWriter` directly instead of wrapping it here, since this
/// wrapper's `close()` has nowhere to splice that extra write in; the
/// reader side has no equivalent complication; everything it needs is
/// already parsed by the time `open()` returns, so it does wrap here.
pub struct CodedOrderedWriter<W: Write + Seek, C: Coder> {
    inner: OrderedHashWriter<W>,
    coder: C,
}

impl<W: Write + Seek, C: Coder> CodedOrderedWriter<W, C> {
    pub fn new(file: W, coder: C) -> Result<Self> {
        Ok(CodedOrderedWriter {
            inner: OrderedHashWriter::new(file)?,
            coder,
        })
    }

    pub fn add(&mut self, key: &C::Key, value: &C::Value) -> Result<()> {
        let k = self.coder.encode_key(key);
        let v = self.coder.encode_value(value);
        self.inner.add(&k, &v)
    }

    pub fn close(self) -> Result<W> {
        self.inner.close()
    }
}

pub struct CodedOrderedReader<C: Decoder> {
    inner: OrderedHashReader,
    coder: C,
}

impl<C: Decoder> CodedOrderedReader<C> {
    pub fn new(inner: OrderedHashReader, coder: C) -> Self {
        CodedOrderedReader { inner, coder }
    }

    pub fn get(&self, key: &C::Key) -> Result<C::Value> {
        let k = self.coder.encode_key(key)?;
        let v = self.inner.get(&k)?;
        self.coder.decode_value(&v)
    }

    /// Treats a key-encoding failure (unknown field) as "not present"
    /// rather than propagating it — the one place this crate deliberately
    /// swallows an error, matching the original `CodedOrderedReader`.
    pub fn contains(&self, key: &C::Key) -> Result<bool> {
        match self.coder.encode_key(key) {
            Ok(k) => self.inner.contains(&k),
            Err(_) => Ok(false),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = Result<(C::Key, C::Value)>> + '_ {
        self.inner
            .items()
            .map(move |r| r.and_then(|(k, v)| Ok((self.coder.decode_key(&k)?, self.coder.decode_value(&v)?))))
    }

    pub fn items_from(&self, key: &C::Key) -> Result<impl Iterator<Item = Result<(C::Key, C::Value)>> + '_> {
        let k = self.coder.encode_key(key)?;
        Ok(self
            .inner
            .items_from(&k)?
            .map(move |r| r.and_then(|(k, v)| Ok((self.coder.decode_key(&k)?, self.coder.decode_value(&v)?)))))
    }

    pub fn coder(&self) -> &C {
        &self.coder
    }

    pub fn inner(&self) -> &OrderedHashReader {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A tiny coder used only to exercise the generic wrappers: keys are
    /// `u32`s, values are UTF-8 strings.
    struct U32StringCoder;

    impl Coder for U32StringCoder {
        type Key = u32;
        type Value = String;

        fn encode_key(&mut self, key: &u32) -> Vec<u8> {
            key.to_be_bytes().to_vec()
        }

        fn encode_value(&self, value: &String) -> Vec<u8> {
            value.as_bytes().to_vec()
        }
    }

    impl Decoder for U32StringCoder {
        type Key = u32;
        type Value = String;

        fn encode_key(&self, key: &u32) -> Result<Vec<u8>> {
            Ok(key.to_be_bytes().to_vec())
        }

        fn decode_key(&self, bytes: &[u8]) -> Result<u32> {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            Ok(u32::from_be_bytes(b))
        }

        fn decode_value(&self, bytes: &[u8]) -> Result<String> {
            Ok(String::from_utf8_lossy(bytes).to_string())
        }
    }

    #[test]
    fn coded_hash_round_trip() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = CodedHashWriter::new(&mut cursor, U32StringCoder).unwrap();
            w.add(&1, &"one".to_string()).unwrap();
            w.add(&2, &"two".to_string()).unwrap();
            w.close().unwrap();
        }

        let data = crate::io::TableData::from(cursor.into_inner());
        let reader = CodedHashReader::new(HashReader::open(data).unwrap(), U32StringCoder);
        assert_eq!(reader.get(&1).unwrap(), "one");
        assert!(matches!(reader.get(&99), Err(crate::error::TableError::NotFound)));
    }
}
