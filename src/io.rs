//! Byte-level plumbing shared by every table format: sequential big-endian
//! writes, bounds-checked big-endian reads over a byte slice, and the two
//! places where the original implementation leaned on a language-native
//! object-serialization format (`cPickle`) that this crate replaces with an
//! explicit, versioned tagged encoding (see `length_prefixed string` and
//! `write_array`/`read_array` below, and `FieldMap`/posting-tuple encodings
//! in `term_index` and `term_info`).

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, TableError};

pub const U16_SIZE: usize = 2;
pub const U32_SIZE: usize = 4;
pub const I64_SIZE: usize = 8;
pub const U64_SIZE: usize = 8;
pub const F32_SIZE: usize = 4;

/// How a reader obtains the bytes backing a frozen table file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadOption {
    /// Read the whole file into a heap-allocated buffer.
    Heap,
    /// Memory-map the file read-only.
    Mmap,
}

/// The byte source behind a reader: either a boxed heap buffer or an mmap.
/// Named and shaped after the teacher's `CDBData`.
pub enum TableData {
    Boxed(Box<[u8]>),
    Mapped(Mmap),
}

impl TableData {
    pub fn open<P: AsRef<Path>>(path: P, load: LoadOption) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file, load)
    }

    pub fn from_file(file: &File, load: LoadOption) -> Result<Self> {
        match load {
            LoadOption::Mmap => {
                let mmap = unsafe { Mmap::map(file) }?;
                Ok(TableData::Mapped(mmap))
            }
            LoadOption::Heap => {
                let mut f = file.try_clone()?;
                f.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::with_capacity(f.metadata()?.len() as usize);
                f.read_to_end(&mut buf)?;
                Ok(TableData::Boxed(buf.into_boxed_slice()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for TableData {
    fn as_ref(&self) -> &[u8] {
        match self {
            TableData::Mapped(m) => &m[..],
            TableData::Boxed(b) => &b[..],
        }
    }
}

impl From<Vec<u8>> for TableData {
    fn from(v: Vec<u8>) -> Self {
        TableData::Boxed(v.into_boxed_slice())
    }
}

/// Bounds-checked slice, turning an out-of-range read into `FormatError`
/// instead of a panic: the only thing standing between a reader and a
/// truncated or corrupt file is this check.
#[inline]
pub fn slice_at(data: &[u8], pos: u64, len: usize) -> Result<&[u8]> {
    let start = pos as usize;
    let end = start
        .checked_add(len)
        .ok_or_else(|| TableError::FormatError("offset overflow".to_string()))?;
    data.get(start..end).ok_or_else(|| {
        TableError::FormatError(format!(
            "read of {} bytes at offset {} exceeds file length {}",
            len,
            pos,
            data.len()
        ))
    })
}

#[inline]
pub fn get_byte(data: &[u8], pos: u64) -> Result<u8> {
    Ok(slice_at(data, pos, 1)?[0])
}

#[inline]
pub fn get_u16(data: &[u8], pos: u64) -> Result<u16> {
    Ok(BigEndian::read_u16(slice_at(data, pos, U16_SIZE)?))
}

#[inline]
pub fn get_u32(data: &[u8], pos: u64) -> Result<u32> {
    Ok(BigEndian::read_u32(slice_at(data, pos, U32_SIZE)?))
}

#[inline]
pub fn get_i64(data: &[u8], pos: u64) -> Result<i64> {
    Ok(BigEndian::read_i64(slice_at(data, pos, I64_SIZE)?))
}

#[inline]
pub fn get_u64(data: &[u8], pos: u64) -> Result<u64> {
    Ok(BigEndian::read_u64(slice_at(data, pos, U64_SIZE)?))
}

#[inline]
pub fn get_f32(data: &[u8], pos: u64) -> Result<f32> {
    Ok(BigEndian::read_f32(slice_at(data, pos, F32_SIZE)?))
}

/// Reads a `<u16 len><len bytes>` UTF-8 string, returning the decoded
/// string and the position immediately after it.
pub fn get_string(data: &[u8], pos: u64) -> Result<(String, u64)> {
    let len = get_u16(data, pos)? as usize;
    let bytes = slice_at(data, pos + U16_SIZE as u64, len)?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| TableError::FormatError("invalid utf-8 in length-prefixed string".to_string()))?;
    Ok((s, pos + U16_SIZE as u64 + len as u64))
}

/// Reads a `<u32 len><len bytes>` byte array, returning the bytes and the
/// position immediately after it.
pub fn get_array(data: &[u8], pos: u64) -> Result<(Vec<u8>, u64)> {
    let len = get_u32(data, pos)? as usize;
    let bytes = slice_at(data, pos + U32_SIZE as u64, len)?;
    Ok((bytes.to_vec(), pos + U32_SIZE as u64 + len as u64))
}

/// Sequential, append-only writer with the typed big-endian encoders the
/// table formats need. A thin wrapper, the way the teacher keeps its
/// `Writer<F: Write + Seek>` thin and pushes format logic to the caller.
pub struct TableWriter<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> TableWriter<W> {
    pub fn new(inner: W) -> Self {
        TableWriter { inner }
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Current(0))?)
    }

    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Start(pos))?)
    }

    pub fn seek_end(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        let mut buf = [0u8; U16_SIZE];
        BigEndian::write_u16(&mut buf, v);
        self.write_bytes(&buf)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        let mut buf = [0u8; U32_SIZE];
        BigEndian::write_u32(&mut buf, v);
        self.write_bytes(&buf)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        let mut buf = [0u8; I64_SIZE];
        BigEndian::write_i64(&mut buf, v);
        self.write_bytes(&buf)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        let mut buf = [0u8; U64_SIZE];
        BigEndian::write_u64(&mut buf, v);
        self.write_bytes(&buf)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        let mut buf = [0u8; F32_SIZE];
        BigEndian::write_f32(&mut buf, v);
        self.write_bytes(&buf)
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        if bytes.len() > u16::max_value() as usize {
            return Err(TableError::FormatError(format!(
                "string of {} bytes too long for u16 length prefix",
                bytes.len()
            )));
        }
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    pub fn write_array(&mut self, arr: &[u8]) -> Result<()> {
        self.write_u32(arr.len() as u32)?;
        self.write_bytes(arr)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
