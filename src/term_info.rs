//! `TermInfo`: the per-(field, term) summary stored as the value half of a
//! `TermIndex` record — document frequency, accumulated weight, the min/max
//! field length seen (lossily byte-encoded) and a pointer to (or small
//! inline copy of) the term's postings. Grounded on the `TermInfo` class in
//! `whoosh/filedb/filetables.py`, whose struct format `"!fIBBff"` this
//! crate's `to_bytes`/`from_bytes` reproduce field-for-field; the Python
//! `postings` slot (a pickled `int` offset or tuple) becomes a tagged
//! `Postings` enum instead of pickle.

use crate::error::{Result, TableError};
use crate::io::{get_f32, get_i64, get_u32, get_byte};

/// `minlength`/`maxlength` here are already byte-encoded (the value
/// `length_to_byte` produces), matching the original constructor's
/// convention of taking the byte form directly; `min_length()`/
/// `max_length()` decode them back to a length on demand.
const STRUCT_SIZE: u64 = 4 + 4 + 1 + 1 + 4 + 4; // weight, doc_freq, minlen, maxlen, maxweight, maxwol

#[derive(Debug, Clone, PartialEq)]
pub enum Postings {
    /// Offset of the postings block in the companion postings file, or -1
    /// if this term has no postings yet.
    Offset(i64),
    /// A handful of postings kept inline instead of written out-of-line,
    /// the way the original stashes a short tuple instead of an offset.
    Inline(Vec<i64>),
}

impl Default for Postings {
    fn default() -> Self {
        Postings::Offset(-1)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TermInfo {
    pub weight: f32,
    pub doc_freq: u32,
    pub min_length_byte: u8,
    pub max_length_byte: u8,
    pub max_weight: f32,
    pub max_wol: f32,
    pub postings: Postings,
}

impl TermInfo {
    pub fn new(
        weight: f32,
        doc_freq: u32,
        min_length_byte: u8,
        max_length_byte: u8,
        max_weight: f32,
        max_wol: f32,
        postings: Postings,
    ) -> Self {
        TermInfo {
            weight,
            doc_freq,
            min_length_byte,
            max_length_byte,
            max_weight,
            max_wol,
            postings,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.weight
    }

    pub fn doc_frequency(&self) -> u32 {
        self.doc_freq
    }

    pub fn min_length(&self) -> u32 {
        crate::length::byte_to_length(self.min_length_byte)
    }

    pub fn max_length(&self) -> u32 {
        crate::length::byte_to_length(self.max_length_byte)
    }

    pub fn max_weight(&self) -> f32 {
        self.max_weight
    }

    pub fn max_wol(&self) -> f32 {
        self.max_wol
    }

    /// Folds one more block of postings into this summary: adds to the
    /// running weight and document count, and widens the min/max length and
    /// max weight/weight-over-length as needed. Mirrors `TermInfo.add_block`.
    pub fn add_block(
        &mut self,
        weight_sum: f32,
        doc_count: u32,
        block_min_length: u32,
        block_max_length: u32,
        block_max_weight: f32,
        block_max_wol: f32,
    ) {
        let first_block = self.doc_freq == 0;
        self.weight += weight_sum;
        self.doc_freq += doc_count;

        let ml = crate::length::length_to_byte(block_min_length);
        self.min_length_byte = if first_block { ml } else { self.min_length_byte.min(ml) };

        let xl = crate::length::length_to_byte(block_max_length);
        self.max_length_byte = self.max_length_byte.max(xl);

        self.max_weight = self.max_weight.max(block_max_weight);
        self.max_wol = self.max_wol.max(block_max_wol);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let magic: u8 = match &self.postings {
            Postings::Offset(_) => 0,
            Postings::Inline(_) => 1,
        };
        let mut out = Vec::with_capacity(1 + STRUCT_SIZE as usize + 8);
        out.push(magic);
        out.extend_from_slice(&self.weight.to_be_bytes());
        out.extend_from_slice(&self.doc_freq.to_be_bytes());
        out.push(self.min_length_byte);
        out.push(self.max_length_byte);
        out.extend_from_slice(&self.max_weight.to_be_bytes());
        out.extend_from_slice(&self.max_wol.to_be_bytes());
        match &self.postings {
            Postings::Offset(off) => out.extend_from_slice(&off.to_be_bytes()),
            Postings::Inline(items) => {
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for v in items {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if (bytes.len() as u64) < 1 + STRUCT_SIZE {
            return Err(TableError::FormatError(format!(
                "TermInfo record of {} bytes is shorter than the fixed {} byte header",
                bytes.len(),
                1 + STRUCT_SIZE
            )));
        }
        let magic = bytes[0];
        let weight = get_f32(bytes, 1)?;
        let doc_freq = get_u32(bytes, 5)?;
        let min_length_byte = get_byte(bytes, 9)?;
        let max_length_byte = get_byte(bytes, 10)?;
        let max_weight = get_f32(bytes, 11)?;
        let max_wol = get_f32(bytes, 15)?;
        let tail = &bytes[(1 + STRUCT_SIZE) as usize..];
        let postings = match magic {
            0 => {
                if tail.len() != 8 {
                    return Err(TableError::FormatError(format!(
                        "TermInfo offset postings tail is {} bytes, expected 8",
                        tail.len()
                    )));
                }
                Postings::Offset(get_i64(tail, 0)?)
            }
            1 => {
                if tail.len() < 4 {
                    return Err(TableError::FormatError("TermInfo inline postings tail missing count".to_string()));
                }
                let count = get_u32(tail, 0)? as usize;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    items.push(get_i64(tail, 4 + (i as u64) * 8)?);
                }
                Postings::Inline(items)
            }
            other => return Err(TableError::FormatError(format!("unknown TermInfo postings tag {}", other))),
        };
        Ok(TermInfo {
            weight,
            doc_freq,
            min_length_byte,
            max_length_byte,
            max_weight,
            max_wol,
            postings,
        })
    }

    /// Reads just the weight out of a raw `TermInfo` record, for
    /// `TermIndexReader::frequency` without decoding postings.
    pub(crate) fn read_frequency(data: &[u8], datapos: u64) -> Result<f32> {
        get_f32(data, datapos + 1)
    }

    pub(crate) fn read_doc_freq(data: &[u8], datapos: u64) -> Result<u32> {
        get_u32(data, datapos + 1 + 4)
    }

    pub(crate) fn read_min_and_max_length(data: &[u8], datapos: u64) -> Result<(u32, u32)> {
        let lenpos = datapos + 1 + 4 + 4;
        let ml = crate::length::byte_to_length(get_byte(data, lenpos)?);
        let xl = crate::length::byte_to_length(get_byte(data, lenpos + 1)?);
        Ok((ml, xl))
    }

    pub(crate) fn read_max_weight(data: &[u8], datapos: u64) -> Result<f32> {
        get_f32(data, datapos + 1 + 4 + 4 + 2)
    }

    pub(crate) fn read_max_wol(data: &[u8], datapos: u64) -> Result<f32> {
        get_f32(data, datapos + 1 + 4 + 4 + 2 + 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_offset_postings() {
        let ti = TermInfo::new(1.5, 7, 3, 42, 9.5, 0.25, Postings::Offset(1024));
        let bytes = ti.to_bytes();
        let back = TermInfo::from_bytes(&bytes).unwrap();
        assert_eq!(ti, back);
    }

    #[test]
    fn round_trips_inline_postings() {
        let ti = TermInfo::new(0.0, 0, 0, 0, 0.0, 0.0, Postings::Inline(vec![1, 2, 3]));
        let bytes = ti.to_bytes();
        let back = TermInfo::from_bytes(&bytes).unwrap();
        assert_eq!(ti, back);
    }

    #[test]
    fn lazy_accessors_match_full_decode() {
        let ti = TermInfo::new(2.5, 11, 5, 80, 4.0, 1.25, Postings::Offset(42));
        let bytes = ti.to_bytes();
        assert_eq!(TermInfo::read_frequency(&bytes, 0).unwrap(), ti.frequency());
        assert_eq!(TermInfo::read_doc_freq(&bytes, 0).unwrap(), ti.doc_freq);
        assert_eq!(TermInfo::read_min_and_max_length(&bytes, 0).unwrap(), (ti.min_length(), ti.max_length()));
        assert_eq!(TermInfo::read_max_weight(&bytes, 0).unwrap(), ti.max_weight());
        assert_eq!(TermInfo::read_max_wol(&bytes, 0).unwrap(), ti.max_wol());
    }

    #[test]
    fn add_block_widens_summary() {
        let mut ti = TermInfo::default();
        ti.add_block(1.0, 2, 10, 20, 0.5, 0.1);
        ti.add_block(2.0, 3, 5, 30, 0.8, 0.05);
        assert_eq!(ti.doc_freq, 5);
        assert!((ti.weight - 3.0).abs() < f32::EPSILON);
        assert_eq!(ti.min_length(), 5);
        assert_eq!(ti.max_length(), 30);
        assert!((ti.max_weight - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut bytes = TermInfo::default().to_bytes();
        bytes[0] = 9;
        assert!(matches!(TermInfo::from_bytes(&bytes), Err(TableError::FormatError(_))));
    }
}
