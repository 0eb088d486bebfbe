//! Object streams (`/Type /ObjStm`).
//!
//! An object stream packs many small objects into one compressed stream: a
//! header of `/N` `(objid offset)` pairs followed by the member bodies at
//! `/First`-relative offsets. Members are located through type-2 xref slots
//! as `(container id, index)`.
//!
//! Mutating a member means rewriting the whole container: the header is
//! regenerated and every member re-serialized, so offsets stay consistent.

use crate::error::{Error, Result};
use crate::grammar;
use crate::object::{Dictionary, Value};
use crate::scanner::{Atom, Scanner, SliceSource};
use bytes::Bytes;

/// A parsed object stream.
#[derive(Debug)]
pub struct ObjectStream {
    first: usize,
    pairs: Vec<(u32, usize)>,
    data: Bytes,
}

impl ObjectStream {
    /// Parse a decoded object stream using its dictionary's `/N` and
    /// `/First` entries.
    pub fn parse(dict: &Dictionary, decoded: Vec<u8>) -> Result<Self> {
        let n = dict
            .get("N")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Decode("object stream without /N".into()))?
            as usize;
        let first = dict
            .get("First")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Decode("object stream without /First".into()))?
            as usize;
        if first > decoded.len() {
            return Err(Error::Decode(format!(
                "/First {} beyond stream length {}",
                first,
                decoded.len()
            )));
        }

        let header = &decoded[..first];
        let mut numbers = Vec::with_capacity(n * 2);
        for token in header
            .split(|&b| crate::charclass::is_whitespace(b))
            .filter(|t| !t.is_empty())
        {
            let value: u64 = std::str::from_utf8(token)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    Error::Decode(format!(
                        "bad object stream header token {:?}",
                        String::from_utf8_lossy(token)
                    ))
                })?;
            numbers.push(value);
        }
        if numbers.len() < n * 2 {
            return Err(Error::Decode(format!(
                "object stream header holds {} numbers, expected {}",
                numbers.len(),
                n * 2
            )));
        }

        let pairs = numbers
            .chunks_exact(2)
            .take(n)
            .map(|pair| (pair[0] as u32, pair[1] as usize))
            .collect();

        Ok(ObjectStream {
            first,
            pairs,
            data: Bytes::from(decoded),
        })
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the stream holds no members.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Member ids in header order.
    pub fn member_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.pairs.iter().map(|&(id, _)| id)
    }

    /// Index of the member with the given id.
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.pairs.iter().position(|&(mid, _)| mid == id)
    }

    /// Raw bytes of the member at `index`.
    pub fn member_bytes(&self, index: usize) -> Result<&[u8]> {
        let &(_, offset) = self
            .pairs
            .get(index)
            .ok_or_else(|| Error::Decode(format!("member index {} out of range", index)))?;
        let start = self.first + offset;
        if start > self.data.len() {
            return Err(Error::Decode(format!(
                "member offset {} beyond stream length {}",
                start,
                self.data.len()
            )));
        }
        let end = self
            .pairs
            .get(index + 1)
            .map(|&(_, next)| self.first + next)
            .unwrap_or(self.data.len())
            .min(self.data.len());
        Ok(&self.data[start..end.max(start)])
    }

    /// Parse the member at `index` into a value.
    pub fn member_value(&self, index: usize) -> Result<Value> {
        let bytes = self.member_bytes(index)?;
        let g = grammar::pdf();
        let mut scanner = Scanner::new(g.grammar(), g.root());
        let mut src = SliceSource::new(bytes);
        if let Some(atom) = scanner.pop_result(&mut src) {
            return Value::from_atom(&atom);
        }
        // bare numbers (and lone keywords) starve the scanner against the
        // end of the slice; classify the trimmed bytes directly
        let trimmed: Vec<u8> = bytes
            .iter()
            .copied()
            .filter(|&b| !crate::charclass::is_whitespace(b))
            .collect();
        Value::from_atom(&Atom::Lexeme(trimmed))
    }

    /// Rebuild the stream with some members replaced. Returns the new
    /// `(/N, /First, payload)` triple.
    pub fn rebuild(&self, replacements: &[(u32, Value)]) -> Result<(i64, i64, Vec<u8>)> {
        let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(self.pairs.len());
        for (index, &(id, _)) in self.pairs.iter().enumerate() {
            match replacements.iter().find(|(rid, _)| *rid == id) {
                Some((_, value)) => bodies.push(value.to_bytes()),
                None => bodies.push(self.member_bytes(index)?.to_vec()),
            }
        }

        let mut header = Vec::new();
        let mut offset = 0usize;
        for (&(id, _), body) in self.pairs.iter().zip(&bodies) {
            header.extend_from_slice(format!("{} {} ", id, offset).as_bytes());
            offset += body.len() + 1;
        }

        let first = header.len();
        let mut payload = header;
        for body in &bodies {
            payload.extend_from_slice(body);
            payload.push(b' ');
        }
        Ok((self.pairs.len() as i64, first as i64, payload))
    }
}
