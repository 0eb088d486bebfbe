//! Cross-reference tables.
//!
//! An [`XTable`] is a dense array indexed by object id; each slot records
//! whether the object is free, used at a byte offset, or stored inside a
//! compressed object stream. Both the text form (`xref` subsections with
//! 20-byte rows) and the binary form (`/Type /XRef` streams with `/W`-typed
//! rows) parse into and serialize from the same model.
//!
//! One *master* table (the output view) is mutated as objects are rewritten,
//! deleted or appended; the chain of input tables (one per revision) drives
//! iteration and lookups of older definitions.

use crate::error::{Error, Result};
use crate::grammar::{self, tag};
use crate::object::{Dictionary, Value};
use crate::scanner::{parse_slice, Atom};

/// Slot type in a cross-reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Free entry: `field2` is the next free id, `field3` the generation
    Free,
    /// In use: `field2` is the byte offset, `field3` the generation
    Used,
    /// In an object stream: `field2` is the container id, `field3` the index
    Compressed,
}

/// One cross-reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XSlot {
    /// Slot type
    pub kind: SlotKind,
    /// Offset, next-free id, or container id (see [`SlotKind`])
    pub field2: u64,
    /// Generation or index within the container
    pub field3: u32,
}

impl XSlot {
    /// The default free slot (head-of-chain form).
    pub fn free() -> Self {
        XSlot {
            kind: SlotKind::Free,
            field2: 0,
            field3: 65535,
        }
    }

    /// A used slot at `offset`.
    pub fn used(offset: u64, gen: u32) -> Self {
        XSlot {
            kind: SlotKind::Used,
            field2: offset,
            field3: gen,
        }
    }

    /// A compressed slot inside `container` at `index`.
    pub fn compressed(container: u64, index: u32) -> Self {
        XSlot {
            kind: SlotKind::Compressed,
            field2: container,
            field3: index,
        }
    }
}

/// Serialized form of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFormat {
    /// `xref` keyword, subsections and 20-byte rows
    Text,
    /// `/Type /XRef` stream object
    Binary,
}

/// A cross-reference table plus its trailer dictionary.
#[derive(Debug, Clone)]
pub struct XTable {
    slots: Vec<Option<XSlot>>,
    /// File offset of the section this table was read from
    pub pos: u64,
    /// Source form
    pub format: XrefFormat,
    /// Trailer dictionary (the stream dictionary for binary tables)
    pub trailer: Dictionary,
}

impl XTable {
    /// An empty table.
    pub fn new(pos: u64, format: XrefFormat) -> Self {
        XTable {
            slots: Vec::new(),
            pos,
            format,
            trailer: Dictionary::new(),
        }
    }

    /// Capacity (highest id + 1).
    pub fn cap(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Grow to hold at least `cap` ids.
    pub fn grow(&mut self, cap: u32) {
        if self.slots.len() < cap as usize {
            self.slots.resize(cap as usize, None);
        }
    }

    /// Slot for `id`, if bound by this table.
    pub fn get(&self, id: u32) -> Option<XSlot> {
        self.slots.get(id as usize).copied().flatten()
    }

    /// Bind a slot.
    pub fn set(&mut self, id: u32, slot: XSlot) {
        self.grow(id + 1);
        self.slots[id as usize] = Some(slot);
    }

    /// Generation recorded for `id` (0 when unbound).
    pub fn gen_of(&self, id: u32) -> u32 {
        match self.get(id) {
            Some(slot) if slot.kind != SlotKind::Compressed => slot.field3,
            Some(_) => 0,
            None => 0,
        }
    }

    /// Offset recorded for `id` (0 when unbound or not a used slot).
    pub fn offset_of(&self, id: u32) -> u64 {
        match self.get(id) {
            Some(XSlot {
                kind: SlotKind::Used,
                field2,
                ..
            }) => field2,
            _ => 0,
        }
    }

    /// Kind recorded for `id`.
    pub fn kind_of(&self, id: u32) -> Option<SlotKind> {
        self.get(id).map(|s| s.kind)
    }

    /// Ids bound by this table.
    pub fn bound_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.map(|_| id as u32))
    }

    /// Scan for the first free slot at or after `from`, growing the table by
    /// one when every slot is in use. Unbound holes count as free. The
    /// returned id is left marked used.
    pub fn claim_free_slot(&mut self, from: u32) -> u32 {
        let mut id = from.max(1);
        while (id as usize) < self.slots.len() {
            match self.slots[id as usize] {
                Some(XSlot {
                    kind: SlotKind::Free,
                    ..
                })
                | None => break,
                _ => id += 1,
            }
        }
        self.set(id, XSlot::used(0, 0));
        id
    }

    /// Rebuild the free chain: slot 0 heads a singly linked list of free ids
    /// in ascending order, terminated by 0. Unbound holes join the chain.
    pub fn relink_free_chain(&mut self) {
        self.grow(1);
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(XSlot::free());
            }
        }
        let free_ids: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(id, slot)| match slot {
                Some(XSlot {
                    kind: SlotKind::Free,
                    ..
                }) => Some(id as u32),
                _ => None,
            })
            .collect();

        let mut chain = free_ids.clone();
        chain.push(0);
        if let Some(slot) = &mut self.slots[0] {
            slot.field2 = chain[0] as u64;
        }
        for (i, &id) in free_ids.iter().enumerate() {
            if let Some(slot) = &mut self.slots[id as usize] {
                slot.field2 = chain[i + 1] as u64;
            }
        }
    }

    /// Serialize in text form: `xref`, one subsection covering `0 cap`, rows
    /// of exactly 20 bytes.
    pub fn serialize_text(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 20 * self.slots.len());
        out.extend_from_slice(b"xref\n");
        out.extend_from_slice(format!("0 {}\n", self.slots.len()).as_bytes());
        for slot in &self.slots {
            let slot = slot.unwrap_or_else(XSlot::free);
            let (offset, gen, flag) = match slot.kind {
                SlotKind::Free => (slot.field2, slot.field3, 'f'),
                // compressed members have no standalone offset in text form;
                // a containerized object downgraded to text is emitted free
                SlotKind::Compressed => (0, 0, 'f'),
                SlotKind::Used => (slot.field2, slot.field3, 'n'),
            };
            out.extend_from_slice(format!("{:010} {:05} {} \n", offset, gen, flag).as_bytes());
        }
        out
    }

    /// Serialize in binary form: the row bytes plus the `/W` array used.
    pub fn serialize_binary_rows(&self) -> (Vec<u8>, [usize; 3]) {
        let max_f2 = self
            .slots
            .iter()
            .flatten()
            .map(|s| s.field2)
            .max()
            .unwrap_or(0);
        let mut w2 = 1;
        while (max_f2 >> (8 * w2)) != 0 {
            w2 += 1;
        }
        let w = [1usize, w2, 2];

        let mut rows = Vec::with_capacity(self.slots.len() * (1 + w2 + 2));
        for slot in &self.slots {
            let slot = slot.unwrap_or_else(XSlot::free);
            let ty: u8 = match slot.kind {
                SlotKind::Free => 0,
                SlotKind::Used => 1,
                SlotKind::Compressed => 2,
            };
            rows.push(ty);
            for i in (0..w2).rev() {
                rows.push((slot.field2 >> (8 * i)) as u8);
            }
            rows.push((slot.field3 >> 8) as u8);
            rows.push(slot.field3 as u8);
        }
        (rows, w)
    }
}

/// Merge a revision chain (newest first) into a master table: older entries
/// bind only ids the newer revisions left unbound.
pub fn merge_chain(newest_first: &[XTable]) -> XTable {
    let mut master = match newest_first.first() {
        Some(t) => t.clone(),
        None => XTable::new(0, XrefFormat::Text),
    };
    for older in newest_first.iter().skip(1) {
        for id in older.bound_ids() {
            if master.get(id).is_none() {
                master.set(id, older.get(id).expect("bound id"));
            }
        }
    }
    // /Size may exceed the bound range; reserve the slots
    if let Some(size) = master.trailer.get("Size").and_then(Value::as_i64) {
        master.grow(size as u32);
    }
    master
}

struct Tokens<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(data: &'a [u8]) -> Self {
        Tokens { data, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self
            .data
            .get(self.pos)
            .is_some_and(|&b| crate::charclass::is_whitespace(b))
        {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Option<&'a [u8]> {
        self.skip_ws();
        let start = self.pos;
        while self
            .data
            .get(self.pos)
            .is_some_and(|&b| !crate::charclass::is_whitespace(b))
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.data[start..self.pos])
    }

    fn peek_keyword(&mut self, kw: &[u8]) -> bool {
        self.skip_ws();
        self.data[self.pos..].starts_with(kw)
    }
}

fn parse_u64(token: &[u8]) -> Option<u64> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

/// Parse a text cross-reference section from a fetched buffer.
///
/// Returns `Ok(None)` when the buffer ends before the trailer dictionary is
/// complete (the caller retries with a larger branch).
pub fn parse_text_xref(data: &[u8], pos: u64) -> Result<Option<XTable>> {
    let mut table = XTable::new(pos, XrefFormat::Text);
    let mut toks = Tokens::new(data);

    match toks.next_token() {
        Some(b"xref") => {}
        Some(other) => {
            return Err(Error::CorruptXref(format!(
                "expected xref keyword, found {:?}",
                String::from_utf8_lossy(other)
            )));
        }
        None => return Ok(None),
    }

    loop {
        if toks.peek_keyword(b"trailer") {
            toks.next_token();
            break;
        }
        let Some(first_tok) = toks.next_token() else {
            return Ok(None);
        };
        let Some(count_tok) = toks.next_token() else {
            return Ok(None);
        };
        let (Some(first), Some(count)) = (parse_u64(first_tok), parse_u64(count_tok)) else {
            return Err(Error::CorruptXref(format!(
                "bad subsection header {:?} {:?}",
                String::from_utf8_lossy(first_tok),
                String::from_utf8_lossy(count_tok)
            )));
        };
        if count > 10_000_000 {
            return Err(Error::CorruptXref(format!(
                "implausible subsection count {}",
                count
            )));
        }

        for i in 0..count {
            let (Some(offset_tok), Some(gen_tok), Some(flag_tok)) =
                (toks.next_token(), toks.next_token(), toks.next_token())
            else {
                return Ok(None);
            };
            let id = (first + i) as u32;
            let offset = parse_u64(offset_tok);
            let gen = parse_u64(gen_tok);
            let slot = match (offset, gen, flag_tok.first()) {
                (Some(offset), Some(gen), Some(b'n')) => XSlot::used(offset, gen as u32),
                (Some(next), Some(gen), Some(b'f')) => XSlot {
                    kind: SlotKind::Free,
                    field2: next,
                    field3: gen as u32,
                },
                _ => {
                    log::warn!("malformed xref row for object {}; treating as free", id);
                    XSlot::free()
                }
            };
            table.set(id, slot);
        }
    }

    // the trailer dictionary follows
    let g = grammar::pdf();
    let (atom, outgrown) = parse_slice(g.grammar(), g.root(), &data[toks.pos..]);
    let Some(atom) = atom else {
        return if outgrown {
            Ok(None)
        } else {
            Err(Error::CorruptXref("unreadable trailer dictionary".into()))
        };
    };
    let dict_atom = match &atom {
        Atom::Complex(tag::DICT, _) => &atom,
        _ => {
            return Err(Error::CorruptXref(format!(
                "trailer is not a dictionary ({:?})",
                atom.tag()
            )));
        }
    };
    let Value::Dictionary(trailer) = Value::from_atom(dict_atom)? else {
        return Err(Error::CorruptXref("trailer is not a dictionary".into()));
    };
    if let Some(size) = trailer.get("Size").and_then(Value::as_i64) {
        table.grow(size as u32);
    }
    table.trailer = trailer;
    Ok(Some(table))
}

/// Parse a binary cross-reference stream from its (already decoded) row data
/// and stream dictionary.
pub fn parse_binary_xref(dict: Dictionary, decoded: &[u8], pos: u64) -> Result<XTable> {
    match dict.get("Type").and_then(Value::as_name) {
        Some("XRef") => {}
        other => {
            return Err(Error::CorruptXref(format!(
                "xref stream with /Type {:?}",
                other
            )));
        }
    }

    let w = dict
        .get("W")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::CorruptXref("xref stream without /W".into()))?;
    if w.len() != 3 {
        return Err(Error::CorruptXref(format!("bad /W length {}", w.len())));
    }
    let w: Vec<usize> = w
        .iter()
        .map(|v| v.as_i64().unwrap_or(0) as usize)
        .collect();
    let entry_size = w[0] + w[1] + w[2];
    if entry_size == 0 {
        return Err(Error::CorruptXref("zero-width xref rows".into()));
    }

    let size = dict
        .get("Size")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::CorruptXref("xref stream without /Size".into()))? as u32;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Value::as_array) {
        Some(index) => index
            .chunks(2)
            .map(|pair| {
                let start = pair.first().and_then(Value::as_i64).unwrap_or(0) as u32;
                let count = pair.get(1).and_then(Value::as_i64).unwrap_or(0) as u32;
                (start, count)
            })
            .collect(),
        None => vec![(0, size)],
    };

    let mut table = XTable::new(pos, XrefFormat::Binary);
    let mut data_pos = 0usize;
    for (start, count) in ranges {
        for i in 0..count {
            if data_pos + entry_size > decoded.len() {
                return Err(Error::CorruptXref("truncated xref stream data".into()));
            }
            let row = &decoded[data_pos..data_pos + entry_size];
            data_pos += entry_size;

            let ty = if w[0] > 0 { read_int(&row[..w[0]]) } else { 1 };
            let f2 = read_int(&row[w[0]..w[0] + w[1]]);
            let f3 = read_int(&row[w[0] + w[1]..]);

            let slot = match ty {
                0 => XSlot {
                    kind: SlotKind::Free,
                    field2: f2,
                    field3: f3 as u32,
                },
                1 => XSlot::used(f2, f3 as u32),
                2 => XSlot::compressed(f2, f3 as u32),
                t => {
                    return Err(Error::CorruptXref(format!("xref row type {}", t)));
                }
            };
            table.set(start + i, slot);
        }
    }

    table.grow(size);
    table.trailer = dict;
    Ok(table)
}

/// Big-endian integer over a variable-width field.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_XREF: &[u8] = b"xref\n0 3\n0000000000 65535 f \n0000000018 00000 n \n0000000154 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n200\n%%EOF\n";

    #[test]
    fn test_parse_text_xref() {
        let table = parse_text_xref(TEXT_XREF, 160).unwrap().unwrap();
        assert_eq!(table.cap(), 3);
        assert_eq!(table.kind_of(0), Some(SlotKind::Free));
        assert_eq!(table.offset_of(1), 18);
        assert_eq!(table.offset_of(2), 154);
        assert_eq!(table.trailer.get("Size").unwrap().as_i64(), Some(3));
        assert_eq!(table.pos, 160);
    }

    #[test]
    fn test_parse_text_xref_incomplete() {
        // cut inside the rows, then inside the trailer
        assert!(parse_text_xref(&TEXT_XREF[..30], 0).unwrap().is_none());
        assert!(parse_text_xref(&TEXT_XREF[..75], 0).unwrap().is_none());
    }

    #[test]
    fn test_parse_text_xref_multiple_subsections() {
        let data = b"xref\n0 1\n0000000000 65535 f \n5 2\n0000000200 00000 n \n0000000300 00000 n \ntrailer\n<< /Size 7 >>\n";
        let table = parse_text_xref(data, 0).unwrap().unwrap();
        assert_eq!(table.offset_of(5), 200);
        assert_eq!(table.offset_of(6), 300);
        assert!(table.get(3).is_none());
        assert_eq!(table.cap(), 7);
    }

    #[test]
    fn test_parse_text_xref_bad_keyword() {
        assert!(parse_text_xref(b"notxref\n", 0).is_err());
    }

    #[test]
    fn test_binary_xref_round_trip_model() {
        let mut dict = Dictionary::new();
        dict.set("Type", Value::name("XRef"));
        dict.set("Size", Value::integer(4));
        dict.set(
            "W",
            Value::Array(vec![
                Value::integer(1),
                Value::integer(2),
                Value::integer(2),
            ]),
        );
        // rows: free head, two used, one compressed member of container 2
        let decoded = [
            0u8, 0, 0, 0xFF, 0xFF, // 0: free
            1, 0, 18, 0, 0, // 1: used @18
            1, 0, 200, 0, 0, // 2: used @200
            2, 0, 2, 0, 1, // 3: in container 2, index 1
        ];
        let table = parse_binary_xref(dict, &decoded, 99).unwrap();
        assert_eq!(table.offset_of(1), 18);
        assert_eq!(table.kind_of(3), Some(SlotKind::Compressed));
        assert_eq!(table.get(3).unwrap().field2, 2);
        assert_eq!(table.format, XrefFormat::Binary);
    }

    #[test]
    fn test_merge_chain_prefers_newest() {
        let mut newest = XTable::new(100, XrefFormat::Text);
        newest.set(1, XSlot::used(500, 0));
        let mut oldest = XTable::new(10, XrefFormat::Text);
        oldest.set(1, XSlot::used(18, 0));
        oldest.set(2, XSlot::used(60, 0));

        let master = merge_chain(&[newest, oldest]);
        assert_eq!(master.offset_of(1), 500);
        assert_eq!(master.offset_of(2), 60);
    }

    #[test]
    fn test_claim_free_slot_and_chain() {
        let mut table = XTable::new(0, XrefFormat::Text);
        table.set(0, XSlot::free());
        table.set(1, XSlot::used(10, 0));
        table.set(2, XSlot::free());
        table.set(3, XSlot::used(20, 0));

        let id = table.claim_free_slot(1);
        assert_eq!(id, 2);
        assert_eq!(table.kind_of(2), Some(SlotKind::Used));

        // next claim grows the table
        let id = table.claim_free_slot(id);
        assert_eq!(id, 4);
        assert_eq!(table.cap(), 5);
    }

    #[test]
    fn test_relink_free_chain() {
        let mut table = XTable::new(0, XrefFormat::Text);
        table.set(0, XSlot::free());
        table.set(1, XSlot::used(10, 0));
        table.set(2, XSlot::free());
        table.set(3, XSlot::free());
        table.relink_free_chain();

        assert_eq!(table.get(0).unwrap().field2, 2);
        assert_eq!(table.get(2).unwrap().field2, 3);
        assert_eq!(table.get(3).unwrap().field2, 0);
    }

    #[test]
    fn test_serialize_text_rows_are_20_bytes() {
        let mut table = XTable::new(0, XrefFormat::Text);
        table.set(0, XSlot::free());
        table.set(1, XSlot::used(18, 0));
        let text = table.serialize_text();
        let lines: Vec<&[u8]> = text.split(|&b| b == b'\n').collect();
        assert_eq!(lines[0], b"xref");
        assert_eq!(lines[1], b"0 2");
        assert_eq!(lines[2].len(), 19); // + newline = 20
        assert_eq!(lines[2], &b"0000000000 65535 f "[..]);
        assert_eq!(lines[3], &b"0000000018 00000 n "[..]);
    }

    #[test]
    fn test_serialize_binary_rows() {
        let mut table = XTable::new(0, XrefFormat::Binary);
        table.set(0, XSlot::free());
        table.set(1, XSlot::used(0x0102, 0));
        let (rows, w) = table.serialize_binary_rows();
        assert_eq!(w, [1, 2, 2]);
        assert_eq!(rows.len(), 2 * 5);
        assert_eq!(&rows[5..], &[1, 0x01, 0x02, 0, 0]);
    }
}
