//! The parser / cross-reference engine.
//!
//! Orchestrates a mutation pass: locates the cross-reference chain (text and
//! binary forms, chained revisions, linearized layouts), resolves object
//! locations (including members of compressed object streams), and advances
//! through the input once, handing each live object to the caller before
//! committing it to the output as a pass-through, a rewrite, or a deletion.
//!
//! The input is read in strictly increasing offset order during iteration;
//! the output is written in strictly increasing order. Once bytes past an
//! offset have been written, nothing before that offset can change.

use crate::decoders::{decode_chain, DecodeParams};
use crate::encryption::StandardDecryptor;
use crate::error::{Error, Result};
use crate::grammar::{self, tag};
use crate::object::{Dictionary, ObjectRef, Value};
use crate::objstm::ObjectStream;
use crate::scanner::{Atom, Scanner, SliceSource};
use crate::twinstream::{StreamMode, TwinStream};
use crate::xref::{merge_chain, parse_binary_xref, parse_text_xref, SlotKind, XSlot, XTable, XrefFormat};
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io::{Read, Seek, Write};

bitflags::bitflags! {
    /// Rewrite decisions recorded on an object between iteration and commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        /// Do not emit the object at all
        const SKIP_OBJECT = 1 << 0;
        /// Do not emit the object's stream
        const SKIP_STREAM = 1 << 1;
        /// Free the object's slot and skip it
        const DELETE = 1 << 2;
        /// Replace the stream with override bytes
        const OVERRIDE_STREAM = 1 << 3;
        /// Re-serialize the definition instead of byte-copying
        const OVERRIDE_DEF = 1 << 4;
    }
}

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// A regular `N G obj` envelope
    Regular,
    /// A member of a compressed object stream
    CompressedMember,
    /// The trailer dictionary
    Trailer,
}

/// Parser progress through the current object envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Base,
    ObjectDefinition,
    ObjectAppendix,
    ObjectPostStream,
}

/// One object under inspection or mutation.
#[derive(Debug)]
pub struct PdfObject {
    id: u32,
    gen: u16,
    class: ObjectClass,
    def: Value,
    has_stream: bool,
    extracted: Option<Bytes>,
    ovr_stream: Option<Vec<u8>>,
    flags: ObjectFlags,
}

impl PdfObject {
    fn new(id: u32, gen: u16, class: ObjectClass, def: Value) -> Self {
        PdfObject {
            id,
            gen,
            class,
            def,
            has_stream: false,
            extracted: None,
            ovr_stream: None,
            flags: ObjectFlags::empty(),
        }
    }

    /// Object number.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Generation number.
    pub fn gen(&self) -> u16 {
        self.gen
    }

    /// Where the object lives.
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// The definition tree, read-only.
    pub fn def(&self) -> &Value {
        &self.def
    }

    /// Mutable definition access; the object will be re-serialized.
    pub fn def_mut(&mut self) -> &mut Value {
        self.flags.insert(ObjectFlags::OVERRIDE_DEF);
        &mut self.def
    }

    /// Dictionary view of the definition, when it is one.
    pub fn dict(&self) -> Option<&Dictionary> {
        self.def.as_dict()
    }

    /// Mutable dictionary access; the object will be re-serialized.
    pub fn dict_mut(&mut self) -> Option<&mut Dictionary> {
        self.flags.insert(ObjectFlags::OVERRIDE_DEF);
        self.def.as_dict_mut()
    }

    /// Whether the input object carries a stream.
    pub fn has_stream(&self) -> bool {
        self.has_stream
    }

    /// The decoded stream, when it has been fetched.
    pub fn stream(&self) -> Option<&[u8]> {
        self.extracted.as_deref()
    }

    /// Mark the object deleted: its slot is freed and nothing is emitted.
    pub fn delete(&mut self) {
        self.flags.insert(ObjectFlags::DELETE);
    }

    /// Drop the stream while keeping the object.
    pub fn drop_stream(&mut self) {
        self.flags.insert(ObjectFlags::SKIP_STREAM | ObjectFlags::OVERRIDE_DEF);
        if let Some(d) = self.def.as_dict_mut() {
            d.remove("Length");
            d.remove("Filter");
            d.remove("DecodeParms");
        }
    }

    /// Whether any rewrite decision was recorded.
    pub fn is_mutated(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Outcome of a mutation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorOutcome {
    /// Keep going
    Done,
    /// Abort the pass; the output must be treated as invalid
    Failure,
    /// Stop invoking callbacks and finish the pass from the master state
    SkipRest,
    /// Drop this callback but finish the pass
    Unload,
}

struct Envelope {
    gen: u16,
    def: Value,
    /// Absolute offset of the raw stream data, when a stream follows
    stream_data: Option<u64>,
}

/// The streaming parser.
pub struct Parser<R: Read + Seek, W: Write> {
    stream: TwinStream<R, W>,
    scanner: Scanner,
    mxt: XTable,
    cxt: XTable,
    domain: VecDeque<XTable>,
    trailer: Dictionary,
    root_ref: Option<ObjectRef>,
    info_ref: Option<ObjectRef>,
    encrypt_ref: Option<ObjectRef>,
    decryptor: Option<StandardDecryptor>,
    state: ParseState,
    construct: Option<PdfObject>,
    obid: u32,
    genid: u16,
    stream_len: u64,
    oboffset: u64,
    cache: HashMap<u32, Value>,
    inserts: VecDeque<PdfObject>,
    appends: VecDeque<PdfObject>,
    member_edits: HashMap<u32, Vec<(u32, Value)>>,
    skip_set: BTreeSet<u32>,
    xref_new_iter: u32,
    linearized: bool,
    primed: bool,
    done: bool,
}

impl<R: Read + Seek, W: Write> Parser<R, W> {
    /// Open a mutation pass over the given input and output.
    pub fn open(reader: R, writer: W) -> Result<Self> {
        Self::open_with_password(reader, writer, b"")
    }

    /// Open a mutation pass over an (optionally) encrypted document.
    pub fn open_with_password(reader: R, writer: W, password: &[u8]) -> Result<Self> {
        let mut stream = TwinStream::new(reader, writer);

        // locate `startxref N` by scanning backward from EOF
        stream.set_mode(StreamMode::Reverse)?;
        let startxref = find_startxref(&mut stream)?;

        // follow the revision chain
        stream.set_mode(StreamMode::Random)?;
        let mut tables = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(startxref);
        while let Some(off) = next {
            if !seen.insert(off) || tables.len() > 100 {
                return Err(Error::CorruptXref("circular or runaway /Prev chain".into()));
            }
            let table = read_xref_section(&mut stream, off)?;
            next = table
                .trailer
                .get("Prev")
                .and_then(Value::as_i64)
                .map(|v| v as u64);
            tables.push(table);
        }

        let mxt = merge_chain(&tables);
        let mut trailer = tables[0].trailer.clone();
        trailer.remove("Prev");
        let root_ref = trailer.get("Root").and_then(Value::as_reference);
        let info_ref = trailer.get("Info").and_then(Value::as_reference);
        let encrypt_ref = trailer.get("Encrypt").and_then(Value::as_reference);

        // iteration domains in file order
        tables.sort_by_key(|t| t.pos);
        let mut domain: VecDeque<XTable> = tables.into();
        let cxt = domain.pop_front().expect("at least one xref table");

        let g = grammar::pdf();
        let mut parser = Parser {
            stream,
            scanner: Scanner::new(g.grammar(), g.root()),
            mxt,
            cxt,
            domain,
            trailer,
            root_ref,
            info_ref,
            encrypt_ref,
            decryptor: None,
            state: ParseState::Base,
            construct: None,
            obid: 0,
            genid: 0,
            stream_len: 0,
            oboffset: 0,
            cache: HashMap::new(),
            inserts: VecDeque::new(),
            appends: VecDeque::new(),
            member_edits: HashMap::new(),
            skip_set: BTreeSet::new(),
            xref_new_iter: 1,
            linearized: false,
            primed: false,
            done: false,
        };

        // set up decryption before any output exists so unsupported schemes
        // fail the pass cleanly
        if let Some(enc) = parser.encrypt_ref {
            let def = parser.locate_definition(enc.id, true)?;
            let Value::Dictionary(enc_dict) = def else {
                return Err(Error::CorruptXref("/Encrypt is not a dictionary".into()));
            };
            let file_id = parser
                .trailer
                .get("ID")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_string)
                .map(|s| s.decoded())
                .unwrap_or_default();
            parser.decryptor = Some(StandardDecryptor::from_encrypt_dict(
                &enc_dict, &file_id, password,
            )?);
        }

        parser.stream.set_mode(StreamMode::ReadWrite)?;

        // the version comment survives even when the first object turns out
        // to be a deprecated copy whose bytes get discarded
        let header_len = {
            let head = parser.stream.fetch_branch(0, 64)?;
            if head.starts_with(b"%PDF") {
                head.iter()
                    .position(|&b| b == b'\n' || b == b'\r')
                    .map(|i| i + 1)
                    .unwrap_or(0)
            } else {
                0
            }
        };
        if header_len > 0 {
            parser.stream.pass_through_to(header_len as u64)?;
        }

        // always take the first object: it moves us past the header cruft
        // and reveals linearization
        if parser.iterate()? {
            let mark = parser.scanner.result_offset();
            parser.stream.prune_to(mark)?;
            parser.scanner.rebase(parser.stream.input_offset());
            parser.construct_object()?;
            if let Some(ob) = &parser.construct {
                if ob.dict().map(|d| d.contains("Linearized")).unwrap_or(false) {
                    log::debug!("linearized document: extra xref sections will be ignored");
                    parser.linearized = true;
                }
            }
            parser.primed = true;
        }

        Ok(parser)
    }

    /// The document catalog reference from the trailer.
    pub fn root_ref(&self) -> Option<ObjectRef> {
        self.root_ref
    }

    /// The document info reference from the trailer.
    pub fn info_ref(&self) -> Option<ObjectRef> {
        self.info_ref
    }

    /// Whether the document is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypt_ref.is_some()
    }

    /// The working trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Id of the object currently in front of the parser.
    pub fn current_id(&self) -> u32 {
        self.obid
    }

    /// Object ids skipped as deprecated copies that the master still
    /// considers live. Must be empty at the end of a pass.
    pub fn skipped(&self) -> impl Iterator<Item = u32> + '_ {
        self.skip_set.iter().copied()
    }

    // --- commits ----------------------------------------------------------

    fn commit_pass(&mut self) -> Result<()> {
        let upto = self.scanner.position();
        self.stream.pass_through_to(upto)?;
        self.scanner.rebase(self.stream.input_offset());
        Ok(())
    }

    fn commit_discard(&mut self) -> Result<()> {
        let upto = self.scanner.position();
        self.stream.discard_to(upto)?;
        self.scanner.rebase(self.stream.input_offset());
        Ok(())
    }

    // --- object location --------------------------------------------------

    fn lookup_slot(&self, id: u32, master: bool) -> Option<XSlot> {
        if master {
            return self.mxt.get(id);
        }
        self.cxt
            .get(id)
            .or_else(|| self.domain.iter().find_map(|t| t.get(id)))
            .or_else(|| self.mxt.get(id))
    }

    /// Resolve the definition tree for an object, fetching compressed
    /// members out of their containers on demand. Definitions are cached by
    /// id after the first lookup.
    pub fn locate_definition(&mut self, id: u32, master: bool) -> Result<Value> {
        if id == 0 {
            return Err(Error::ObjectNotFound(0, 0));
        }
        if let Some(ob) = &self.construct {
            if ob.id == id {
                return Ok(ob.def.clone());
            }
        }
        if let Some(v) = self.cache.get(&id) {
            return Ok(v.clone());
        }

        let slot = self
            .lookup_slot(id, master)
            .ok_or(Error::ObjectNotFound(id, 0))?;
        let value = match slot.kind {
            SlotKind::Free => return Err(Error::ObjectNotFound(id, 0)),
            SlotKind::Used => {
                let envelope = self.read_envelope_retrying(slot.field2, Some(id))?;
                envelope.def
            }
            SlotKind::Compressed => {
                let container = slot.field2 as u32;
                let index = slot.field3 as usize;
                let stm = self.fetch_object_stream(container, master)?;
                let member = stm.member_value(index).map_err(|e| Error::CorruptObject {
                    id,
                    reason: e.to_string(),
                })?;
                if stm.member_ids().nth(index) != Some(id) {
                    log::warn!(
                        "object stream {} lists a different id at index {}",
                        container,
                        index
                    );
                }
                member
            }
        };
        self.cache.insert(id, value.clone());
        Ok(value)
    }

    fn fetch_object_stream(&mut self, container: u32, master: bool) -> Result<ObjectStream> {
        let slot = self
            .lookup_slot(container, master)
            .ok_or(Error::ObjectNotFound(container, 0))?;
        if slot.kind != SlotKind::Used {
            return Err(Error::CorruptObject {
                id: container,
                reason: "object stream container is not a regular object".into(),
            });
        }
        let envelope = self.read_envelope_retrying(slot.field2, Some(container))?;
        let Some(data_off) = envelope.stream_data else {
            return Err(Error::CorruptObject {
                id: container,
                reason: "object stream container has no stream".into(),
            });
        };
        let dict = match &envelope.def {
            Value::Dictionary(d) => d.clone(),
            _ => {
                return Err(Error::CorruptObject {
                    id: container,
                    reason: "object stream container is not a dictionary".into(),
                });
            }
        };
        let len = self.resolve_length(&dict)? as usize;
        let mut raw = self.stream.fetch_branch(data_off, len)?.to_vec();
        if raw.len() < len {
            return Err(Error::CorruptObject {
                id: container,
                reason: "object stream data is truncated".into(),
            });
        }
        if let Some(dec) = &self.decryptor {
            raw = dec.decrypt_stream(&raw, container, envelope.gen)?;
        }
        let decoded = decode_chain(&raw, &filter_names(&dict), decode_params(&dict).as_ref())?;
        ObjectStream::parse(&dict, decoded).map_err(|e| Error::CorruptObject {
            id: container,
            reason: e.to_string(),
        })
    }

    fn read_envelope_retrying(&mut self, offset: u64, expect: Option<u32>) -> Result<Envelope> {
        read_envelope(&mut self.stream, offset, expect)
    }

    fn resolve_length(&mut self, dict: &Dictionary) -> Result<u64> {
        match dict.get("Length") {
            Some(Value::Number(n)) => Ok(n.as_i64().unwrap_or(0).max(0) as u64),
            Some(Value::Reference(r)) => {
                let id = r.id;
                let def = self.locate_definition(id, false)?;
                def.as_i64().map(|v| v.max(0) as u64).ok_or_else(|| {
                    Error::CorruptObject {
                        id,
                        reason: "stream length object is not a number".into(),
                    }
                })
            }
            Some(_) => Err(Error::CorruptObject {
                id: self.obid,
                reason: "/Length is neither a number nor a reference".into(),
            }),
            None => Ok(0),
        }
    }

    // --- iteration --------------------------------------------------------

    /// Advance past the current xref domain. Returns false when the input is
    /// exhausted (the parser is then done and appended objects are flushed).
    fn iterate_xref_domain(&mut self) -> Result<bool> {
        loop {
            if self.linearized && self.cxt.pos > self.stream.input_offset() {
                return Ok(true);
            }
            let Some(next) = self.domain.pop_front() else {
                self.done = true;
                self.append_objects()?;
                return Ok(false);
            };
            self.cxt = next;
            if self.cxt.pos >= self.stream.input_offset() {
                return Ok(true);
            }
        }
    }

    /// Advance to the next live object.
    ///
    /// Returns true with the object id available through
    /// [`Parser::current_id`]; the caller inspects or mutates it (via
    /// [`Parser::current_object`]) and resumes. Returns false when the input
    /// is exhausted.
    pub fn iterate(&mut self) -> Result<bool> {
        if self.primed {
            self.primed = false;
            return Ok(true);
        }
        if self.done {
            return Ok(false);
        }
        if self.state != ParseState::Base || self.construct.is_some() {
            self.passthrough_object()?;
        }

        // flush deferred constructs queued for insertion at this cursor
        while let Some(next) = self.inserts.pop_front() {
            self.obid = next.id;
            self.genid = next.gen;
            self.stream_len = 0;
            self.oboffset = self.stream.output_offset();
            self.construct = Some(next);
            self.passthrough_object()?;
        }

        loop {
            // we may have passed beyond the current binary xref section
            if self.cxt.format == XrefFormat::Binary
                && self.stream.input_offset() >= self.cxt.pos
                && !self.iterate_xref_domain()?
            {
                return Ok(false);
            }

            // discard everything scanned but unclaimed
            if self.scanner.position() > self.stream.input_offset() {
                self.commit_discard()?;
            }

            let Some(atom) = self.scanner.pop_atom(&mut self.stream) else {
                if let Some(s) = self.scanner.pop_string(&mut self.stream) {
                    log::warn!(
                        "unexpected token {:?} between objects",
                        String::from_utf8_lossy(&s)
                    );
                    continue;
                }
                // input exhausted: drain the remaining domains
                while self.iterate_xref_domain()? {}
                return Ok(false);
            };

            match atom.tag() {
                Some(tag::XREFSUB) => {
                    let running = self.iterate_xref_domain()?;
                    self.passover_text_xref(atom)?;
                    if !running {
                        return Ok(false);
                    }
                }
                Some(tag::STARTXREF) | Some(tag::TRAILER) => {
                    // superseded tail data; the next discard drops it
                }
                Some(tag::OBJ) => {
                    self.oboffset = self.scanner.result_window_offset() as u64
                        + self.stream.output_offset();
                    let id = atom_id(&atom, tag::ID)?;
                    let gen = atom_id(&atom, tag::GEN)? as u16;
                    self.obid = id;
                    self.genid = gen;
                    self.state = ParseState::ObjectDefinition;

                    let mut skip = false;
                    if gen as u32 != self.mxt.gen_of(id) {
                        // a deprecated copy
                        skip = true;
                    } else {
                        let recorded = self.mxt.offset_of(id);
                        let scanned_at = self.stream.input_offset()
                            + self.scanner.result_window_offset() as u64;
                        let delta = self.offset_slack(scanned_at as i64 - recorded as i64);
                        if delta.abs() < 2 {
                            self.skip_set.remove(&id);
                        } else {
                            if recorded > 0 && self.mxt.kind_of(id) != Some(SlotKind::Free) {
                                self.skip_set.insert(id);
                            }
                            skip = true;
                        }
                    }

                    if skip {
                        self.passover_object()?;
                        continue;
                    }
                    if self.member_edits.contains_key(&id) {
                        self.construct_object()?;
                        self.rebuild_container()?;
                    }
                    return Ok(true);
                }
                other => {
                    return Err(Error::InternalAssert(format!(
                        "unexpected composite {:?} at document level",
                        other
                    )));
                }
            }
        }
    }

    /// Compensate for writers whose xref offsets point into the whitespace
    /// around the object header (at most one byte of slack either way).
    fn offset_slack(&self, mut delta: i64) -> i64 {
        let result_off = self.scanner.result_window_offset();
        let mut wsi = 0usize;
        while delta < 0 {
            match self.stream.peek_heap(wsi) {
                Some(b) if crate::charclass::is_whitespace(b) => {
                    delta += 1;
                    wsi += 1;
                }
                _ => break,
            }
        }
        let mut wsi = 1usize;
        while delta > 0 {
            let Some(idx) = result_off.checked_sub(wsi) else {
                break;
            };
            match self.stream.peek_heap(idx) {
                Some(b) if crate::charclass::is_whitespace(b) => {
                    delta -= 1;
                    wsi += 1;
                }
                _ => break,
            }
        }
        delta
    }

    /// Skip over a text xref section: rows are 20 bytes each, subsections
    /// chain until the trailer dictionary closes the section.
    fn passover_text_xref(&mut self, first: Atom) -> Result<()> {
        let mut subsection = Some(first);
        while let Some(sub) = subsection.take() {
            let count = atom_id(&sub, tag::COUNT)? as u64;
            self.scanner.skip(count * 20);
            self.commit_discard()?;

            match self.scanner.pop_atom(&mut self.stream) {
                Some(a) if a.tag() == Some(tag::XREFSUB) => subsection = Some(a),
                Some(a) if a.tag() == Some(tag::TRAILER) => {
                    self.commit_discard()?;
                }
                Some(a) => {
                    return Err(Error::CorruptXref(format!(
                        "unexpected {:?} inside xref section",
                        a.tag()
                    )));
                }
                None => {
                    // tolerated: sectioned file ends right here
                    log::warn!("xref section without trailer");
                }
            }
        }
        Ok(())
    }

    // --- object construction ---------------------------------------------

    /// The current object, constructing it on first access.
    pub fn current_object(&mut self) -> Result<&mut PdfObject> {
        self.construct_object()
    }

    fn construct_object(&mut self) -> Result<&mut PdfObject> {
        if self.construct.as_ref().is_some_and(|c| c.id == self.obid) {
            return Ok(self.construct.as_mut().expect("checked"));
        }
        if self.state != ParseState::ObjectDefinition || self.construct.is_some() {
            return Err(Error::InternalAssert(
                "construct requested outside an object definition".into(),
            ));
        }

        let def = match self.scanner.pop_atom(&mut self.stream) {
            Some(atom) => Value::from_atom(&atom).map_err(|e| Error::CorruptObject {
                id: self.obid,
                reason: e.to_string(),
            })?,
            None => match self.scanner.pop_string(&mut self.stream) {
                Some(s) => {
                    Value::from_atom(&Atom::Lexeme(s)).map_err(|e| Error::CorruptObject {
                        id: self.obid,
                        reason: e.to_string(),
                    })?
                }
                None => {
                    return Err(Error::CorruptObject {
                        id: self.obid,
                        reason: "unreadable object definition".into(),
                    });
                }
            },
        };

        // the encryption dictionary's /Length is a key length, not a stream
        // length
        self.stream_len = 0;
        if self.encrypt_ref.map(|r| r.id) != Some(self.obid) {
            if let Some(dict) = def.as_dict() {
                self.stream_len = self.resolve_length(dict)?;
            }
        }

        let mut ob = PdfObject::new(self.obid, self.genid, ObjectClass::Regular, def);
        match self.scanner.pop_string(&mut self.stream).as_deref() {
            Some(b"stream") => {
                ob.has_stream = true;
                self.state = ParseState::ObjectAppendix;
            }
            Some(b"endobj") => {
                self.state = ParseState::Base;
            }
            other => {
                return Err(Error::CorruptObject {
                    id: self.obid,
                    reason: format!(
                        "expected stream or endobj, found {:?}",
                        other.map(String::from_utf8_lossy)
                    ),
                });
            }
        }
        self.construct = Some(ob);
        Ok(self.construct.as_mut().expect("just set"))
    }

    // --- mutation primitives ---------------------------------------------

    /// Fetch the current object's stream: raw bytes are read once, then
    /// decrypted and run through the `/Filter` chain.
    pub fn fetch_stream(&mut self) -> Result<&[u8]> {
        self.construct_object()?;
        {
            let ob = self.construct.as_ref().expect("constructed");
            if !ob.has_stream {
                return Err(Error::InvalidType {
                    expected: "stream object",
                    found: "stream-less object",
                });
            }
        }
        if self
            .construct
            .as_ref()
            .is_some_and(|ob| ob.extracted.is_some())
        {
            return Ok(self.construct.as_ref().expect("checked").stream().unwrap());
        }
        if self.state != ParseState::ObjectAppendix {
            return Err(Error::InternalAssert(
                "stream fetch after the appendix was consumed".into(),
            ));
        }

        let len = self.stream_len as usize;
        let mut raw = vec![0u8; len];
        let got = self
            .scanner
            .read_stream(&mut self.stream, len, &mut raw)?;
        // the raw bytes are consumed either way
        self.state = ParseState::ObjectPostStream;
        if got < len {
            return Err(Error::CorruptObject {
                id: self.obid,
                reason: format!("stream truncated at {} of {} bytes", got, len),
            });
        }

        let ob = self.construct.as_mut().expect("constructed");
        if let Some(dec) = &self.decryptor {
            raw = dec.decrypt_stream(&raw, ob.id, ob.gen)?;
        }
        let dict = ob.def.as_dict().cloned().unwrap_or_default();
        let filters = filter_names(&dict);
        if filters.len() > 1 {
            log::warn!(
                "object {} chains {} filters; decoding them all",
                ob.id,
                filters.len()
            );
        }
        let decoded = if filters.is_empty() {
            raw
        } else {
            match decode_chain(&raw, &filters, decode_params(&dict).as_ref()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    // keep the raw bytes so the object stays emittable
                    log::warn!("object {} stream failed to decode: {}", ob.id, e);
                    ob.extracted = Some(Bytes::from(raw));
                    return Err(Error::CorruptObject {
                        id: self.obid,
                        reason: e.to_string(),
                    });
                }
            }
        };
        ob.extracted = Some(Bytes::from(decoded));
        Ok(ob.stream().unwrap())
    }

    /// Replace the current object's stream. Unless `pre_encoded` is set, the
    /// filter chain is dropped and `/Length` updated to the plain length.
    pub fn set_stream(&mut self, bytes: Vec<u8>, pre_encoded: bool) -> Result<()> {
        self.construct_object()?;
        let ob = self.construct.as_mut().expect("constructed");
        set_stream_on(ob, bytes, pre_encoded);
        Ok(())
    }

    /// Mark the current object deleted.
    pub fn delete_object(&mut self) -> Result<()> {
        self.construct_object()?.delete();
        Ok(())
    }

    /// Allocate a fresh id and queue the new object for insertion at the
    /// current cursor.
    pub fn create_object_now(&mut self) -> &mut PdfObject {
        self.create_object(false)
    }

    /// Allocate a fresh id and queue the new object for insertion before the
    /// end of the document.
    pub fn create_object_appended(&mut self) -> &mut PdfObject {
        self.create_object(true)
    }

    fn create_object(&mut self, appended: bool) -> &mut PdfObject {
        let id = self.mxt.claim_free_slot(self.xref_new_iter);
        self.xref_new_iter = id;
        let mut ob = PdfObject::new(id, 0, ObjectClass::Regular, Value::Null);
        ob.flags.insert(ObjectFlags::OVERRIDE_DEF);

        if appended {
            self.appends.push_back(ob);
            return self.appends.back_mut().expect("just pushed");
        }
        if self.state != ParseState::Base || self.construct.is_some() {
            self.inserts.push_back(ob);
            return self.inserts.back_mut().expect("just pushed");
        }
        self.obid = id;
        self.genid = 0;
        self.stream_len = 0;
        self.construct = Some(ob);
        self.construct.as_mut().expect("just set")
    }

    /// Materialize a compressed object-stream member for inspection. Edits
    /// go through [`Parser::stage_member_rewrite`]; the member has no
    /// standalone envelope to rewrite.
    pub fn compressed_member(&mut self, id: u32) -> Result<PdfObject> {
        match self.mxt.kind_of(id) {
            Some(SlotKind::Compressed) => {
                let def = self.locate_definition(id, true)?;
                Ok(PdfObject::new(id, 0, ObjectClass::CompressedMember, def))
            }
            Some(_) => Err(Error::InvalidType {
                expected: "compressed object",
                found: "regular object",
            }),
            None => Err(Error::ObjectNotFound(id, 0)),
        }
    }

    /// The trailer as an object record.
    pub fn trailer_object(&self) -> PdfObject {
        PdfObject::new(
            0,
            0,
            ObjectClass::Trailer,
            Value::Dictionary(self.trailer.clone()),
        )
    }

    /// Queue a rewrite of a compressed object-stream member. The container
    /// is rewritten with the updated member when it appears in the input.
    pub fn stage_member_rewrite(&mut self, member_id: u32, value: Value) -> Result<()> {
        match self.mxt.get(member_id) {
            Some(XSlot {
                kind: SlotKind::Compressed,
                field2,
                ..
            }) => {
                self.member_edits
                    .entry(field2 as u32)
                    .or_default()
                    .push((member_id, value));
                Ok(())
            }
            Some(_) => Err(Error::InvalidType {
                expected: "compressed object",
                found: "regular object",
            }),
            None => Err(Error::ObjectNotFound(member_id, 0)),
        }
    }

    fn rebuild_container(&mut self) -> Result<()> {
        let Some(edits) = self.member_edits.remove(&self.obid) else {
            return Ok(());
        };
        let decoded = self.fetch_stream()?.to_vec();
        let ob = self.construct.as_ref().expect("constructed");
        let dict = ob.def.as_dict().cloned().ok_or_else(|| Error::CorruptObject {
            id: self.obid,
            reason: "object stream container is not a dictionary".into(),
        })?;
        let stm = ObjectStream::parse(&dict, decoded).map_err(|e| Error::CorruptObject {
            id: self.obid,
            reason: e.to_string(),
        })?;
        let (n, first, payload) = stm.rebuild(&edits)?;

        let ob = self.construct.as_mut().expect("constructed");
        if let Some(d) = ob.def.as_dict_mut() {
            d.set("N", Value::integer(n));
            d.set("First", Value::integer(first));
        }
        ob.flags.insert(ObjectFlags::OVERRIDE_DEF);
        set_stream_on(ob, payload, false);
        Ok(())
    }

    // --- committing objects ----------------------------------------------

    /// Emit the current object to the output: a byte-copy when untouched, a
    /// re-serialization otherwise.
    pub fn passthrough_object(&mut self) -> Result<()> {
        self.mxt
            .set(self.obid, XSlot::used(self.oboffset, self.genid as u32));

        if self.construct.is_some() {
            while self.construct.is_some() {
                self.update_object()?;
                self.oboffset = self.stream.output_offset();
                if let Some(next) = &self.construct {
                    self.mxt
                        .set(next.id, XSlot::used(self.oboffset, next.gen as u32));
                }
            }
            return Ok(());
        }

        if self.state == ParseState::ObjectDefinition {
            // read the definition to learn the stream length, and catch
            // superseded binary xref objects
            let mut stream_len = 0;
            let mut is_xref_object = false;
            match self.scanner.pop_atom(&mut self.stream) {
                Some(atom) => {
                    if let Ok(Value::Dictionary(dict)) = Value::from_atom(&atom) {
                        if self.encrypt_ref.map(|r| r.id) != Some(self.obid) {
                            stream_len = self.resolve_length(&dict)?;
                        }
                        is_xref_object =
                            dict.get("Type").and_then(Value::as_name) == Some("XRef");
                    }
                }
                None => {
                    let _ = self.scanner.pop_string(&mut self.stream);
                }
            }
            self.stream_len = stream_len;
            self.state = ParseState::ObjectAppendix;

            if is_xref_object {
                // superseded by the fresh tail this pass will write
                self.mxt.set(
                    self.obid,
                    XSlot {
                        kind: SlotKind::Free,
                        field2: 0,
                        field3: self.genid as u32,
                    },
                );
                return self.passover_object();
            }
        }

        if self.state == ParseState::ObjectAppendix {
            match self.scanner.pop_string(&mut self.stream).as_deref() {
                Some(b"stream") => {
                    self.scanner.skip(self.stream_len);
                    self.commit_pass()?;
                    self.scanner
                        .assert_complex(&mut self.stream, tag::ENDSTREAM)
                        .map_err(|e| corrupt(self.obid, e))?;
                    self.scanner
                        .assert_string(&mut self.stream, "endobj")
                        .map_err(|e| corrupt(self.obid, e))?;
                }
                Some(b"endobj") => {}
                other => {
                    return Err(Error::CorruptObject {
                        id: self.obid,
                        reason: format!(
                            "expected stream or endobj, found {:?}",
                            other.map(String::from_utf8_lossy)
                        ),
                    });
                }
            }
        }

        self.commit_pass()?;
        self.state = ParseState::Base;
        self.oboffset = self.stream.output_offset();
        Ok(())
    }

    /// Move past the current object without emitting it.
    fn passover_object(&mut self) -> Result<()> {
        if self.state == ParseState::ObjectDefinition {
            match self.scanner.pop_atom(&mut self.stream) {
                Some(atom) => {
                    if let Ok(Value::Dictionary(dict)) = Value::from_atom(&atom) {
                        if self.encrypt_ref.map(|r| r.id) != Some(self.obid) {
                            self.stream_len = self.resolve_length(&dict)?;
                        } else {
                            self.stream_len = 0;
                        }
                    } else {
                        self.stream_len = 0;
                    }
                }
                None => {
                    let _ = self.scanner.pop_string(&mut self.stream);
                    self.stream_len = 0;
                }
            }
            self.state = ParseState::ObjectAppendix;
        }

        if self.state == ParseState::ObjectAppendix {
            match self.scanner.pop_string(&mut self.stream).as_deref() {
                Some(b"stream") => {
                    self.scanner.skip(self.stream_len);
                    self.commit_discard()?;
                    self.scanner
                        .assert_complex(&mut self.stream, tag::ENDSTREAM)
                        .map_err(|e| corrupt(self.obid, e))?;
                    self.scanner
                        .assert_string(&mut self.stream, "endobj")
                        .map_err(|e| corrupt(self.obid, e))?;
                }
                Some(b"endobj") => {}
                other => {
                    return Err(Error::CorruptObject {
                        id: self.obid,
                        reason: format!(
                            "expected stream or endobj, found {:?}",
                            other.map(String::from_utf8_lossy)
                        ),
                    });
                }
            }
        }

        self.commit_discard()?;
        self.state = ParseState::Base;
        Ok(())
    }

    /// Serialize the current construct into the output, honoring its flags.
    fn update_object(&mut self) -> Result<()> {
        let mut ob = self.construct.take().expect("no construct to update");

        if ob.flags.contains(ObjectFlags::DELETE) {
            ob.flags.insert(ObjectFlags::SKIP_OBJECT);
            self.mxt.set(
                ob.id,
                XSlot {
                    kind: SlotKind::Free,
                    field2: 0,
                    field3: ob.gen as u32,
                },
            );
        }
        if ob.flags.contains(ObjectFlags::SKIP_OBJECT) {
            ob.flags.insert(ObjectFlags::SKIP_STREAM);
        }
        let skip_stream = ob.flags.contains(ObjectFlags::SKIP_STREAM);

        // a nixed stream is consumed and dropped before the definition goes
        if self.state == ParseState::ObjectAppendix && ob.has_stream && skip_stream {
            self.scanner.skip(self.stream_len);
            self.commit_discard()?;
            self.scanner
                .assert_complex(&mut self.stream, tag::ENDSTREAM)
                .map_err(|e| corrupt(ob.id, e))?;
            self.scanner
                .assert_string(&mut self.stream, "endobj")
                .map_err(|e| corrupt(ob.id, e))?;
            self.state = ParseState::Base;
        }

        // drop the original header and definition (and any consumed stream)
        self.commit_discard()?;

        if !ob.flags.contains(ObjectFlags::SKIP_OBJECT) {
            // a fetched stream that is neither replaced nor dropped is
            // re-emitted in decoded form
            if ob.has_stream
                && !skip_stream
                && !ob.flags.contains(ObjectFlags::OVERRIDE_STREAM)
                && self.state == ParseState::ObjectPostStream
            {
                let data = ob.extracted.clone().unwrap_or_default().to_vec();
                set_stream_on(&mut ob, data, false);
            }
            let ovr_stream = ob.flags.contains(ObjectFlags::OVERRIDE_STREAM);

            let mut head = format!("{} {} obj\n", ob.id, ob.gen).into_bytes();
            head.extend_from_slice(&ob.def.to_bytes());
            head.push(b'\n');
            self.stream.insert(&head)?;

            if ob.has_stream && self.state != ParseState::Base {
                if self.state != ParseState::ObjectPostStream {
                    self.scanner.skip(self.stream_len);
                }
                if skip_stream || ovr_stream {
                    self.commit_discard()?;
                } else if self.state != ParseState::ObjectPostStream {
                    self.stream.insert(b"stream\n")?;
                    self.commit_pass()?;
                }
                self.scanner
                    .assert_complex(&mut self.stream, tag::ENDSTREAM)
                    .map_err(|e| corrupt(ob.id, e))?;
                self.scanner
                    .assert_string(&mut self.stream, "endobj")
                    .map_err(|e| corrupt(ob.id, e))?;
            }

            if (ob.has_stream && !skip_stream) || ovr_stream {
                if ovr_stream {
                    self.commit_discard()?;
                    self.stream.insert(b"stream\n")?;
                    self.stream
                        .insert(ob.ovr_stream.as_deref().unwrap_or_default())?;
                    self.stream.insert(b"\nendstream\nendobj\n")?;
                } else {
                    // endstream and endobj pass through from the input
                    self.commit_pass()?;
                }
            } else {
                self.commit_discard()?;
                self.stream.insert(b"endobj\n")?;
            }
        } else {
            self.commit_discard()?;
        }

        self.state = ParseState::Base;
        self.stream_len = 0;

        // dequeue the next insert, if any
        if let Some(next) = self.inserts.pop_front() {
            self.obid = next.id;
            self.genid = next.gen;
            self.stream_len = 0;
            self.construct = Some(next);
        }
        Ok(())
    }

    fn append_objects(&mut self) -> Result<()> {
        if self.state != ParseState::Base || self.construct.is_some() {
            self.passthrough_object()?;
        }
        while let Some(ob) = self.appends.pop_front() {
            self.obid = ob.id;
            self.genid = ob.gen;
            self.stream_len = 0;
            self.oboffset = self.stream.output_offset();
            self.construct = Some(ob);
            self.passthrough_object()?;
        }
        Ok(())
    }

    // --- termination ------------------------------------------------------

    /// Drain the remaining input, write the master cross-reference table in
    /// the input's format, the trailer, `startxref` and `%%EOF`.
    pub fn finalize(mut self) -> Result<()> {
        while self.iterate()? {}

        if !self.skip_set.is_empty() {
            let lost: Vec<u32> = self.skip_set.iter().copied().collect();
            return Err(Error::InternalAssert(format!(
                "live objects were never captured: {:?}",
                lost
            )));
        }

        let startxref = self.stream.output_offset();
        self.write_master_table()?;
        self.stream
            .insert(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes())?;
        self.stream.flush()
    }

    fn write_master_table(&mut self) -> Result<()> {
        match self.mxt.format {
            XrefFormat::Text => {
                self.mxt.relink_free_chain();
                let table = self.mxt.serialize_text();
                self.stream.insert(&table)?;

                let mut trailer = self.trailer.clone();
                trailer.set("Size", Value::integer(self.mxt.cap() as i64));
                let mut bytes = b"trailer\n".to_vec();
                Value::Dictionary(trailer).serialize_into(&mut bytes);
                bytes.push(b'\n');
                self.stream.insert(&bytes)?;
            }
            XrefFormat::Binary => {
                // the table object indexes itself
                let id = self.mxt.claim_free_slot(self.xref_new_iter);
                self.mxt
                    .set(id, XSlot::used(self.stream.output_offset(), 0));
                self.mxt.relink_free_chain();
                let (rows, w) = self.mxt.serialize_binary_rows();

                let mut dict = Dictionary::new();
                dict.set("Type", Value::name("XRef"));
                dict.set("Size", Value::integer(self.mxt.cap() as i64));
                dict.set(
                    "W",
                    Value::Array(w.iter().map(|&v| Value::integer(v as i64)).collect()),
                );
                dict.set(
                    "Index",
                    Value::Array(vec![
                        Value::integer(0),
                        Value::integer(self.mxt.cap() as i64),
                    ]),
                );
                dict.set("Length", Value::integer(rows.len() as i64));
                for key in ["Root", "Info", "ID", "Encrypt"] {
                    if let Some(v) = self.trailer.get(key) {
                        dict.set(key, v.clone());
                    }
                }

                let mut bytes = format!("{} 0 obj\n", id).into_bytes();
                Value::Dictionary(dict).serialize_into(&mut bytes);
                bytes.extend_from_slice(b"\nstream\n");
                self.stream.insert(&bytes)?;
                self.stream.insert(&rows)?;
                self.stream.insert(b"\nendstream\nendobj\n")?;
            }
        }
        Ok(())
    }

    /// Run a mutation pass to completion: the callback is invoked once per
    /// live object and decides what happens next.
    pub fn run<F>(mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> MutatorOutcome,
    {
        let mut unloaded = false;
        loop {
            if !self.iterate()? {
                break;
            }
            if unloaded {
                continue;
            }
            match callback(&mut self) {
                MutatorOutcome::Done => {}
                MutatorOutcome::Failure => return Err(Error::CallerAbort),
                MutatorOutcome::SkipRest => break,
                MutatorOutcome::Unload => unloaded = true,
            }
        }
        self.finalize()
    }
}

fn corrupt(id: u32, e: Error) -> Error {
    Error::CorruptObject {
        id,
        reason: e.to_string(),
    }
}

fn set_stream_on(ob: &mut PdfObject, bytes: Vec<u8>, pre_encoded: bool) {
    ob.flags
        .insert(ObjectFlags::OVERRIDE_STREAM | ObjectFlags::OVERRIDE_DEF);
    if let Some(dict) = ob.def.as_dict_mut() {
        if !pre_encoded {
            dict.remove("Filter");
            dict.remove("DecodeParms");
        }
        dict.set("Length", Value::integer(bytes.len() as i64));
    }
    ob.ovr_stream = Some(bytes);
}

fn atom_id(atom: &Atom, key: &str) -> Result<u32> {
    atom.find_keyed(key)
        .and_then(Atom::lexeme_bytes)
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InternalAssert(format!("object header without {}", key)))
}

/// Collect the `/Filter` entry as a list of names.
fn filter_names(dict: &Dictionary) -> Vec<String> {
    match dict.get("Filter") {
        Some(Value::Name(n)) => vec![n.as_str().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_name().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract predictor parameters from `/DecodeParms`.
fn decode_params(dict: &Dictionary) -> Option<DecodeParams> {
    let parms = match dict.get("DecodeParms")? {
        Value::Dictionary(d) => d,
        Value::Array(items) => items.iter().find_map(|v| v.as_dict())?,
        _ => return None,
    };
    Some(DecodeParams {
        predictor: parms.get("Predictor").and_then(Value::as_i64).unwrap_or(1),
        columns: parms.get("Columns").and_then(Value::as_i64).unwrap_or(1) as usize,
        colors: parms.get("Colors").and_then(Value::as_i64).unwrap_or(1) as usize,
        bits_per_component: parms
            .get("BitsPerComponent")
            .and_then(Value::as_i64)
            .unwrap_or(8) as usize,
    })
}

/// Scan backward from EOF for `startxref N`.
fn find_startxref<R: Read + Seek, W: Write>(stream: &mut TwinStream<R, W>) -> Result<u64> {
    let g = grammar::pdf();
    let mut rev = Scanner::new_reverse(g.grammar(), g.reverse_root());
    for _ in 0..64 {
        rev.set_loop_cap(32);
        let Some(token) = rev.pop_string(stream) else {
            break;
        };
        if !token.is_empty() && token.iter().all(u8::is_ascii_digit) {
            let offset: u64 = std::str::from_utf8(&token)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::CorruptXref("unreadable startxref offset".into()))?;
            rev.set_loop_cap(8);
            return match rev.pop_string(stream).as_deref() {
                Some(b"startxref") => Ok(offset),
                other => Err(Error::CorruptXref(format!(
                    "offset {} is not preceded by startxref ({:?})",
                    offset,
                    other.map(String::from_utf8_lossy)
                ))),
            };
        }
    }
    Err(Error::CorruptXref(
        "no startxref found near end of file".into(),
    ))
}

/// Read one cross-reference section (text or binary) at `offset`.
fn read_xref_section<R: Read + Seek, W: Write>(
    stream: &mut TwinStream<R, W>,
    offset: u64,
) -> Result<XTable> {
    let head = stream.fetch_branch(offset, 32)?;
    let trimmed: Vec<u8> = head
        .iter()
        .copied()
        .skip_while(|&b| crate::charclass::is_whitespace(b))
        .collect();

    if trimmed.starts_with(b"xref") {
        let mut size = 4096usize;
        loop {
            let buf = stream.fetch_branch(offset, size)?;
            let got = buf.len();
            match parse_text_xref(buf, offset)? {
                Some(table) => return Ok(table),
                None if got < size => {
                    return Err(Error::CorruptXref(
                        "text xref section runs past end of file".into(),
                    ));
                }
                None => size *= 2,
            }
        }
    }

    // binary form: an indirect object whose stream is the row table
    let envelope = read_envelope(stream, offset, None)?;
    let Some(data_off) = envelope.stream_data else {
        return Err(Error::CorruptXref(
            "xref stream object carries no stream".into(),
        ));
    };
    let Value::Dictionary(dict) = envelope.def else {
        return Err(Error::CorruptXref("xref stream without dictionary".into()));
    };
    let len = match dict.get("Length").and_then(Value::as_i64) {
        Some(v) if v >= 0 => v as usize,
        _ => {
            return Err(Error::CorruptXref(
                "xref stream /Length must be a direct number".into(),
            ));
        }
    };
    let raw = stream.fetch_branch(data_off, len)?;
    if raw.len() < len {
        return Err(Error::CorruptXref("xref stream data is truncated".into()));
    }
    let raw = raw.to_vec();
    let decoded = decode_chain(&raw, &filter_names(&dict), decode_params(&dict).as_ref())?;
    parse_binary_xref(dict, &decoded, offset)
}

/// Parse one `N G obj ...` envelope through a branch read, doubling the
/// window on outgrowth up to 64 KiB.
fn read_envelope<R: Read + Seek, W: Write>(
    stream: &mut TwinStream<R, W>,
    offset: u64,
    expect: Option<u32>,
) -> Result<Envelope> {
    let mut bufsize = 4096usize;
    loop {
        stream.clear_outgrown();
        let buf = stream.fetch_branch(offset, bufsize)?;
        let got = buf.len();

        let g = grammar::pdf();
        let mut sc = Scanner::new(g.grammar(), g.root());
        let mut src = SliceSource::new(buf);

        let mut parsed: Option<Envelope> = None;
        'attempt: {
            let Some(header) = sc.pop_atom(&mut src) else {
                break 'attempt;
            };
            if header.tag() != Some(tag::OBJ) {
                break 'attempt;
            }
            let (Ok(id), Ok(gen)) = (atom_id(&header, tag::ID), atom_id(&header, tag::GEN))
            else {
                break 'attempt;
            };
            if let Some(expected) = expect {
                if id != expected {
                    log::warn!(
                        "xref slot for object {} points at object {} (offset {})",
                        expected,
                        id,
                        offset
                    );
                }
            }
            let def = match sc.pop_atom(&mut src) {
                Some(atom) => match Value::from_atom(&atom) {
                    Ok(v) => v,
                    Err(_) => break 'attempt,
                },
                None => match sc.pop_string(&mut src) {
                    Some(s) => match Value::from_atom(&Atom::Lexeme(s)) {
                        Ok(v) => v,
                        Err(_) => break 'attempt,
                    },
                    None => break 'attempt,
                },
            };
            let stream_data = match sc.pop_string(&mut src).as_deref() {
                Some(b"stream") => Some(offset + sc.position()),
                _ => None,
            };
            parsed = Some(Envelope {
                gen: gen as u16,
                def,
                stream_data,
            });
        }

        let outgrown = sc.outgrown();
        if let Some(envelope) = parsed {
            // a buffer shorter than requested means the file ended: what we
            // parsed is all there is
            if !outgrown || envelope.stream_data.is_some() || got < bufsize {
                return Ok(envelope);
            }
        }
        if outgrown && got == bufsize && bufsize < 65536 {
            bufsize = (bufsize * 2).min(65536);
            continue;
        }
        return Err(Error::CorruptObject {
            id: expect.unwrap_or(0),
            reason: format!("unreadable object envelope at offset {}", offset),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(b"xref\n0 3\n");
        pdf.extend_from_slice(b"0000000000 65535 f \n");
        pdf.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
        pdf.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        pdf
    }

    #[test]
    fn test_open_discovers_xref() {
        let pdf = minimal_pdf();
        let parser = Parser::open(Cursor::new(pdf), Vec::new()).unwrap();
        assert_eq!(parser.mxt.cap(), 3);
        assert_eq!(
            parser.root_ref(),
            Some(crate::object::ObjectRef::new(1, 0))
        );
        assert!(!parser.is_encrypted());
    }

    #[test]
    fn test_locate_definition_by_offset() {
        let pdf = minimal_pdf();
        let mut parser = Parser::open(Cursor::new(pdf), Vec::new()).unwrap();
        let def = parser.locate_definition(2, true).unwrap();
        let dict = def.as_dict().unwrap();
        assert_eq!(dict.get("Type").unwrap().as_name(), Some("Pages"));
        // cached second lookup
        let again = parser.locate_definition(2, true).unwrap();
        assert_eq!(def, again);
    }

    #[test]
    fn test_iterate_visits_objects_in_order() {
        let pdf = minimal_pdf();
        let mut parser = Parser::open(Cursor::new(pdf), Vec::new()).unwrap();
        let mut seen = Vec::new();
        while parser.iterate().unwrap() {
            seen.push(parser.current_id());
        }
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(parser.skip_set.len(), 0);
    }

    #[test]
    fn test_missing_startxref_is_corrupt() {
        let result = Parser::open(
            Cursor::new(b"%PDF-1.4\nnothing to see here\n".to_vec()),
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::CorruptXref(_))));
    }
}
