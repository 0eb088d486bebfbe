//! Table-driven scanner.
//!
//! The scanner pops symbols from a byte source, dispatches them through the
//! compiled state graph, and executes operator programs that reshape symbols
//! into [`Atom`] trees on the result stack. It supports forward and reverse
//! symbol extraction (the latter locates the trailer from EOF), a fixed-buffer
//! mode for ad-hoc parsing of in-memory spans, and filter-attached raw stream
//! reads.
//!
//! Windows into the source are anchored by source-absolute offsets, so heap
//! relocation and realignment inside the twin stream never invalidate a
//! scanner: consuming committed bytes is a plain [`Scanner::rebase`].

use crate::charclass::{class_of, classify_symbol, is_whitespace, CharClass, SymbolClass};
use crate::error::{Error, Result};
use crate::state::{Grammar, Op, Program, StateId, SymbolInfo};

/// A scanner's view into its byte source.
///
/// `start` is a source-absolute offset (a file offset for the twin stream, a
/// buffer index for slices); `len` is the number of bytes currently visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    /// Source-absolute offset of the window's first byte
    pub start: u64,
    /// Bytes visible through the window
    pub len: usize,
}

/// A byte source a scanner can scan.
pub trait ScanSource {
    /// Extend the window by at least `req` bytes if possible; `req == 0` lets
    /// the source pick a chunk size. Reverse sources prepend (moving
    /// `win.start` down). Returns the number of bytes gained.
    fn grow(&mut self, win: &mut Window, req: usize) -> usize;

    /// View the window's bytes.
    fn view(&self, win: &Window) -> &[u8];

    /// Bounded sources never grow; starving on one sets the scanner's
    /// `outgrown` flag so the caller can retry with a larger buffer.
    fn bounded(&self) -> bool {
        false
    }
}

/// Fixed-buffer source for parsing in-memory byte spans.
pub struct SliceSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceSource<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl ScanSource for SliceSource<'_> {
    fn grow(&mut self, win: &mut Window, _req: usize) -> usize {
        let end = win.start as usize + win.len;
        if end < self.data.len() {
            let gained = self.data.len() - end;
            win.len += gained;
            gained
        } else {
            0
        }
    }

    fn view(&self, win: &Window) -> &[u8] {
        &self.data[win.start as usize..win.start as usize + win.len]
    }

    fn bounded(&self) -> bool {
        true
    }
}

/// A parsed result atom.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// Raw symbol bytes: numbers, keywords, wrapped literal strings
    Lexeme(Vec<u8>),
    /// Structural marker
    Ident(&'static str),
    /// A key → atom pair inside a composite
    Keyed(&'static str, Box<Atom>),
    /// A tagged composite
    Complex(&'static str, Vec<Atom>),
}

impl Atom {
    /// The lexeme's bytes, if this is a lexeme.
    pub fn lexeme_bytes(&self) -> Option<&[u8]> {
        match self {
            Atom::Lexeme(b) => Some(b),
            Atom::Keyed(_, inner) => inner.lexeme_bytes(),
            _ => None,
        }
    }

    /// The composite tag, if this is a composite.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Atom::Complex(t, _) => Some(t),
            _ => None,
        }
    }

    /// Find the atom behind `key` among a composite's keyed children.
    pub fn find_keyed(&self, key: &str) -> Option<&Atom> {
        let Atom::Complex(_, children) = self else {
            return None;
        };
        children.iter().find_map(|c| match c {
            Atom::Keyed(k, inner) if *k == key => Some(&**inner),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymKind {
    Regular,
    Numeric,
    Delimiter,
    /// End of buffer
    Eob,
}

#[derive(Debug, Clone)]
struct Symbol {
    /// Window-relative start (ignored for fake symbols)
    start: usize,
    len: usize,
    /// Fake symbols (pushed-back values) own their bytes
    owned: Option<Vec<u8>>,
    kind: SymKind,
    hash: u32,
}

impl Symbol {
    fn fake(bytes: Vec<u8>) -> Self {
        let kind = match classify_symbol(&bytes) {
            SymbolClass::Numeric => SymKind::Numeric,
            SymbolClass::Delimiter => SymKind::Delimiter,
            SymbolClass::Regular => SymKind::Regular,
        };
        let hash = crate::state::symbol_hash(&bytes);
        Symbol {
            start: 0,
            len: bytes.len(),
            owned: Some(bytes),
            kind,
            hash,
        }
    }
}

#[derive(Debug)]
struct Env {
    state: StateId,
    build: Vec<Atom>,
    vars: Vec<Atom>,
}

impl Env {
    fn new(state: StateId) -> Self {
        Env {
            state,
            build: Vec::new(),
            vars: Vec::new(),
        }
    }
}

/// The scanner.
pub struct Scanner {
    grammar: &'static Grammar,
    envs: Vec<Env>,
    results: Vec<Atom>,
    symbol_stack: Vec<Symbol>,
    sym: Option<Symbol>,
    win: Window,
    boffset: usize,
    bmark: usize,
    bresoffset: usize,
    outgrown: bool,
    failed: bool,
    reverse: bool,
    filter: Option<Box<dyn crate::decoders::StreamFilter>>,
    loop_cap: Option<usize>,
}

impl Scanner {
    /// Create a forward scanner rooted at `root`.
    pub fn new(grammar: &'static Grammar, root: StateId) -> Self {
        Scanner {
            grammar,
            envs: vec![Env::new(root)],
            results: Vec::new(),
            symbol_stack: Vec::new(),
            sym: None,
            win: Window::default(),
            boffset: 0,
            bmark: 0,
            bresoffset: 0,
            outgrown: false,
            failed: false,
            reverse: false,
            filter: None,
            loop_cap: None,
        }
    }

    /// Create a reverse scanner (symbols are popped walking backward).
    pub fn new_reverse(grammar: &'static Grammar, root: StateId) -> Self {
        let mut s = Self::new(grammar, root);
        s.reverse = true;
        s
    }

    /// Whether the last pull starved on a bounded source.
    pub fn outgrown(&self) -> bool {
        self.outgrown
    }

    /// Whether the scanner has unwound after a failure.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Cap the number of scan attempts for the next pull. The cap is
    /// consumed by that pull, successful or not.
    pub fn set_loop_cap(&mut self, cap: usize) {
        self.loop_cap = Some(cap);
    }

    /// Source-absolute offset of the scan cursor.
    pub fn position(&self) -> u64 {
        self.win.start + self.boffset as u64
    }

    /// Source-absolute offset where the current result started.
    pub fn result_offset(&self) -> u64 {
        self.win.start + self.bresoffset as u64
    }

    /// Window-relative offset where the current result started.
    pub fn result_window_offset(&self) -> usize {
        self.bresoffset
    }

    /// Advance the scan cursor over raw bytes (a PDF stream body). The
    /// window is not grown; a following pull resynchronizes.
    pub fn skip(&mut self, bytes: u64) {
        self.boffset += bytes as usize;
    }

    /// Drop everything before the source-absolute offset `abs` from the
    /// window. Used after the twin stream commits bytes.
    pub fn rebase(&mut self, abs: u64) {
        if abs <= self.win.start {
            return;
        }
        let consumed = (abs - self.win.start) as usize;
        if consumed > self.win.len {
            self.reset();
            self.win.start = abs;
            return;
        }
        self.win.start = abs;
        self.win.len -= consumed;
        self.boffset = self.boffset.saturating_sub(consumed);
        self.bmark = self.bmark.saturating_sub(consumed);
        self.bresoffset = self.bresoffset.saturating_sub(consumed);
        for sym in self.symbol_stack.iter_mut().chain(self.sym.iter_mut()) {
            if sym.owned.is_none() {
                sym.start = sym.start.saturating_sub(consumed);
            }
        }
    }

    /// Reset the window, symbol and result stacks. Outstanding window-derived
    /// data is invalidated.
    pub fn reset(&mut self) {
        self.win = Window::default();
        self.boffset = 0;
        self.bmark = 0;
        self.bresoffset = 0;
        self.sym = None;
        self.symbol_stack.clear();
        self.results.clear();
    }

    /// Attach a stream filter for subsequent [`Scanner::read_stream`] calls.
    pub fn attach_filter(&mut self, filter: Box<dyn crate::decoders::StreamFilter>) {
        self.filter = Some(filter);
    }

    /// Detach the attached stream filter, if any.
    pub fn detach_filter(&mut self) {
        self.filter = None;
    }

    // --- symbol extraction ------------------------------------------------

    fn sym_bytes_owned(&self, src: &dyn ScanSource) -> Vec<u8> {
        let sym = self.sym.as_ref().expect("no current symbol");
        match &sym.owned {
            Some(owned) => owned.clone(),
            None => src.view(&self.win)[sym.start..sym.start + sym.len].to_vec(),
        }
    }

    fn pop(&mut self, src: &mut dyn ScanSource) {
        if self.reverse {
            self.pop_symbol_rev(src);
        } else {
            self.pop_symbol(src);
        }
    }

    fn pop_symbol(&mut self, src: &mut dyn ScanSource) {
        if let Some(s) = self.symbol_stack.pop() {
            self.sym = Some(s);
            return;
        }
        if self.win.len < self.boffset {
            // iterated beyond sight (a skipped stream); start over from the
            // source's current position
            self.reset();
        }

        let mut i = self.boffset;
        let mut len = 0usize;
        let mut hash: i64 = 0;
        let mut numeric = true;
        let mut real = false;
        let mut escaped = false;
        let mut prevtype = CharClass::Whitespace;
        let mut ty = CharClass::Whitespace;
        let mut symclass = CharClass::Whitespace;

        loop {
            if i >= self.win.len && !self.grow(src, 0) {
                break;
            }
            if i >= self.win.len {
                break;
            }
            let c = src.view(&self.win)[i];
            prevtype = ty;
            ty = if escaped { CharClass::Regular } else { class_of(c) };
            escaped = !escaped && c == b'\\';

            if prevtype != CharClass::Delimiter
                && (prevtype == CharClass::Whitespace || prevtype == ty)
            {
                if ty != CharClass::Whitespace {
                    len += 1;
                    symclass = ty;
                    hash -= (ty as i64 - 1) * c as i64;
                    numeric = numeric
                        && (c.is_ascii_digit()
                            || (len == 1 && (c == b'-' || c == b'+'))
                            || (!real && c == b'.' && {
                                real = true;
                                true
                            }));
                }
            } else {
                break;
            }
            i += 1;
        }
        let symbol_end = i;

        // absorb trailing whitespace, consuming at most one EOL sequence so
        // stream bodies stay aligned
        let mut nl = 0u8;
        loop {
            if i >= self.win.len && !self.grow(src, 0) {
                break;
            }
            if i >= self.win.len {
                break;
            }
            let b = src.view(&self.win)[i];
            if !is_whitespace(b) {
                break;
            }
            match b {
                b'\r' if nl == 0 => nl = 1,
                b'\n' if nl < 2 => nl = 2,
                b'\r' | b'\n' => break,
                _ if nl != 0 => break,
                _ => {}
            }
            i += 1;
        }
        self.boffset = i;

        let kind = if len == 0 {
            SymKind::Eob
        } else if symclass == CharClass::Regular && numeric {
            SymKind::Numeric
        } else if symclass == CharClass::Delimiter {
            SymKind::Delimiter
        } else {
            SymKind::Regular
        };
        self.sym = Some(Symbol {
            start: symbol_end - len,
            len,
            owned: None,
            kind,
            hash: (10 * hash.unsigned_abs() + len as u64) as u32,
        });
    }

    fn pop_symbol_rev(&mut self, src: &mut dyn ScanSource) {
        if let Some(s) = self.symbol_stack.pop() {
            self.sym = Some(s);
            return;
        }

        // `boffset` is the exclusive lower bound of the consumed suffix: the
        // next byte to read is boffset - 1.
        let mut i = self.boffset;
        let mut len = 0usize;
        let mut hash: i64 = 0;
        let mut numeric = true;
        let mut prevtype = CharClass::Whitespace;
        let mut ty = CharClass::Whitespace;
        let mut symclass = CharClass::Whitespace;

        loop {
            if i == 0 {
                let gained = src.grow(&mut self.win, 0);
                if gained == 0 {
                    self.outgrown |= src.bounded();
                    break;
                }
                // content was prepended: every relative index shifts up
                i += gained;
            }
            let c = src.view(&self.win)[i - 1];
            prevtype = ty;
            ty = class_of(c);

            if prevtype != CharClass::Delimiter
                && (prevtype == CharClass::Whitespace || prevtype == ty)
            {
                if ty != CharClass::Whitespace {
                    len += 1;
                    symclass = ty;
                    hash -= (ty as i64 - 1) * c as i64;
                    numeric &= c.is_ascii_digit();
                }
            } else {
                break;
            }
            i -= 1;
        }

        let kind = if len == 0 {
            SymKind::Eob
        } else if symclass == CharClass::Regular && numeric {
            SymKind::Numeric
        } else if symclass == CharClass::Delimiter {
            SymKind::Delimiter
        } else {
            SymKind::Regular
        };
        self.sym = Some(Symbol {
            start: i,
            len,
            owned: None,
            kind,
            hash: (10 * hash.unsigned_abs() + len as u64) as u32,
        });
        self.boffset = i;
    }

    /// Grow the window forward; returns false when no bytes were gained.
    fn grow(&mut self, src: &mut dyn ScanSource, req: usize) -> bool {
        if src.bounded() {
            let gained = src.grow(&mut self.win, req);
            if gained == 0 {
                self.outgrown = true;
            }
            gained > 0
        } else {
            src.grow(&mut self.win, req) > 0
        }
    }

    /// Read raw bytes until a delimiter (or, with `newline`, until an EOL),
    /// replacing the current symbol with the bytes read.
    fn read_until_delimiter(&mut self, src: &mut dyn ScanSource, newline: bool) {
        let mut start = self.boffset;
        let mut i = self.boffset;

        // rewind pushed-back symbols so no content is skipped; for newline
        // reads the current symbol rejoins the line as well
        if (newline && self.sym.is_some()) || !self.symbol_stack.is_empty() {
            while let Some(s) = self.symbol_stack.pop() {
                self.sym = Some(s);
            }
            if let Some(s) = &self.sym {
                if s.owned.is_none() {
                    start = s.start;
                    if newline {
                        i = s.start;
                    }
                }
            }
        }
        let mut escaped = false;
        loop {
            if i >= self.win.len && !self.grow(src, 0) {
                break;
            }
            if i >= self.win.len {
                break;
            }
            let b = src.view(&self.win)[i];
            if !escaped
                && ((newline && (b == b'\n' || b == b'\r'))
                    || (!newline && class_of(b) == CharClass::Delimiter))
            {
                break;
            }
            escaped = !escaped && b == b'\\';
            i += 1;
        }

        self.sym = Some(Symbol {
            start,
            len: i - start,
            owned: None,
            kind: SymKind::Regular,
            hash: 0,
        });

        // absorb whitespace (for newline reads this consumes the EOL)
        loop {
            if i >= self.win.len && !self.grow(src, 0) {
                break;
            }
            if i >= self.win.len {
                break;
            }
            if !is_whitespace(src.view(&self.win)[i]) {
                break;
            }
            i += 1;
        }
        self.boffset = i;
    }

    // --- execution --------------------------------------------------------

    /// Run one scan: pop a symbol, dispatch, execute, repeating until the
    /// entry environment changes or pauses.
    fn scan(&mut self, src: &mut dyn ScanSource) {
        let grammar: &'static Grammar = self.grammar;
        let entry_depth = self.envs.len();
        let entry_state = match self.envs.last() {
            Some(env) => env.state,
            None => return,
        };
        let iterates = grammar.state(entry_state).iterates();
        let res_snapshot = self.boffset;

        loop {
            let state_id = match self.envs.last() {
                Some(env) => env.state,
                None => return,
            };
            self.pop(src);
            let sym = self.sym.as_ref().expect("pop always yields a symbol");
            let (kind, hash, len) = (sym.kind, sym.hash, sym.len);

            let program: Option<&'static Program> = if len > 0 {
                let state = grammar.state(state_id);
                let sym_ref = self.sym.as_ref().expect("just popped");
                let bytes: &[u8] = match &sym_ref.owned {
                    Some(o) => o,
                    None => &src.view(&self.win)[sym_ref.start..sym_ref.start + sym_ref.len],
                };
                let info = SymbolInfo {
                    bytes,
                    hash,
                    numeric: kind == SymKind::Numeric,
                    delimiter: kind == SymKind::Delimiter,
                };
                state.dispatch(&info)
            } else {
                None
            };

            match program {
                Some(program) => {
                    self.operate(src, program);
                    if self.failed {
                        return;
                    }
                }
                None => {
                    self.outgrown |= src.bounded();
                    if !self.outgrown {
                        if kind == SymKind::Eob {
                            log::debug!("end of buffer in state {:?}", state_id);
                        } else {
                            log::warn!("scanner failure in state {:?}; unwinding", state_id);
                        }
                    }
                    self.envs.clear();
                    self.results.clear();
                    self.failed = true;
                    return;
                }
            }

            if self.envs.len() != entry_depth || iterates {
                break;
            }
        }
        self.bresoffset = res_snapshot;
    }

    fn operate(&mut self, src: &mut dyn ScanSource, program: &'static Program) {
        for op in program {
            match *op {
                Op::PushState(s) | Op::PushWeakState(s) => {
                    self.envs.push(Env::new(s));
                    self.scan(src);
                    if self.failed {
                        return;
                    }
                }
                Op::PopState => {
                    self.envs.pop();
                }
                Op::PushResult => {
                    let bytes = self.sym_bytes_owned(src);
                    self.results.push(Atom::Lexeme(bytes));
                }
                Op::PushEmpty => {
                    self.results.push(Atom::Lexeme(Vec::new()));
                }
                Op::PushMarked => {
                    let sym = self.sym.as_ref().expect("no symbol for mark");
                    let end = sym.start + sym.len;
                    let bytes = src.view(&self.win)[self.bmark..end].to_vec();
                    self.results.push(Atom::Lexeme(bytes));
                }
                Op::PushbackSymbol => {
                    if let Some(sym) = self.sym.take() {
                        self.symbol_stack.push(sym);
                    }
                }
                Op::PushbackValue => match self.results.pop() {
                    Some(Atom::Lexeme(bytes)) => {
                        self.symbol_stack.push(Symbol::fake(bytes));
                    }
                    _ => {
                        log::warn!("pushback of a non-lexeme result");
                        self.failed = true;
                        return;
                    }
                },
                Op::PopVariable(key) => {
                    let Some(value) = self.results.pop() else {
                        self.failed = true;
                        return;
                    };
                    self.env_mut().vars.push(Atom::Keyed(key, Box::new(value)));
                }
                Op::PopValue => {
                    let Some(value) = self.results.pop() else {
                        self.failed = true;
                        return;
                    };
                    self.env_mut().vars.push(value);
                }
                Op::PullBuildVariable(key) => {
                    let build = std::mem::take(&mut self.env_mut().build);
                    self.env_mut()
                        .vars
                        .push(Atom::Keyed(key, Box::new(Atom::Complex(key, build))));
                }
                Op::StoveComplex(tag) => {
                    let vars = std::mem::take(&mut self.env_mut().vars);
                    self.env_mut().build.push(Atom::Complex(tag, vars));
                }
                Op::PushComplex(tag) => {
                    let vars = std::mem::take(&mut self.env_mut().vars);
                    self.results.push(Atom::Complex(tag, vars));
                }
                Op::ReadToDelimiter => self.read_until_delimiter(src, false),
                Op::PopLine => self.read_until_delimiter(src, true),
                Op::Mark => {
                    if let Some(sym) = &self.sym {
                        self.bmark = sym.start;
                    }
                }
                Op::Nop => {}
            }
        }
    }

    fn env_mut(&mut self) -> &mut Env {
        self.envs.last_mut().expect("no environment")
    }

    // --- pull API ---------------------------------------------------------

    fn poll(&mut self, src: &mut dyn ScanSource) {
        let mut cap = self.loop_cap.take();
        while !self.failed && !self.envs.is_empty() && self.results.is_empty() {
            if let Some(c) = cap.as_mut() {
                if *c == 0 {
                    return;
                }
                *c -= 1;
            }
            self.scan(src);
        }
    }

    /// Pull the next result, whatever it is.
    pub fn pop_result(&mut self, src: &mut dyn ScanSource) -> Option<Atom> {
        self.poll(src);
        self.results.pop()
    }

    /// Pull the next result if it is a plain lexeme.
    pub fn pop_string(&mut self, src: &mut dyn ScanSource) -> Option<Vec<u8>> {
        self.poll(src);
        match self.results.last() {
            Some(Atom::Lexeme(_)) => match self.results.pop() {
                Some(Atom::Lexeme(b)) => Some(b),
                _ => unreachable!(),
            },
            _ => None,
        }
    }

    /// Pull the next result if it is a composite.
    pub fn pop_atom(&mut self, src: &mut dyn ScanSource) -> Option<Atom> {
        self.poll(src);
        match self.results.last() {
            Some(Atom::Complex(..)) => self.results.pop(),
            _ => None,
        }
    }

    /// Require the next result to be the given string.
    pub fn assert_string(&mut self, src: &mut dyn ScanSource, expect: &str) -> Result<()> {
        match self.pop_string(src) {
            Some(s) if s == expect.as_bytes() => Ok(()),
            Some(s) => Err(Error::Decode(format!(
                "expected \"{}\", found \"{}\"",
                expect,
                String::from_utf8_lossy(&s)
            ))),
            None => Err(Error::Decode(format!(
                "expected \"{}\", found a non-string or end of input",
                expect
            ))),
        }
    }

    /// Require the next result to be a composite with the given tag.
    pub fn assert_complex(&mut self, src: &mut dyn ScanSource, tag: &str) -> Result<Atom> {
        match self.pop_atom(src) {
            Some(atom) if atom.tag() == Some(tag) => Ok(atom),
            Some(atom) => Err(Error::Decode(format!(
                "expected {} composite, found {:?}",
                tag,
                atom.tag()
            ))),
            None => Err(Error::Decode(format!(
                "expected {} composite, found a string or end of input",
                tag
            ))),
        }
    }

    // --- raw stream reads -------------------------------------------------

    /// Consume `len` raw bytes at the scan cursor. With a filter attached the
    /// decoded bytes go to `dest` and the return value is the count stored
    /// (`dest.len()` means more may follow via [`Scanner::read_stream_next`]);
    /// without one the raw bytes are copied.
    pub fn read_stream(
        &mut self,
        src: &mut dyn ScanSource,
        len: usize,
        dest: &mut [u8],
    ) -> Result<usize> {
        debug_assert!(self.symbol_stack.is_empty());
        if self.win.len < self.boffset + len {
            let need = self.boffset + len - self.win.len;
            self.grow(src, need);
        }
        let avail = len.min(self.win.len.saturating_sub(self.boffset));
        let start = self.boffset;
        self.boffset += avail;

        match &mut self.filter {
            Some(filter) => {
                let win = self.win;
                let raw = &src.view(&win)[start..start + avail];
                filter.begin(raw, dest)
            }
            None => {
                let n = avail.min(dest.len());
                let win = self.win;
                dest[..n].copy_from_slice(&src.view(&win)[start..start + n]);
                Ok(n)
            }
        }
    }

    /// Continue a filtered stream read.
    pub fn read_stream_next(&mut self, dest: &mut [u8]) -> Result<usize> {
        match &mut self.filter {
            Some(filter) => filter.proceed(dest),
            None => {
                log::warn!("read_stream_next without an attached filter");
                Ok(0)
            }
        }
    }
}

/// Parse one value atom out of a byte slice with a throwaway scanner.
pub fn parse_slice(
    grammar: &'static Grammar,
    root: StateId,
    data: &[u8],
) -> (Option<Atom>, bool) {
    let mut scanner = Scanner::new(grammar, root);
    let mut src = SliceSource::new(data);
    let atom = scanner.pop_atom(&mut src);
    (atom, scanner.outgrown())
}
