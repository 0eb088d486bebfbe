//! Compiled finite-state grammar.
//!
//! A grammar is an arena of named states. Each state binds recognized
//! keywords to operator programs and carries three fallback programs (for
//! numeric symbols, delimiter symbols, and everything else). Compiling a
//! state builds a minimal-collision open-addressed keyword index sized to the
//! smallest power of two that admits all keys; dispatch walks the index
//! forward from the symbol's hash slot.
//!
//! States reference sub-states through `Op::PushState`, so the arena is
//! addressed by [`StateId`] and ownership stays acyclic.

use crate::charclass::class_of;

/// Index of a state inside its [`Grammar`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateId(pub(crate) usize);

/// A primitive scanner instruction.
///
/// Programs are executed left to right when a symbol matches; instructions
/// operate on the scanner's environment, result, symbol, build and var
/// stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Push a new environment for the given state and scan it to completion.
    PushState(StateId),
    /// Like `PushState`; the pushed environment does not pin its state.
    PushWeakState(StateId),
    /// Pop the current environment.
    PopState,
    /// Push the current symbol's bytes onto the result stack.
    PushResult,
    /// Push an empty lexeme onto the result stack.
    PushEmpty,
    /// Push the bytes from the mark through the current symbol's end.
    PushMarked,
    /// Re-queue the current symbol so the next scan reads it again.
    PushbackSymbol,
    /// Pop the top result and re-queue it as a fake symbol.
    PushbackValue,
    /// Pop the top result into the var stack under the given key.
    PopVariable(&'static str),
    /// Pop the top result into the var stack without a key.
    PopValue,
    /// Move the accumulated build stack into the var stack under the key.
    PullBuildVariable(&'static str),
    /// Wrap the var stack as a tagged composite appended to the build stack.
    StoveComplex(&'static str),
    /// Wrap the var stack as a tagged composite pushed onto the result stack.
    PushComplex(&'static str),
    /// Replace the current symbol with raw bytes up to the next delimiter.
    ReadToDelimiter,
    /// Replace the current symbol with raw bytes up to the next newline.
    PopLine,
    /// Record the current symbol's start offset as the mark.
    Mark,
    /// No operation.
    Nop,
}

/// An operator program: a chain of primitive instructions.
pub type Program = Vec<Op>;

/// Per-symbol hash as computed incrementally by the scanner:
/// `10 * |Σ -(class(c) - 1) * c| + len`.
pub fn symbol_hash(sym: &[u8]) -> u32 {
    let mut h: i64 = 0;
    for &c in sym {
        h -= (class_of(c) as i64 - 1) * c as i64;
    }
    (10 * h.unsigned_abs() + sym.len() as u64) as u32
}

/// Everything dispatch needs to know about a scanned symbol.
#[derive(Debug, Clone, Copy)]
pub struct SymbolInfo<'a> {
    /// The symbol's bytes
    pub bytes: &'a [u8],
    /// The incremental hash over those bytes
    pub hash: u32,
    /// Whether the symbol satisfies the numeric predicate
    pub numeric: bool,
    /// Whether the symbol starts with a delimiter character
    pub delimiter: bool,
}

/// A named set of keyword bindings plus fallback programs.
#[derive(Debug, Default)]
pub struct State {
    name: &'static str,
    iterates: bool,
    keywords: Vec<(&'static [u8], Program)>,
    numeric_op: Option<Program>,
    delimiter_op: Option<Program>,
    fallback_op: Option<Program>,
    // compiled open-addressed index: slot -> keyword ordinal + 1
    index: Vec<u32>,
}

impl State {
    /// The state's name (used in diagnostics).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the state is a natural pause point for the scan loop.
    pub fn iterates(&self) -> bool {
        self.iterates
    }

    fn compiled(&self) -> bool {
        !self.index.is_empty() || self.keywords.is_empty()
    }

    /// Build the keyword index: the smallest power of two that holds every
    /// key with bounded collisions, inserting with a forward walk.
    fn compile(&mut self) {
        if self.compiled() {
            return;
        }
        let hashes: Vec<u32> = self
            .keywords
            .iter()
            .map(|(kw, _)| symbol_hash(kw))
            .collect();

        let mut n = 2usize;
        while n < self.keywords.len() {
            n <<= 1;
        }
        loop {
            let mask = (n - 1) as u32;
            let mut index = vec![0u32; n];
            let mut collisions = 0usize;
            let mut fits = true;
            'insert: for (i, &h) in hashes.iter().enumerate() {
                let mut slot = (h & mask) as usize;
                if index[slot] != 0 {
                    collisions += 1;
                    while slot < n && index[slot] != 0 {
                        slot += 1;
                    }
                    if slot == n {
                        fits = false;
                        break 'insert;
                    }
                }
                index[slot] = i as u32 + 1;
            }
            if fits && collisions + self.keywords.len() <= n {
                self.index = index;
                return;
            }
            n <<= 1;
        }
    }

    /// Resolve the operator program that applies to `sym`: walk the keyword
    /// index forward from the hash slot, then fall back to the numeric,
    /// delimiter, and catch-all programs in that order.
    pub fn dispatch(&self, sym: &SymbolInfo<'_>) -> Option<&Program> {
        if !self.index.is_empty() {
            let n = self.index.len();
            let mut slot = (sym.hash as usize) & (n - 1);
            while slot < n && self.index[slot] != 0 {
                let ordinal = (self.index[slot] - 1) as usize;
                if self.keywords[ordinal].0 == sym.bytes {
                    return Some(&self.keywords[ordinal].1);
                }
                slot += 1;
            }
        }
        if sym.numeric {
            if let Some(op) = &self.numeric_op {
                return Some(op);
            }
        }
        if sym.delimiter {
            if let Some(op) = &self.delimiter_op {
                return Some(op);
            }
        }
        self.fallback_op.as_ref()
    }
}

/// An arena of compiled states. Immutable once built.
#[derive(Debug)]
pub struct Grammar {
    states: Vec<State>,
    root: StateId,
}

impl Grammar {
    /// The state behind an id.
    #[inline]
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0]
    }

    /// The grammar's root state.
    pub fn root(&self) -> StateId {
        self.root
    }
}

/// Builder for a [`Grammar`]. States are created first (so programs can
/// reference them by id) and defined afterwards.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    states: Vec<State>,
}

impl GrammarBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named state and return its id.
    pub fn state(&mut self, name: &'static str) -> StateId {
        self.states.push(State {
            name,
            ..State::default()
        });
        StateId(self.states.len() - 1)
    }

    /// Mark a state as a natural pause point.
    pub fn iterates(&mut self, id: StateId) {
        self.states[id.0].iterates = true;
    }

    /// Bind a keyword to an operator program.
    pub fn keyword(&mut self, id: StateId, kw: &'static str, program: Program) {
        self.states[id.0].keywords.push((kw.as_bytes(), program));
    }

    /// Set the program run for numeric symbols with no keyword match.
    pub fn numeric(&mut self, id: StateId, program: Program) {
        self.states[id.0].numeric_op = Some(program);
    }

    /// Set the program run for delimiter symbols with no keyword match.
    pub fn delimiter(&mut self, id: StateId, program: Program) {
        self.states[id.0].delimiter_op = Some(program);
    }

    /// Set the catch-all program.
    pub fn fallback(&mut self, id: StateId, program: Program) {
        self.states[id.0].fallback_op = Some(program);
    }

    /// Compile every state reachable from `root` (recursively through
    /// `PushState`/`PushWeakState`) and freeze the arena. Compilation is
    /// idempotent.
    pub fn compile(mut self, root: StateId) -> Grammar {
        let mut pending = vec![root];
        let mut seen = vec![false; self.states.len()];
        while let Some(id) = pending.pop() {
            if seen[id.0] {
                continue;
            }
            seen[id.0] = true;
            self.states[id.0].compile();
            let state = &self.states[id.0];
            let programs = state
                .keywords
                .iter()
                .map(|(_, p)| p)
                .chain(state.numeric_op.iter())
                .chain(state.delimiter_op.iter())
                .chain(state.fallback_op.iter());
            for program in programs {
                for op in program {
                    if let Op::PushState(sub) | Op::PushWeakState(sub) = op {
                        if !seen[sub.0] {
                            pending.push(*sub);
                        }
                    }
                }
            }
        }
        Grammar {
            states: self.states,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charclass::CharClass;

    fn info(bytes: &[u8]) -> SymbolInfo<'_> {
        SymbolInfo {
            bytes,
            hash: symbol_hash(bytes),
            numeric: bytes.iter().all(|b| b.is_ascii_digit()) && !bytes.is_empty(),
            delimiter: bytes
                .first()
                .is_some_and(|&b| class_of(b) == CharClass::Delimiter),
        }
    }

    #[test]
    fn test_hash_mixes_length() {
        assert_ne!(symbol_hash(b"ob"), symbol_hash(b"obj"));
        assert_ne!(symbol_hash(b"stream"), symbol_hash(b"endstream"));
    }

    #[test]
    fn test_keyword_dispatch() {
        let mut gb = GrammarBuilder::new();
        let root = gb.state("root");
        gb.keyword(root, "obj", vec![Op::PushResult]);
        gb.keyword(root, "endobj", vec![Op::PopState]);
        gb.keyword(root, "stream", vec![Op::Nop]);
        gb.keyword(root, "endstream", vec![Op::Nop]);
        gb.keyword(root, "xref", vec![Op::Nop]);
        gb.keyword(root, "trailer", vec![Op::Nop]);
        gb.keyword(root, "startxref", vec![Op::Nop]);
        gb.numeric(root, vec![Op::PushResult]);
        gb.fallback(root, vec![Op::Nop]);
        let g = gb.compile(root);
        let state = g.state(g.root());

        assert_eq!(
            state.dispatch(&info(b"obj")),
            Some(&vec![Op::PushResult])
        );
        assert_eq!(state.dispatch(&info(b"endobj")), Some(&vec![Op::PopState]));
        // numeric fallback
        assert_eq!(state.dispatch(&info(b"123")), Some(&vec![Op::PushResult]));
        // catch-all
        assert_eq!(state.dispatch(&info(b"garbage")), Some(&vec![Op::Nop]));
    }

    #[test]
    fn test_no_fallback_is_none() {
        let mut gb = GrammarBuilder::new();
        let root = gb.state("root");
        gb.keyword(root, "only", vec![Op::Nop]);
        let g = gb.compile(root);
        assert!(g.state(g.root()).dispatch(&info(b"other")).is_none());
    }

    #[test]
    fn test_compile_reaches_substates() {
        let mut gb = GrammarBuilder::new();
        let root = gb.state("root");
        let sub = gb.state("sub");
        gb.keyword(root, "go", vec![Op::PushState(sub)]);
        gb.keyword(sub, "done", vec![Op::PopState]);
        let g = gb.compile(root);
        // sub was compiled: its keyword resolves
        assert!(g.state(sub).dispatch(&info(b"done")).is_some());
    }

    #[test]
    fn test_index_handles_many_keywords() {
        let mut gb = GrammarBuilder::new();
        let root = gb.state("root");
        let words: &[&'static str] = &[
            "aa", "ab", "ba", "bb", "abc", "cab", "obj", "endobj", "stream",
            "endstream", "xref", "trailer", "startxref", "true", "false",
            "null", "R",
        ];
        for w in words {
            gb.keyword(root, w, vec![Op::PushResult]);
        }
        let g = gb.compile(root);
        let state = g.state(root);
        for w in words {
            assert!(
                state.dispatch(&info(w.as_bytes())).is_some(),
                "keyword {} did not resolve",
                w
            );
        }
    }
}
