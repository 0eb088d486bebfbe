//! The PDF grammar, defined once as a set of interlinked states.
//!
//! The grammar recognizes integers, reals, literal strings with balanced
//! parentheses and backslash escapes, hex strings, names, arrays,
//! dictionaries, indirect references (`N G R`), indirect object headers
//! (`N G obj`), `stream`/`endstream`, text xref subsection headers,
//! `trailer` and `startxref`. Comments are consumed silently.
//!
//! PDF's two-token lookahead (`1 2 R` vs. `1 2` as separate values) is
//! resolved with pushback: a reference-candidate state consumes up to two
//! numbers and, when the trailing `R` fails to appear, re-queues the second
//! number as a fake symbol so the enclosing state re-reads it as a fresh
//! value.

use crate::state::{Grammar, GrammarBuilder, Op, StateId};
use lazy_static::lazy_static;

/// Composite tags and keys used by the grammar's operator programs.
pub mod tag {
    /// Indirect object header `N G obj`
    pub const OBJ: &str = "obj";
    /// Indirect reference `N G R`
    pub const REF: &str = "ref";
    /// Dictionary
    pub const DICT: &str = "dict";
    /// One dictionary entry
    pub const ENTRY: &str = "e";
    /// Array
    pub const ARRAY: &str = "array";
    /// One array element
    pub const ELEM: &str = "ae";
    /// Name (`/...`)
    pub const NAME: &str = "name";
    /// Hex string (`<...>`)
    pub const HEXSTR: &str = "hexstr";
    /// Text xref subsection header (`first count`)
    pub const XREFSUB: &str = "xref";
    /// Trailer (`trailer << ... >>`)
    pub const TRAILER: &str = "trailer";
    /// `startxref N`
    pub const STARTXREF: &str = "startxref";
    /// `endstream` marker
    pub const ENDSTREAM: &str = "endstream";

    /// Key: object id
    pub const ID: &str = "id";
    /// Key: generation id
    pub const GEN: &str = "gen";
    /// Key: dictionary entry key
    pub const KEY: &str = "key";
    /// Key: dictionary entry value
    pub const VALUE: &str = "value";
    /// Key: collected children of a composite
    pub const ENTRIES: &str = "entries";
    /// Key: first object id of an xref subsection
    pub const FIRST: &str = "first";
    /// Key: entry count of an xref subsection
    pub const COUNT: &str = "count";
}

/// The compiled PDF grammar plus its entry states.
pub struct PdfGrammar {
    grammar: Grammar,
    root: StateId,
    reverse_root: StateId,
}

impl PdfGrammar {
    /// The compiled state arena.
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Root state for forward document scanning.
    pub fn root(&self) -> StateId {
        self.root
    }

    /// Root state for the reverse trailer scan: every symbol is returned
    /// verbatim as a result.
    pub fn reverse_root(&self) -> StateId {
        self.reverse_root
    }
}

fn build() -> PdfGrammar {
    use tag::*;
    let mut g = GrammarBuilder::new();

    let root = g.state("pdf");
    let objhdr = g.state("objhdr");
    let objhdr2 = g.state("objhdr2");
    let ref_or_num = g.state("ref_or_num");
    let ref_confirm = g.state("ref_confirm");
    let name = g.state("name");
    let dict = g.state("dict");
    let dict_close = g.state("dict_close");
    let dval = g.state("dval");
    let array = g.state("array");
    let lt = g.state("lt");
    let hex_end = g.state("hex_end");
    let paren = g.state("paren");
    let paren_nest = g.state("paren_nest");
    let xref = g.state("xref_table");
    let xref2 = g.state("xref_subsection");
    let trailer_dict = g.state("trailer_dict");
    let startxref = g.state("startxref");
    let rev = g.state("reverse");

    g.iterates(root);
    g.iterates(xref);
    g.iterates(rev);

    // --- document root ------------------------------------------------
    g.numeric(root, vec![Op::PushResult, Op::PushState(objhdr)]);
    g.keyword(root, "xref", vec![Op::PushState(xref)]);
    g.keyword(root, "startxref", vec![Op::PushState(startxref)]);
    g.keyword(root, "trailer", vec![Op::PushState(trailer_dict)]);
    g.keyword(root, "endstream", vec![Op::PushComplex(ENDSTREAM)]);
    for kw in ["obj", "endobj", "stream", "true", "false", "null", "R"] {
        g.keyword(root, kw, vec![Op::PushResult]);
    }
    g.keyword(root, "<", vec![Op::PushState(lt)]);
    g.keyword(root, "[", vec![Op::PushState(array)]);
    g.keyword(root, "(", vec![Op::Mark, Op::PushState(paren)]);
    g.keyword(root, "/", vec![Op::PushState(name)]);
    g.keyword(root, "%", vec![Op::PopLine]);
    g.delimiter(root, vec![Op::PushResult]);
    g.fallback(root, vec![Op::PushResult]);

    // --- object header: first number seen at root ----------------------
    g.numeric(
        objhdr,
        vec![Op::PushResult, Op::PushState(objhdr2), Op::PopState],
    );
    g.delimiter(objhdr, vec![Op::PushbackSymbol, Op::PopState]);
    g.fallback(objhdr, vec![Op::PushbackSymbol, Op::PopState]);

    g.keyword(
        objhdr2,
        "obj",
        vec![
            Op::PopVariable(GEN),
            Op::PopVariable(ID),
            Op::PushComplex(OBJ),
            Op::PopState,
        ],
    );
    g.keyword(
        objhdr2,
        "R",
        vec![
            Op::PopVariable(GEN),
            Op::PopVariable(ID),
            Op::PushComplex(REF),
            Op::PopState,
        ],
    );
    let bail = vec![Op::PushbackSymbol, Op::PushbackValue, Op::PopState];
    g.numeric(objhdr2, bail.clone());
    g.delimiter(objhdr2, bail.clone());
    g.fallback(objhdr2, bail.clone());

    // --- reference candidate inside values ------------------------------
    g.numeric(
        ref_or_num,
        vec![Op::PushResult, Op::PushState(ref_confirm), Op::PopState],
    );
    g.delimiter(ref_or_num, vec![Op::PushbackSymbol, Op::PopState]);
    g.fallback(ref_or_num, vec![Op::PushbackSymbol, Op::PopState]);

    g.keyword(
        ref_confirm,
        "R",
        vec![
            Op::PopVariable(GEN),
            Op::PopVariable(ID),
            Op::PushComplex(REF),
            Op::PopState,
        ],
    );
    g.numeric(ref_confirm, bail.clone());
    g.delimiter(ref_confirm, bail.clone());
    g.fallback(ref_confirm, bail);

    // --- names ----------------------------------------------------------
    let name_done = vec![
        Op::PushResult,
        Op::PopValue,
        Op::PushComplex(NAME),
        Op::PopState,
    ];
    g.numeric(name, name_done.clone());
    g.fallback(name, name_done);
    // empty name ("/ " or "//"): lenient
    g.delimiter(
        name,
        vec![
            Op::PushbackSymbol,
            Op::PushEmpty,
            Op::PopValue,
            Op::PushComplex(NAME),
            Op::PopState,
        ],
    );

    // --- dictionaries ---------------------------------------------------
    g.keyword(
        dict,
        "/",
        vec![
            Op::PushState(name),
            Op::PopVariable(KEY),
            Op::PushState(dval),
            Op::PopVariable(VALUE),
            Op::StoveComplex(ENTRY),
        ],
    );
    g.keyword(dict, ">", vec![Op::PushState(dict_close)]);

    g.keyword(
        dict_close,
        ">",
        vec![
            Op::PopState,
            Op::PullBuildVariable(ENTRIES),
            Op::PushComplex(DICT),
            Op::PopState,
        ],
    );

    g.numeric(
        dval,
        vec![Op::PushResult, Op::PushState(ref_or_num), Op::PopState],
    );
    g.keyword(dval, "/", vec![Op::PushState(name), Op::PopState]);
    g.keyword(dval, "[", vec![Op::PushState(array), Op::PopState]);
    g.keyword(dval, "<", vec![Op::PushState(lt), Op::PopState]);
    g.keyword(
        dval,
        "(",
        vec![Op::Mark, Op::PushState(paren), Op::PopState],
    );
    for kw in ["true", "false", "null"] {
        g.keyword(dval, kw, vec![Op::PushResult, Op::PopState]);
    }
    g.fallback(dval, vec![Op::PushResult, Op::PopState]);
    // missing value: hand an empty lexeme back and let the dict see the
    // stray delimiter
    g.delimiter(
        dval,
        vec![Op::PushbackSymbol, Op::PushEmpty, Op::PopState],
    );

    // --- arrays ---------------------------------------------------------
    let elem = |v: Vec<Op>| -> Vec<Op> {
        let mut ops = v;
        ops.push(Op::PopValue);
        ops.push(Op::StoveComplex(ELEM));
        ops
    };
    g.numeric(
        array,
        elem(vec![Op::PushResult, Op::PushState(ref_or_num)]),
    );
    g.keyword(array, "/", elem(vec![Op::PushState(name)]));
    g.keyword(array, "[", elem(vec![Op::PushState(array)]));
    g.keyword(array, "<", elem(vec![Op::PushState(lt)]));
    g.keyword(array, "(", elem(vec![Op::Mark, Op::PushState(paren)]));
    for kw in ["true", "false", "null", "R"] {
        g.keyword(array, kw, elem(vec![Op::PushResult]));
    }
    g.keyword(
        array,
        "]",
        vec![
            Op::PullBuildVariable(ENTRIES),
            Op::PushComplex(ARRAY),
            Op::PopState,
        ],
    );
    g.fallback(array, elem(vec![Op::PushResult]));

    // --- "<": dictionary open or hex string -----------------------------
    g.keyword(lt, "<", vec![Op::PushState(dict), Op::PopState]);
    g.keyword(
        lt,
        ">",
        vec![
            Op::PushEmpty,
            Op::PopValue,
            Op::PushComplex(HEXSTR),
            Op::PopState,
        ],
    );
    let hex_body = vec![
        Op::Mark,
        Op::ReadToDelimiter,
        Op::PushMarked,
        Op::PopValue,
        Op::PushState(hex_end),
        Op::PushComplex(HEXSTR),
        Op::PopState,
    ];
    g.numeric(lt, hex_body.clone());
    g.fallback(lt, hex_body);

    g.keyword(hex_end, ">", vec![Op::PopState]);

    // --- literal strings -------------------------------------------------
    g.keyword(paren, "(", vec![Op::PushState(paren_nest)]);
    g.keyword(paren, ")", vec![Op::PushMarked, Op::PopState]);
    g.numeric(paren, vec![Op::Nop]);
    g.delimiter(paren, vec![Op::Nop]);
    g.fallback(paren, vec![Op::Nop]);

    g.keyword(paren_nest, "(", vec![Op::PushState(paren_nest)]);
    g.keyword(paren_nest, ")", vec![Op::PopState]);
    g.numeric(paren_nest, vec![Op::Nop]);
    g.delimiter(paren_nest, vec![Op::Nop]);
    g.fallback(paren_nest, vec![Op::Nop]);

    // --- text xref table -------------------------------------------------
    // Each subsection header is returned as its own result; the parser
    // skips the 20-byte rows and polls again.
    g.numeric(xref, vec![Op::PushResult, Op::PushState(xref2)]);
    g.keyword(
        xref,
        "trailer",
        vec![Op::PushState(trailer_dict), Op::PopState],
    );

    g.numeric(
        xref2,
        vec![
            Op::PushResult,
            Op::PopVariable(COUNT),
            Op::PopVariable(FIRST),
            Op::PushComplex(XREFSUB),
            Op::PopState,
        ],
    );

    g.keyword(
        trailer_dict,
        "<",
        vec![
            Op::PushState(lt),
            Op::PopValue,
            Op::PushComplex(TRAILER),
            Op::PopState,
        ],
    );

    // --- startxref -------------------------------------------------------
    g.numeric(
        startxref,
        vec![
            Op::PushResult,
            Op::PopValue,
            Op::PushComplex(STARTXREF),
            Op::PopState,
        ],
    );

    // --- reverse scan root -----------------------------------------------
    g.numeric(rev, vec![Op::PushResult]);
    g.delimiter(rev, vec![Op::PushResult]);
    g.fallback(rev, vec![Op::PushResult]);

    PdfGrammar {
        grammar: g.compile(root),
        root,
        reverse_root: rev,
    }
}

lazy_static! {
    static ref PDF_GRAMMAR: PdfGrammar = build();
}

/// The process-wide compiled PDF grammar.
pub fn pdf() -> &'static PdfGrammar {
    &PDF_GRAMMAR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{symbol_hash, SymbolInfo};

    #[test]
    fn test_grammar_builds_once() {
        let g1 = pdf();
        let g2 = pdf();
        assert!(std::ptr::eq(g1, g2));
    }

    #[test]
    fn test_root_keywords_resolve() {
        let g = pdf();
        let root = g.grammar().state(g.root());
        for kw in ["xref", "startxref", "trailer", "obj", "endobj", "stream", "endstream"] {
            let info = SymbolInfo {
                bytes: kw.as_bytes(),
                hash: symbol_hash(kw.as_bytes()),
                numeric: false,
                delimiter: false,
            };
            assert!(root.dispatch(&info).is_some(), "{} unresolved", kw);
        }
    }

    #[test]
    fn test_root_iterates() {
        let g = pdf();
        assert!(g.grammar().state(g.root()).iterates());
        assert!(g.grammar().state(g.reverse_root()).iterates());
    }
}
