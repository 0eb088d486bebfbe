//! PDF value model.
//!
//! The scanner produces [`Atom`](crate::scanner::Atom) trees; this module
//! resolves them into the user-facing sum type and serializes values back to
//! bytes. Numbers keep their source lexeme and strings keep their source
//! form (escaped literal or hex) so that `scan(serialize(v)) == v` holds for
//! every value in the grammar.

use crate::charclass::{is_delimiter, is_whitespace, unescape, DEHEX, ESCAPE, HEX_VALUE};
use crate::error::{Error, Result};
use crate::grammar::tag;
use crate::scanner::Atom;
use indexmap::IndexMap;

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

/// A numeric value, carrying the exact source lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Number {
    lexeme: String,
}

impl Number {
    /// Wrap a raw lexeme. The caller guarantees it satisfies the numeric
    /// predicate (optional sign, at most one `.`, decimal digits).
    pub fn from_lexeme(lexeme: impl Into<String>) -> Self {
        Self {
            lexeme: lexeme.into(),
        }
    }

    /// An integer number.
    pub fn from_i64(v: i64) -> Self {
        Self {
            lexeme: v.to_string(),
        }
    }

    /// A real number.
    pub fn from_f64(v: f64) -> Self {
        Self {
            lexeme: format!("{}", v),
        }
    }

    /// The source lexeme.
    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }

    /// Integer interpretation, if the lexeme has no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        self.lexeme.parse().ok()
    }

    /// Floating-point interpretation.
    pub fn as_f64(&self) -> Option<f64> {
        // ".5" and "5." are valid PDF reals
        let s = &self.lexeme;
        if let Ok(v) = s.parse() {
            return Some(v);
        }
        let padded = if s.starts_with('.') {
            format!("0{}", s)
        } else if s.ends_with('.') {
            format!("{}0", s)
        } else {
            return None;
        };
        padded.parse().ok()
    }
}

/// Source form of a PDF string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    /// `(...)` literal with backslash escapes
    Literal,
    /// `<...>` hexadecimal
    Hex,
}

/// A PDF string, kept in its source form for lossless round-tripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString {
    raw: Vec<u8>,
    format: StringFormat,
}

impl PdfString {
    /// Wrap raw source bytes (without the enclosing delimiters).
    pub fn from_raw(raw: Vec<u8>, format: StringFormat) -> Self {
        Self { raw, format }
    }

    /// Build a literal string from plain bytes, applying escapes.
    pub fn from_plain(plain: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(plain.len());
        for &b in plain {
            match ESCAPE[b as usize] {
                1 => raw.push(b),
                0 => {
                    raw.push(b'\\');
                    raw.push(b'0' + ((b >> 6) & 7));
                    raw.push(b'0' + ((b >> 3) & 7));
                    raw.push(b'0' + (b & 7));
                }
                esc => {
                    raw.push(b'\\');
                    raw.push(esc);
                }
            }
        }
        Self {
            raw,
            format: StringFormat::Literal,
        }
    }

    /// The source bytes, without delimiters.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The source form.
    pub fn format(&self) -> StringFormat {
        self.format
    }

    /// Decode to plain bytes (resolve escapes or hex pairs).
    pub fn decoded(&self) -> Vec<u8> {
        match self.format {
            StringFormat::Literal => decode_literal(&self.raw),
            StringFormat::Hex => decode_hex(&self.raw),
        }
    }
}

fn decode_literal(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&e) = raw.get(i) else {
            break;
        };
        if let Some(mapped) = unescape(e) {
            out.push(mapped);
            i += 1;
        } else if e.is_ascii_digit() && e < b'8' {
            let mut v = 0u32;
            let mut n = 0;
            while n < 3 && i < raw.len() && (b'0'..b'8').contains(&raw[i]) {
                v = v * 8 + (raw[i] - b'0') as u32;
                i += 1;
                n += 1;
            }
            out.push((v & 0xFF) as u8);
        } else if e == b'\n' || e == b'\r' {
            // line continuation
            i += 1;
            if e == b'\r' && raw.get(i) == Some(&b'\n') {
                i += 1;
            }
        } else {
            // unknown escape: keep the escaped byte
            out.push(e);
            i += 1;
        }
    }
    out
}

fn decode_hex(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() / 2 + 1);
    let mut hi: Option<u8> = None;
    for &b in raw {
        let v = HEX_VALUE[b as usize];
        if v < 0 {
            continue; // whitespace and junk are ignored
        }
        match hi.take() {
            None => hi = Some(v as u8),
            Some(h) => out.push((h << 4) | v as u8),
        }
    }
    if let Some(h) = hi {
        // odd digit count: final digit is the high nibble
        out.push(h << 4);
    }
    out
}

/// A PDF name, with `#XX` escapes decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(pub String);

impl Name {
    /// Decode a raw name body (the bytes after `/`).
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                let h = HEX_VALUE[raw[i + 1] as usize];
                let l = HEX_VALUE[raw[i + 2] as usize];
                if h >= 0 && l >= 0 {
                    out.push(((h << 4) | l) as u8);
                    i += 3;
                    continue;
                }
            }
            out.push(raw[i]);
            i += 1;
        }
        Name(String::from_utf8_lossy(&out).into_owned())
    }

    /// The decoded name text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.push(b'/');
        for &b in self.0.as_bytes() {
            if b == b'#' || is_delimiter(b) || is_whitespace(b) || !(33..=126).contains(&b) {
                out.push(b'#');
                out.push(DEHEX[(b >> 4) as usize]);
                out.push(DEHEX[(b & 0xF) as usize]);
            } else {
                out.push(b);
            }
        }
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// An ordered PDF dictionary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary {
    entries: IndexMap<String, Value>,
}

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by decoded key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Insert or replace an entry, preserving insertion order.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value (integer or real, lexeme-preserving)
    Number(Number),
    /// String (literal or hex)
    String(PdfString),
    /// Name (starting with /)
    Name(Name),
    /// Array of values
    Array(Vec<Value>),
    /// Dictionary (ordered key-value pairs)
    Dictionary(Dictionary),
    /// Indirect object reference
    Reference(ObjectRef),
}

impl Value {
    /// Integer shorthand.
    pub fn integer(v: i64) -> Self {
        Value::Number(Number::from_i64(v))
    }

    /// Name shorthand.
    pub fn name(n: impl Into<String>) -> Self {
        Value::Name(Name(n.into()))
    }

    /// Reference shorthand.
    pub fn reference(id: u32, gen: u16) -> Self {
        Value::Reference(ObjectRef::new(id, gen))
    }

    /// Human-readable type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Name(_) => "Name",
            Value::Array(_) => "Array",
            Value::Dictionary(_) => "Dictionary",
            Value::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Try to cast to name text.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    /// Try to cast to dictionary.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Mutable dictionary access.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string.
    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check for null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Resolve a scanner atom into a value.
    pub fn from_atom(atom: &Atom) -> Result<Value> {
        match atom {
            Atom::Lexeme(bytes) => match bytes.as_slice() {
                b"true" => Ok(Value::Boolean(true)),
                b"false" => Ok(Value::Boolean(false)),
                b"null" | b"" => Ok(Value::Null),
                b if b.first() == Some(&b'(') => {
                    let inner = &b[1..b.len().saturating_sub(1)];
                    Ok(Value::String(PdfString::from_raw(
                        inner.to_vec(),
                        StringFormat::Literal,
                    )))
                }
                b => {
                    if crate::charclass::classify_symbol(b)
                        == crate::charclass::SymbolClass::Numeric
                    {
                        Ok(Value::Number(Number::from_lexeme(
                            String::from_utf8_lossy(b).into_owned(),
                        )))
                    } else {
                        Err(Error::Decode(format!(
                            "unexpected lexeme in value position: {:?}",
                            String::from_utf8_lossy(b)
                        )))
                    }
                }
            },
            Atom::Ident(id) => Err(Error::Decode(format!(
                "unexpected identifier in value position: {}",
                id
            ))),
            Atom::Keyed(_, inner) => Value::from_atom(inner),
            Atom::Complex(t, children) => match *t {
                tag::NAME => {
                    let raw = children
                        .first()
                        .and_then(Atom::lexeme_bytes)
                        .unwrap_or_default();
                    Ok(Value::Name(Name::from_raw(raw)))
                }
                tag::HEXSTR => {
                    let raw = children
                        .first()
                        .and_then(Atom::lexeme_bytes)
                        .unwrap_or_default();
                    Ok(Value::String(PdfString::from_raw(
                        raw.to_vec(),
                        StringFormat::Hex,
                    )))
                }
                tag::REF => {
                    let id = atom_u32(atom, tag::ID)?;
                    let gen = atom_u32(atom, tag::GEN)? as u16;
                    Ok(Value::Reference(ObjectRef::new(id, gen)))
                }
                tag::DICT => {
                    let mut dict = Dictionary::new();
                    for entry in composite_children(atom) {
                        let Atom::Complex(tag::ENTRY, _) = entry else {
                            continue;
                        };
                        let key = entry
                            .find_keyed(tag::KEY)
                            .ok_or_else(|| Error::Decode("dict entry without key".into()))?;
                        let value = entry
                            .find_keyed(tag::VALUE)
                            .ok_or_else(|| Error::Decode("dict entry without value".into()))?;
                        let Value::Name(name) = Value::from_atom(key)? else {
                            return Err(Error::Decode("dict key is not a name".into()));
                        };
                        dict.set(name.0, Value::from_atom(value)?);
                    }
                    Ok(Value::Dictionary(dict))
                }
                tag::ARRAY => {
                    let mut items = Vec::new();
                    for elem in composite_children(atom) {
                        if let Atom::Complex(tag::ELEM, children) = elem {
                            if let Some(inner) = children.first() {
                                items.push(Value::from_atom(inner)?);
                            }
                        }
                    }
                    Ok(Value::Array(items))
                }
                other => Err(Error::Decode(format!(
                    "unexpected composite in value position: {}",
                    other
                ))),
            },
        }
    }

    /// Serialize the value into `out` in canonical form.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.extend_from_slice(b"null"),
            Value::Boolean(true) => out.extend_from_slice(b"true"),
            Value::Boolean(false) => out.extend_from_slice(b"false"),
            Value::Number(n) => out.extend_from_slice(n.lexeme().as_bytes()),
            Value::String(s) => match s.format() {
                StringFormat::Literal => {
                    out.push(b'(');
                    out.extend_from_slice(s.raw());
                    out.push(b')');
                }
                StringFormat::Hex => {
                    out.push(b'<');
                    out.extend_from_slice(s.raw());
                    out.push(b'>');
                }
            },
            Value::Name(n) => n.serialize_into(out),
            Value::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    item.serialize_into(out);
                }
                out.push(b']');
            }
            Value::Dictionary(dict) => {
                out.extend_from_slice(b"<< ");
                for (key, value) in dict.iter() {
                    Name(key.clone()).serialize_into(out);
                    out.push(b' ');
                    value.serialize_into(out);
                    out.push(b' ');
                }
                out.extend_from_slice(b">>");
            }
            Value::Reference(r) => {
                out.extend_from_slice(r.to_string().as_bytes());
            }
        }
    }

    /// Serialize the value to a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }
}

/// Children of a composite that funnels through a `Keyed(ENTRIES, ...)` list.
fn composite_children(atom: &Atom) -> &[Atom] {
    match atom.find_keyed(tag::ENTRIES) {
        Some(Atom::Complex(_, list)) => list,
        _ => &[],
    }
}

fn atom_u32(atom: &Atom, key: &str) -> Result<u32> {
    let bytes = atom
        .find_keyed(key)
        .and_then(Atom::lexeme_bytes)
        .ok_or_else(|| Error::Decode(format!("missing {} in composite", key)))?;
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Decode(format!("non-numeric {} in composite", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_lexeme_preserved() {
        let n = Number::from_lexeme("00042");
        assert_eq!(n.as_i64(), Some(42));
        assert_eq!(n.lexeme(), "00042");
        assert_eq!(Number::from_lexeme(".5").as_f64(), Some(0.5));
        assert_eq!(Number::from_lexeme("5.").as_f64(), Some(5.0));
        assert_eq!(Number::from_lexeme("-.002").as_f64(), Some(-0.002));
    }

    #[test]
    fn test_literal_string_decoding() {
        let s = PdfString::from_raw(b"Line1\\nLine2".to_vec(), StringFormat::Literal);
        assert_eq!(s.decoded(), b"Line1\nLine2");

        let s = PdfString::from_raw(b"\\247 section".to_vec(), StringFormat::Literal);
        assert_eq!(s.decoded(), b"\xa7 section");

        let s = PdfString::from_raw(b"a\\(b\\)c".to_vec(), StringFormat::Literal);
        assert_eq!(s.decoded(), b"a(b)c");
    }

    #[test]
    fn test_hex_string_decoding() {
        let s = PdfString::from_raw(b"48 65 6C 6C 6F".to_vec(), StringFormat::Hex);
        assert_eq!(s.decoded(), b"Hello");
        // odd digit count pads with zero
        let s = PdfString::from_raw(b"901FA".to_vec(), StringFormat::Hex);
        assert_eq!(s.decoded(), vec![0x90, 0x1F, 0xA0]);
    }

    #[test]
    fn test_plain_string_escaping_round_trip() {
        let s = PdfString::from_plain(b"a(b)\nc\\");
        assert_eq!(s.decoded(), b"a(b)\nc\\");
        let mut out = Vec::new();
        Value::String(s).serialize_into(&mut out);
        assert!(out.starts_with(b"("));
        assert!(out.ends_with(b")"));
    }

    #[test]
    fn test_name_escapes() {
        assert_eq!(Name::from_raw(b"A#20B").as_str(), "A B");
        assert_eq!(Name::from_raw(b"Type").as_str(), "Type");
        assert_eq!(Name::from_raw(b"A#ZZ").as_str(), "A#ZZ");

        let mut out = Vec::new();
        Name("A B".to_string()).serialize_into(&mut out);
        assert_eq!(out, b"/A#20B");
    }

    #[test]
    fn test_dictionary_order_preserved() {
        let mut d = Dictionary::new();
        d.set("Z", Value::integer(1));
        d.set("A", Value::integer(2));
        let keys: Vec<&String> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Z", "A"]);
    }

    #[test]
    fn test_serialize_dict() {
        let mut d = Dictionary::new();
        d.set("Type", Value::name("Catalog"));
        d.set("Pages", Value::reference(2, 0));
        let v = Value::Dictionary(d);
        assert_eq!(v.to_bytes(), b"<< /Type /Catalog /Pages 2 0 R >>");
    }

    #[test]
    fn test_serialize_array() {
        let v = Value::Array(vec![
            Value::integer(1),
            Value::name("Two"),
            Value::Boolean(true),
        ]);
        assert_eq!(v.to_bytes(), b"[1 /Two true]");
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(10, 0).to_string(), "10 0 R");
    }
}
