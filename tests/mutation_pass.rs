//! End-to-end mutation pass scenarios.
//!
//! Each test builds a small but complete PDF, runs a pass over it, and
//! checks the output both byte-wise and by re-opening it with the parser.

use pdf_conduit::{MutatorOutcome, Parser, Value};
use std::collections::HashMap;
use std::io::Cursor;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Incremental builder for handcrafted test documents.
struct PdfBuilder {
    bytes: Vec<u8>,
    offsets: HashMap<u32, usize>,
}

impl PdfBuilder {
    fn new(version: &str) -> Self {
        PdfBuilder {
            bytes: format!("%PDF-{}\n", version).into_bytes(),
            offsets: HashMap::new(),
        }
    }

    fn pos(&self) -> usize {
        self.bytes.len()
    }

    fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }

    fn object(&mut self, id: u32, body: &str) -> &mut Self {
        self.offsets.insert(id, self.bytes.len());
        self.bytes
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        self
    }

    fn stream_object(&mut self, id: u32, dict: &str, data: &[u8]) -> &mut Self {
        self.offsets.insert(id, self.bytes.len());
        self.bytes
            .extend_from_slice(format!("{} 0 obj\n{}\nstream\n", id, dict).as_bytes());
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    /// Standard text tail: one subsection over `0..size`, trailer, startxref.
    fn text_tail(&mut self, size: u32, trailer: &str) -> Vec<u8> {
        let xref_at = self.bytes.len();
        self.bytes
            .extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        self.bytes.extend_from_slice(b"0000000000 65535 f \n");
        for id in 1..size {
            match self.offsets.get(&id) {
                Some(&off) => self
                    .bytes
                    .extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes()),
                None => self.bytes.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        self.bytes
            .extend_from_slice(format!("trailer\n{}\n", trailer).as_bytes());
        self.bytes
            .extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_at).as_bytes());
        std::mem::take(&mut self.bytes)
    }
}

fn two_object_pdf() -> Vec<u8> {
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    b.text_tail(3, "<< /Size 3 /Root 1 0 R >>")
}

fn run_pass<F>(input: Vec<u8>, callback: F) -> Vec<u8>
where
    F: FnMut(&mut Parser<Cursor<Vec<u8>>, &mut Vec<u8>>) -> MutatorOutcome,
{
    let mut output = Vec::new();
    let parser = Parser::open(Cursor::new(input), &mut output).expect("open");
    parser.run(callback).expect("run");
    output
}

fn reopen(output: &[u8]) -> Parser<Cursor<Vec<u8>>, Vec<u8>> {
    Parser::open(Cursor::new(output.to_vec()), Vec::new()).expect("reopen output")
}

// --- scenario: pass-through --------------------------------------------

#[test]
fn pass_through_keeps_object_bytes() {
    init_logging();
    let input = two_object_pdf();
    let object_region = input
        .windows(4)
        .position(|w| w == b"xref")
        .expect("tail marker");

    let output = run_pass(input.clone(), |_| MutatorOutcome::Done);

    // every byte up to the superseded tail is preserved
    assert_eq!(&output[..object_region], &input[..object_region]);

    // the fresh tail describes the same objects at the same offsets
    let mut parser = reopen(&output);
    let cat = parser.locate_definition(1, true).unwrap();
    assert_eq!(
        cat.as_dict().unwrap().get("Type").unwrap().as_name(),
        Some("Catalog")
    );
    let pages = parser.locate_definition(2, true).unwrap();
    assert_eq!(
        pages.as_dict().unwrap().get("Count").unwrap().as_i64(),
        Some(0)
    );
}

#[test]
fn pass_through_with_stream_object() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    b.object(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>");
    b.stream_object(4, "<< /Length 20 >>", b"0 0 100 100 re f\nBT\n");
    let input = b.text_tail(5, "<< /Size 5 /Root 1 0 R >>");

    let output = run_pass(input.clone(), |_| MutatorOutcome::Done);

    // the stream body appears verbatim
    let body = b"stream\n0 0 100 100 re f\nBT\n\nendstream";
    assert!(
        output.windows(body.len()).any(|w| w == body),
        "stream body not found verbatim in output"
    );

    let mut parser = reopen(&output);
    let mut ids = Vec::new();
    while parser.iterate().unwrap() {
        ids.push(parser.current_id());
    }
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

// --- scenario: dictionary mutation ---------------------------------------

#[test]
fn dict_mutation_rewrites_single_object() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /A 1 >>");
    b.object(2, "<< /B 2 >>");
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let output = run_pass(input, |p| {
        if p.current_id() == 1 {
            let ob = p.current_object().unwrap();
            ob.dict_mut().unwrap().set("A", Value::integer(2));
        }
        MutatorOutcome::Done
    });

    let rewritten = b"1 0 obj\n<< /A 2 >>\nendobj\n";
    assert!(
        output.windows(rewritten.len()).any(|w| w == rewritten),
        "rewritten object not in canonical shape"
    );
    // the untouched neighbor is still byte-identical
    let untouched = b"2 0 obj\n<< /B 2 >>\nendobj\n";
    assert!(output.windows(untouched.len()).any(|w| w == untouched));

    let mut parser = reopen(&output);
    let v = parser.locate_definition(1, true).unwrap();
    assert_eq!(v.as_dict().unwrap().get("A").unwrap().as_i64(), Some(2));
}

#[test]
fn stream_replacement_updates_length_and_drops_filters() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog >>");
    // pretend-compressed stream; the filter chain is dropped on replace
    b.stream_object(2, "<< /Length 5 /Filter /FlateDecode >>", b"fake!");
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let output = run_pass(input, |p| {
        if p.current_id() == 2 {
            p.set_stream(b"BT (new) Tj ET".to_vec(), false).unwrap();
        }
        MutatorOutcome::Done
    });

    let mut parser = reopen(&output);
    let v = parser.locate_definition(2, true).unwrap();
    let dict = v.as_dict().unwrap();
    assert_eq!(dict.get("Length").unwrap().as_i64(), Some(14));
    assert!(dict.get("Filter").is_none());
    assert!(output
        .windows(b"stream\nBT (new) Tj ET\nendstream".len())
        .any(|w| w == b"stream\nBT (new) Tj ET\nendstream"));
}

// --- scenario: deletion ---------------------------------------------------

#[test]
fn delete_frees_slot_and_removes_envelope() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /A 1 >>");
    b.object(2, "<< /Type /Catalog >>");
    let input = b.text_tail(3, "<< /Size 3 /Root 2 0 R >>");

    let output = run_pass(input, |p| {
        if p.current_id() == 1 {
            p.delete_object().unwrap();
        }
        MutatorOutcome::Done
    });

    // no trace of the envelope in the object region
    assert!(!output.windows(7).any(|w| w == b"1 0 obj"));

    // the free chain links slot 0 to the deleted id
    let tail_at = output
        .windows(5)
        .position(|w| w == b"xref\n")
        .expect("fresh tail");
    let tail = &output[tail_at..];
    assert!(tail.starts_with(b"xref\n0 3\n0000000001 65535 f \n0000000000 00000 f \n"));

    let mut parser = reopen(&output);
    assert!(parser.locate_definition(1, true).is_err());
    assert!(parser.locate_definition(2, true).is_ok());
}

// --- scenario: append -----------------------------------------------------

#[test]
fn appended_object_lands_after_last_input_object() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog >>");
    b.object(2, "<< /Unrelated true >>");
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let mut created = None;
    let output = run_pass(input, |p| {
        if created.is_none() {
            let mut dict = pdf_conduit::Dictionary::new();
            dict.set(
                "B",
                Value::String(pdf_conduit::PdfString::from_plain(b"hi")),
            );
            let ob = p.create_object_appended();
            *ob.def_mut() = Value::Dictionary(dict);
            created = Some(ob.id());
        }
        MutatorOutcome::Done
    });

    let id = created.expect("id reserved");
    assert_eq!(id, 3, "first free slot after the live objects");

    let appended = format!("{} 0 obj\n<< /B (hi) >>\nendobj\n", id);
    let at = output
        .windows(appended.len())
        .position(|w| w == appended.as_bytes())
        .expect("appended object present");
    let last_input_obj = output
        .windows(7)
        .position(|w| w == b"2 0 obj")
        .expect("input object present");
    assert!(at > last_input_obj, "appended after the last input object");

    // one more live entry in the master table
    let mut parser = reopen(&output);
    let v = parser.locate_definition(id, true).unwrap();
    assert_eq!(
        v.as_dict().unwrap().get("B").unwrap().as_string().unwrap().decoded(),
        b"hi"
    );
}

#[test]
fn inserted_object_is_written_at_the_cursor() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog >>");
    b.object(2, "<< /Last true >>");
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let mut created = false;
    let output = run_pass(input, |p| {
        if p.current_id() == 1 && !created {
            created = true;
            let ob = p.create_object_now();
            *ob.def_mut() = Value::integer(7);
        }
        MutatorOutcome::Done
    });

    let inserted = output
        .windows(b"3 0 obj\n7\nendobj\n".len())
        .position(|w| w == b"3 0 obj\n7\nendobj\n")
        .expect("inserted object present");
    let second = output
        .windows(7)
        .position(|w| w == b"2 0 obj")
        .expect("second object present");
    assert!(inserted < second, "insert lands before the next input object");

    let mut parser = reopen(&output);
    assert_eq!(parser.locate_definition(3, true).unwrap().as_i64(), Some(7));
}

// --- scenario: compressed members ----------------------------------------

/// Build a PDF whose object 7 lives inside object stream 20, indexed by a
/// binary xref stream.
fn compressed_member_pdf() -> Vec<u8> {
    let mut b = PdfBuilder::new("1.5");
    b.object(1, "<< /Type /Catalog >>");

    // object stream: members 7 and 8
    let members = b"<< /V 1 >> 42 ";
    let header = b"7 0 8 11 ";
    let mut payload = header.to_vec();
    payload.extend_from_slice(members);
    let dict = format!(
        "<< /Type /ObjStm /N 2 /First {} /Length {} >>",
        header.len(),
        payload.len()
    );
    b.stream_object(20, &dict, &payload);

    // binary xref stream indexing: 0 free, 1 used, 7/8 compressed, 20 + 30 used
    let xref_at = b.pos();
    let o1 = *b.offsets.get(&1).unwrap();
    let o20 = *b.offsets.get(&20).unwrap();
    fn push_row(rows: &mut Vec<u8>, ty: u8, f2: u32, f3: u16) {
        rows.push(ty);
        rows.extend_from_slice(&f2.to_be_bytes());
        rows.extend_from_slice(&f3.to_be_bytes());
    }
    let mut rows: Vec<u8> = Vec::new();
    push_row(&mut rows, 0, 0, 0xFFFF); // 0: free
    push_row(&mut rows, 1, o1 as u32, 0); // 1
    push_row(&mut rows, 2, 20, 0); // 7: container 20, index 0
    push_row(&mut rows, 2, 20, 1); // 8: container 20, index 1
    push_row(&mut rows, 1, o20 as u32, 0); // 20
    push_row(&mut rows, 1, xref_at as u32, 0); // 30: the xref stream itself

    let xdict = format!(
        "<< /Type /XRef /Size 31 /W [1 4 2] /Index [0 2 7 2 20 1 30 1] /Root 1 0 R /Length {} >>",
        rows.len()
    );
    b.stream_object(30, &xdict, &rows);
    b.raw(format!("startxref\n{}\n%%EOF\n", xref_at).as_bytes());
    std::mem::take(&mut b.bytes)
}

#[test]
fn compressed_member_resolves_through_container() {
    init_logging();
    let input = compressed_member_pdf();
    let mut parser = Parser::open(Cursor::new(input), Vec::new()).unwrap();

    let v = parser.locate_definition(7, true).unwrap();
    assert_eq!(v.as_dict().unwrap().get("V").unwrap().as_i64(), Some(1));
    let v = parser.locate_definition(8, true).unwrap();
    assert_eq!(v.as_i64(), Some(42));

    let member = parser.compressed_member(7).unwrap();
    assert_eq!(member.class(), pdf_conduit::ObjectClass::CompressedMember);
}

#[test]
fn compressed_member_rewrite_goes_through_container() {
    init_logging();
    let input = compressed_member_pdf();

    let mut output = Vec::new();
    let mut parser = Parser::open(Cursor::new(input), &mut output).unwrap();

    let mut dict = pdf_conduit::Dictionary::new();
    dict.set("V", Value::integer(2));
    parser
        .stage_member_rewrite(7, Value::Dictionary(dict))
        .unwrap();
    parser.run(|_| MutatorOutcome::Done).unwrap();

    // the container was rewritten in place: plain object stream, new member
    assert!(
        output
            .windows(b"<< /V 2 >>".len())
            .any(|w| w == b"<< /V 2 >>"),
        "updated member not in rewritten container"
    );

    let mut parser = reopen(&output);
    let v = parser.locate_definition(7, true).unwrap();
    assert_eq!(v.as_dict().unwrap().get("V").unwrap().as_i64(), Some(2));
    // the untouched sibling survives the rebuild
    let v = parser.locate_definition(8, true).unwrap();
    assert_eq!(v.as_i64(), Some(42));
}

// --- scenario: oversized objects -----------------------------------------

#[test]
fn oversized_definition_is_fetched_after_retries() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog >>");
    // an array definition well beyond the default 4 KiB branch window
    let mut big = String::from("[ ");
    for i in 0..3000 {
        big.push_str(&format!("{} ", i));
    }
    big.push(']');
    b.object(2, &big);
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let mut parser = Parser::open(Cursor::new(input), Vec::new()).unwrap();
    let v = parser.locate_definition(2, true).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 3000);
    assert_eq!(v.as_array().unwrap()[2999].as_i64(), Some(2999));
}

// --- scenario: incremental updates ---------------------------------------

#[test]
fn incremental_update_skips_deprecated_copy() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /A /Old >>");
    b.object(2, "<< /Type /Catalog >>");
    let rev1_xref = b.pos();
    let o1_old = *b.offsets.get(&1).unwrap();
    let o2 = *b.offsets.get(&2).unwrap();
    b.raw(b"xref\n0 3\n0000000000 65535 f \n");
    b.raw(format!("{:010} 00000 n \n", o1_old).as_bytes());
    b.raw(format!("{:010} 00000 n \n", o2).as_bytes());
    b.raw(b"trailer\n<< /Size 3 /Root 2 0 R >>\n");
    b.raw(format!("startxref\n{}\n%%EOF\n", rev1_xref).as_bytes());

    // second revision: object 1 replaced
    b.object(1, "<< /A /New >>");
    let o1_new = *b.offsets.get(&1).unwrap();
    let rev2_xref = b.pos();
    b.raw(b"xref\n1 1\n");
    b.raw(format!("{:010} 00000 n \n", o1_new).as_bytes());
    b.raw(format!("trailer\n<< /Size 3 /Root 2 0 R /Prev {} >>\n", rev1_xref).as_bytes());
    b.raw(format!("startxref\n{}\n%%EOF\n", rev2_xref).as_bytes());
    let input = std::mem::take(&mut b.bytes);

    let mut seen = Vec::new();
    let output = run_pass(input, |p| {
        seen.push(p.current_id());
        MutatorOutcome::Done
    });

    // the deprecated copy is visited only once, through its live revision
    assert_eq!(seen, vec![2, 1]);
    let old = b"<< /A /Old >>";
    assert!(!output.windows(old.len()).any(|w| w == old));

    let mut parser = reopen(&output);
    let v = parser.locate_definition(1, true).unwrap();
    assert_eq!(v.as_dict().unwrap().get("A").unwrap().as_name(), Some("New"));
}

// --- scenario: reverse trailer scan --------------------------------------

#[test]
fn trailer_found_regardless_of_leading_bulk() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Type /Catalog >>");
    // pad with a large stream so the trailer sits far from the header
    let bulk = vec![b'x'; 200_000];
    b.stream_object(2, "<< /Length 200000 >>", &bulk);
    let input = b.text_tail(3, "<< /Size 3 /Root 1 0 R >>");

    let output = run_pass(input, |_| MutatorOutcome::Done);
    let mut parser = reopen(&output);
    assert!(parser.locate_definition(1, true).is_ok());
}

// --- scenario: linearized flag --------------------------------------------

#[test]
fn linearized_first_object_is_tolerated() {
    init_logging();
    let mut b = PdfBuilder::new("1.4");
    b.object(1, "<< /Linearized 1 /L 1234 >>");
    b.object(2, "<< /Type /Catalog >>");
    let input = b.text_tail(3, "<< /Size 3 /Root 2 0 R >>");

    let mut seen = Vec::new();
    let output = run_pass(input, |p| {
        seen.push(p.current_id());
        MutatorOutcome::Done
    });
    assert_eq!(seen, vec![1, 2]);
    assert!(reopen(&output).locate_definition(2, true).is_ok());
}

// --- callback outcomes ----------------------------------------------------

#[test]
fn failure_outcome_aborts_the_pass() {
    init_logging();
    let input = two_object_pdf();
    let mut output = Vec::new();
    let parser = Parser::open(Cursor::new(input), &mut output).unwrap();
    let result = parser.run(|_| MutatorOutcome::Failure);
    assert!(matches!(result, Err(pdf_conduit::Error::CallerAbort)));
}

#[test]
fn skip_rest_still_writes_a_valid_tail() {
    init_logging();
    let input = two_object_pdf();
    let output = run_pass(input, |p| {
        if p.current_id() == 1 {
            let ob = p.current_object().unwrap();
            ob.dict_mut().unwrap().set("Touched", Value::Boolean(true));
            MutatorOutcome::SkipRest
        } else {
            panic!("callback ran after skip-rest");
        }
    });

    let mut parser = reopen(&output);
    let v = parser.locate_definition(1, true).unwrap();
    assert_eq!(
        v.as_dict().unwrap().get("Touched").unwrap(),
        &Value::Boolean(true)
    );
    // the untouched remainder still made it out
    assert!(parser.locate_definition(2, true).is_ok());
}

#[test]
fn files_on_disk_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("input.pdf");
    let out_path = dir.path().join("output.pdf");
    std::fs::write(&in_path, two_object_pdf()).unwrap();

    let parser = Parser::open(
        std::fs::File::open(&in_path).unwrap(),
        std::fs::File::create(&out_path).unwrap(),
    )
    .unwrap();
    parser.run(|_| MutatorOutcome::Done).unwrap();

    let written = std::fs::read(&out_path).unwrap();
    let mut parser = Parser::open(Cursor::new(written), Vec::new()).unwrap();
    assert!(parser.locate_definition(1, true).is_ok());
}
