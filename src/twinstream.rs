//! The twin stream.
//!
//! A paired input/output byte transport with a single sliding heap. Bytes are
//! pulled from the input into the heap for the scanner to consume; the parser
//! then commits regions by passing them through to the output, discarding
//! them, or inserting fresh bytes. Branch reads give random-access peeks
//! without disturbing the main cursor.
//!
//! The heap is a window over the input: `offsi` is the absolute input offset
//! of heap byte 0, `holds` the number of valid bytes, and `cursor` the
//! committed position. When the cursor passes half the heap the live bytes
//! are compacted to offset 0; scanner windows are anchored by absolute
//! offsets and stay valid across both compaction and reallocation.

use crate::error::{Error, Result};
use crate::scanner::{ScanSource, Window};
use std::io::{Read, Seek, SeekFrom, Write};

/// Minimum read size, to amortize I/O.
pub const CHUNK: usize = 512;

/// Stream direction / capability mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Normal forward reading; the heap slides.
    Forward,
    /// The heap grows backwards from EOF (trailer discovery).
    Reverse,
    /// Seeks and branch reads.
    Random,
    /// Forward read, forward write, with commit primitives.
    ReadWrite,
}

/// Paired reader/writer with a sliding heap.
pub struct TwinStream<R: Read + Seek, W: Write> {
    reader: R,
    writer: W,
    mode: StreamMode,
    heap: Vec<u8>,
    holds: usize,
    cursor: usize,
    offsi: u64,
    offso: u64,
    sidebuf: Vec<u8>,
    outgrown: bool,
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

impl<R: Read + Seek, W: Write> TwinStream<R, W> {
    /// Create a twin stream over the given input and output.
    pub fn new(reader: R, writer: W) -> Self {
        TwinStream {
            reader,
            writer,
            mode: StreamMode::Forward,
            heap: Vec::new(),
            holds: 0,
            cursor: 0,
            offsi: 0,
            offso: 0,
            sidebuf: Vec::new(),
            outgrown: false,
        }
    }

    /// The current mode.
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Switch modes. Direction changes purge the heap; `ReadWrite` rewinds
    /// the input. Must happen before any output is written.
    pub fn set_mode(&mut self, mode: StreamMode) -> Result<()> {
        if self.mode == mode {
            return Ok(());
        }
        if self.offso != 0 {
            return Err(Error::InternalAssert(
                "mode change after output was written".into(),
            ));
        }
        let flip =
            (self.mode == StreamMode::Reverse) ^ (mode == StreamMode::Reverse);
        self.mode = mode;
        if flip {
            self.holds = 0;
            self.cursor = 0;
            if mode == StreamMode::Reverse {
                self.offsi = self.reader.seek(SeekFrom::End(0))?;
            }
        }
        if mode == StreamMode::ReadWrite {
            self.reader.seek(SeekFrom::Start(0))?;
            self.offsi = 0;
            self.holds = 0;
            self.cursor = 0;
        }
        Ok(())
    }

    /// Absolute input offset of the committed cursor.
    pub fn input_offset(&self) -> u64 {
        self.offsi + self.cursor as u64
    }

    /// Absolute output offset (bytes written so far).
    pub fn output_offset(&self) -> u64 {
        self.offso
    }

    /// Whether the last branch read hit a caller-imposed growth bound.
    pub fn outgrown(&self) -> bool {
        self.outgrown
    }

    /// Clear the outgrown flag (done before each branch parse attempt).
    pub fn clear_outgrown(&mut self) {
        self.outgrown = false;
    }

    /// Record that a bounded parse wanted more than its branch held.
    pub fn mark_outgrown(&mut self) {
        self.outgrown = true;
    }

    /// Peek a byte at `cursor + delta` in the resident heap.
    pub fn peek_heap(&self, delta: usize) -> Option<u8> {
        let idx = self.cursor + delta;
        if idx < self.holds {
            Some(self.heap[idx])
        } else {
            None
        }
    }

    // --- reading ----------------------------------------------------------

    fn grow_forward(&mut self, win: &mut Window, req: usize) -> usize {
        if win.len == 0 {
            win.start = self.offsi + self.cursor as u64;
        }
        if win.start < self.offsi {
            log::error!("stale window behind the heap base");
            return 0;
        }
        let rel = (win.start - self.offsi) as usize;
        let claimed = rel + win.len;
        let preloaded = self.holds.saturating_sub(claimed);

        if req > 0 && preloaded >= req {
            win.len += preloaded;
            return preloaded;
        }

        let mut need = req.saturating_sub(preloaded);
        if need < CHUNK {
            need = CHUNK;
        }
        let capacity = self.heap.len() - self.holds;
        if need > capacity {
            let growth = CHUNK * (1 + (need - capacity) / CHUNK);
            self.heap.resize(self.heap.len() + growth, 0);
        }

        let got = match read_up_to(&mut self.reader, &mut self.heap[self.holds..self.holds + need])
        {
            Ok(n) => n,
            Err(e) => {
                log::error!("input read failed: {}", e);
                0
            }
        };
        self.holds += got;
        win.len += preloaded + got;
        preloaded + got
    }

    fn grow_reverse(&mut self, win: &mut Window, req: usize) -> usize {
        // content occupies the heap tail, covering [offsi, offsi + holds)
        if win.len == 0 {
            win.start = self.offsi + self.holds as u64;
        }
        let rel = (win.start.saturating_sub(self.offsi)) as usize;
        if rel > 0 {
            // resident content below the window: hand it over
            win.start = self.offsi;
            win.len += rel;
            return rel;
        }

        let mut need = if req < CHUNK { CHUNK } else { req };
        if need as u64 > self.offsi {
            need = self.offsi as usize;
        }
        if need == 0 {
            return 0;
        }

        let capacity = self.heap.len() - self.holds;
        if need > capacity {
            // expensive: fresh heap, prior content copied to the tail so the
            // buffer always ends at the heap end
            let growth = if need - capacity > 6 * CHUNK {
                CHUNK * (1 + (need - capacity) / CHUNK)
            } else {
                6 * CHUNK
            };
            let mut fresh = vec![0u8; self.heap.len() + growth];
            let old_tail = self.heap.len() - self.holds;
            fresh[old_tail + growth..].copy_from_slice(&self.heap[old_tail..]);
            self.heap = fresh;
        }

        self.offsi -= need as u64;
        let dst = self.heap.len() - self.holds - need;
        let ok = self
            .reader
            .seek(SeekFrom::Start(self.offsi))
            .and_then(|_| self.reader.read_exact(&mut self.heap[dst..dst + need]));
        if let Err(e) = ok {
            log::error!("reverse read failed: {}", e);
            self.offsi += need as u64;
            return 0;
        }
        self.holds += need;
        win.start = self.offsi;
        win.len += need;
        need
    }

    /// Jump to an absolute input position (Random mode).
    pub fn seek(&mut self, position: u64) -> Result<()> {
        debug_assert_eq!(self.mode, StreamMode::Random);
        if self.offsi <= position && self.offsi + self.holds as u64 > position {
            self.cursor = (position - self.offsi) as usize;
            return Ok(());
        }
        self.cursor = 0;
        self.holds = 0;
        self.reader.seek(SeekFrom::Start(position))?;
        self.offsi = position;
        Ok(())
    }

    /// Read `len` bytes at `position` without moving the main cursor.
    ///
    /// Returns a slice into the resident heap when the range is covered, or
    /// into a private side buffer filled by seek + read + seek-back. The
    /// slice (and the side buffer) is invalidated by the next branch.
    pub fn fetch_branch(&mut self, position: u64, len: usize) -> Result<&[u8]> {
        self.sidebuf.clear();
        self.outgrown = false;

        if self.mode != StreamMode::Reverse && position >= self.offsi {
            let alignment = (position - self.offsi) as usize;
            if alignment < self.holds && self.holds - alignment >= len {
                return Ok(&self.heap[alignment..alignment + len]);
            }
        }

        let restore = self.reader.stream_position()?;
        self.reader.seek(SeekFrom::Start(position))?;
        self.sidebuf.resize(len, 0);
        let got = read_up_to(&mut self.reader, &mut self.sidebuf)?;
        self.sidebuf.truncate(got);
        self.reader.seek(SeekFrom::Start(restore))?;
        Ok(&self.sidebuf)
    }

    // --- committing ---------------------------------------------------------

    fn realign(&mut self) {
        let cursor = self.cursor;
        let live = self.holds - cursor;
        self.heap.copy_within(cursor..self.holds, 0);
        self.offsi += cursor as u64;
        self.holds = live;
        self.cursor = 0;
    }

    fn operate(&mut self, bytes: u64, pass: bool) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        debug_assert_eq!(self.mode, StreamMode::ReadWrite);

        if self.heap.is_empty() {
            self.heap.resize(CHUNK, 0);
        }
        if self.heap.len() < 6 * CHUNK && bytes > (6 * CHUNK) as u64 {
            // big requests loop a lot on a small heap
            self.heap.resize(6 * CHUNK, 0);
        }

        let resident = (self.holds - self.cursor) as u64;
        if resident < bytes {
            if pass {
                self.writer.write_all(&self.heap[self.cursor..self.holds])?;
                self.offso += resident;
            }
            let mut remaining = bytes - resident;
            self.offsi += self.cursor as u64 + bytes;
            self.holds = 0;
            self.cursor = 0;

            if pass {
                // use the heap as a shuttle for the remainder
                while remaining > 0 {
                    let req = remaining.min(self.heap.len() as u64) as usize;
                    let got = read_up_to(&mut self.reader, &mut self.heap[..req])?;
                    if got == 0 {
                        return Err(Error::CorruptXref(
                            "input ended inside a committed region".into(),
                        ));
                    }
                    self.writer.write_all(&self.heap[..got])?;
                    self.offso += got as u64;
                    remaining -= got as u64;
                }
            } else {
                // nothing to emit: skip forward in the input
                self.reader.seek(SeekFrom::Current(remaining as i64))?;
            }
            return Ok(());
        }

        let n = bytes as usize;
        if pass {
            self.writer
                .write_all(&self.heap[self.cursor..self.cursor + n])?;
            self.offso += bytes;
        }
        self.cursor += n;

        if self.cursor * 2 > self.heap.len() {
            self.realign();
        }
        Ok(())
    }

    /// Copy input bytes up to the absolute offset `abs` to the output.
    pub fn pass_through_to(&mut self, abs: u64) -> Result<()> {
        let bytes = abs.saturating_sub(self.input_offset());
        self.operate(bytes, true)
    }

    /// Drop input bytes up to the absolute offset `abs`.
    pub fn discard_to(&mut self, abs: u64) -> Result<()> {
        let bytes = abs.saturating_sub(self.input_offset());
        self.operate(bytes, false)
    }

    /// Write fresh bytes to the output without touching the input.
    pub fn insert(&mut self, content: &[u8]) -> Result<()> {
        self.writer.write_all(content)?;
        self.offso += content.len() as u64;
        Ok(())
    }

    /// Pass through bytes up to the input mark (used to preserve prefix
    /// content, e.g. the header comment before the first object).
    pub fn prune_to(&mut self, mark: u64) -> Result<()> {
        if mark > self.input_offset() {
            self.pass_through_to(mark)?;
        }
        Ok(())
    }

    /// Flush the output.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<R: Read + Seek, W: Write> ScanSource for TwinStream<R, W> {
    fn grow(&mut self, win: &mut Window, req: usize) -> usize {
        match self.mode {
            StreamMode::Reverse => self.grow_reverse(win, req),
            _ => self.grow_forward(win, req),
        }
    }

    fn view(&self, win: &Window) -> &[u8] {
        match self.mode {
            StreamMode::Reverse => {
                let rel = (win.start - self.offsi) as usize;
                let base = self.heap.len() - self.holds;
                &self.heap[base + rel..base + rel + win.len]
            }
            _ => {
                let rel = (win.start - self.offsi) as usize;
                &self.heap[rel..rel + win.len]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream(data: &[u8]) -> TwinStream<Cursor<Vec<u8>>, Vec<u8>> {
        TwinStream::new(Cursor::new(data.to_vec()), Vec::new())
    }

    #[test]
    fn test_forward_grow_and_view() {
        let mut ts = stream(b"hello world");
        let mut win = Window::default();
        let gained = ts.grow(&mut win, 5);
        assert!(gained >= 5);
        assert_eq!(&ts.view(&win)[..5], b"hello");
    }

    #[test]
    fn test_grow_serves_preloaded_without_io() {
        let mut ts = stream(&vec![7u8; 4096]);
        let mut win = Window::default();
        ts.grow(&mut win, 1); // pulls a whole chunk
        let first = win.len;
        assert!(first >= CHUNK);
        // a second window over the same region is fed from the heap
        let mut win2 = Window { start: 0, len: 1 };
        let gained = ts.grow(&mut win2, 4);
        assert!(gained >= 4);
        assert!(win2.len <= first);
    }

    #[test]
    fn test_reverse_grow_reads_tail() {
        let mut data = vec![b'x'; 2000];
        data.extend_from_slice(b"startxref\n123\n%%EOF\n");
        let mut ts = stream(&data);
        ts.set_mode(StreamMode::Reverse).unwrap();
        let mut win = Window::default();
        let gained = ts.grow(&mut win, 0);
        assert!(gained > 0);
        let view = ts.view(&win);
        assert!(view.ends_with(b"%%EOF\n"));
        // growing again prepends
        let more = ts.grow(&mut win, 0);
        assert!(more > 0);
        assert!(ts.view(&win).ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_reverse_grow_clamps_at_file_start() {
        let mut ts = stream(b"tiny");
        ts.set_mode(StreamMode::Reverse).unwrap();
        let mut win = Window::default();
        assert_eq!(ts.grow(&mut win, 0), 4);
        assert_eq!(ts.view(&win), b"tiny");
        assert_eq!(ts.grow(&mut win, 0), 0);
    }

    #[test]
    fn test_branch_resident_and_side() {
        let mut data = b"0123456789".to_vec();
        data.extend_from_slice(&vec![b'z'; 4096]);
        let mut ts = stream(&data);
        ts.set_mode(StreamMode::Random).unwrap();
        // nothing resident: side buffer path
        let b = ts.fetch_branch(2, 4).unwrap();
        assert_eq!(b, b"2345");
        // resident path after a forward grow
        let mut win = Window::default();
        ts.grow_forward(&mut win, 8);
        let b = ts.fetch_branch(0, 8).unwrap();
        assert_eq!(b, b"01234567");
    }

    #[test]
    fn test_pass_through_and_discard() {
        let mut ts = stream(b"keep DROP tail");
        ts.set_mode(StreamMode::ReadWrite).unwrap();
        let mut win = Window::default();
        ts.grow(&mut win, 14);

        ts.pass_through_to(5).unwrap(); // "keep "
        ts.discard_to(10).unwrap(); // "DROP "
        ts.insert(b"INS ").unwrap();
        ts.pass_through_to(14).unwrap(); // "tail"

        assert_eq!(ts.output_offset(), 13);
        assert_eq!(ts.writer, b"keep INS tail");
    }

    #[test]
    fn test_pass_through_beyond_heap_shuttles() {
        let mut data = b"head ".to_vec();
        data.extend_from_slice(&vec![b'S'; 5000]);
        data.extend_from_slice(b" tail");
        let mut ts = stream(&data);
        ts.set_mode(StreamMode::ReadWrite).unwrap();
        let mut win = Window::default();
        ts.grow(&mut win, 5);

        // commit far beyond the resident heap
        ts.pass_through_to(5 + 5000).unwrap();
        ts.pass_through_to(5 + 5000 + 5).unwrap();

        assert_eq!(ts.writer.len(), data.len());
        assert_eq!(ts.writer, data);
        assert_eq!(ts.input_offset(), data.len() as u64);
    }

    #[test]
    fn test_discard_beyond_heap_seeks() {
        let mut data = b"head ".to_vec();
        data.extend_from_slice(&vec![b'S'; 5000]);
        data.extend_from_slice(b"tail");
        let mut ts = stream(&data);
        ts.set_mode(StreamMode::ReadWrite).unwrap();
        let mut win = Window::default();
        ts.grow(&mut win, 5);

        ts.pass_through_to(5).unwrap();
        ts.discard_to(5 + 5000).unwrap();
        // the tail is still readable from the new position
        let mut win = Window::default();
        ts.grow(&mut win, 4);
        assert_eq!(&ts.view(&win)[..4], b"tail");
    }

    #[test]
    fn test_realign_keeps_windows_valid() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut ts = stream(&data);
        ts.set_mode(StreamMode::ReadWrite).unwrap();
        let mut win = Window::default();
        ts.grow(&mut win, 1024);

        // commit most of the window so realignment triggers
        ts.pass_through_to(1000).unwrap();
        // re-anchor the window the way the parser does after a commit
        let abs = ts.input_offset();
        assert_eq!(abs, 1000);
        let mut win = Window { start: abs, len: 0 };
        ts.grow(&mut win, 24);
        assert_eq!(ts.view(&win)[0], data[1000]);
    }

    #[test]
    fn test_mode_change_after_output_fails() {
        let mut ts = stream(b"x");
        ts.set_mode(StreamMode::ReadWrite).unwrap();
        ts.insert(b"y").unwrap();
        assert!(ts.set_mode(StreamMode::Random).is_err());
    }
}
