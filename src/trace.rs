use std::{
    fmt, fs,
    io::{self, BufRead, BufReader, Read},
    mem,
    path::Path,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::error::TraceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Load,
    Store,
    /// Load followed by a store to the same address.
    Modify,
}

impl Op {
    fn from_code(code: char) -> Option<Op> {
        match code {
            'L' => Some(Op::Load),
            'S' => Some(Op::Store),
            'M' => Some(Op::Modify),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Op::Load => 'L',
            Op::Store => 'S',
            Op::Modify => 'M',
        }
    }

    pub fn accesses(self) -> usize {
        match self {
            Op::Load | Op::Store => 1,
            Op::Modify => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub op: Op,
    pub addr: u64,
    /// Access size in bytes; assumed not to cross a block boundary.
    pub len: u32,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:x},{}", self.op.code(), self.addr, self.len)
    }
}

/// Parse one trace line such as ` L 7ff000,8`.
///
/// Lines whose operation code is not `L`, `S` or `M` (instruction fetches,
/// blank lines, tool banners) are not records and yield `Ok(None)`. A
/// recognized record without a parseable `addr,len` is malformed.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<Record>, TraceError> {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    let Some(op) = chars.next().and_then(Op::from_code) else {
        return Ok(None);
    };
    let rest = chars.as_str();
    match rest.chars().next() {
        Some(c) if c.is_whitespace() => {}
        Some(_) => return Ok(None),
        None => return Err(malformed(line_no, line)),
    }

    let parsed = rest.trim().split_once(',').and_then(|(addr, len)| {
        let addr = addr.trim();
        let addr = addr.strip_prefix("0x").unwrap_or(addr);
        let addr = u64::from_str_radix(addr, 16).ok()?;
        let len = len.trim().parse::<u32>().ok()?;
        Some(Record { op, addr, len })
    });
    parsed.map(Some).ok_or_else(|| malformed(line_no, line))
}

fn malformed(line_no: usize, line: &str) -> TraceError {
    TraceError::Malformed {
        line: line_no,
        text: line.trim_end().to_string(),
    }
}

pub type Entry = Result<Record, TraceError>;

/// Trace records parsed on a reader thread and handed over in blocks.
pub struct Trace {
    pub rec: Receiver<Vec<Entry>>,
    _thread: JoinHandle<()>,
}

impl Trace {
    /// Open a text trace, decompressing it on the fly if it ends in `.xz`.
    pub fn read(
        path: &Path,
        records_per_block: usize,
        blocks_per_queue: usize,
    ) -> io::Result<Trace> {
        let stream = fs::File::open(path)?;
        let compressed = path.extension().is_some_and(|ext| ext == "xz");
        log::debug!(
            "reading trace {} ({})",
            path.display(),
            if compressed { "xz" } else { "plain" }
        );

        let trace = if compressed {
            Trace::from_reader(XzDecoder::new(stream), records_per_block, blocks_per_queue)
        } else {
            Trace::from_reader(stream, records_per_block, blocks_per_queue)
        };
        Ok(trace)
    }

    pub fn from_reader<R: Read + Send + 'static>(
        stream: R,
        records_per_block: usize,
        blocks_per_queue: usize,
    ) -> Trace {
        let records_per_block = records_per_block.max(1);
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);

        let t = thread::spawn(move || Trace::run_thread(stream, records_per_block, sender));

        Trace {
            rec: receiver,
            _thread: t,
        }
    }

    /// Records in trace order. An I/O error ends the sequence.
    pub fn records(self) -> impl Iterator<Item = Entry> {
        self.rec.into_iter().flatten()
    }

    fn run_thread<R: Read>(stream: R, records_per_block: usize, queue: Sender<Vec<Entry>>) {
        let mut reader = BufReader::new(stream);
        let mut block = Vec::with_capacity(records_per_block);
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            // raw bytes: non UTF-8 noise on skipped lines must not end the run
            let entry = match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    line_no += 1;
                    match parse_line(line_no, &String::from_utf8_lossy(&buf)) {
                        Ok(Some(record)) => Ok(record),
                        Ok(None) => continue,
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(TraceError::Io(err)),
            };
            let fatal = matches!(entry, Err(TraceError::Io(_)));
            block.push(entry);

            if block.len() >= records_per_block || fatal {
                let full = mem::replace(&mut block, Vec::with_capacity(records_per_block));
                if queue.send(full).is_err() {
                    // replay stopped early
                    return;
                }
            }
            if fatal {
                return;
            }
        }

        if !block.is_empty() {
            let _ = queue.send(block);
        }
    }
}
