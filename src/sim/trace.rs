use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::mesi::NUM_CORES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct MemRef {
    pub op: MemOp,
    pub addr: u64,
}

/// One core's reference stream, parsed eagerly into integers.
#[derive(Debug, Default, Clone)]
pub struct Trace {
    pub entries: Vec<MemRef>,
    pub reads: u64,
    pub writes: u64,
}

impl Trace {
    pub fn from_entries(entries: Vec<MemRef>) -> Self {
        let reads = entries.iter().filter(|e| e.op == MemOp::Read).count() as u64;
        let writes = entries.len() as u64 - reads;
        Self {
            entries,
            reads,
            writes,
        }
    }
}

/// Parses one trace stream. Lines are `<op> <hexaddr>` with `op` one of
/// `R`/`W` and an optionally `0x`-prefixed hex address; blank lines,
/// `#` comments, and anything else malformed are skipped silently.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Trace> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read trace line")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let op = match tokens.next() {
            Some("R") => MemOp::Read,
            Some("W") => MemOp::Write,
            _ => continue,
        };
        let Some(addr) = tokens.next().and_then(parse_hex_addr) else {
            continue;
        };
        entries.push(MemRef { op, addr });
    }
    Ok(Trace::from_entries(entries))
}

fn parse_hex_addr(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Loads the four per-core traces `<prefix>_proc0.trace` ..
/// `<prefix>_proc3.trace`.
pub fn load_traces(prefix: &str) -> Result<[Trace; NUM_CORES]> {
    let mut traces: [Trace; NUM_CORES] = Default::default();
    for (core_id, trace) in traces.iter_mut().enumerate() {
        let path = format!("{prefix}_proc{core_id}.trace");
        let file = File::open(Path::new(&path))
            .with_context(|| format!("could not open trace file {path}"))?;
        *trace = parse_trace(BufReader::new(file))
            .with_context(|| format!("could not read trace file {path}"))?;
        info!(
            "loaded {}: {} references ({} reads, {} writes)",
            path,
            trace.entries.len(),
            trace.reads,
            trace.writes
        );
    }
    Ok(traces)
}
