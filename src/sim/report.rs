use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::mesi::stats::{AggregateStats, CoreStats};
use crate::sim::top::SnoopsimTop;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeometrySummary {
    pub set_bits: u32,
    pub associativity: usize,
    pub block_bits: u32,
    pub sets: usize,
    pub block_bytes: u64,
    pub cache_bytes_per_core: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreSummary {
    pub core_id: usize,
    pub stats: CoreStats,
    pub hits: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub execution_cycles: i64,
    pub ipc: f64,
}

/// Everything the text report prints, in machine-readable form.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub geometry: GeometrySummary,
    pub per_core: Vec<CoreSummary>,
    pub total: AggregateStats,
}

pub fn run_summary(top: &SnoopsimTop) -> RunSummary {
    let geometry = top.geometry();
    let per_core = top
        .cores()
        .iter()
        .enumerate()
        .map(|(core_id, core)| CoreSummary {
            core_id,
            stats: core.stats,
            hits: core.stats.hits(),
            hit_rate: core.stats.hit_rate(),
            miss_rate: core.stats.miss_rate(),
            execution_cycles: core.stats.execution_cycles(),
            ipc: core.stats.ipc(),
        })
        .collect();
    RunSummary {
        geometry: GeometrySummary {
            set_bits: geometry.set_bits,
            associativity: geometry.associativity,
            block_bits: geometry.block_bits,
            sets: geometry.num_sets(),
            block_bytes: geometry.block_bytes(),
            cache_bytes_per_core: geometry.cache_bytes(),
        },
        per_core,
        total: top.aggregate(),
    }
}

pub fn write_json<W: Write>(writer: W, summary: &RunSummary) -> Result<()> {
    serde_json::to_writer_pretty(writer, summary).context("failed to write JSON summary")
}

pub fn write_report<W: Write>(mut w: W, summary: &RunSummary) -> io::Result<()> {
    let geom = &summary.geometry;
    writeln!(w, "snoopsim: quad-core MESI cache simulation report")?;
    writeln!(w)?;
    writeln!(w, "parameters")?;
    writeln!(w, "  set index bits (s):       {}", geom.set_bits)?;
    writeln!(w, "  associativity (E):        {}", geom.associativity)?;
    writeln!(w, "  block bits (b):           {}", geom.block_bits)?;
    writeln!(w, "  sets:                     {}", geom.sets)?;
    writeln!(w, "  block size:               {} bytes", geom.block_bytes)?;
    writeln!(
        w,
        "  cache size per core:      {:.2} KB",
        geom.cache_bytes_per_core as f64 / 1024.0
    )?;
    writeln!(
        w,
        "  total cache size:         {:.2} KB",
        geom.cache_bytes_per_core as f64 * summary.per_core.len() as f64 / 1024.0
    )?;
    writeln!(w, "  coherence protocol:       MESI (Illinois)")?;
    writeln!(w, "  write policy:             write-back, write-allocate")?;
    writeln!(w, "  replacement policy:       LRU")?;
    writeln!(w, "  bus:                      central snooping bus")?;
    writeln!(w, "  cores:                    {}", summary.per_core.len())?;

    for core in &summary.per_core {
        let stats = &core.stats;
        writeln!(w)?;
        writeln!(w, "core {}", core.core_id)?;
        writeln!(
            w,
            "  instructions:             {}",
            stats.executed_instructions
        )?;
        writeln!(
            w,
            "  reads:                    {} ({:.2}%)",
            stats.reads,
            stats.read_fraction()
        )?;
        writeln!(
            w,
            "  writes:                   {} ({:.2}%)",
            stats.writes,
            if stats.accesses() == 0 {
                0.0
            } else {
                100.0 - stats.read_fraction()
            }
        )?;
        writeln!(w, "  hits:                     {}", core.hits)?;
        writeln!(w, "  misses:                   {}", stats.misses)?;
        writeln!(w, "  hit rate:                 {:.5}%", core.hit_rate)?;
        writeln!(w, "  miss rate:                {:.5}%", core.miss_rate)?;
        writeln!(w, "  evictions:                {}", stats.evictions)?;
        writeln!(w, "  writebacks:               {}", stats.writebacks)?;
        writeln!(w, "  bus invalidations:        {}", stats.invalidations)?;
        writeln!(w, "  execution cycles:         {}", core.execution_cycles)?;
        writeln!(w, "  idle/stall cycles:        {}", stats.stall_cycles)?;
        writeln!(w, "  IPC (approx):             {:.4}", core.ipc)?;
        writeln!(w, "  data traffic:             {} bytes", stats.traffic_bytes)?;
    }

    let total = &summary.total;
    writeln!(w)?;
    writeln!(w, "aggregate")?;
    writeln!(w, "  total instructions:       {}", total.instructions)?;
    writeln!(w, "  total memory accesses:    {}", total.accesses())?;
    writeln!(w, "  total reads:              {}", total.reads)?;
    writeln!(w, "  total writes:             {}", total.writes)?;
    writeln!(w, "  total hits:               {}", total.hits())?;
    writeln!(w, "  total misses:             {}", total.misses)?;
    writeln!(w, "  overall hit rate:         {:.5}%", total.hit_rate())?;
    writeln!(w, "  overall miss rate:        {:.5}%", total.miss_rate())?;
    writeln!(w, "  total evictions:          {}", total.evictions)?;
    writeln!(w, "  total writebacks:         {}", total.writebacks)?;
    writeln!(w, "  total invalidations:      {}", total.invalidations)?;
    writeln!(w)?;
    writeln!(w, "bus & coherence")?;
    writeln!(w, "  bus transactions:         {}", total.bus_transactions)?;
    writeln!(
        w,
        "  total bus traffic:        {} bytes",
        total.bus_traffic_bytes
    )?;
    writeln!(
        w,
        "  total core data traffic:  {} bytes",
        total.core_traffic_bytes
    )?;
    writeln!(
        w,
        "  bus txns per instruction: {:.6}",
        total.bus_transactions_per_instruction()
    )?;
    writeln!(w)?;
    writeln!(w, "timing")?;
    writeln!(w, "  total simulation cycles:  {}", total.total_cycles)?;
    writeln!(w, "  peak cycles:              {}", total.peak_cycles)?;
    Ok(())
}
