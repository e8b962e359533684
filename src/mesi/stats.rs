use serde::Serialize;

/// Per-core event counters accumulated over a run.
///
/// `wait_cycles` counts cycles the core sat on an outstanding bus
/// operation; it is signed because a read snoop that hits a MODIFIED
/// donor credits the donor retroactively (the donor flushes while it is
/// also sourcing the fill).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CoreStats {
    pub reads: u64,
    pub writes: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub invalidations: u64,
    pub stall_cycles: u64,
    pub wait_cycles: i64,
    pub traffic_bytes: u64,
    pub executed_instructions: u64,
}

impl CoreStats {
    pub fn accesses(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn hits(&self) -> u64 {
        self.accesses().saturating_sub(self.misses)
    }

    pub fn miss_rate(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            return 0.0;
        }
        self.misses as f64 * 100.0 / accesses as f64
    }

    pub fn hit_rate(&self) -> f64 {
        if self.accesses() == 0 {
            return 0.0;
        }
        100.0 - self.miss_rate()
    }

    pub fn read_fraction(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            return 0.0;
        }
        self.reads as f64 * 100.0 / accesses as f64
    }

    /// Cycles the core was executing or waiting: retired instructions
    /// each take one cycle, plus the cycles burned on pending bus work.
    pub fn execution_cycles(&self) -> i64 {
        self.wait_cycles + self.executed_instructions as i64
    }

    pub fn ipc(&self) -> f64 {
        let cycles = self.execution_cycles();
        if cycles <= 0 {
            return 0.0;
        }
        self.executed_instructions as f64 / cycles as f64
    }
}

/// Sums of the per-core counters plus the bus-global figures.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AggregateStats {
    pub instructions: u64,
    pub reads: u64,
    pub writes: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub invalidations: u64,
    pub core_traffic_bytes: u64,
    pub bus_transactions: u64,
    pub bus_traffic_bytes: u64,
    pub total_cycles: u64,
    pub peak_cycles: u64,
}

impl AggregateStats {
    pub fn accumulate(&mut self, core: &CoreStats) {
        self.instructions += core.executed_instructions;
        self.reads += core.reads;
        self.writes += core.writes;
        self.misses += core.misses;
        self.evictions += core.evictions;
        self.writebacks += core.writebacks;
        self.invalidations += core.invalidations;
        self.core_traffic_bytes += core.traffic_bytes;
    }

    pub fn accesses(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn hits(&self) -> u64 {
        self.accesses().saturating_sub(self.misses)
    }

    pub fn miss_rate(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            return 0.0;
        }
        self.misses as f64 * 100.0 / accesses as f64
    }

    pub fn hit_rate(&self) -> f64 {
        if self.accesses() == 0 {
            return 0.0;
        }
        100.0 - self.miss_rate()
    }

    pub fn bus_transactions_per_instruction(&self) -> f64 {
        if self.instructions == 0 {
            return 0.0;
        }
        self.bus_transactions as f64 / self.instructions as f64
    }
}
