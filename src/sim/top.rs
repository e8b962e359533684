use log::info;

use crate::mesi::access::step_core;
use crate::mesi::bus::Bus;
use crate::mesi::cache::CacheArray;
use crate::mesi::stats::AggregateStats;
use crate::mesi::{CoreState, NUM_CORES};
use crate::sim::config::{CacheGeometry, Cycle};
use crate::sim::trace::Trace;

/// The whole simulated machine: four private caches, four core states,
/// the shared bus, and the cycle clock. All mutation funnels through
/// `run`, which hands narrower borrows down to the access engine and
/// the bus.
pub struct SnoopsimTop {
    geometry: CacheGeometry,
    caches: [CacheArray; NUM_CORES],
    cores: [CoreState; NUM_CORES],
    traces: [Trace; NUM_CORES],
    bus: Bus,
    cycle: Cycle,
    peak_cycle: Cycle,
}

impl SnoopsimTop {
    pub fn new(geometry: CacheGeometry, traces: [Trace; NUM_CORES]) -> Self {
        let caches = std::array::from_fn(|_| CacheArray::new(&geometry));
        let mut cores: [CoreState; NUM_CORES] = std::array::from_fn(|_| CoreState::new());
        for (core, trace) in cores.iter_mut().zip(traces.iter()) {
            core.stats.reads = trace.reads;
            core.stats.writes = trace.writes;
        }
        Self {
            geometry,
            caches,
            cores,
            traces,
            bus: Bus::default(),
            cycle: 0,
            peak_cycle: 0,
        }
    }

    /// Runs the simulation to completion: all traces consumed, no core
    /// stalled, and the bus transfer queue drained.
    pub fn run(&mut self) {
        loop {
            self.tick_one();
            self.cycle += 1;
            self.peak_cycle = self.peak_cycle.max(self.cycle);
            #[cfg(debug_assertions)]
            self.check_invariants();
            if self.is_idle() {
                break;
            }
        }
        info!(
            "simulation drained after {} cycles, {} bus transactions",
            self.total_cycles(),
            self.bus.txn_count
        );
    }

    fn tick_one(&mut self) {
        // Offer each running core its current reference. Stalled cores
        // re-submit the same reference; cores at end of trace retire.
        for id in 0..NUM_CORES {
            if !self.cores[id].running {
                continue;
            }
            let cursor = self.cores[id].cursor;
            if cursor < self.traces[id].entries.len() {
                let entry = self.traces[id].entries[cursor];
                step_core(
                    id,
                    entry,
                    &self.geometry,
                    &mut self.caches[id],
                    &mut self.cores[id],
                    &mut self.bus,
                );
            } else {
                self.cores[id].running = false;
            }
        }

        self.bus.tick(&self.geometry, &mut self.caches, &mut self.cores);

        // Advance the cursor of every core the bus left unstalled. A
        // core stalled during this cycle's bus phase holds still, which
        // is what makes dropped bus requests re-issue.
        for id in 0..NUM_CORES {
            let core = &mut self.cores[id];
            if core.running && !core.stalled {
                core.cursor += 1;
                core.stats.executed_instructions += 1;
                if core.cursor == self.traces[id].entries.len() {
                    core.running = false;
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.cores.iter().all(|core| !core.running && !core.stalled)
            && self.bus.transfers_in_flight() == 0
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn cores(&self) -> &[CoreState; NUM_CORES] {
        &self.cores
    }

    pub fn cache(&self, core_id: usize) -> &CacheArray {
        &self.caches[core_id]
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Cycles the machine spent before going idle.
    pub fn total_cycles(&self) -> Cycle {
        self.cycle.saturating_sub(1)
    }

    pub fn peak_cycles(&self) -> Cycle {
        self.peak_cycle
    }

    pub fn aggregate(&self) -> AggregateStats {
        let mut total = AggregateStats {
            bus_transactions: self.bus.txn_count,
            bus_traffic_bytes: self.bus.traffic_bytes,
            total_cycles: self.total_cycles(),
            peak_cycles: self.peak_cycles(),
            ..AggregateStats::default()
        };
        for core in &self.cores {
            total.accumulate(&core.stats);
        }
        total
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        use crate::mesi::{CoherenceState, Pending};

        for (id, cache) in self.caches.iter().enumerate() {
            assert!(cache.lru_is_consistent(), "core{id}: LRU order corrupted");
            for set_index in 0..self.geometry.num_sets() {
                for way in 0..cache.num_ways() {
                    let line = cache.line(set_index, way);
                    assert!(
                        !line.dirty || line.state == CoherenceState::Modified,
                        "core{id}: dirty line in state {:?}",
                        line.state
                    );
                    // a MODIFIED or EXCLUSIVE holder excludes all peers
                    if matches!(
                        line.state,
                        CoherenceState::Modified | CoherenceState::Exclusive
                    ) {
                        for (peer_id, peer) in self.caches.iter().enumerate() {
                            assert!(
                                peer_id == id || peer.lookup(set_index, line.tag).is_none(),
                                "core{peer_id} holds a copy alongside core{id}'s {:?} line",
                                line.state
                            );
                        }
                    }
                }
            }
        }
        for (id, core) in self.cores.iter().enumerate() {
            assert!(
                core.pending == Pending::None || core.stalled,
                "core{id}: pending operation on an unstalled core"
            );
        }
        assert_eq!(
            self.bus.busy(),
            self.bus.transfers_in_flight() > 0,
            "bus busy flag out of sync with the transfer queue"
        );
    }
}
