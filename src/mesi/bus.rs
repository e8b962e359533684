use std::collections::VecDeque;

use log::debug;

use crate::mesi::cache::CacheArray;
use crate::mesi::{CoherenceState, CoreState, Pending, NUM_CORES};
use crate::sim::config::{CacheGeometry, Cycle};

/// Bus ticks to fetch a block from memory, and to flush one back.
pub const MEM_LATENCY: Cycle = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRequestKind {
    /// Read miss: others may supply a shared or modified copy.
    ReadShared,
    /// Write miss: all other copies must be invalidated.
    ReadExclusive,
    /// Write hit on a SHARED line: take ownership without refetching.
    Upgrade,
}

#[derive(Debug, Clone, Copy)]
pub struct BusRequest {
    pub requestor: usize,
    pub addr: u64,
    pub kind: BusRequestKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Block fill for a read miss; installs SHARED or EXCLUSIVE.
    ReadFill,
    /// Block fill for a write miss; installs MODIFIED.
    WriteFill,
    /// Dirty block flushed to memory.
    Writeback,
    /// Zero-latency completion signal for an upgrade.
    UpgradeAck,
}

#[derive(Debug, Clone, Copy)]
pub struct DataTransfer {
    pub addr: u64,
    pub dest: usize,
    pub kind: TransferKind,
    pub remaining: Cycle,
}

/// Single shared bus: a FIFO of coherence requests, a FIFO of in-flight
/// data transfers, and the busy flag that serializes them.
///
/// One bus tick runs two phases in order: drain the request queue
/// (applying snoops and MESI transitions), then advance the head data
/// transfer by one cycle, completing it when its latency is spent.
#[derive(Debug, Default)]
pub struct Bus {
    requests: VecDeque<BusRequest>,
    transfers: VecDeque<DataTransfer>,
    busy: bool,
    pub txn_count: u64,
    pub traffic_bytes: u64,
}

impl Bus {
    pub fn push_request(&mut self, request: BusRequest) {
        self.requests.push_back(request);
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn transfers_in_flight(&self) -> usize {
        self.transfers.len()
    }

    pub fn requests(&self) -> impl Iterator<Item = &BusRequest> {
        self.requests.iter()
    }

    pub fn tick(
        &mut self,
        geometry: &CacheGeometry,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        self.service_requests(geometry, caches, cores);
        self.advance_transfers(geometry, caches, cores);
    }

    fn service_requests(
        &mut self,
        geometry: &CacheGeometry,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        while let Some(request) = self.requests.pop_front() {
            if self.busy {
                // Arbitration loss. The request is dropped, not queued:
                // the requestor stays stalled, its cursor holds still,
                // and the access engine re-issues next cycle.
                cores[request.requestor].stalled = true;
                cores[request.requestor].stats.stall_cycles += 1;
                continue;
            }

            let set_index = geometry.set_index(request.addr);
            let tag = geometry.tag(request.addr);
            match request.kind {
                BusRequestKind::ReadShared => {
                    self.serve_read_shared(request, set_index, tag, geometry, caches, cores)
                }
                BusRequestKind::ReadExclusive => {
                    self.serve_read_exclusive(request, set_index, tag, caches, cores)
                }
                BusRequestKind::Upgrade => {
                    self.serve_upgrade(request, set_index, tag, caches, cores)
                }
            }
        }
    }

    fn serve_read_shared(
        &mut self,
        request: BusRequest,
        set_index: usize,
        tag: u64,
        geometry: &CacheGeometry,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        let requestor = request.requestor;
        self.busy = true;
        self.txn_count += 1;
        cores[requestor].stats.misses += 1;
        cores[requestor].pending = Pending::Addr(request.addr);

        let donor = (0..NUM_CORES)
            .filter(|&other| other != requestor)
            .find_map(|other| caches[other].lookup(set_index, tag).map(|way| (other, way)));

        let Some((donor_id, donor_way)) = donor else {
            debug!(
                "bus: core{requestor} ReadShared {:#x} from memory",
                request.addr
            );
            cores[requestor].stalled = true;
            self.transfers.push_back(DataTransfer {
                addr: request.addr,
                dest: requestor,
                kind: TransferKind::ReadFill,
                remaining: MEM_LATENCY,
            });
            return;
        };

        debug!(
            "bus: core{requestor} ReadShared {:#x} sourced by core{donor_id}",
            request.addr
        );
        cores[requestor].stalled = true;
        self.transfers.push_back(DataTransfer {
            addr: request.addr,
            dest: requestor,
            kind: TransferKind::ReadFill,
            remaining: geometry.peer_fill_latency(),
        });
        cores[donor_id].stats.traffic_bytes += geometry.block_bytes();

        match caches[donor_id].line(set_index, donor_way).state {
            CoherenceState::Modified => {
                // The dirty donor downgrades and must flush to memory
                // while it is also sourcing the fill.
                caches[donor_id].set_state(set_index, donor_way, CoherenceState::Shared);
                cores[donor_id].stalled = true;
                self.transfers.push_back(DataTransfer {
                    addr: request.addr,
                    dest: donor_id,
                    kind: TransferKind::Writeback,
                    remaining: MEM_LATENCY,
                });
                cores[donor_id].pending = Pending::Addr(request.addr);
                if cores[donor_id].running {
                    let fill = geometry.peer_fill_latency();
                    cores[donor_id].stats.wait_cycles -= (fill + MEM_LATENCY + 1) as i64;
                    cores[donor_id].stats.stall_cycles += fill + 1;
                }
            }
            CoherenceState::Exclusive => {
                caches[donor_id].set_state(set_index, donor_way, CoherenceState::Shared);
            }
            CoherenceState::Shared => {}
            CoherenceState::Invalid => unreachable!("lookup returned an invalid line"),
        }
    }

    fn serve_read_exclusive(
        &mut self,
        request: BusRequest,
        set_index: usize,
        tag: u64,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        let requestor = request.requestor;
        self.busy = true;
        self.txn_count += 1;
        cores[requestor].stats.misses += 1;
        cores[requestor].pending = Pending::Addr(request.addr);

        let mut found_elsewhere = false;
        for other in 0..NUM_CORES {
            if other == requestor {
                continue;
            }
            for way in 0..caches[other].num_ways() {
                let line = *caches[other].line(set_index, way);
                if line.state == CoherenceState::Invalid || line.tag != tag {
                    continue;
                }
                found_elsewhere = true;
                if line.state == CoherenceState::Modified {
                    cores[other].stalled = true;
                    self.transfers.push_back(DataTransfer {
                        addr: request.addr,
                        dest: other,
                        kind: TransferKind::Writeback,
                        remaining: MEM_LATENCY,
                    });
                    if cores[other].running {
                        cores[other].stats.wait_cycles -= (MEM_LATENCY + 1) as i64;
                    }
                    cores[other].pending = Pending::Addr(request.addr);
                }
                caches[other].invalidate(set_index, way);
            }
        }

        debug!(
            "bus: core{requestor} ReadExclusive {:#x} (peers held copy: {found_elsewhere})",
            request.addr
        );
        cores[requestor].stalled = true;
        if found_elsewhere {
            cores[requestor].stats.invalidations += 1;
        }
        self.transfers.push_back(DataTransfer {
            addr: request.addr,
            dest: requestor,
            kind: TransferKind::WriteFill,
            remaining: MEM_LATENCY,
        });
    }

    fn serve_upgrade(
        &mut self,
        request: BusRequest,
        set_index: usize,
        tag: u64,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        let requestor = request.requestor;
        // The copy may have been invalidated by a competing writer after
        // this request was issued; in that case the upgrade is moot and
        // the re-issued access will classify as a write miss instead.
        let Some(way) = caches[requestor].lookup_in_state(set_index, tag, CoherenceState::Shared)
        else {
            return;
        };

        debug!("bus: core{requestor} Upgrade {:#x}", request.addr);
        self.txn_count += 1;
        for other in 0..NUM_CORES {
            if other == requestor {
                continue;
            }
            for other_way in 0..caches[other].num_ways() {
                let line = *caches[other].line(set_index, other_way);
                if line.state != CoherenceState::Invalid && line.tag == tag {
                    caches[other].invalidate(set_index, other_way);
                }
            }
        }

        cores[requestor].stats.invalidations += 1;
        self.busy = true;
        let line = caches[requestor].line_mut(set_index, way);
        line.state = CoherenceState::Modified;
        line.dirty = true;
        cores[requestor].stalled = true;
        self.transfers.push_back(DataTransfer {
            addr: request.addr,
            dest: requestor,
            kind: TransferKind::UpgradeAck,
            remaining: 0,
        });
        cores[requestor].pending = Pending::Marker;
    }

    fn advance_transfers(
        &mut self,
        geometry: &CacheGeometry,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
    ) {
        let Some(head) = self.transfers.front_mut() else {
            return;
        };
        if head.remaining > 0 {
            head.remaining -= 1;
            return;
        }
        let transfer = *head;

        let block = geometry.block_bytes();
        self.traffic_bytes += block;
        cores[transfer.dest].stats.traffic_bytes += block;

        let mut writeback_started = false;
        match transfer.kind {
            TransferKind::Writeback => {
                cores[transfer.dest].stats.writebacks += 1;
            }
            TransferKind::WriteFill => {
                writeback_started = self.fill(
                    geometry,
                    caches,
                    cores,
                    &transfer,
                    CoherenceState::Modified,
                    true,
                );
            }
            TransferKind::ReadFill => {
                let set_index = geometry.set_index(transfer.addr);
                let tag = geometry.tag(transfer.addr);
                let state = if others_hold(caches, transfer.dest, set_index, tag) {
                    CoherenceState::Shared
                } else {
                    CoherenceState::Exclusive
                };
                writeback_started = self.fill(geometry, caches, cores, &transfer, state, false);
            }
            TransferKind::UpgradeAck => {}
        }

        let core = &mut cores[transfer.dest];
        core.stalled = false;
        core.pending = Pending::None;
        if writeback_started {
            // the fill displaced a dirty line; hold the core until the
            // eviction writeback just enqueued drains
            core.stalled = true;
            core.pending = Pending::Marker;
        }

        self.transfers.pop_front();
        if self.transfers.is_empty() {
            self.busy = false;
        }
    }

    /// Allocates a way and installs the block fetched by `transfer`,
    /// enqueueing an eviction writeback if a dirty line was displaced.
    /// Returns whether that writeback was enqueued.
    fn fill(
        &mut self,
        geometry: &CacheGeometry,
        caches: &mut [CacheArray; NUM_CORES],
        cores: &mut [CoreState; NUM_CORES],
        transfer: &DataTransfer,
        state: CoherenceState,
        dirty: bool,
    ) -> bool {
        let dest = transfer.dest;
        let set_index = geometry.set_index(transfer.addr);
        let tag = geometry.tag(transfer.addr);
        let victim = caches[dest].victim(set_index);
        let mut writeback_started = false;
        if let Some(evicted) = victim.evicted {
            cores[dest].stats.evictions += 1;
            if evicted.dirty {
                self.transfers.push_back(DataTransfer {
                    addr: geometry.line_addr(set_index, evicted.tag),
                    dest,
                    kind: TransferKind::Writeback,
                    remaining: MEM_LATENCY,
                });
                writeback_started = true;
            }
        }
        caches[dest].install(set_index, victim.way, tag, state, dirty);
        caches[dest].touch_mru(set_index, victim.way);
        writeback_started
    }
}

fn others_hold(
    caches: &[CacheArray; NUM_CORES],
    except: usize,
    set_index: usize,
    tag: u64,
) -> bool {
    caches
        .iter()
        .enumerate()
        .any(|(id, cache)| id != except && cache.lookup(set_index, tag).is_some())
}
