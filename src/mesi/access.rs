use crate::mesi::bus::{Bus, BusRequest, BusRequestKind};
use crate::mesi::cache::CacheArray;
use crate::mesi::{CoherenceState, CoreState, Pending};
use crate::sim::config::CacheGeometry;
use crate::sim::trace::{MemOp, MemRef};

/// Offers one trace entry to a core's cache.
///
/// Hits and silent upgrades (E -> M) complete locally; anything needing
/// the bus enqueues a request for the arbiter to pick up this cycle. A
/// core with a pending bus operation burns the cycle without consuming
/// the entry; the driver re-offers the same entry until the stall clears.
pub fn step_core(
    core_id: usize,
    entry: MemRef,
    geometry: &CacheGeometry,
    cache: &mut CacheArray,
    core: &mut CoreState,
    bus: &mut Bus,
) {
    if core.pending != Pending::None {
        core.stats.wait_cycles += 1;
        return;
    }

    let set_index = geometry.set_index(entry.addr);
    let tag = geometry.tag(entry.addr);

    match entry.op {
        MemOp::Read => match cache.lookup(set_index, tag) {
            Some(way) => {
                cache.touch_mru(set_index, way);
            }
            None => {
                bus.push_request(BusRequest {
                    requestor: core_id,
                    addr: entry.addr,
                    kind: BusRequestKind::ReadShared,
                });
                core.stalled = true;
            }
        },
        MemOp::Write => match cache.lookup(set_index, tag) {
            Some(way) => match cache.line(set_index, way).state {
                CoherenceState::Modified | CoherenceState::Exclusive => {
                    cache.touch_mru(set_index, way);
                    let line = cache.line_mut(set_index, way);
                    line.dirty = true;
                    line.state = CoherenceState::Modified;
                }
                CoherenceState::Shared => {
                    // ownership comes later, once the bus serves the
                    // upgrade; the core keeps running until then
                    bus.push_request(BusRequest {
                        requestor: core_id,
                        addr: entry.addr,
                        kind: BusRequestKind::Upgrade,
                    });
                    cache.touch_mru(set_index, way);
                }
                CoherenceState::Invalid => unreachable!("lookup returned an invalid line"),
            },
            None => {
                bus.push_request(BusRequest {
                    requestor: core_id,
                    addr: entry.addr,
                    kind: BusRequestKind::ReadExclusive,
                });
                core.stalled = true;
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesi::CoherenceState::*;

    fn fixture() -> (CacheGeometry, CacheArray, CoreState, Bus) {
        let geometry = CacheGeometry::new(2, 2, 4);
        let cache = CacheArray::new(&geometry);
        (geometry, cache, CoreState::new(), Bus::default())
    }

    fn read(addr: u64) -> MemRef {
        MemRef {
            op: MemOp::Read,
            addr,
        }
    }

    fn write(addr: u64) -> MemRef {
        MemRef {
            op: MemOp::Write,
            addr,
        }
    }

    #[test]
    fn read_miss_requests_shared_and_stalls() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        step_core(0, read(0x1000), &geometry, &mut cache, &mut core, &mut bus);
        assert!(core.stalled);
        let req = bus.requests().next().expect("request enqueued");
        assert_eq!(req.kind, BusRequestKind::ReadShared);
        assert_eq!(req.addr, 0x1000);
    }

    #[test]
    fn read_hit_touches_lru_without_bus_traffic() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        let set = geometry.set_index(0x1000);
        let tag = geometry.tag(0x1000);
        cache.install(set, 1, tag, Shared, false);
        step_core(0, read(0x1000), &geometry, &mut cache, &mut core, &mut bus);
        assert!(!core.stalled);
        assert_eq!(bus.requests().count(), 0);
        // way 1 is now most recently used, so the next victim is way 0
        assert_eq!(cache.victim(set).way, 0);
    }

    #[test]
    fn write_hit_exclusive_upgrades_silently() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        let set = geometry.set_index(0x2000);
        let tag = geometry.tag(0x2000);
        cache.install(set, 0, tag, Exclusive, false);
        step_core(0, write(0x2000), &geometry, &mut cache, &mut core, &mut bus);
        assert_eq!(bus.requests().count(), 0);
        assert!(!core.stalled);
        let line = cache.line(set, 0);
        assert_eq!(line.state, Modified);
        assert!(line.dirty);
    }

    #[test]
    fn write_hit_shared_requests_upgrade_without_stalling() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        let set = geometry.set_index(0x2000);
        let tag = geometry.tag(0x2000);
        cache.install(set, 0, tag, Shared, false);
        step_core(0, write(0x2000), &geometry, &mut cache, &mut core, &mut bus);
        assert!(!core.stalled);
        let req = bus.requests().next().expect("request enqueued");
        assert_eq!(req.kind, BusRequestKind::Upgrade);
        // the line stays shared until the bus grants ownership
        assert_eq!(cache.line(set, 0).state, Shared);
    }

    #[test]
    fn write_miss_requests_exclusive() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        step_core(0, write(0x3000), &geometry, &mut cache, &mut core, &mut bus);
        assert!(core.stalled);
        let req = bus.requests().next().expect("request enqueued");
        assert_eq!(req.kind, BusRequestKind::ReadExclusive);
    }

    #[test]
    fn pending_core_burns_the_cycle_without_consuming() {
        let (geometry, mut cache, mut core, mut bus) = fixture();
        core.stalled = true;
        core.pending = Pending::Addr(0x1000);
        step_core(0, read(0x1000), &geometry, &mut cache, &mut core, &mut bus);
        assert_eq!(core.stats.wait_cycles, 1);
        assert_eq!(bus.requests().count(), 0);
    }
}
