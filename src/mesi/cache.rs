use crate::mesi::CoherenceState;
use crate::sim::config::CacheGeometry;

#[derive(Debug, Clone, Copy)]
pub struct CacheLine {
    pub tag: u64,
    pub state: CoherenceState,
    pub dirty: bool,
}

impl Default for CacheLine {
    fn default() -> Self {
        Self {
            tag: 0,
            state: CoherenceState::Invalid,
            dirty: false,
        }
    }
}

/// Contents of a line displaced by `victim`. `None` means an invalid way
/// was free and nothing was displaced.
#[derive(Debug, Clone, Copy)]
pub struct EvictedLine {
    pub tag: u64,
    pub dirty: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Victim {
    pub way: usize,
    pub evicted: Option<EvictedLine>,
}

/// Tag, coherence-state, and dirty storage for one private cache, with a
/// per-set LRU order (front = least recently used).
#[derive(Debug)]
pub struct CacheArray {
    sets: usize,
    ways: usize,
    lines: Vec<CacheLine>,
    lru: Vec<Vec<usize>>,
}

impl CacheArray {
    pub fn new(geometry: &CacheGeometry) -> Self {
        let sets = geometry.num_sets();
        let ways = geometry.associativity;
        let lines = vec![CacheLine::default(); sets * ways];
        let mut lru = Vec::with_capacity(sets);
        for _ in 0..sets {
            lru.push((0..ways).collect());
        }
        Self {
            sets,
            ways,
            lines,
            lru,
        }
    }

    pub fn num_ways(&self) -> usize {
        self.ways
    }

    fn idx(&self, set_index: usize, way: usize) -> usize {
        debug_assert!(set_index < self.sets && way < self.ways);
        set_index * self.ways + way
    }

    pub fn line(&self, set_index: usize, way: usize) -> &CacheLine {
        &self.lines[self.idx(set_index, way)]
    }

    pub fn line_mut(&mut self, set_index: usize, way: usize) -> &mut CacheLine {
        let idx = self.idx(set_index, way);
        &mut self.lines[idx]
    }

    /// Way holding `tag` in any valid state, if present.
    pub fn lookup(&self, set_index: usize, tag: u64) -> Option<usize> {
        (0..self.ways).find(|&way| {
            let line = self.line(set_index, way);
            line.state != CoherenceState::Invalid && line.tag == tag
        })
    }

    /// Way holding `tag` in exactly `state`, if present.
    pub fn lookup_in_state(&self, set_index: usize, tag: u64, state: CoherenceState) -> Option<usize> {
        (0..self.ways).find(|&way| {
            let line = self.line(set_index, way);
            line.state == state && line.tag == tag
        })
    }

    /// Selects a way to fill: the lowest-indexed invalid way if one
    /// exists, otherwise the LRU way of the set (displacing its line).
    pub fn victim(&self, set_index: usize) -> Victim {
        for way in 0..self.ways {
            if self.line(set_index, way).state == CoherenceState::Invalid {
                return Victim { way, evicted: None };
            }
        }
        let way = self.lru[set_index][0];
        let line = self.line(set_index, way);
        Victim {
            way,
            evicted: Some(EvictedLine {
                tag: line.tag,
                dirty: line.dirty,
            }),
        }
    }

    /// Moves `way` to the most-recently-used end of the set's LRU order.
    pub fn touch_mru(&mut self, set_index: usize, way: usize) {
        let order = &mut self.lru[set_index];
        if let Some(pos) = order.iter().position(|&w| w == way) {
            order.remove(pos);
        }
        order.push(way);
    }

    pub fn install(&mut self, set_index: usize, way: usize, tag: u64, state: CoherenceState, dirty: bool) {
        *self.line_mut(set_index, way) = CacheLine { tag, state, dirty };
    }

    pub fn invalidate(&mut self, set_index: usize, way: usize) {
        let line = self.line_mut(set_index, way);
        line.state = CoherenceState::Invalid;
        line.dirty = false;
    }

    pub fn set_state(&mut self, set_index: usize, way: usize, state: CoherenceState) {
        let line = self.line_mut(set_index, way);
        line.state = state;
        if state != CoherenceState::Modified {
            line.dirty = false;
        }
    }

    /// LRU orders must stay permutations of the way indices.
    pub fn lru_is_consistent(&self) -> bool {
        self.lru.iter().all(|order| {
            let mut seen = vec![false; self.ways];
            order.len() == self.ways
                && order.iter().all(|&w| {
                    if w >= self.ways || seen[w] {
                        return false;
                    }
                    seen[w] = true;
                    true
                })
        })
    }
}
