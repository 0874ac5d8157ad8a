//! Set-associative L1 cache with LRU replacement and a two-phase access
//! model: `issue_*` classifies the access and starts the access latency,
//! `commit_*` applies it once the latency has elapsed. The bus mutates
//! block states through the `bus_*` entry points while snooping.

use crate::commons::{Addr, SystemConfig, CACHE_LATENCY};
use crate::protocol::Sharing;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockState {
    /// Invalid; the slot is free.
    I,
    /// MESI shared.
    S,
    /// Exclusive clean.
    E,
    /// Dirty, sole owner.
    M,
    /// Dragon shared clean.
    Sc,
    /// Dragon shared modified (the one writer responsible for the block).
    Sm,
}

impl BlockState {
    /// Eviction of a dirty block requires a write-back.
    pub fn is_dirty(self) -> bool {
        matches!(self, BlockState::M | BlockState::Sm)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CacheBlock {
    pub tag: u32,
    pub state: BlockState,
    pub last_used: u64,
}

/// One associativity-way set. `use_ctr` hands out monotonic LRU ordinals,
/// one per hit or allocation touching this set.
pub struct CacheSet {
    blocks: Vec<CacheBlock>,
    use_ctr: u64,
}

impl CacheSet {
    fn new(assoc: u32) -> Self {
        CacheSet {
            blocks: vec![
                CacheBlock {
                    tag: 0,
                    state: BlockState::I,
                    last_used: 0,
                };
                assoc as usize
            ],
            use_ctr: 0,
        }
    }

    fn find(&self, tag: u32) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.state != BlockState::I && b.tag == tag)
    }

    pub fn has_tag(&self, tag: u32) -> bool {
        self.find(tag).is_some()
    }

    pub fn state_of(&self, tag: u32) -> Option<BlockState> {
        self.find(tag).map(|i| self.blocks[i].state)
    }

    /// Setting `I` frees the slot.
    pub fn set_state(&mut self, tag: u32, state: BlockState) {
        let i = self.find(tag).expect("set_state on an absent block");
        self.blocks[i].state = state;
    }

    pub fn can_allocate(&self) -> bool {
        self.blocks.iter().any(|b| b.state == BlockState::I)
    }

    /// Removes the least recently used block and returns its prior state.
    /// Picking a victim while a free slot exists is a replacement bug.
    pub fn evict_lru(&mut self) -> BlockState {
        assert!(
            !self.can_allocate(),
            "LRU eviction with a free slot available"
        );
        let i = self
            .blocks
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.last_used)
            .map(|(i, _)| i)
            .expect("empty cache set");
        let state = self.blocks[i].state;
        self.blocks[i].state = BlockState::I;
        state
    }

    /// Removes the block with `tag` if present; returns `I` otherwise.
    pub fn evict(&mut self, tag: u32) -> BlockState {
        match self.find(tag) {
            Some(i) => {
                let state = self.blocks[i].state;
                self.blocks[i].state = BlockState::I;
                state
            }
            None => BlockState::I,
        }
    }

    pub fn allocate(&mut self, tag: u32, state: BlockState) {
        let i = self
            .blocks
            .iter()
            .position(|b| b.state == BlockState::I)
            .expect("allocation without a free slot");
        self.use_ctr += 1;
        self.blocks[i] = CacheBlock {
            tag,
            state,
            last_used: self.use_ctr,
        };
    }

    /// Moves the block to the MRU position.
    pub fn touch(&mut self, tag: u32) {
        let i = self.find(tag).expect("touch on an absent block");
        self.use_ctr += 1;
        self.blocks[i].last_used = self.use_ctr;
    }
}

pub struct Cache {
    cfg: SystemConfig,
    sets: Vec<CacheSet>,
    busy: u32,
    pending_hit: Option<bool>,

    num_hits: u64,
    num_misses: u64,
    num_private: u64,
    num_public: u64,
}

impl Cache {
    pub fn new(cfg: SystemConfig) -> Self {
        Cache {
            cfg,
            sets: (0..cfg.num_sets()).map(|_| CacheSet::new(cfg.assoc)).collect(),
            busy: 0,
            pending_hit: None,
            num_hits: 0,
            num_misses: 0,
            num_private: 0,
            num_public: 0,
        }
    }

    fn set_of(&self, addr: Addr) -> (&CacheSet, u32) {
        let parts = addr.decode(&self.cfg);
        (&self.sets[parts.index], parts.tag)
    }

    fn set_of_mut(&mut self, addr: Addr) -> (&mut CacheSet, u32) {
        let parts = addr.decode(&self.cfg);
        (&mut self.sets[parts.index], parts.tag)
    }

    // processor side: issue

    fn issue(&mut self, addr: Addr) {
        assert!(
            self.busy == 0 && self.pending_hit.is_none(),
            "issue on a busy cache"
        );
        let (set, tag) = self.set_of(addr);
        let hit = set.has_tag(tag);
        if hit {
            self.num_hits += 1;
        } else {
            self.num_misses += 1;
        }
        self.pending_hit = Some(hit);
        self.busy = CACHE_LATENCY;
    }

    pub fn issue_read(&mut self, addr: Addr) {
        self.issue(addr);
    }

    pub fn issue_write(&mut self, addr: Addr) {
        self.issue(addr);
    }

    /// The pending classification, available once the access latency elapsed.
    pub fn hit_ready(&self) -> Option<bool> {
        if self.busy == 0 {
            self.pending_hit
        } else {
            None
        }
    }

    // processor side: commit

    fn begin_commit(&mut self) {
        assert_eq!(self.busy, 0, "commit on a busy cache");
        assert_eq!(
            self.pending_hit.take(),
            Some(true),
            "commit without a resolved hit"
        );
    }

    pub fn commit_read(&mut self, addr: Addr) {
        self.begin_commit();
        let (set, tag) = self.set_of_mut(addr);
        set.touch(tag);
    }

    pub fn commit_write(&mut self, addr: Addr) {
        self.begin_commit();
        let (set, tag) = self.set_of_mut(addr);
        match set.state_of(tag) {
            None => panic!("write commit at {addr} on an invalid block"),
            // silent upgrade; the bus never saw this store
            Some(BlockState::E) => set.set_state(tag, BlockState::M),
            // M stays M; shared states were already resolved by the bus
            Some(_) => (),
        }
        set.touch(tag);
    }

    // bus side

    /// Snoop query; `I` when the block is absent. Never mutates.
    pub fn bus_state_of(&self, addr: Addr) -> BlockState {
        let (set, tag) = self.set_of(addr);
        set.state_of(tag).unwrap_or(BlockState::I)
    }

    pub fn bus_set_state(&mut self, addr: Addr, state: BlockState) {
        let (set, tag) = self.set_of_mut(addr);
        set.set_state(tag, state);
    }

    /// Installs a bus-delivered block, evicting the LRU way if the set is
    /// full. Returns the evicted state so the bus can decide on a
    /// write-back. The outstanding access, if any, is now a hit.
    pub fn bus_allocate(&mut self, state: BlockState, addr: Addr) -> Option<BlockState> {
        let (set, tag) = self.set_of_mut(addr);
        let evicted = if set.can_allocate() {
            None
        } else {
            Some(set.evict_lru())
        };
        set.allocate(tag, state);
        if self.pending_hit == Some(false) {
            self.pending_hit = Some(true);
        }
        evicted
    }

    pub fn bus_evict(&mut self, addr: Addr) -> BlockState {
        let (set, tag) = self.set_of_mut(addr);
        set.evict(tag)
    }

    // timing and stats

    pub fn elapse(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }

    pub fn record_access(&mut self, sharing: Sharing) {
        match sharing {
            Sharing::Private => self.num_private += 1,
            Sharing::Public => self.num_public += 1,
        }
    }

    pub fn num_hits(&self) -> u64 {
        self.num_hits
    }
    pub fn num_misses(&self) -> u64 {
        self.num_misses
    }
    pub fn num_private(&self) -> u64 {
        self.num_private
    }
    pub fn num_public(&self) -> u64 {
        self.num_public
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::Protocol;

    fn cfg() -> SystemConfig {
        SystemConfig::new(Protocol::Mesi, 1024, 2, 64).unwrap()
    }

    #[test]
    fn set_allocates_free_slots_before_evicting() {
        let mut set = CacheSet::new(2);
        assert!(set.can_allocate());
        set.allocate(1, BlockState::E);
        set.allocate(2, BlockState::S);
        assert!(!set.can_allocate());
        assert_eq!(set.state_of(1), Some(BlockState::E));
        assert_eq!(set.state_of(2), Some(BlockState::S));
    }

    #[test]
    fn set_evicts_least_recently_used() {
        let mut set = CacheSet::new(2);
        set.allocate(1, BlockState::M);
        set.allocate(2, BlockState::E);
        set.touch(1); // 2 is now the oldest
        assert_eq!(set.evict_lru(), BlockState::E);
        assert!(!set.has_tag(2));
        assert!(set.has_tag(1));
    }

    #[test]
    #[should_panic(expected = "free slot available")]
    fn set_refuses_lru_eviction_with_free_slot() {
        let mut set = CacheSet::new(2);
        set.allocate(1, BlockState::E);
        set.evict_lru();
    }

    #[test]
    fn set_state_to_invalid_frees_the_slot() {
        let mut set = CacheSet::new(1);
        set.allocate(7, BlockState::M);
        set.set_state(7, BlockState::I);
        assert!(set.can_allocate());
        assert_eq!(set.state_of(7), None);
    }

    #[test]
    fn set_evict_by_tag_reports_absent_blocks() {
        let mut set = CacheSet::new(2);
        set.allocate(1, BlockState::Sm);
        assert_eq!(set.evict(1), BlockState::Sm);
        assert_eq!(set.evict(1), BlockState::I);
    }

    #[test]
    fn two_phase_access_resolves_after_latency() {
        let mut cache = Cache::new(cfg());
        cache.issue_read(Addr(0x100));
        assert_eq!(cache.hit_ready(), None); // still busy
        cache.elapse();
        assert_eq!(cache.hit_ready(), Some(false));
        assert_eq!(cache.num_misses(), 1);

        // bus delivers the block, then the read commits
        assert_eq!(cache.bus_allocate(BlockState::E, Addr(0x100)), None);
        assert_eq!(cache.hit_ready(), Some(true));
        cache.commit_read(Addr(0x100));
        assert_eq!(cache.bus_state_of(Addr(0x100)), BlockState::E);
    }

    #[test]
    fn write_commit_upgrades_exclusive_silently() {
        let mut cache = Cache::new(cfg());
        cache.bus_allocate(BlockState::E, Addr(0x40));
        cache.issue_write(Addr(0x40));
        cache.elapse();
        assert_eq!(cache.hit_ready(), Some(true));
        cache.commit_write(Addr(0x40));
        assert_eq!(cache.bus_state_of(Addr(0x40)), BlockState::M);
    }

    #[test]
    #[should_panic(expected = "busy cache")]
    fn commit_on_busy_cache_is_fatal() {
        let mut cache = Cache::new(cfg());
        cache.bus_allocate(BlockState::E, Addr(0x40));
        cache.issue_read(Addr(0x40));
        cache.commit_read(Addr(0x40)); // latency has not elapsed
    }

    #[test]
    fn bus_allocate_reports_the_evicted_state() {
        // one set of two ways
        let cfg = SystemConfig::new(Protocol::Mesi, 128, 2, 64).unwrap();
        let mut cache = Cache::new(cfg);
        cache.bus_allocate(BlockState::M, Addr(0x00));
        cache.bus_allocate(BlockState::E, Addr(0x40));
        let evicted = cache.bus_allocate(BlockState::S, Addr(0x80));
        assert_eq!(evicted, Some(BlockState::M));
        assert_eq!(cache.bus_state_of(Addr(0x00)), BlockState::I);
    }
}
