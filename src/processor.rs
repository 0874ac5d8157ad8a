//! Trace-driven processor: one in-flight memory operation at a time,
//! compute bursts for `Other` entries, and per-core timing counters.

use crate::bus::{Bus, BusRequest};
use crate::cache::Cache;
use crate::commons::{Addr, Instr, Instructions, MemOp};
use crate::protocol;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    Ready,
    Computing(u32),
    WaitingForCache,
    WaitingForBus,
}

pub struct Processor {
    pub id: usize,
    state: ProcState,
    instructions: Instructions,
    pending: Option<(MemOp, Addr)>,

    compute_cycles: u64,
    idle_cycles: u64,
    num_loads: u64,
    num_stores: u64,
}

impl Processor {
    pub fn new(id: usize, instructions: Instructions) -> Self {
        Processor {
            id,
            state: ProcState::Ready,
            instructions,
            pending: None,
            compute_cycles: 0,
            idle_cycles: 0,
            num_loads: 0,
            num_stores: 0,
        }
    }

    pub fn finished(&self) -> bool {
        self.state == ProcState::Ready && self.instructions.is_empty()
    }

    pub fn state(&self) -> ProcState {
        self.state
    }
    pub fn compute_cycles(&self) -> u64 {
        self.compute_cycles
    }
    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles
    }
    pub fn num_loads(&self) -> u64 {
        self.num_loads
    }
    pub fn num_stores(&self) -> u64 {
        self.num_stores
    }

    /// One cycle of work. Exactly one of compute/idle is credited per
    /// active cycle; the cycle on which a memory operation commits credits
    /// neither, it ends the wait.
    pub fn step(&mut self, cache: &mut Cache, bus: &mut Bus) {
        match self.state {
            ProcState::Ready => self.fetch(cache),
            ProcState::Computing(left) => {
                self.compute_cycles += 1;
                self.state = if left == 1 {
                    ProcState::Ready
                } else {
                    ProcState::Computing(left - 1)
                };
            }
            ProcState::WaitingForCache => self.check_cache(cache, bus),
            ProcState::WaitingForBus => {
                if bus.poll_complete(self.id) {
                    self.commit(cache);
                } else {
                    self.idle_cycles += 1;
                }
            }
        }
    }

    fn fetch(&mut self, cache: &mut Cache) {
        match self.instructions.pop_front() {
            None => (),
            Some(Instr::Load(addr)) => {
                self.num_loads += 1;
                cache.issue_read(addr);
                self.pending = Some((MemOp::Read, addr));
                self.state = ProcState::WaitingForCache;
            }
            Some(Instr::Store(addr)) => {
                self.num_stores += 1;
                cache.issue_write(addr);
                self.pending = Some((MemOp::Write, addr));
                self.state = ProcState::WaitingForCache;
            }
            Some(Instr::Other(cycles)) => {
                if cycles == 0 {
                    return;
                }
                self.compute_cycles += 1;
                if cycles > 1 {
                    self.state = ProcState::Computing(cycles - 1);
                }
            }
        }
    }

    fn check_cache(&mut self, cache: &mut Cache, bus: &mut Bus) {
        let (op, addr) = self.pending.expect("waiting for cache without a pending access");
        match cache.hit_ready() {
            None => self.idle_cycles += 1,
            Some(true) => {
                if op == MemOp::Write && protocol::store_needs_bus(cache.bus_state_of(addr)) {
                    // a write hit on a shared block still needs the bus
                    bus.post(self.id, BusRequest { op, addr });
                    self.state = ProcState::WaitingForBus;
                    self.idle_cycles += 1;
                } else {
                    let sharing = protocol::classify_resident(cache.bus_state_of(addr));
                    cache.record_access(sharing);
                    self.commit(cache);
                }
            }
            Some(false) => {
                bus.post(self.id, BusRequest { op, addr });
                self.state = ProcState::WaitingForBus;
                self.idle_cycles += 1;
            }
        }
    }

    fn commit(&mut self, cache: &mut Cache) {
        let (op, addr) = self.pending.take().expect("commit without a pending access");
        match op {
            MemOp::Read => cache.commit_read(addr),
            MemOp::Write => cache.commit_write(addr),
        }
        self.state = ProcState::Ready;
    }
}
