//! The shared bus: single-owner arbitration over per-processor request
//! slots, snoop dispatch into the peer caches, traffic accounting, and
//! memory engagement. A grant applies all coherence side effects at once;
//! the inflight descriptor then models the transfer time until the
//! originator may commit.

use log::{debug, trace};

use crate::cache::{BlockState, Cache};
use crate::commons::{Addr, MemOp, SystemConfig, WORD_SIZE};
use crate::memory::Memory;
use crate::protocol;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusTxnKind {
    BusRd,
    BusRdX,
    BusUpgrade,
    BusUpd,
    Flush,
}

/// A processor's outstanding coherence request.
#[derive(Clone, Copy, Debug)]
pub struct BusRequest {
    pub op: MemOp,
    pub addr: Addr,
}

#[derive(Clone, Copy, Debug)]
struct BusTxn {
    kind: BusTxnKind,
    addr: Addr,
    origin: usize,
    remaining: u32,
}

pub struct Bus {
    requests: Vec<Option<BusRequest>>,
    inflight: Option<BusTxn>,
    traffic_bytes: u64,
}

impl Bus {
    pub fn new(num_procs: usize) -> Self {
        Bus {
            requests: vec![None; num_procs],
            inflight: None,
            traffic_bytes: 0,
        }
    }

    pub fn post(&mut self, origin: usize, req: BusRequest) {
        let slot = &mut self.requests[origin];
        assert!(
            slot.is_none(),
            "processor {origin} already has a bus request outstanding"
        );
        *slot = Some(req);
    }

    pub fn owner(&self) -> Option<usize> {
        self.inflight.map(|t| t.origin)
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_none() && self.requests.iter().all(Option::is_none)
    }

    pub fn traffic_bytes(&self) -> u64 {
        self.traffic_bytes
    }

    /// Hands a finished transaction back to its originator and frees the bus.
    pub fn poll_complete(&mut self, origin: usize) -> bool {
        match self.inflight {
            Some(txn) if txn.origin == origin && txn.remaining == 0 => {
                trace!("bus: {:?} at {} complete for p{origin}", txn.kind, txn.addr);
                self.inflight = None;
                true
            }
            _ => false,
        }
    }

    /// Arbitration: while the bus is free, grant the pending request with
    /// the lowest processor id.
    pub fn step(&mut self, caches: &mut [Cache], memory: &mut Memory, cfg: &SystemConfig) {
        if self.inflight.is_some() {
            return;
        }
        let Some(origin) = self.requests.iter().position(Option::is_some) else {
            return;
        };
        let req = self.requests[origin].take().expect("request slot emptied");
        self.grant(origin, req, caches, memory, cfg);
    }

    fn grant(
        &mut self,
        origin: usize,
        req: BusRequest,
        caches: &mut [Cache],
        memory: &mut Memory,
        cfg: &SystemConfig,
    ) {
        let addr = req.addr;
        // a queued store-upgrade whose block was invalidated in the meantime
        // re-reads its state here and escalates to a full refetch
        let state = caches[origin].bus_state_of(addr);
        let others_hold = caches
            .iter()
            .enumerate()
            .any(|(i, c)| i != origin && c.bus_state_of(addr) != BlockState::I);

        let out = protocol::on_access(cfg.protocol, req.op, state, others_hold);
        caches[origin].record_access(out.sharing);

        let mut latency = 0u32;

        // snoop all peers holding the block
        let mut flushed = false;
        for i in 0..caches.len() {
            if i == origin {
                continue;
            }
            let peer = caches[i].bus_state_of(addr);
            if peer == BlockState::I {
                continue;
            }
            let snooped = protocol::on_snoop(cfg.protocol, out.txn, peer);
            caches[i].bus_set_state(addr, snooped.next);
            if snooped.flush {
                flushed = true;
            }
        }
        if flushed {
            // the previous owner writes the dirty block back before the
            // data moves to the requestor
            self.account(BusTxnKind::Flush, cfg);
            memory.issue_write();
            latency += cfg.t_flush();
        }

        self.account(out.txn, cfg);
        latency += match out.txn {
            BusTxnKind::BusRd | BusTxnKind::BusRdX => {
                if out.mem_fetch {
                    memory.issue_read();
                    cfg.t_mem_fetch()
                } else {
                    cfg.t_block_transfer()
                }
            }
            BusTxnKind::BusUpgrade => cfg.t_word_transfer(),
            BusTxnKind::BusUpd => cfg.t_word_transfer(),
            BusTxnKind::Flush => unreachable!("flush is never a primary transaction"),
        };

        if out.with_update {
            for i in 0..caches.len() {
                if i == origin {
                    continue;
                }
                let peer = caches[i].bus_state_of(addr);
                if peer == BlockState::I {
                    continue;
                }
                let snooped = protocol::on_snoop(cfg.protocol, BusTxnKind::BusUpd, peer);
                caches[i].bus_set_state(addr, snooped.next);
            }
            self.account(BusTxnKind::BusUpd, cfg);
            latency += cfg.t_word_transfer();
        }

        // install the outcome in the requesting cache
        if state == BlockState::I {
            if let Some(evicted) = caches[origin].bus_allocate(out.next, addr) {
                if evicted.is_dirty() {
                    self.account(BusTxnKind::Flush, cfg);
                    memory.issue_write();
                    latency += cfg.t_flush();
                }
            }
        } else {
            caches[origin].bus_set_state(addr, out.next);
        }

        assert_coherent(caches, addr);

        debug!(
            "bus: grant p{origin} {:?} at {addr} -> {:?}, {latency} cycles",
            out.txn, out.next
        );
        self.inflight = Some(BusTxn {
            kind: out.txn,
            addr,
            origin,
            remaining: latency,
        });
    }

    fn account(&mut self, kind: BusTxnKind, cfg: &SystemConfig) {
        self.traffic_bytes += match kind {
            // block transfer, from memory or cache to cache
            BusTxnKind::BusRd | BusTxnKind::BusRdX | BusTxnKind::Flush => cfg.block_size as u64,
            // one word
            BusTxnKind::BusUpd => WORD_SIZE as u64,
            // address-only coherence message
            BusTxnKind::BusUpgrade => 0,
        };
    }

    pub fn elapse(&mut self) {
        if let Some(txn) = &mut self.inflight {
            txn.remaining = txn.remaining.saturating_sub(1);
        }
    }
}

/// A transaction must never leave two modified owners behind, and an `E`
/// holder must be the only holder.
fn assert_coherent(caches: &[Cache], addr: Addr) {
    let states: Vec<BlockState> = caches.iter().map(|c| c.bus_state_of(addr)).collect();
    let owners = states.iter().filter(|s| s.is_dirty()).count();
    assert!(
        owners <= 1,
        "coherence violation at {addr}: multiple modified owners ({states:?})"
    );
    if states.contains(&BlockState::E) {
        let holders = states.iter().filter(|s| **s != BlockState::I).count();
        assert!(
            holders == 1,
            "coherence violation at {addr}: E alongside other sharers ({states:?})"
        );
    }
}
