//! Deterministic cycle scheduler: every cycle the processors step in id
//! order, the bus arbitrates, and every timing entity elapses once. All
//! elapses happen at the cycle boundary, so no component sees a partial
//! tick and a run is byte-reproducible.

use log::info;

use crate::bus::Bus;
use crate::cache::{BlockState, Cache};
use crate::commons::{Addr, Instructions, SystemConfig};
use crate::memory::Memory;
use crate::processor::Processor;

pub struct Simulator {
    cfg: SystemConfig,
    procs: Vec<Processor>,
    caches: Vec<Cache>,
    bus: Bus,
    memory: Memory,
    cycles: u64,
}

impl Simulator {
    pub fn new(cfg: SystemConfig, traces: Vec<Instructions>) -> Self {
        let n = traces.len();
        Simulator {
            cfg,
            procs: traces
                .into_iter()
                .enumerate()
                .map(|(id, t)| Processor::new(id, t))
                .collect(),
            caches: (0..n).map(|_| Cache::new(cfg)).collect(),
            bus: Bus::new(n),
            memory: Memory::new(),
            cycles: 0,
        }
    }

    pub fn run(&mut self) -> SimReport {
        info!(
            "simulating {} cores: {:?}, {} B cache, {}-way, {} B blocks",
            self.procs.len(),
            self.cfg.protocol,
            self.cfg.cache_size,
            self.cfg.assoc,
            self.cfg.block_size
        );
        while !self.finished() {
            self.step_cycle();
        }
        info!("finished after {} cycles", self.cycles);
        self.report()
    }

    fn finished(&self) -> bool {
        self.procs.iter().all(Processor::finished) && self.bus.is_idle() && !self.memory.is_busy()
    }

    fn step_cycle(&mut self) {
        for (proc, cache) in self.procs.iter_mut().zip(self.caches.iter_mut()) {
            proc.step(cache, &mut self.bus);
        }
        self.bus.step(&mut self.caches, &mut self.memory, &self.cfg);

        for cache in &mut self.caches {
            cache.elapse();
        }
        self.bus.elapse();
        self.memory.elapse();
        self.cycles += 1;
    }

    /// Snoop view of a core's cache, for inspection after a run.
    pub fn block_state(&self, core: usize, addr: Addr) -> BlockState {
        self.caches[core].bus_state_of(addr)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn report(&self) -> SimReport {
        SimReport {
            total_cycles: self.cycles,
            cores: self
                .procs
                .iter()
                .zip(self.caches.iter())
                .map(|(p, c)| CoreReport {
                    compute_cycles: p.compute_cycles(),
                    loads: p.num_loads(),
                    stores: p.num_stores(),
                    idle_cycles: p.idle_cycles(),
                    hits: c.num_hits(),
                    misses: c.num_misses(),
                })
                .collect(),
            bus_traffic_bytes: self.bus.traffic_bytes(),
            private_accesses: self.caches.iter().map(Cache::num_private).sum(),
            public_accesses: self.caches.iter().map(Cache::num_public).sum(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoreReport {
    pub compute_cycles: u64,
    pub loads: u64,
    pub stores: u64,
    pub idle_cycles: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CoreReport {
    pub fn accesses(&self) -> u64 {
        self.loads + self.stores
    }

    pub fn miss_rate(&self) -> f64 {
        if self.accesses() == 0 {
            0.0
        } else {
            self.misses as f64 / self.accesses() as f64
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimReport {
    pub total_cycles: u64,
    pub cores: Vec<CoreReport>,
    pub bus_traffic_bytes: u64,
    pub private_accesses: u64,
    pub public_accesses: u64,
}

impl SimReport {
    pub fn print(&self) {
        println!("Total Cycles: {}", self.total_cycles);
        for (id, core) in self.cores.iter().enumerate() {
            println!("Core {id}:");
            println!("  Compute Cycles: {}", core.compute_cycles);
            println!("  Load/Store Instructions: {}", core.accesses());
            println!("  Idle Cycles: {}", core.idle_cycles);
            println!("  Cache Miss Rate: {:.1}", core.miss_rate());
        }
        println!("Bus Traffic (Bytes): {}", self.bus_traffic_bytes);
        println!("Private Data Accesses: {}", self.private_accesses);
        println!("Public Data Accesses: {}", self.public_accesses);
    }
}
