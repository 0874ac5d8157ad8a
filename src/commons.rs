//! System-wide types: protocol selection, geometry and timing configuration,
//! physical addresses and their decomposition, trace instructions.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Number of cores (and trace files) in the simulated system.
pub const NUM_CORES: usize = 4;

/// Word size in bytes.
pub const WORD_SIZE: u32 = 4;

/// Cycles a cache needs to answer a processor access.
pub const CACHE_LATENCY: u32 = 1;

/// Cycles main memory needs for one transaction (fetch or write-back).
pub const MEM_LATENCY: u32 = 100;

/// Cycles the bus needs to move one word between caches.
pub const BUS_WORD_LATENCY: u32 = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Protocol {
    Mesi,
    Dragon,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MESI" => Ok(Protocol::Mesi),
            "Dragon" => Ok(Protocol::Dragon),
            _ => Err(format!("unknown protocol '{s}' (expected MESI or Dragon)")),
        }
    }
}

/// Cache geometry shared by all four caches, plus the protocol in use.
#[derive(Clone, Copy, Debug)]
pub struct SystemConfig {
    pub protocol: Protocol,
    pub cache_size: u32,
    pub assoc: u32,
    pub block_size: u32,
}

impl SystemConfig {
    pub fn new(protocol: Protocol, cache_size: u32, assoc: u32, block_size: u32) -> Result<Self> {
        if assoc == 0 {
            bail!("associativity must be positive");
        }
        if !cache_size.is_power_of_two() {
            bail!("cache size must be a power of two, got {cache_size}");
        }
        if !block_size.is_power_of_two() || block_size < WORD_SIZE {
            bail!("block size must be a power of two of at least {WORD_SIZE} bytes, got {block_size}");
        }
        if cache_size % (assoc * block_size) != 0 {
            bail!("cache size {cache_size} is not divisible by {assoc} ways x {block_size} B blocks");
        }
        Ok(SystemConfig {
            protocol,
            cache_size,
            assoc,
            block_size,
        })
    }

    pub fn num_sets(&self) -> u32 {
        self.cache_size / (self.assoc * self.block_size)
    }

    // timing
    pub fn t_mem_fetch(&self) -> u32 {
        MEM_LATENCY
    }
    pub fn t_flush(&self) -> u32 {
        MEM_LATENCY
    }
    pub fn t_block_transfer(&self) -> u32 {
        BUS_WORD_LATENCY * self.block_size / WORD_SIZE
    }
    pub fn t_word_transfer(&self) -> u32 {
        BUS_WORD_LATENCY
    }
}

/// A physical byte address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Addr(pub u32);

/// An address split against the cache geometry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AddrParts {
    pub tag: u32,
    pub index: usize,
    pub offset: u32,
}

impl Addr {
    pub fn decode(self, cfg: &SystemConfig) -> AddrParts {
        let num_sets = cfg.num_sets();
        let block = self.0 / cfg.block_size;
        AddrParts {
            tag: block / num_sets,
            index: (block % num_sets) as usize,
            offset: self.0 % cfg.block_size,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Processor-side kind of a memory access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemOp {
    Read,
    Write,
}

/// One trace entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Load(Addr),
    Store(Addr),
    Other(u32),
}

pub type Instructions = VecDeque<Instr>;

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(cache_size: u32, assoc: u32, block_size: u32) -> SystemConfig {
        SystemConfig::new(Protocol::Mesi, cache_size, assoc, block_size).unwrap()
    }

    #[test]
    fn decode_splits_tag_index_offset() {
        // 1 KiB, 2-way, 64 B blocks -> 8 sets
        let cfg = cfg(1024, 2, 64);
        assert_eq!(cfg.num_sets(), 8);

        let parts = Addr(0x0000_0147).decode(&cfg);
        assert_eq!(parts.offset, 0x07);
        assert_eq!(parts.index, 5); // block 0x145 / 64 = 5
        assert_eq!(parts.tag, 0);

        let parts = Addr(0x0000_1140).decode(&cfg);
        assert_eq!(parts.offset, 0);
        assert_eq!(parts.index, 5);
        assert_eq!(parts.tag, 8);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(SystemConfig::new(Protocol::Mesi, 1000, 2, 64).is_err());
        assert!(SystemConfig::new(Protocol::Mesi, 1024, 0, 64).is_err());
        assert!(SystemConfig::new(Protocol::Mesi, 1024, 2, 48).is_err());
        assert!(SystemConfig::new(Protocol::Mesi, 1024, 2, 2).is_err());
        assert!(SystemConfig::new(Protocol::Mesi, 1024, 3, 64).is_err());
    }

    #[test]
    fn protocol_from_str() {
        assert_eq!("MESI".parse::<Protocol>().unwrap(), Protocol::Mesi);
        assert_eq!("Dragon".parse::<Protocol>().unwrap(), Protocol::Dragon);
        assert!("mosi".parse::<Protocol>().is_err());
    }
}
