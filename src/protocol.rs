//! Pure coherence transition functions for MESI (write-invalidate) and
//! Dragon (write-update). The bus feeds in the requesting cache's block
//! state and whether any peer holds the block; the outcome says which
//! state to install, which transaction goes on the wire, whether memory
//! must supply the data, and how to classify the access.

use crate::bus::BusTxnKind;
use crate::cache::BlockState;
use crate::commons::{MemOp, Protocol};

/// Whether any other cache held the block at transaction time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Sharing {
    Private,
    Public,
}

pub struct AccessOutcome {
    pub next: BlockState,
    pub txn: BusTxnKind,
    /// Dragon write-allocate: a one-word `BusUpd` follows the fill.
    pub with_update: bool,
    /// The block comes from main memory rather than a peer cache.
    pub mem_fetch: bool,
    pub sharing: Sharing,
}

pub struct SnoopOutcome {
    pub next: BlockState,
    /// The snooped cache owns the dirty block and must write it back.
    pub flush: bool,
}

/// Transition for an access the requesting cache could not resolve alone.
pub fn on_access(
    protocol: Protocol,
    op: MemOp,
    state: BlockState,
    others_hold: bool,
) -> AccessOutcome {
    match protocol {
        Protocol::Mesi => mesi_access(op, state, others_hold),
        Protocol::Dragon => dragon_access(op, state, others_hold),
    }
}

/// Transition for a cache observing a peer's transaction. Only called for
/// resident (non-`I`) blocks.
pub fn on_snoop(protocol: Protocol, kind: BusTxnKind, state: BlockState) -> SnoopOutcome {
    match protocol {
        Protocol::Mesi => mesi_snoop(kind, state),
        Protocol::Dragon => dragon_snoop(kind, state),
    }
}

/// A store that hits a shared block still needs a coherence transaction.
pub fn store_needs_bus(state: BlockState) -> bool {
    matches!(state, BlockState::S | BlockState::Sc | BlockState::Sm)
}

/// Classification of a hit that never reaches the bus.
pub fn classify_resident(state: BlockState) -> Sharing {
    match state {
        BlockState::S | BlockState::Sc | BlockState::Sm => Sharing::Public,
        BlockState::E | BlockState::M => Sharing::Private,
        BlockState::I => panic!("classifying an access to an invalid block"),
    }
}

fn mesi_access(op: MemOp, state: BlockState, others_hold: bool) -> AccessOutcome {
    use BlockState::*;
    let sharing = if others_hold {
        Sharing::Public
    } else {
        Sharing::Private
    };
    match (op, state) {
        (MemOp::Read, I) if others_hold => AccessOutcome {
            next: S,
            txn: BusTxnKind::BusRd,
            with_update: false,
            mem_fetch: false,
            sharing,
        },
        (MemOp::Read, I) => AccessOutcome {
            next: E,
            txn: BusTxnKind::BusRd,
            with_update: false,
            mem_fetch: true,
            sharing,
        },
        (MemOp::Write, I) => AccessOutcome {
            next: M,
            txn: BusTxnKind::BusRdX,
            with_update: false,
            mem_fetch: !others_hold,
            sharing,
        },
        (MemOp::Write, S) => AccessOutcome {
            next: M,
            txn: BusTxnKind::BusUpgrade,
            with_update: false,
            mem_fetch: false,
            sharing,
        },
        _ => panic!("MESI: unexpected bus access from state {state:?} for {op:?}"),
    }
}

fn dragon_access(op: MemOp, state: BlockState, others_hold: bool) -> AccessOutcome {
    use BlockState::*;
    let sharing = if others_hold {
        Sharing::Public
    } else {
        Sharing::Private
    };
    match (op, state) {
        (MemOp::Read, I) if others_hold => AccessOutcome {
            next: Sc,
            txn: BusTxnKind::BusRd,
            with_update: false,
            mem_fetch: false,
            sharing,
        },
        (MemOp::Read, I) => AccessOutcome {
            next: E,
            txn: BusTxnKind::BusRd,
            with_update: false,
            mem_fetch: true,
            sharing,
        },
        (MemOp::Write, I) if others_hold => AccessOutcome {
            next: Sm,
            txn: BusTxnKind::BusRd,
            with_update: true,
            mem_fetch: false,
            sharing,
        },
        (MemOp::Write, I) => AccessOutcome {
            next: M,
            txn: BusTxnKind::BusRd,
            with_update: false,
            mem_fetch: true,
            sharing,
        },
        (MemOp::Write, Sc) | (MemOp::Write, Sm) => AccessOutcome {
            // fold to M once no sharer remains
            next: if others_hold { Sm } else { M },
            txn: BusTxnKind::BusUpd,
            with_update: false,
            mem_fetch: false,
            sharing,
        },
        _ => panic!("Dragon: unexpected bus access from state {state:?} for {op:?}"),
    }
}

fn mesi_snoop(kind: BusTxnKind, state: BlockState) -> SnoopOutcome {
    use BlockState::*;
    match (kind, state) {
        (BusTxnKind::BusRd, M) => SnoopOutcome {
            next: S,
            flush: true,
        },
        (BusTxnKind::BusRd, E) | (BusTxnKind::BusRd, S) => SnoopOutcome {
            next: S,
            flush: false,
        },
        (BusTxnKind::BusRdX | BusTxnKind::BusUpgrade, M) => SnoopOutcome {
            next: I,
            flush: true,
        },
        (BusTxnKind::BusRdX | BusTxnKind::BusUpgrade, E | S) => SnoopOutcome {
            next: I,
            flush: false,
        },
        _ => panic!("MESI: cannot snoop {kind:?} in state {state:?}"),
    }
}

fn dragon_snoop(kind: BusTxnKind, state: BlockState) -> SnoopOutcome {
    use BlockState::*;
    match (kind, state) {
        (BusTxnKind::BusRd, M) | (BusTxnKind::BusRd, Sm) => SnoopOutcome {
            next: Sm,
            flush: true,
        },
        (BusTxnKind::BusRd, E) | (BusTxnKind::BusRd, Sc) => SnoopOutcome {
            next: Sc,
            flush: false,
        },
        // another writer claims the Sm role for this block
        (BusTxnKind::BusUpd, Sm) | (BusTxnKind::BusUpd, Sc) => SnoopOutcome {
            next: Sc,
            flush: false,
        },
        _ => panic!("Dragon: cannot snoop {kind:?} in state {state:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesi_cold_read_is_exclusive_and_private() {
        let out = on_access(Protocol::Mesi, MemOp::Read, BlockState::I, false);
        assert_eq!(out.next, BlockState::E);
        assert_eq!(out.txn, BusTxnKind::BusRd);
        assert!(out.mem_fetch);
        assert_eq!(out.sharing, Sharing::Private);
    }

    #[test]
    fn mesi_shared_read_loads_in_shared() {
        let out = on_access(Protocol::Mesi, MemOp::Read, BlockState::I, true);
        assert_eq!(out.next, BlockState::S);
        assert!(!out.mem_fetch);
        assert_eq!(out.sharing, Sharing::Public);
    }

    #[test]
    fn mesi_store_to_shared_upgrades_without_data() {
        let out = on_access(Protocol::Mesi, MemOp::Write, BlockState::S, true);
        assert_eq!(out.next, BlockState::M);
        assert_eq!(out.txn, BusTxnKind::BusUpgrade);
        assert!(!out.mem_fetch);
    }

    #[test]
    fn mesi_snoops_demote_and_invalidate() {
        let out = mesi_snoop(BusTxnKind::BusRd, BlockState::M);
        assert_eq!(out.next, BlockState::S);
        assert!(out.flush);

        let out = mesi_snoop(BusTxnKind::BusRdX, BlockState::E);
        assert_eq!(out.next, BlockState::I);
        assert!(!out.flush);

        let out = mesi_snoop(BusTxnKind::BusUpgrade, BlockState::S);
        assert_eq!(out.next, BlockState::I);
    }

    #[test]
    fn dragon_write_allocate_rides_an_update() {
        let out = on_access(Protocol::Dragon, MemOp::Write, BlockState::I, true);
        assert_eq!(out.next, BlockState::Sm);
        assert_eq!(out.txn, BusTxnKind::BusRd);
        assert!(out.with_update);
        assert_eq!(out.sharing, Sharing::Public);
    }

    #[test]
    fn dragon_update_folds_to_modified_when_alone() {
        let out = on_access(Protocol::Dragon, MemOp::Write, BlockState::Sm, false);
        assert_eq!(out.next, BlockState::M);
        assert_eq!(out.sharing, Sharing::Private);

        let out = on_access(Protocol::Dragon, MemOp::Write, BlockState::Sc, true);
        assert_eq!(out.next, BlockState::Sm);
    }

    #[test]
    fn dragon_snoops_keep_one_owner() {
        let out = dragon_snoop(BusTxnKind::BusRd, BlockState::M);
        assert_eq!(out.next, BlockState::Sm);
        assert!(out.flush);

        let out = dragon_snoop(BusTxnKind::BusUpd, BlockState::Sm);
        assert_eq!(out.next, BlockState::Sc);
        assert!(!out.flush);
    }

    #[test]
    fn stores_to_shared_states_need_the_bus() {
        assert!(store_needs_bus(BlockState::S));
        assert!(store_needs_bus(BlockState::Sc));
        assert!(store_needs_bus(BlockState::Sm));
        assert!(!store_needs_bus(BlockState::E));
        assert!(!store_needs_bus(BlockState::M));
    }
}
