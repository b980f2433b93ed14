//! Load/store forwarding along the memory chain.
//!
//! Memory is an explicit chain of `Mem`-typed values. A load walks that
//! chain backwards: a store to the same base and offset supplies its value
//! directly; a store that provably cannot alias is stepped over; anything
//! else (volatile stores, barriers, calls, merges) stops the walk.
//! Two addresses cannot alias when they share a base but differ in offset,
//! or when their bases are distinct known allocations.
//!
//! A store whose predecessor stores to the same slot, with nobody else
//! observing the intermediate state, makes the predecessor dead and links
//! past it.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op},
};

pub(super) fn ideal(
    g: &mut Graph,
    config: &OptConfig,
    n: NodeIdx,
) -> Result<Option<NodeIdx>, CompileError> {
    if !config.forward_memory {
        return Ok(None);
    }
    match g.op(n) {
        Op::Load { off } => {
            let (mem, base) = (g.ins(n)[0], g.ins(n)[1]);
            Ok(forwarded_value(g, mem, base, off, false))
        }
        Op::Store { off, .. } => store(g, n, off),
        _ => Ok(None),
    }
}

/// Walk the memory chain from `mem` looking for the value stored at
/// `(base, off)`. With `through_barriers` the walk steps over barriers and
/// calls as well; that is only sound when the caller knows the object is
/// invisible to them (a non-escaping allocation).
pub(crate) fn forwarded_value(
    g: &Graph,
    mut mem: NodeIdx,
    base: NodeIdx,
    off: i32,
    through_barriers: bool,
) -> Option<NodeIdx> {
    // The chain is acyclic outside of loop phis (where we stop), but cap
    // the walk anyway.
    for _ in 0..64 {
        match g.op(mem) {
            Op::Store {
                off: soff,
                volatile,
            } => {
                let sbase = g.ins(mem)[1];
                if sbase == base && soff == off {
                    if volatile {
                        return None;
                    }
                    return Some(g.ins(mem)[2]);
                }
                if no_alias(g, base, off, sbase, soff) {
                    mem = g.ins(mem)[0];
                    continue;
                }
                return None;
            }
            Op::MemBar(_) | Op::Call if through_barriers => {
                mem = g.ins(mem)[0];
                continue;
            }
            _ => return None,
        }
    }
    None
}

/// Can the two addresses provably never refer to the same slot?
fn no_alias(g: &Graph, base1: NodeIdx, off1: i32, base2: NodeIdx, off2: i32) -> bool {
    if base1 == base2 {
        return off1 != off2;
    }
    use crate::lattice::Type;
    match (g.ty(base1), g.ty(base2)) {
        (Type::Ptr(a), Type::Ptr(b)) => match (a.alloc, b.alloc) {
            // Distinct allocation sites never overlap.
            (Some(x), Some(y)) => x != y,
            _ => false,
        },
        _ => false,
    }
}

fn store(g: &mut Graph, n: NodeIdx, off: i32) -> Result<Option<NodeIdx>, CompileError> {
    let (mem, base) = (g.ins(n)[0], g.ins(n)[1]);
    // Store-after-store to the same slot: the earlier store is invisible if
    // this store is its only observer.
    if let Op::Store {
        off: poff,
        volatile: pvol,
    } = g.op(mem)
    {
        if !pvol && poff == off && g.ins(mem)[1] == base && g.outs(mem).len() == 1 {
            let prev_mem = g.ins(mem)[0];
            g.set_in(n, 0, prev_mem);
            return Ok(Some(n));
        }
    }
    Ok(None)
}
