//! Escape analysis and scalar replacement.
//!
//! An allocation escapes when its reference can be observed outside the
//! compiled region: it is returned, passed to an opaque call, or stored
//! into memory (any store whose *value* is the reference publishes it).
//! Uses as a load/store base or as a barrier's object do not publish.
//!
//! A non-escaping allocation is scalar-replaced: every load of one of its
//! fields is rewired to the value last stored there (walking the memory
//! chain straight through barriers and calls, which cannot touch an object
//! nobody else can see), after which the stores, the allocation and its
//! publication barrier all die.
//!
//! Barriers are elided by reason, not wholesale: the store-store barrier
//! publishing a new object's fields goes away *because no publication
//! occurs*. A release barrier for a volatile field is observable ordering
//! regardless of escape, so an allocation with volatile field stores keeps
//! its release barriers and is not scalar-replaced; only its publication
//! barrier is removed.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{BarKind, Graph, NodeIdx, Op},
    opt::forwarded_value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EscapeState {
    /// The reference never leaves the compiled region.
    No,
    /// The reference is (or may be) observable elsewhere.
    Global,
}

fn escape_state(g: &Graph, alloc: NodeIdx) -> EscapeState {
    for &u in g.outs(alloc) {
        match g.op(u) {
            // Returning or handing the reference to an uninlined call
            // publishes it.
            Op::Return | Op::Call => return EscapeState::Global,
            Op::Store { .. } => {
                // Storing the reference itself publishes it; storing *into*
                // the object does not.
                if g.ins(u)[2] == alloc {
                    return EscapeState::Global;
                }
            }
            Op::Load { .. } => (),
            Op::MemBar(_) => (),
            // Anything else (phis, conditional moves, vector ops) merges
            // the reference beyond what this analysis tracks.
            _ => return EscapeState::Global,
        }
    }
    EscapeState::No
}

/// Run escape analysis over every allocation, scalar-replacing the
/// non-escaping ones. The engine runs afterwards to clean up.
pub fn run(g: &mut Graph, _config: &OptConfig) -> Result<(), CompileError> {
    let allocs = g
        .iter_live()
        .filter(|&n| g.op(n) == Op::Alloc)
        .collect::<Vec<_>>();
    for alloc in allocs {
        if g.op(alloc) != Op::Alloc {
            // A previous replacement may have killed it already.
            continue;
        }
        if escape_state(g, alloc) == EscapeState::Global {
            continue;
        }
        let volatile_fields = g.outs(alloc).iter().any(|&u| {
            matches!(g.op(u), Op::Store { volatile: true, .. }) && g.ins(u)[1] == alloc
        });
        if volatile_fields {
            // Release ordering is observable regardless of escape: keep the
            // object and its release barriers, drop only the publication
            // barrier.
            elide_barriers(g, alloc, &[BarKind::StoreStore]);
        } else {
            scalar_replace(g, alloc);
        }
    }
    Ok(())
}

fn elide_barriers(g: &mut Graph, alloc: NodeIdx, kinds: &[BarKind]) {
    let bars = g
        .outs(alloc)
        .iter()
        .copied()
        .filter(|&u| matches!(g.op(u), Op::MemBar(k) if kinds.contains(&k)) && g.ins(u)[1] == alloc)
        .collect::<Vec<_>>();
    for b in bars {
        let mem = g.ins(b)[0];
        g.subsume(b, mem);
    }
}

/// Replace a non-escaping allocation by its field values. Bails without
/// changing anything if some load cannot be traced to a unique stored
/// value (an uninitialised or merged field).
fn scalar_replace(g: &mut Graph, alloc: NodeIdx) {
    let loads = g
        .outs(alloc)
        .iter()
        .copied()
        .filter(|&u| matches!(g.op(u), Op::Load { .. }) && g.ins(u)[1] == alloc)
        .collect::<Vec<_>>();
    let mut resolved = Vec::with_capacity(loads.len());
    for ld in loads {
        let Op::Load { off } = g.op(ld) else {
            unreachable!()
        };
        // The object is invisible to barriers and calls: walk straight
        // through them.
        match forwarded_value(g, g.ins(ld)[0], alloc, off, true) {
            Some(v) => resolved.push((ld, v)),
            None => return,
        }
    }
    for (ld, v) in resolved {
        g.subsume(ld, v);
    }
    elide_barriers(g, alloc, &[BarKind::StoreStore, BarKind::Release]);
    let stores = g
        .outs(alloc)
        .iter()
        .copied()
        .filter(|&u| matches!(g.op(u), Op::Store { .. }) && g.ins(u)[1] == alloc)
        .collect::<Vec<_>>();
    for st in stores {
        let mem = g.ins(st)[0];
        g.subsume(st, mem);
    }
    if g.outs(alloc).is_empty() {
        g.kill(alloc);
    }
}
