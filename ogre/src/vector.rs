//! Superword vectorization of counted-loop bodies.
//!
//! Packs are seeded from adjacent memory references: a run of stores in one
//! iteration's memory chain, to the same base, whose constant offsets step
//! by exactly the element width. The pack then extends through the stored
//! values: isomorphic operand trees (same operation lane for lane) bottom
//! out in runs of adjacent loads. A successful pack becomes one
//! `VecLoad`/`VecBin`/`VecUn` tree feeding a single `VecStore`.
//!
//! Legality:
//!  - no aliasing hazard between the packed loads and the packed stores
//!    (same base with disjoint offset ranges, or provably distinct
//!    allocations);
//!  - the packed loads all read the iteration's incoming memory state, so
//!    no lane can observe another lane's store;
//!  - mixed element widths bound the pack: the lane count is the vector
//!    width over the *widest* element involved, so a tree that widens
//!    i32 to i64 packs half as many lanes as a pure i32 one;
//!  - bit-reinterpreting float conversions always pack; value-converting
//!    ones (which collapse NaNs) pack only in a straight-line body, never
//!    across interior control flow.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op, OpKind},
    lattice::{TyVec, Type},
    loops::{self, CountedLoop},
};

/// The fixed machine vector width, in bits.
const VEC_BITS: u32 = 128;

/// Vectorize every counted loop body where a legal pack exists.
pub fn run(g: &mut Graph, _config: &OptConfig) -> Result<(), CompileError> {
    for lp in loops::find_counted(g) {
        if g.op(lp.head) != Op::Loop {
            continue;
        }
        vectorize(g, &lp)?;
    }
    Ok(())
}

/// One lane-wise operation tree, validated before any node is built.
enum Plan {
    Load {
        mem: NodeIdx,
        base: NodeIdx,
        off: i32,
        bitw: u32,
        float: bool,
    },
    Bin {
        op: Op,
        l: Box<Plan>,
        r: Box<Plan>,
    },
    Un {
        op: Op,
        inner: Box<Plan>,
        bitw: u32,
        float: bool,
    },
}

struct PackCtx {
    /// Does the loop body run straight from head to exit test, with no
    /// interior branches?
    straight: bool,
    store_base: NodeIdx,
    /// Byte range `[lo, hi)` the packed stores will write.
    store_lo: i32,
    store_hi: i32,
    /// The memory state the packed loads must read.
    in_mem: NodeIdx,
}

fn vectorize(g: &mut Graph, lp: &CountedLoop) -> Result<(), CompileError> {
    // The iteration's stores, first to last, off the loop's memory phi.
    let Some(mem_phi) = g.outs(lp.head).iter().copied().find(|&u| {
        g.op(u) == Op::Phi && g.ins(u)[0] == lp.head && g.ty(u) == Type::Mem
    }) else {
        return Ok(());
    };
    let mut chain = Vec::new();
    let mut cur = g.ins(mem_phi)[2];
    while cur != mem_phi {
        match g.op(cur) {
            Op::Store { .. } => {
                chain.push(cur);
                cur = g.ins(cur)[0];
            }
            _ => return Ok(()),
        }
    }
    chain.reverse();
    let straight = body_is_straight_line(g, lp);

    // Seed: a run of adjacent same-width stores to one base.
    let mut i = 0;
    while i < chain.len() {
        let Some((run, first_off, store_bitw)) = adjacent_run(g, &chain[i..]) else {
            i += 1;
            continue;
        };
        if try_pack(g, &run, first_off, store_bitw, straight)? {
            // One pack per loop; the chain is stale now.
            return Ok(());
        }
        i += run.len();
    }
    Ok(())
}

/// The longest prefix of `chain` forming an adjacent run: same base, same
/// element width, offsets stepping by the element size.
fn adjacent_run(g: &Graph, chain: &[NodeIdx]) -> Option<(Vec<NodeIdx>, i32, u32)> {
    let first = *chain.first()?;
    let Op::Store { off: first_off, volatile } = g.op(first) else {
        return None;
    };
    if volatile {
        return None;
    }
    let base = g.ins(first)[1];
    let (bitw, _) = elem(g, g.ins(first)[2])?;
    let step = (bitw / 8) as i32;
    let mut run = vec![first];
    for &s in &chain[1..] {
        let Op::Store { off, volatile } = g.op(s) else {
            break;
        };
        if volatile
            || g.ins(s)[1] != base
            || off != first_off + run.len() as i32 * step
            || elem(g, g.ins(s)[2]).map(|(w, _)| w) != Some(bitw)
        {
            break;
        }
        run.push(s);
    }
    if run.len() < 2 {
        return None;
    }
    Some((run, first_off, bitw))
}

fn elem(g: &Graph, n: NodeIdx) -> Option<(u32, bool)> {
    match g.ty(n) {
        Type::Int(t) if t.bitw >= 8 => Some((t.bitw, false)),
        Type::Float(t) => Some((t.bitw, true)),
        _ => None,
    }
}

/// Try to build a pack from the head of `run`, shrinking the lane count
/// when a wider element type shows up inside the operand tree.
fn try_pack(
    g: &mut Graph,
    run: &[NodeIdx],
    first_off: i32,
    store_bitw: u32,
    straight: bool,
) -> Result<bool, CompileError> {
    let step = (store_bitw / 8) as i32;
    let mut lanes = (VEC_BITS / store_bitw) as usize;
    loop {
        if lanes < 2 || run.len() < lanes {
            return Ok(false);
        }
        let packed = &run[..lanes];
        let in_mem = g.ins(packed[0])[0];
        let ctx = PackCtx {
            straight,
            store_base: g.ins(packed[0])[1],
            store_lo: first_off,
            store_hi: first_off + lanes as i32 * step,
            in_mem,
        };
        let vals = packed.iter().map(|&s| g.ins(s)[2]).collect::<Vec<_>>();
        let mut widths = vec![store_bitw];
        let Some(plan) = plan(g, &vals, &ctx, &mut widths) else {
            return Ok(false);
        };
        let widest = widths.iter().copied().max().unwrap();
        let need = (VEC_BITS / widest) as usize;
        if need < lanes {
            // A wider lane type inside the tree shortens the vector.
            lanes = need;
            continue;
        }
        let lanes8 = u8::try_from(lanes).unwrap();
        let vval = emit(g, plan, lanes8)?;
        let (sbase, soff) = (ctx.store_base, first_off);
        let vstore = g.push(
            Op::VecStore {
                off: soff,
                lanes: lanes8,
            },
            &[in_mem, sbase, vval],
            Type::Mem,
        )?;
        let last = packed[lanes - 1];
        g.subsume(last, vstore);
        return Ok(true);
    }
}

/// Validate that `nodes` are isomorphic lanes and describe the vector
/// operation computing them. Appends every element width seen to `widths`.
fn plan(g: &Graph, nodes: &[NodeIdx], ctx: &PackCtx, widths: &mut Vec<u32>) -> Option<Plan> {
    let op0 = g.op(nodes[0]);
    match op0 {
        Op::Load { off: first_off } => {
            let mem = g.ins(nodes[0])[0];
            let base = g.ins(nodes[0])[1];
            let (bitw, float) = elem(g, nodes[0])?;
            let step = (bitw / 8) as i32;
            for (i, &n) in nodes.iter().enumerate() {
                let Op::Load { off } = g.op(n) else {
                    return None;
                };
                if g.ins(n)[0] != mem
                    || g.ins(n)[1] != base
                    || off != first_off + i as i32 * step
                    || elem(g, n) != Some((bitw, float))
                {
                    return None;
                }
            }
            // Independence: every lane reads the iteration's incoming
            // memory, so no lane sees a packed store.
            if mem != ctx.in_mem {
                return None;
            }
            // Aliasing against the packed stores.
            if base == ctx.store_base {
                let lo = first_off;
                let hi = first_off + nodes.len() as i32 * step;
                if lo < ctx.store_hi && ctx.store_lo < hi {
                    return None;
                }
            } else if !distinct_allocs(g, base, ctx.store_base) {
                return None;
            }
            widths.push(bitw);
            Some(Plan::Load {
                mem,
                base,
                off: first_off,
                bitw,
                float,
            })
        }
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::And
        | Op::Or
        | Op::Xor
        | Op::Min
        | Op::Max
        | Op::FAdd
        | Op::FSub
        | Op::FMul => {
            if nodes.iter().any(|&n| g.op(n) != op0) {
                return None;
            }
            let ls = nodes.iter().map(|&n| g.ins(n)[0]).collect::<Vec<_>>();
            let rs = nodes.iter().map(|&n| g.ins(n)[1]).collect::<Vec<_>>();
            let l = plan(g, &ls, ctx, widths)?;
            let r = plan(g, &rs, ctx, widths)?;
            Some(Plan::Bin {
                op: op0,
                l: Box::new(l),
                r: Box::new(r),
            })
        }
        // Bit-reinterpretations and width conversions are always packable;
        // value-converting float ops collapse NaNs and only pack in a
        // straight-line body.
        Op::F2IBits | Op::I2FBits | Op::D2LBits | Op::L2DBits | Op::I2L | Op::L2I | Op::F2I
        | Op::I2F => {
            if matches!(op0, Op::F2I | Op::I2F) && !ctx.straight {
                return None;
            }
            if nodes.iter().any(|&n| g.op(n) != op0) {
                return None;
            }
            let (bitw, float) = elem(g, nodes[0])?;
            widths.push(bitw);
            let inner = nodes.iter().map(|&n| g.ins(n)[0]).collect::<Vec<_>>();
            let inner = plan(g, &inner, ctx, widths)?;
            Some(Plan::Un {
                op: op0,
                inner: Box::new(inner),
                bitw,
                float,
            })
        }
        _ => None,
    }
}

fn distinct_allocs(g: &Graph, a: NodeIdx, b: NodeIdx) -> bool {
    use crate::lattice::Type as T;
    match (g.ty(a), g.ty(b)) {
        (T::Ptr(x), T::Ptr(y)) => matches!((x.alloc, y.alloc), (Some(p), Some(q)) if p != q),
        _ => false,
    }
}

/// Is there any branch inside the loop body besides the exit test?
fn body_is_straight_line(g: &Graph, lp: &CountedLoop) -> bool {
    !g.iter_live().any(|n| {
        matches!(g.op(n), Op::If | Op::RangeCheck)
            && n != g.ins(lp.body_proj)[0]
            && ctrl_in_body(g, n, lp)
    })
}

fn ctrl_in_body(g: &Graph, n: NodeIdx, lp: &CountedLoop) -> bool {
    let mut c = g.ins(n)[0];
    let mut fuel = 16u32;
    loop {
        if c == lp.head {
            return true;
        }
        if fuel == 0 {
            return false;
        }
        fuel -= 1;
        match g.op(c) {
            Op::Safepoint | Op::IfTrue | Op::IfFalse | Op::If | Op::RangeCheck
            | Op::ZeroTrap | Op::Region => c = g.ins(c)[0],
            _ => return false,
        }
    }
}

fn emit(g: &mut Graph, plan: Plan, lanes: u8) -> Result<NodeIdx, CompileError> {
    match plan {
        Plan::Load {
            mem,
            base,
            off,
            bitw,
            float,
        } => g.push(
            Op::VecLoad { off, lanes },
            &[mem, base],
            Type::Vec(TyVec {
                elem_bitw: bitw,
                lanes,
                float,
            }),
        ),
        Plan::Bin { op, l, r } => {
            let lv = emit(g, *l, lanes)?;
            let rv = emit(g, *r, lanes)?;
            let ty = g.ty(lv);
            g.push(
                Op::VecBin {
                    op: OpKind::from(&op),
                    lanes,
                },
                &[lv, rv],
                ty,
            )
        }
        Plan::Un {
            op,
            inner,
            bitw,
            float,
        } => {
            let iv = emit(g, *inner, lanes)?;
            g.push(
                Op::VecUn {
                    op: OpKind::from(&op),
                    lanes,
                },
                &[iv],
                Type::Vec(TyVec {
                    elem_bitw: bitw,
                    lanes,
                    float,
                }),
            )
        }
    }
}
