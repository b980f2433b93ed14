//! Shape rewrites for integer arithmetic, min/max and conditional moves.
//!
//! Every rule either strictly shrinks the expression or moves it toward a
//! canonical form (constants on the right, constants merged upward, cheaper
//! operators), so no two rules can re-trigger each other forever. Soundness
//! is under two's-complement wraparound: in particular `MIN / -1` is the
//! wrapping negation, which is why division by `-1` becomes `0 - x` rather
//! than anything cleverer.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op},
    lattice::{con_add, min_for, reduce, TyInt, Type},
};

pub(super) fn ideal(
    g: &mut Graph,
    config: &OptConfig,
    n: NodeIdx,
) -> Result<Option<NodeIdx>, CompileError> {
    match g.op(n) {
        Op::Add => add(g, config, n),
        Op::Sub => sub(g, config, n),
        Op::Mul => mul(g, config, n),
        Op::Div => div(g, config, n),
        Op::Rem => rem(g, config, n),
        Op::UDiv => udiv(g, config, n),
        Op::URem => urem(g, config, n),
        Op::Min => minmax(g, config, n, false),
        Op::Max => minmax(g, config, n, true),
        Op::CMove => cmove(g, config, n),
        _ => Ok(None),
    }
}

fn add(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    if !config.reassociate {
        return Ok(None);
    }
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    // (x + c1) + c2 merges the constants upward.
    if let (Op::Add, Some(c2)) = (g.op(l), g.as_int_con(r)) {
        if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
            let x = g.ins(l)[0];
            let c = g.con_int(t.bitw, con_add(t.bitw, c1, c2))?;
            return Ok(Some(g.push(Op::Add, &[x, c], Type::int_bot(t.bitw))?));
        }
    }
    Ok(None)
}

fn sub(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    if l == r {
        return Ok(Some(g.con_int(w, 0)?));
    }
    // x - c becomes x + (-c), putting subtraction-by-constant on the same
    // canonical footing as addition.
    if let Some(c) = g.as_int_con(r) {
        if c != 0 && g.op(l) != Op::Con {
            let nc = g.con_int(w, c.wrapping_neg())?;
            return Ok(Some(g.push(Op::Add, &[l, nc], Type::int_bot(w))?));
        }
    }
    if !config.reassociate {
        return Ok(None);
    }
    // Shared-term cancellation, in every operand position.
    if g.op(l) == Op::Add {
        let (p, q) = (g.ins(l)[0], g.ins(l)[1]);
        // (r + q) - r and (p + r) - r.
        if p == r {
            return Ok(Some(q));
        }
        if q == r {
            return Ok(Some(p));
        }
        if g.op(r) == Op::Add {
            let (u, v) = (g.ins(r)[0], g.ins(r)[1]);
            // (a + b) - (a + c) and friends.
            let cancelled = if p == u {
                Some((q, v))
            } else if p == v {
                Some((q, u))
            } else if q == u {
                Some((p, v))
            } else if q == v {
                Some((p, u))
            } else {
                None
            };
            if let Some((x, y)) = cancelled {
                return Ok(Some(g.push(Op::Sub, &[x, y], Type::int_bot(w))?));
            }
        }
    }
    if g.op(r) == Op::Add {
        let (u, v) = (g.ins(r)[0], g.ins(r)[1]);
        // l - (l + v) is -v; l - (u + l) is -u.
        let neg = if u == l {
            Some(v)
        } else if v == l {
            Some(u)
        } else {
            None
        };
        if let Some(x) = neg {
            let zero = g.con_int(w, 0)?;
            return Ok(Some(g.push(Op::Sub, &[zero, x], Type::int_bot(w))?));
        }
    }
    // (l - q) - l is -q; l - (l - v) is v.
    if g.op(l) == Op::Sub && g.ins(l)[0] == r {
        let q = g.ins(l)[1];
        let zero = g.con_int(w, 0)?;
        return Ok(Some(g.push(Op::Sub, &[zero, q], Type::int_bot(w))?));
    }
    if g.op(r) == Op::Sub && g.ins(r)[0] == l {
        return Ok(Some(g.ins(r)[1]));
    }
    // a*b - a*c distributes to a*(b - c), whichever slot the shared factor
    // occupies.
    if g.op(l) == Op::Mul && g.op(r) == Op::Mul {
        let (p, q) = (g.ins(l)[0], g.ins(l)[1]);
        let (u, v) = (g.ins(r)[0], g.ins(r)[1]);
        let split = if p == u {
            Some((p, q, v))
        } else if p == v {
            Some((p, q, u))
        } else if q == u {
            Some((q, p, v))
        } else if q == v {
            Some((q, p, u))
        } else {
            None
        };
        if let Some((f, x, y)) = split {
            let d = g.push(Op::Sub, &[x, y], Type::int_bot(w))?;
            return Ok(Some(g.push(Op::Mul, &[f, d], Type::int_bot(w))?));
        }
    }
    Ok(None)
}

fn mul(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    if !config.strength_reduce {
        return Ok(None);
    }
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    let Some(c) = g.as_int_con(r) else {
        return Ok(None);
    };
    if c == -1 {
        let zero = g.con_int(w, 0)?;
        return Ok(Some(g.push(Op::Sub, &[zero, x], Type::int_bot(w))?));
    }
    if c <= 1 {
        return Ok(None);
    }
    let u = c as u64;
    if u.is_power_of_two() {
        let k = g.con_int(w, u.trailing_zeros() as i64)?;
        return Ok(Some(g.push(Op::Shl, &[x, k], Type::int_bot(w))?));
    }
    // 2^k + 1 and 2^k - 1 decompose into a shift and one add/sub.
    if (u - 1).is_power_of_two() {
        let k = g.con_int(w, (u - 1).trailing_zeros() as i64)?;
        let shl = g.push(Op::Shl, &[x, k], Type::int_bot(w))?;
        return Ok(Some(g.push(Op::Add, &[shl, x], Type::int_bot(w))?));
    }
    if (u + 1).is_power_of_two() {
        let k = g.con_int(w, (u + 1).trailing_zeros() as i64)?;
        let shl = g.push(Op::Shl, &[x, k], Type::int_bot(w))?;
        return Ok(Some(g.push(Op::Sub, &[shl, x], Type::int_bot(w))?));
    }
    Ok(None)
}

/// `(x + ((x >> w-1) >>> (w-k))) >> k`: signed division by `2^k` with the
/// round-toward-zero bias for negative dividends.
fn sdiv_pow2(g: &mut Graph, x: NodeIdx, w: u32, k: u32) -> Result<NodeIdx, CompileError> {
    debug_assert!(k >= 1 && k <= w - 2);
    let nonneg = g.int_ty(x).map(|t| t.nonneg()).unwrap_or(false);
    let dividend = if nonneg {
        x
    } else {
        let cw = g.con_int(w, (w - 1) as i64)?;
        let sign = g.push(Op::AShr, &[x, cw], Type::int_bot(w))?;
        let ck = g.con_int(w, (w - k) as i64)?;
        let bias = g.push(Op::LShr, &[sign, ck], Type::int_bot(w))?;
        g.push(Op::Add, &[x, bias], Type::int_bot(w))?
    };
    let ck = g.con_int(w, k as i64)?;
    g.push(Op::AShr, &[dividend, ck], Type::int_bot(w))
}

fn div(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    // x / x is 1 whenever it executes at all: a zero x traps at the guard
    // before the division is reached.
    if x == r {
        return Ok(Some(g.con_int(w, 1)?));
    }
    if !config.strength_reduce {
        return Ok(None);
    }
    let Some(c) = g.as_int_con(r) else {
        return Ok(None);
    };
    if c == -1 {
        // 0 - x wraps exactly like division by -1 does, MIN included.
        let zero = g.con_int(w, 0)?;
        return Ok(Some(g.push(Op::Sub, &[zero, x], Type::int_bot(w))?));
    }
    if c >= 2 && (c as u64).is_power_of_two() {
        let k = (c as u64).trailing_zeros();
        return Ok(Some(sdiv_pow2(g, x, w, k)?));
    }
    if c <= -2 && c != min_for(w) && (c.unsigned_abs()).is_power_of_two() {
        let k = c.unsigned_abs().trailing_zeros();
        let q = sdiv_pow2(g, x, w, k)?;
        let zero = g.con_int(w, 0)?;
        return Ok(Some(g.push(Op::Sub, &[zero, q], Type::int_bot(w))?));
    }
    Ok(None)
}

fn rem(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    if x == r {
        return Ok(Some(g.con_int(w, 0)?));
    }
    if !config.strength_reduce {
        return Ok(None);
    }
    let Some(c) = g.as_int_con(r) else {
        return Ok(None);
    };
    if c == 0 || c == min_for(w) {
        return Ok(None);
    }
    // The remainder's magnitude only depends on |divisor|.
    let d = c.unsigned_abs();
    if d == 1 {
        return Ok(Some(g.con_int(w, 0)?));
    }
    if !d.is_power_of_two() {
        return Ok(None);
    }
    let k = d.trailing_zeros();
    if g.int_ty(x).map(|t| t.nonneg()).unwrap_or(false) {
        let m = g.con_int(w, (d - 1) as i64)?;
        return Ok(Some(g.push(Op::And, &[x, m], Type::int_bot(w))?));
    }
    // x - ((x + bias) & -2^k), with the same sign bias as signed division:
    // truncating remainder for any dividend sign, one mask, no division.
    let cw = g.con_int(w, (w - 1) as i64)?;
    let sign = g.push(Op::AShr, &[x, cw], Type::int_bot(w))?;
    let ck = g.con_int(w, (w - k) as i64)?;
    let bias = g.push(Op::LShr, &[sign, ck], Type::int_bot(w))?;
    let sum = g.push(Op::Add, &[x, bias], Type::int_bot(w))?;
    let m = g.con_int(w, reduce(w, -1i64 << k))?;
    let masked = g.push(Op::And, &[sum, m], Type::int_bot(w))?;
    Ok(Some(g.push(Op::Sub, &[x, masked], Type::int_bot(w))?))
}

fn udiv(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    if x == r {
        return Ok(Some(g.con_int(w, 1)?));
    }
    if !config.strength_reduce {
        return Ok(None);
    }
    let Some(c) = g.as_int_con(r) else {
        return Ok(None);
    };
    let u = crate::lattice::zext(w, c);
    if u >= 2 && u.is_power_of_two() {
        let k = g.con_int(w, u.trailing_zeros() as i64)?;
        return Ok(Some(g.push(Op::LShr, &[x, k], Type::int_bot(w))?));
    }
    Ok(None)
}

fn urem(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    if x == r {
        return Ok(Some(g.con_int(w, 0)?));
    }
    if !config.strength_reduce {
        return Ok(None);
    }
    let Some(c) = g.as_int_con(r) else {
        return Ok(None);
    };
    let u = crate::lattice::zext(w, c);
    if u >= 1 && u.is_power_of_two() {
        // No sign correction: the unsigned remainder is a plain mask.
        let m = g.con_int(w, reduce(w, (u - 1) as i64))?;
        return Ok(Some(g.push(Op::And, &[x, m], Type::int_bot(w))?));
    }
    Ok(None)
}

fn add_cannot_overflow(t: &TyInt, c: i64) -> bool {
    let lo = t.lo as i128 + c as i128;
    let hi = t.hi as i128 + c as i128;
    lo >= min_for(t.bitw) as i128 && hi <= crate::lattice::max_for(t.bitw) as i128
}

fn minmax(
    g: &mut Graph,
    config: &OptConfig,
    n: NodeIdx,
    is_max: bool,
) -> Result<Option<NodeIdx>, CompileError> {
    if !config.minmax {
        return Ok(None);
    }
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let this_op = if is_max { Op::Max } else { Op::Min };
    let pick = |a: i64, b: i64| if is_max { a.max(b) } else { a.min(b) };
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    // max(max(x, c1), c2) merges the constants.
    if let (true, Some(c2)) = (g.op(l) == this_op, g.as_int_con(r)) {
        if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
            let x = g.ins(l)[0];
            let c = g.con_int(w, pick(c1, c2))?;
            return Ok(Some(g.push(this_op, &[x, c], Type::int_bot(w))?));
        }
    }
    // The nested patterns below expect the lone addition on the left; the
    // mirrored shape is normalised by swapping first.
    let (l, r) = if g.op(l) == this_op && add_with_con(g, r).is_some() {
        (r, l)
    } else {
        (l, r)
    };
    // max(x + c0, x + c1) keeps one addition, provided neither can overflow.
    if let Some((x, c0)) = add_with_con(g, l) {
        if let Some((y, c1)) = add_with_con(g, r) {
            if x == y {
                if let Some(xt) = g.int_ty(x) {
                    if add_cannot_overflow(&xt, c0) && add_cannot_overflow(&xt, c1) {
                        let c = g.con_int(w, pick(c0, c1))?;
                        return Ok(Some(g.push(Op::Add, &[x, c], Type::int_bot(w))?));
                    }
                }
            }
        }
        // max(x + c0, max(x + c1, z)) hoists the merged addition over z.
        if g.op(r) == this_op {
            for slot in 0..2 {
                let inner = g.ins(r)[slot];
                let z = g.ins(r)[1 - slot];
                if let Some((y, c1)) = add_with_con(g, inner) {
                    if x == y {
                        if let Some(xt) = g.int_ty(x) {
                            if add_cannot_overflow(&xt, c0) && add_cannot_overflow(&xt, c1) {
                                let c = g.con_int(w, pick(c0, c1))?;
                                let merged = g.push(Op::Add, &[x, c], Type::int_bot(w))?;
                                return Ok(Some(g.push(
                                    this_op,
                                    &[merged, z],
                                    Type::int_bot(w),
                                )?));
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(None)
}

fn add_with_con(g: &Graph, n: NodeIdx) -> Option<(NodeIdx, i64)> {
    if g.op(n) == Op::Add {
        g.as_int_con(g.ins(n)[1]).map(|c| (g.ins(n)[0], c))
    } else {
        None
    }
}

fn cmove(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    if !config.cmove {
        return Ok(None);
    }
    let ins = g.ins(n);
    let (cond, tv, fv) = (ins[0], ins[1], ins[2]);
    // A decided condition collapses the move.
    match g.as_int_con(cond) {
        Some(0) => return Ok(Some(fv)),
        Some(_) => return Ok(Some(tv)),
        None => (),
    }
    // select(c, 1, 0) over a boolean condition is the condition itself.
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let cond_bool = g
        .int_ty(cond)
        .map(|c| c.bitw == t.bitw && c.lo >= 0 && c.hi <= 1)
        .unwrap_or(false);
    if cond_bool {
        if g.as_int_con(tv) == Some(1) && g.as_int_con(fv) == Some(0) {
            return Ok(Some(cond));
        }
        if g.as_int_con(tv) == Some(0) && g.as_int_con(fv) == Some(1) {
            let one = g.con_int(t.bitw, 1)?;
            return Ok(Some(g.push(Op::Xor, &[cond, one], Type::int_bot(t.bitw))?));
        }
    }
    Ok(None)
}
