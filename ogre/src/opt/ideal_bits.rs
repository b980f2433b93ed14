//! Shape rewrites for bitwise logic, shifts and rotates.
//!
//! Shift counts obey the machine rule: only the low `log2(width)` bits of
//! the count are used. Constant counts are normalised into that range in
//! place, so every later rule can assume `0 <= count < width`.
//!
//! The De Morgan rules canonicalise complements as `xor -1` and hoist them
//! outward, so a whole tree of complemented operands ends up paying for a
//! single xor no matter how deep the nesting.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op},
    lattice::{mask_shift, reduce, zext, Type},
};

pub(super) fn ideal(
    g: &mut Graph,
    config: &OptConfig,
    n: NodeIdx,
) -> Result<Option<NodeIdx>, CompileError> {
    match g.op(n) {
        Op::And => and(g, config, n),
        Op::Or => or(g, config, n),
        Op::Xor => xor(g, config, n),
        Op::Shl => shl(g, config, n),
        Op::AShr => ashr(g, config, n),
        Op::LShr => lshr(g, config, n),
        Op::RotL => rotl(g, config, n),
        Op::RotR => rotr(g, config, n),
        _ => Ok(None),
    }
}

/// Is `n` a complement, i.e. `xor x, -1`? Returns the complemented operand.
fn as_not(g: &Graph, n: NodeIdx) -> Option<NodeIdx> {
    if g.op(n) == Op::Xor && g.as_int_con(g.ins(n)[1]) == Some(-1) {
        Some(g.ins(n)[0])
    } else {
        None
    }
}

fn and(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    // ~a & ~b is ~(a | b): one or, one xor, no and.
    if config.demorgan {
        if let (Some(a), Some(b)) = (as_not(g, l), as_not(g, r)) {
            let or = g.push(Op::Or, &[a, b], Type::int_bot(w))?;
            let m1 = g.con_int(w, -1)?;
            return Ok(Some(g.push(Op::Xor, &[or, m1], Type::int_bot(w))?));
        }
    }
    if let Some(c2) = g.as_int_con(r) {
        // (x & c1) & c2 is x & (c1 & c2).
        if g.op(l) == Op::And {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
                let x = g.ins(l)[0];
                let c = g.con_int(w, c1 & c2)?;
                return Ok(Some(g.push(Op::And, &[x, c], Type::int_bot(w))?));
            }
        }
        // (0 - x) & 1 is x & 1: negation preserves the low bit.
        if c2 == 1 && g.op(l) == Op::Sub && g.as_int_con(g.ins(l)[0]) == Some(0) {
            let x = g.ins(l)[1];
            return Ok(Some(g.push(Op::And, &[x, r], Type::int_bot(w))?));
        }
    }
    Ok(None)
}

fn or(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    // ~a | ~b is ~(a & b).
    if config.demorgan {
        if let (Some(a), Some(b)) = (as_not(g, l), as_not(g, r)) {
            let and = g.push(Op::And, &[a, b], Type::int_bot(w))?;
            let m1 = g.con_int(w, -1)?;
            return Ok(Some(g.push(Op::Xor, &[and, m1], Type::int_bot(w))?));
        }
    }
    // (x | c1) | c2 is x | (c1 | c2).
    if let Some(c2) = g.as_int_con(r) {
        if g.op(l) == Op::Or {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
                let x = g.ins(l)[0];
                let c = g.con_int(w, c1 | c2)?;
                return Ok(Some(g.push(Op::Or, &[x, c], Type::int_bot(w))?));
            }
        }
    }
    Ok(None)
}

fn xor(g: &mut Graph, _config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    if l == r {
        return Ok(Some(g.con_int(w, 0)?));
    }
    // (x ^ c1) ^ c2 is x ^ (c1 ^ c2); nested complements cancel through
    // here, which is what keeps chained De Morgan rewrites down to one xor.
    if let Some(c2) = g.as_int_con(r) {
        if g.op(l) == Op::Xor {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
                let x = g.ins(l)[0];
                let c = c1 ^ c2;
                if c == 0 {
                    return Ok(Some(x));
                }
                let c = g.con_int(w, c)?;
                return Ok(Some(g.push(Op::Xor, &[x, c], Type::int_bot(w))?));
            }
        }
    }
    Ok(None)
}

/// Normalise a constant shift count to `count & (width-1)`, in place.
/// Returns true if the node changed.
fn normalise_count(g: &mut Graph, n: NodeIdx, w: u32) -> Result<bool, CompileError> {
    let r = g.ins(n)[1];
    if let Some(c) = g.as_int_con(r) {
        let m = mask_shift(w, c) as i64;
        if c != m {
            let con = g.con_int(w, m)?;
            g.set_in(n, 1, con);
            return Ok(true);
        }
    }
    Ok(false)
}

fn shl(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    if normalise_count(g, n, w)? {
        return Ok(Some(n));
    }
    if !config.shift_combine {
        return Ok(None);
    }
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    let Some(c2) = g.as_int_con(r).map(|c| mask_shift(w, c)) else {
        return Ok(None);
    };
    match g.op(l) {
        // (x << c1) << c2 shifts everything out once the total reaches the
        // width.
        Op::Shl => {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]).map(|c| mask_shift(w, c)) {
                let x = g.ins(l)[0];
                if c1 + c2 >= w {
                    return Ok(Some(g.con_int(w, 0)?));
                }
                let c = g.con_int(w, (c1 + c2) as i64)?;
                return Ok(Some(g.push(Op::Shl, &[x, c], Type::int_bot(w))?));
            }
        }
        // (x >> c1) << c2 becomes one shift plus a mask clearing the low
        // c2 bits; equal counts collapse to the mask alone.
        Op::AShr | Op::LShr => {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]).map(|c| mask_shift(w, c)) {
                let x = g.ins(l)[0];
                let mask = g.con_int(w, reduce(w, -1i64 << c2))?;
                let shifted = if c1 == c2 {
                    x
                } else if c2 > c1 {
                    let c = g.con_int(w, (c2 - c1) as i64)?;
                    g.push(Op::Shl, &[x, c], Type::int_bot(w))?
                } else {
                    let c = g.con_int(w, (c1 - c2) as i64)?;
                    g.push(g.op(l), &[x, c], Type::int_bot(w))?
                };
                return Ok(Some(g.push(Op::And, &[shifted, mask], Type::int_bot(w))?));
            }
        }
        _ => (),
    }
    Ok(None)
}

fn ashr(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    if normalise_count(g, n, w)? {
        return Ok(Some(n));
    }
    if !config.shift_combine {
        return Ok(None);
    }
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    let Some(c2) = g.as_int_con(r).map(|c| mask_shift(w, c)) else {
        return Ok(None);
    };
    // (x >> c1) >> c2 saturates at width-1: the sign has spread by then.
    if g.op(l) == Op::AShr {
        if let Some(c1) = g.as_int_con(g.ins(l)[1]).map(|c| mask_shift(w, c)) {
            let x = g.ins(l)[0];
            let c = g.con_int(w, (c1 + c2).min(w - 1) as i64)?;
            return Ok(Some(g.push(Op::AShr, &[x, c], Type::int_bot(w))?));
        }
    }
    Ok(None)
}

fn lshr(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    if normalise_count(g, n, w)? {
        return Ok(Some(n));
    }
    if !config.shift_combine {
        return Ok(None);
    }
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    let Some(c2) = g.as_int_con(r).map(|c| mask_shift(w, c)) else {
        return Ok(None);
    };
    match g.op(l) {
        // (x >>> c1) >>> c2 zeroes out once the total reaches the width.
        Op::LShr => {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]).map(|c| mask_shift(w, c)) {
                let x = g.ins(l)[0];
                if c1 + c2 >= w {
                    return Ok(Some(g.con_int(w, 0)?));
                }
                let c = g.con_int(w, (c1 + c2) as i64)?;
                return Ok(Some(g.push(Op::LShr, &[x, c], Type::int_bot(w))?));
            }
        }
        // (x << c1) >>> c2 becomes one shift plus a mask keeping the low
        // width-c2 bits; equal counts collapse to the mask alone.
        Op::Shl => {
            if let Some(c1) = g.as_int_con(g.ins(l)[1]).map(|c| mask_shift(w, c)) {
                let x = g.ins(l)[0];
                let keep = zext(w, -1) >> c2;
                let mask = g.con_int(w, reduce(w, keep as i64))?;
                let shifted = if c1 == c2 {
                    x
                } else if c1 > c2 {
                    let c = g.con_int(w, (c1 - c2) as i64)?;
                    g.push(Op::Shl, &[x, c], Type::int_bot(w))?
                } else {
                    let c = g.con_int(w, (c2 - c1) as i64)?;
                    g.push(Op::LShr, &[x, c], Type::int_bot(w))?
                };
                return Ok(Some(g.push(Op::And, &[shifted, mask], Type::int_bot(w))?));
            }
        }
        _ => (),
    }
    Ok(None)
}

fn rotl(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    if !config.shift_combine {
        return Ok(None);
    }
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    // Left rotation by a constant canonicalises to a right rotation by the
    // complementary count.
    if let Some(c) = g.as_int_con(r) {
        let c = mask_shift(w, c);
        debug_assert!(c != 0, "a zero rotation is an identity");
        let rc = g.con_int(w, (w - c) as i64)?;
        return Ok(Some(g.push(Op::RotR, &[x, rc], Type::int_bot(w))?));
    }
    Ok(None)
}

fn rotr(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let Some(t) = g.int_ty(n) else {
        return Ok(None);
    };
    let w = t.bitw;
    if normalise_count(g, n, w)? {
        return Ok(Some(n));
    }
    if !config.shift_combine {
        return Ok(None);
    }
    let (l, r) = (g.ins(n)[0], g.ins(n)[1]);
    // rotr(rotr(x, c1), c2) rotates once by the combined count.
    if let (Op::RotR, Some(c2)) = (g.op(l), g.as_int_con(r)) {
        if let Some(c1) = g.as_int_con(g.ins(l)[1]) {
            let x = g.ins(l)[0];
            let c = (mask_shift(w, c1) + mask_shift(w, c2)) & (w - 1);
            if c == 0 {
                return Ok(Some(x));
            }
            let con = g.con_int(w, c as i64)?;
            return Ok(Some(g.push(Op::RotR, &[x, con], Type::int_bot(w))?));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::super::run;
    use crate::{
        config::OptConfig,
        ir::{eval::{eval, Val}, Graph, NodeIdx, Op, OpKind},
    };

    fn opt(src: &str) -> Graph {
        let mut g = Graph::from_str(src);
        run(&mut g, &OptConfig::default()).unwrap();
        g.sweep_dead();
        g
    }

    fn result_node(g: &Graph) -> NodeIdx {
        g.iter_live()
            .find(|&n| matches!(g.op(n), Op::BlackBox))
            .map(|n| g.ins(n)[0])
            .unwrap()
    }

    #[test]
    fn neg_and_one_drops_the_sub() {
        let src = "
            %0: i32 = param 0
            %1: i32 = 0
            %2: i32 = sub %1, %0
            %3: i32 = 1
            %4: i32 = and %2, %3
            blackbox %4
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::Sub), 0);
        assert_eq!(g.count_op(OpKind::And), 1);
        let plain = Graph::from_str(src);
        for x in [0, 1, -1, 2, -2, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::I(x)]),
                eval(&g, result_node(&g), &[Val::I(x)]),
            );
        }
    }

    #[test]
    fn demorgan_and_of_nots() {
        let src = "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = -1
            %3: i32 = xor %0, %2
            %4: i32 = xor %1, %2
            %5: i32 = and %3, %4
            blackbox %5
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::And), 0);
        assert_eq!(g.count_op(OpKind::Or), 1);
        assert_eq!(g.count_op(OpKind::Xor), 1);
        let plain = Graph::from_str(src);
        for (x, y) in [(0, 0), (1, -1), (0x55, 0x33), (i32::MIN as i64, i32::MAX as i64)] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::I(x), Val::I(y)]),
                eval(&g, result_node(&g), &[Val::I(x), Val::I(y)]),
            );
        }
    }

    #[test]
    fn demorgan_or_of_nots() {
        let g = opt(
            "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = -1
            %3: i32 = xor %0, %2
            %4: i32 = xor %1, %2
            %5: i32 = or %3, %4
            blackbox %5
        ",
        );
        assert_eq!(g.count_op(OpKind::Or), 0);
        assert_eq!(g.count_op(OpKind::And), 1);
        assert_eq!(g.count_op(OpKind::Xor), 1);
    }

    #[test]
    fn chained_demorgan_pays_one_xor() {
        // (~a & ~b) & (~c & ~d) ends as ~(a | b | c | d): three ors, one
        // xor, no ands.
        let g = opt(
            "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = param 2
            %3: i32 = param 3
            %4: i32 = -1
            %5: i32 = xor %0, %4
            %6: i32 = xor %1, %4
            %7: i32 = xor %2, %4
            %8: i32 = xor %3, %4
            %9: i32 = and %5, %6
            %10: i32 = and %7, %8
            %11: i32 = and %9, %10
            blackbox %11
        ",
        );
        assert_eq!(g.count_op(OpKind::And), 0);
        assert_eq!(g.count_op(OpKind::Or), 3);
        assert_eq!(g.count_op(OpKind::Xor), 1);
    }

    #[test]
    fn demorgan_gate_off() {
        let mut g = Graph::from_str(
            "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = -1
            %3: i32 = xor %0, %2
            %4: i32 = xor %1, %2
            %5: i32 = and %3, %4
            blackbox %5
        ",
        );
        let config = OptConfig {
            demorgan: false,
            ..OptConfig::default()
        };
        run(&mut g, &config).unwrap();
        g.sweep_dead();
        assert_eq!(g.count_op(OpKind::And), 1);
        assert_eq!(g.count_op(OpKind::Or), 0);
    }

    #[test]
    fn shift_count_is_masked_in_place() {
        // x << 33 at 32 bits is x << 1.
        Graph::assert_opt_transform_eq(
            "
            %0: i32 = param 0
            %1: i32 = 33
            %2: i32 = shl %0, %1
            blackbox %2
        ",
            |mut g| {
                run(&mut g, &OptConfig::default()).unwrap();
                g.sweep_dead();
                g
            },
            "
            %{{0}}: i32 = param 0
            %{{1}}: i32 = 1
            %{{2}}: i32 = shl %{{0}}, %{{1}}
            blackbox %{{2}}
        ",
        );
    }

    #[test]
    fn double_shl_zeroes_at_width() {
        let g = opt(
            "
            %0: i32 = param 0
            %1: i32 = 20
            %2: i32 = shl %0, %1
            %3: i32 = 12
            %4: i32 = shl %2, %3
            blackbox %4
        ",
        );
        assert_eq!(g.count_op(OpKind::Shl), 0);
        // Everything folds to the constant zero.
        assert_eq!(g.count_op(OpKind::Con), 1);
    }

    #[test]
    fn shr_then_shl_same_count_is_one_mask() {
        let src = "
            %0: i32 = param 0
            %1: i32 = 4
            %2: i32 = ashr %0, %1
            %3: i32 = shl %2, %1
            blackbox %3
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::Shl), 0);
        assert_eq!(g.count_op(OpKind::AShr), 0);
        assert_eq!(g.count_op(OpKind::And), 1);
        let plain = Graph::from_str(src);
        for x in [0, -1, 15, -16, 17, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::I(x)]),
                eval(&g, result_node(&g), &[Val::I(x)]),
            );
        }
    }

    #[test]
    fn shl_then_lshr_same_count_is_one_mask() {
        let src = "
            %0: i32 = param 0
            %1: i32 = 8
            %2: i32 = shl %0, %1
            %3: i32 = lshr %2, %1
            blackbox %3
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::Shl), 0);
        assert_eq!(g.count_op(OpKind::LShr), 0);
        assert_eq!(g.count_op(OpKind::And), 1);
        let plain = Graph::from_str(src);
        for x in [0, -1, 0xffffff, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::I(x)]),
                eval(&g, result_node(&g), &[Val::I(x)]),
            );
        }
    }

    #[test]
    fn rotl_canonicalises_to_rotr() {
        // rotl(x, 2022) is rotr(x, 32 - (2022 & 31)) = rotr(x, 26).
        Graph::assert_opt_transform_eq(
            "
            %0: i32 = param 0
            %1: i32 = 2022
            %2: i32 = rotl %0, %1
            blackbox %2
        ",
            |mut g| {
                run(&mut g, &OptConfig::default()).unwrap();
                g.sweep_dead();
                g
            },
            "
            %{{0}}: i32 = param 0
            %{{1}}: i32 = 26
            %{{2}}: i32 = rotr %{{0}}, %{{1}}
            blackbox %{{2}}
        ",
        );
        let src = "
            %0: i32 = param 0
            %1: i32 = 2022
            %2: i32 = rotl %0, %1
            blackbox %2
        ";
        let plain = Graph::from_str(src);
        let g = opt(src);
        for x in [0, 1, -1, 0x12345678, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::I(x)]),
                eval(&g, result_node(&g), &[Val::I(x)]),
            );
        }
    }

    #[test]
    fn xor_chain_merges_constants() {
        let g = opt(
            "
            %0: i32 = param 0
            %1: i32 = 255
            %2: i32 = xor %0, %1
            %3: i32 = 255
            %4: i32 = xor %2, %3
            blackbox %4
        ",
        );
        // The two complements cancel entirely.
        assert_eq!(g.count_op(OpKind::Xor), 0);
        assert_eq!(g.count_op(OpKind::Param), 1);
    }
}
