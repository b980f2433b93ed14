//! Shape rewrites for floating-point nodes.
//!
//! Floats get far fewer rewrites than integers because almost every
//! algebraic identity breaks on a NaN payload, a signed zero or an
//! infinity. The rules here are the bit-exact survivors: folding is done on
//! raw bit patterns (constants store their bits, so a folded NaN keeps its
//! payload and a folded zero keeps its sign), `|-x|` is `|x|` because both
//! sides clear the sign bit and touch nothing else, and division by a
//! power of two is multiplication by its exactly-representable reciprocal.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op},
    lattice::{TyFloat, Type},
};

pub(super) fn ideal(
    g: &mut Graph,
    config: &OptConfig,
    n: NodeIdx,
) -> Result<Option<NodeIdx>, CompileError> {
    match g.op(n) {
        Op::Abs => abs(g, n),
        Op::FDiv => fdiv(g, config, n),
        _ => Ok(None),
    }
}

fn abs(g: &mut Graph, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let inner = g.ins(n)[0];
    // |-x| is |x|: both reduce to clearing the sign bit, NaNs included.
    if g.op(inner) == Op::FNeg {
        let x = g.ins(inner)[0];
        return Ok(Some(g.push(Op::Abs, &[x], g.ty(n))?));
    }
    Ok(None)
}

fn fdiv(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    if !config.strength_reduce {
        return Ok(None);
    }
    let (x, r) = (g.ins(n)[0], g.ins(n)[1]);
    let Some(t) = g.ty(r).float().copied() else {
        return Ok(None);
    };
    // x / 2^k is x * 2^-k, exact whenever the reciprocal is a normal
    // number: both sides change only the exponent.
    if t.bitw == 32 {
        if let Some(c) = t.as_f32() {
            if let Some(recip) = exact_recip_f32(c) {
                let rc = g.push(Op::Con, &[], Type::Float(TyFloat::con32(recip)))?;
                return Ok(Some(g.push(Op::FMul, &[x, rc], g.ty(n))?));
            }
        }
    } else if let Some(c) = t.as_f64() {
        if let Some(recip) = exact_recip_f64(c) {
            let rc = g.push(Op::Con, &[], Type::Float(TyFloat::con64(recip)))?;
            return Ok(Some(g.push(Op::FMul, &[x, rc], g.ty(n))?));
        }
    }
    Ok(None)
}

fn exact_recip_f32(c: f32) -> Option<f32> {
    if !c.is_finite() || c == 0.0 {
        return None;
    }
    let r = 1.0 / c;
    // Exact iff both the value and its reciprocal are powers of two with
    // normal exponents: then r * c == 1 and the product with any x only
    // adjusts x's exponent.
    if c.abs().log2().fract() == 0.0 && r.is_normal() && c.is_normal() {
        Some(r)
    } else {
        None
    }
}

fn exact_recip_f64(c: f64) -> Option<f64> {
    if !c.is_finite() || c == 0.0 {
        return None;
    }
    let r = 1.0 / c;
    if c.abs().log2().fract() == 0.0 && r.is_normal() && c.is_normal() {
        Some(r)
    } else {
        None
    }
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
    fn abs_of_neg() {
        let src = "
            %0: f64 = param 0
            %1: f64 = fneg %0
            %2: f64 = abs %1
            blackbox %2
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::FNeg), 0);
        assert_eq!(g.count_op(OpKind::Abs), 1);
        let plain = Graph::from_str(src);
        for v in [0.0, -0.0, 1.5, -1.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::f64(v)]),
                eval(&g, result_node(&g), &[Val::f64(v)]),
            );
        }
    }

    #[test]
    fn fdiv_by_pow2_becomes_fmul() {
        let src = "
            %0: f64 = param 0
            %1: f64 = 8
            %2: f64 = fdiv %0, %1
            blackbox %2
        ";
        let g = opt(src);
        assert_eq!(g.count_op(OpKind::FDiv), 0);
        assert_eq!(g.count_op(OpKind::FMul), 1);
        let plain = Graph::from_str(src);
        for v in [
            0.0,
            -0.0,
            1.0,
            -3.75,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::MIN_POSITIVE,
        ] {
            assert_eq!(
                eval(&plain, result_node(&plain), &[Val::f64(v)]),
                eval(&g, result_node(&g), &[Val::f64(v)]),
            );
        }
    }

    #[test]
    fn fdiv_by_non_pow2_stays() {
        let g = opt(
            "
            %0: f64 = param 0
            %1: f64 = 10
            %2: f64 = fdiv %0, %1
            blackbox %2
        ",
        );
        assert_eq!(g.count_op(OpKind::FDiv), 1);
        assert_eq!(g.count_op(OpKind::FMul), 0);
    }

    #[test]
    fn float_constants_fold_by_bit_pattern() {
        // NaN % 1.0 folds to a NaN constant.
        let g = opt(
            "
            %0: f64 = nan
            %1: f64 = 1
            %2: f64 = frem %0, %1
            blackbox %2
        ",
        );
        assert_eq!(g.count_op(OpKind::FRem), 0);
        let r = result_node(&g);
        assert!(g.ty(r).float().unwrap().as_f64().unwrap().is_nan());

        // 0.0 * -1.0 folds to -0.0, sign preserved.
        let g = opt(
            "
            %0: f64 = 0
            %1: f64 = -1
            %2: f64 = fmul %0, %1
            blackbox %2
        ",
        );
        let r = result_node(&g);
        assert_eq!(
            g.ty(r).float().unwrap().as_f64().unwrap().to_bits(),
            (-0.0f64).to_bits()
        );
    }

    #[test]
    fn no_fadd_zero_identity() {
        // x + 0.0 must survive: it is not an identity for -0.0.
        let g = opt(
            "
            %0: f64 = param 0
            %1: f64 = 0
            %2: f64 = fadd %0, %1
            blackbox %2
        ",
        );
        assert_eq!(g.count_op(OpKind::FAdd), 1);
    }
}
