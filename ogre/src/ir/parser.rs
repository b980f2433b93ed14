//! A textual graph parser, for use in testing only.
//!
//! The input format mirrors the graph's [std::fmt::Display] output: one node
//! per line, `%<n>: <ty> = <op> <operands>`, with unbound sink lines for
//! `ret` and `blackbox`. Forward references are allowed (loop backedges need
//! them). Lines ending in `:` are labels and are skipped.
//!
//! [Graph::assert_opt_transform_eq] parses a graph, runs a caller-supplied
//! transform over it, and fuzzy-matches the result's text form against a
//! pattern: `{{name}}` wildcards bind consistently (so node numbering need
//! not be guessed), `{{_}}` matches without binding, and a line containing
//! only `...` skips lines.

use super::{BarKind, Graph, NodeIdx, Op, Pred};
use crate::lattice::{TyFloat, TyInt, TyPtr, Type};
use fm::FMBuilder;
use regex::Regex;
use std::{collections::HashMap, sync::OnceLock};

impl Graph {
    /// Parse a graph from text.
    ///
    /// # Panics
    ///
    /// On any syntax error: this is a testing aid, not a hardened parser.
    pub(crate) fn from_str(s: &str) -> Self {
        let mut g = Graph::new();
        let mut map: HashMap<usize, NodeIdx> = HashMap::new();
        // (node, operand source numbers) pairs to wire up in the second
        // pass, once all nodes exist.
        let mut wire: Vec<(NodeIdx, Vec<usize>)> = Vec::new();
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.ends_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("blackbox") {
                let n = g.push_raw(Op::BlackBox, Type::Bot);
                wire.push((n, vec![parse_ref(rest.trim())]));
                continue;
            }
            if let Some(rest) = line.strip_prefix("ret") {
                let n = g.push_raw(Op::Return, Type::Ctrl);
                let refs = rest
                    .split(',')
                    .map(|x| x.trim())
                    .filter(|x| !x.is_empty())
                    .map(parse_ref)
                    .collect::<Vec<_>>();
                wire.push((n, refs));
                continue;
            }
            // "%N: ty = rhs"
            let (lhs, rhs) = line.split_once('=').expect("expected '='");
            let (numtok, tytok) = lhs.split_once(':').expect("expected ':'");
            let src_num = parse_ref(numtok.trim());
            let tytok = tytok.trim();
            let rhs = rhs.trim();
            let (n, refs) = parse_rhs(&mut g, tytok, rhs);
            assert!(
                map.insert(src_num, n).is_none(),
                "duplicate definition of %{src_num}"
            );
            wire.push((n, refs));
        }
        for (n, refs) in wire {
            for r in refs {
                let def = *map
                    .get(&r)
                    .unwrap_or_else(|| panic!("undefined reference %{r}"));
                g.add_in(n, def);
            }
        }
        g.assert_well_formed();
        g
    }

    /// Parse `ir_input`, apply `ir_transform`, and `fm`-match the result's
    /// text form against `transformed_ptn`.
    pub(crate) fn assert_opt_transform_eq<F>(ir_input: &str, ir_transform: F, transformed_ptn: &str)
    where
        F: FnOnce(Graph) -> Graph,
    {
        // We want to share the compilation of regexes amongst threads, *but*
        // there is some locking involved, so we clone the compiled regexes
        // before using them for matching.
        static PTN_RE: OnceLock<Regex> = OnceLock::new();
        static PTN_RE_IGNORE: OnceLock<Regex> = OnceLock::new();
        static LITERAL_RE: OnceLock<Regex> = OnceLock::new();
        let ptn_re = PTN_RE
            .get_or_init(|| Regex::new(r"\{\{.+?\}\}").unwrap())
            .clone();
        let ptn_re_ignore = PTN_RE_IGNORE
            .get_or_init(|| Regex::new(r"\{\{_\}\}").unwrap())
            .clone();
        let literal_re = LITERAL_RE
            .get_or_init(|| Regex::new(r"[a-zA-Z0-9\._]+").unwrap())
            .clone();

        let g = Self::from_str(ir_input);
        let g = ir_transform(g);
        let fmm = FMBuilder::new(transformed_ptn)
            .unwrap()
            .name_matcher_ignore(ptn_re_ignore, literal_re.clone())
            .name_matcher(ptn_re, literal_re)
            .build()
            .unwrap();
        if let Err(e) = fmm.matches(&g.to_string()) {
            panic!("{e}");
        }
    }
}

fn parse_ref(s: &str) -> usize {
    s.strip_prefix('%')
        .unwrap_or_else(|| panic!("expected a %ref, got '{s}'"))
        .parse()
        .unwrap_or_else(|_| panic!("bad %ref '{s}'"))
}

fn parse_ty(tytok: &str) -> Type {
    match tytok {
        "i8" => Type::int_bot(8),
        "i16" => Type::int_bot(16),
        "i32" => Type::int_bot(32),
        "i64" => Type::int_bot(64),
        "f32" => Type::float_bot(32),
        "f64" => Type::float_bot(64),
        "ptr" => Type::Ptr(TyPtr::bot()),
        "ctrl" => Type::Ctrl,
        "mem" => Type::Mem,
        x => panic!("unknown type '{x}'"),
    }
}

fn int_bitw(tytok: &str) -> u32 {
    match tytok {
        "i8" => 8,
        "i16" => 16,
        "i32" => 32,
        "i64" => 64,
        x => panic!("expected an integer type, got '{x}'"),
    }
}

/// Parse the right-hand side of a binding, creating the node. Returns the
/// node and the source numbers of its operands, to be wired later.
fn parse_rhs(g: &mut Graph, tytok: &str, rhs: &str) -> (NodeIdx, Vec<usize>) {
    // A constant?
    let first = rhs.split_whitespace().next().unwrap();
    if first
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '-')
        .unwrap_or(false)
        || first == "nan"
        || first == "inf"
    {
        let ty = match tytok {
            "f32" => Type::Float(TyFloat::con32(parse_float(rhs) as f32)),
            "f64" => Type::Float(TyFloat::con64(parse_float(rhs))),
            _ => Type::int_con(int_bitw(tytok), rhs.parse::<i64>().unwrap()),
        };
        return (g.push_raw(Op::Con, ty), vec![]);
    }

    let (head, rest) = match rhs.split_once(' ') {
        Some((h, r)) => (h, r.trim()),
        None => (rhs, ""),
    };
    if head == "param" {
        let n = g.push_raw(Op::Param(rest.parse::<u32>().unwrap()), parse_ty(tytok));
        return (n, vec![]);
    }
    let mut refs = Vec::new();
    let mut off = None;
    let mut volatile = false;
    let mut lanes = None;
    for part in rest.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        if let Some(v) = part.strip_prefix("off=") {
            off = Some(v.parse::<i32>().unwrap());
        } else if let Some(v) = part.strip_prefix("lanes=") {
            lanes = Some(v.parse::<u8>().unwrap());
        } else if part == "volatile" {
            volatile = true;
        } else {
            refs.push(parse_ref(part));
        }
    }

    let op = match head {
        "add" => Op::Add,
        "sub" => Op::Sub,
        "mul" => Op::Mul,
        "div" => Op::Div,
        "rem" => Op::Rem,
        "udiv" => Op::UDiv,
        "urem" => Op::URem,
        "and" => Op::And,
        "or" => Op::Or,
        "xor" => Op::Xor,
        "shl" => Op::Shl,
        "ashr" => Op::AShr,
        "lshr" => Op::LShr,
        "rotl" => Op::RotL,
        "rotr" => Op::RotR,
        "min" => Op::Min,
        "max" => Op::Max,
        "abs" => Op::Abs,
        "bswap" => Op::ReverseBytes,
        "i2l" => Op::I2L,
        "l2i" => Op::L2I,
        "i2f" => Op::I2F,
        "f2i" => Op::F2I,
        "f2ibits" => Op::F2IBits,
        "i2fbits" => Op::I2FBits,
        "d2lbits" => Op::D2LBits,
        "l2dbits" => Op::L2DBits,
        "fadd" => Op::FAdd,
        "fsub" => Op::FSub,
        "fmul" => Op::FMul,
        "fdiv" => Op::FDiv,
        "frem" => Op::FRem,
        "fneg" => Op::FNeg,
        "eq" => Op::Cmp(Pred::Eq),
        "ne" => Op::Cmp(Pred::Ne),
        "slt" => Op::Cmp(Pred::Slt),
        "sle" => Op::Cmp(Pred::Sle),
        "sgt" => Op::Cmp(Pred::Sgt),
        "sge" => Op::Cmp(Pred::Sge),
        "ult" => Op::Cmp(Pred::Ult),
        "ule" => Op::Cmp(Pred::Ule),
        "ugt" => Op::Cmp(Pred::Ugt),
        "uge" => Op::Cmp(Pred::Uge),
        "feq" => Op::FCmp(Pred::Eq),
        "fne" => Op::FCmp(Pred::Ne),
        "flt" => Op::FCmp(Pred::Slt),
        "fle" => Op::FCmp(Pred::Sle),
        "fgt" => Op::FCmp(Pred::Sgt),
        "fge" => Op::FCmp(Pred::Sge),
        "cmove" => Op::CMove,
        "start" => Op::Start,
        "if" => Op::If,
        "rangecheck" => Op::RangeCheck,
        "iftrue" => Op::IfTrue,
        "iffalse" => Op::IfFalse,
        "region" => Op::Region,
        "loop" => Op::Loop,
        "outerloop" => Op::OuterStripMinedLoop,
        "safepoint" => Op::Safepoint,
        "zerotrap" => Op::ZeroTrap,
        "phi" => Op::Phi,
        "initmem" => Op::InitMem,
        "load" => Op::Load { off: off.unwrap() },
        "store" => Op::Store {
            off: off.unwrap(),
            volatile,
        },
        "alloc" => Op::Alloc,
        "membar.storestore" => Op::MemBar(BarKind::StoreStore),
        "membar.release" => Op::MemBar(BarKind::Release),
        "call" => Op::Call,
        "vecload" => Op::VecLoad {
            off: off.unwrap(),
            lanes: lanes.unwrap(),
        },
        "vecstore" => Op::VecStore {
            off: off.unwrap(),
            lanes: lanes.unwrap(),
        },
        x => panic!("unknown op '{x}'"),
    };
    let ty = parse_ty(tytok);
    let n = g.push_raw(op, ty);
    if matches!(op, Op::Alloc) {
        // An allocation's type is its own identity.
        g.set_ty(n, Type::Ptr(TyPtr::at(n)));
    }
    if matches!(op, Op::Cmp(_) | Op::FCmp(_)) {
        // A comparison produces a boolean, not a full-range i32.
        g.set_ty(n, Type::Int(TyInt::new(32, 0, 1)));
    }
    (n, refs)
}

fn parse_float(s: &str) -> f64 {
    match s {
        "nan" => f64::NAN,
        "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        _ => s.parse::<f64>().unwrap(),
    }
}

#[cfg(test)]
mod test {
    use super::super::OpKind;
    use super::*;

    #[test]
    fn parse_straight_line() {
        let g = Graph::from_str(
            "
          entry:
            %0: i32 = param 0
            %1: i32 = 7
            %2: i32 = add %0, %1
            blackbox %2
        ",
        );
        assert_eq!(g.num_live(), 4);
        assert_eq!(g.count_op(OpKind::Add), 1);
        assert_eq!(g.count_op(OpKind::Con), 1);
        assert_eq!(g.as_int_con(NodeIdx::from_usize(1)), Some(7));
    }

    #[test]
    fn parse_negative_and_float_cons() {
        let g = Graph::from_str(
            "
            %0: i32 = -2147483648
            %1: f64 = nan
            %2: f64 = -0
            %3: f32 = 1.5
            blackbox %0
            blackbox %1
            blackbox %2
            blackbox %3
        ",
        );
        assert_eq!(g.as_int_con(NodeIdx::from_usize(0)), Some(i32::MIN as i64));
        let nan = g.ty(NodeIdx::from_usize(1));
        assert!(nan.float().unwrap().as_f64().unwrap().is_nan());
        let nz = g.ty(NodeIdx::from_usize(2));
        assert_eq!(nz.float().unwrap().as_f64().unwrap().to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn parse_control_with_backedge() {
        let g = Graph::from_str(
            "
            %0: ctrl = start
            %1: i32 = param 0
            %2: ctrl = loop %0, %8
            %3: i32 = phi %2, %1, %5
            %4: i32 = 1
            %5: i32 = add %3, %4
            %6: i32 = slt %5, %1
            %7: ctrl = if %2, %6
            %8: ctrl = iftrue %7
            %9: ctrl = iffalse %7
            ret %9, %3
        ",
        );
        assert_eq!(g.count_op(OpKind::Loop), 1);
        assert_eq!(g.count_op(OpKind::Phi), 1);
    }

    #[test]
    fn display_round_trips() {
        let src = "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = and %0, %1
            blackbox %2
        ";
        let g = Graph::from_str(src);
        let printed = g.to_string();
        let g2 = Graph::from_str(&printed);
        assert_eq!(g2.to_string(), printed);
    }

    #[test]
    fn fm_matching() {
        Graph::assert_opt_transform_eq(
            "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = xor %0, %1
            blackbox %2
        ",
            |g| g,
            "
            %{{0}}: i32 = param 0
            %{{1}}: i32 = param 1
            %{{2}}: i32 = xor %{{0}}, %{{1}}
            blackbox %{{2}}
        ",
        );
    }
}
