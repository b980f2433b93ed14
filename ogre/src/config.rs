//! Optimizer configuration.
//!
//! Every Ideal rule family is wrapped in a boolean gate. A gate only controls
//! whether the family fires at all: it never alters a rule's semantics when
//! enabled. The config is passed explicitly into each phase so that multiple
//! compilations can run concurrently without sharing any mutable state.

use std::error::Error;

/// Per-rule-family gates for the optimizer. All gates default to on.
#[derive(Clone, Debug)]
pub struct OptConfig {
    /// Multiplication/division/modulo to shift/mask strength reduction.
    pub strength_reduce: bool,
    /// De Morgan rewrites of negated and/or trees.
    pub demorgan: bool,
    /// Shift/shift and shift/mask combining, rotate canonicalisation.
    pub shift_combine: bool,
    /// Addition/subtraction reassociation and mul-over-sub distribution.
    pub reassociate: bool,
    /// Min/max idempotence and nested constant merging.
    pub minmax: bool,
    /// Conditional-move collapsing.
    pub cmove: bool,
    /// Load/store forwarding along the memory chain.
    pub forward_memory: bool,
    /// Loop optimisations as a whole (counted loop driven).
    pub loop_opts: bool,
    /// Range-check predicate hoisting out of counted loops.
    pub range_check_elim: bool,
    /// Strip mining of long-running counted loops.
    pub strip_mine: bool,
    /// Escape analysis and scalar replacement.
    pub escape_analysis: bool,
    /// Superword vectorization of counted loop bodies.
    pub vectorize: bool,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            strength_reduce: true,
            demorgan: true,
            shift_combine: true,
            reassociate: true,
            minmax: true,
            cmove: true,
            forward_memory: true,
            loop_opts: true,
            range_check_elim: true,
            strip_mine: true,
            escape_analysis: true,
            vectorize: true,
        }
    }
}

impl OptConfig {
    /// Build a config from the `OGRE_OPT` environment variable, a comma
    /// separated list of `<gate>=0|1` entries applied on top of the defaults,
    /// e.g. `OGRE_OPT=vectorize=0,strip_mine=0`.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let mut conf = Self::default();
        let s = match std::env::var("OGRE_OPT") {
            Ok(s) => s,
            Err(_) => return Ok(conf),
        };
        for ent in s.split(',') {
            let ent = ent.trim();
            if ent.is_empty() {
                continue;
            }
            let (name, val) = match ent.split_once('=') {
                Some(x) => x,
                None => return Err(format!("OGRE_OPT entry '{ent}' must be <gate>=0|1").into()),
            };
            let val = match val {
                "0" => false,
                "1" => true,
                x => return Err(format!("OGRE_OPT value '{x}' must be 0 or 1").into()),
            };
            match name {
                "strength_reduce" => conf.strength_reduce = val,
                "demorgan" => conf.demorgan = val,
                "shift_combine" => conf.shift_combine = val,
                "reassociate" => conf.reassociate = val,
                "minmax" => conf.minmax = val,
                "cmove" => conf.cmove = val,
                "forward_memory" => conf.forward_memory = val,
                "loop_opts" => conf.loop_opts = val,
                "range_check_elim" => conf.range_check_elim = val,
                "strip_mine" => conf.strip_mine = val,
                "escape_analysis" => conf.escape_analysis = val,
                "vectorize" => conf.vectorize = val,
                x => return Err(format!("Unknown OGRE_OPT gate '{x}'").into()),
            }
        }
        Ok(conf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_all_on() {
        let c = OptConfig::default();
        assert!(c.strength_reduce && c.demorgan && c.shift_combine && c.reassociate);
        assert!(c.loop_opts && c.escape_analysis && c.vectorize);
    }
}
