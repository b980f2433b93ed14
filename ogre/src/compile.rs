//! The compilation pipeline.
//!
//! One call to [optimize] takes one method's graph from "as built by the
//! front end" to "ready for code generation": the rewrite engine is run to a
//! fixpoint, then the loop, escape-analysis and vectorization phases each
//! run followed by another engine round to clean up what they exposed, and
//! finally dead nodes are swept so the output graph contains only live,
//! fully-typed nodes.

use crate::{
    config::OptConfig,
    escape,
    ir::Graph,
    log::{IrPhase, Log, Verbosity},
    loops, opt, vector,
};
use thiserror::Error;

/// A failure to optimize a graph.
///
/// Correctness violations are not errors: they are bugs, guarded by debug
/// assertions and the test suite. The only runtime failures are resource
/// limits.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("General error: {0}")]
    /// Something went wrong that the caller may be able to act on.
    General(String),
    #[error("Internal error: {0}")]
    /// Something went wrong that is probably a bug in the optimizer.
    Internal(String),
    #[error("Limit exceeded: {0}")]
    /// A structural limit was exceeded (e.g. the node index space).
    LimitExceeded(String),
}

fn dump(g: &Graph, log: &Log, phase: IrPhase, name: &str) {
    if log.should_log_ir(phase) {
        log.log_ir(&format!("--- Begin {name} ---\n{g}--- End {name} ---\n"));
    }
}

/// Optimize `g` in place.
pub fn optimize(g: &mut Graph, config: &OptConfig, log: &Log) -> Result<(), CompileError> {
    dump(g, log, IrPhase::PreOpt, "pre-opt");

    log.log(Verbosity::Phase, "igvn: start");
    let stats = opt::run(g, config)?;
    log.log(Verbosity::Stats, &format!("igvn: {stats}"));

    if config.loop_opts {
        log.log(Verbosity::Phase, "loop-opts: start");
        loops::run(g, config)?;
        opt::run(g, config)?;
        dump(g, log, IrPhase::PostLoop, "post-loop");
    }

    if config.escape_analysis {
        log.log(Verbosity::Phase, "escape-analysis: start");
        escape::run(g, config)?;
        opt::run(g, config)?;
        dump(g, log, IrPhase::PostEscape, "post-escape");
    }

    if config.vectorize {
        log.log(Verbosity::Phase, "vectorize: start");
        vector::run(g, config)?;
        dump(g, log, IrPhase::PostVector, "post-vector");
    }

    let stats = opt::run(g, config)?;
    log.log(Verbosity::Stats, &format!("igvn (final): {stats}"));
    g.sweep_dead();
    #[cfg(any(debug_assertions, test))]
    g.assert_well_formed();
    dump(g, log, IrPhase::PostOpt, "post-opt");
    Ok(())
}
