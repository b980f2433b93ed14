//! A mid-level, sea-of-nodes IR optimizer.
//!
//! `ogre` consumes a program graph built by a front end (via [ir::Graph]'s
//! builder API), rewrites it to a canonical fixpoint, and leaves behind a
//! dead-node-free graph annotated with final computed types, ready for a
//! downstream code generator. The rewrite engine is a worklist-driven
//! iterative GVN: per node it tries a cheap `identity` replacement, then
//! recomputes the node's lattice type (`value`), replacing the node with a
//! constant when the type collapses to a singleton, then applies shape
//! rewrites (`ideal`), and finally hash-conses the node against structurally
//! identical ones. Loop, escape-analysis and vectorization phases run on the
//! stabilised graph, each followed by another round of the engine.
//!
//! One [ir::Graph] corresponds to one compilation: the graph exclusively owns
//! its node arena, no cross-graph references exist, and abandoning a
//! compilation is just dropping the graph. Within one compilation everything
//! is single-threaded; independent compilations can run in parallel because
//! no mutable state is shared (configuration is an explicit [OptConfig]
//! passed into every phase, never a global).

pub mod compile;
pub mod config;
pub mod escape;
pub mod ir;
pub mod lattice;
pub mod log;
pub mod loops;
pub mod opt;
pub mod vector;

pub use compile::{optimize, CompileError};
pub use config::OptConfig;
pub use log::{Log, Verbosity};
