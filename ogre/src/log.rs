//! The implementation of the `OGRED_LOG*` environment variables.
//!
//! Normal logging is controlled by `OGRED_LOG=[<path|->:]<level>`: a numeric
//! verbosity, optionally prefixed with a file path (`-` means stderr, the
//! default). IR dumps are controlled separately by
//! `OGRED_LOG_IR=[<path>:]<phase_1>[,...,<phase_n>]` where a phase is one of
//! `pre-opt`, `post-loop`, `post-escape`, `post-vector` or `post-opt`.

use std::{collections::HashSet, env, error::Error, fs::File, io::Write, path::PathBuf};
use strum::{EnumCount, FromRepr};

/// How verbose should normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings.
    Warning,
    /// Log the start/end of optimizer phases.
    Phase,
    /// Log per-phase rewrite statistics.
    Stats,
}

pub struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` defaults to stderr.
    path: Option<PathBuf>,
    /// Which IR phases should be dumped, and where to.
    ir: Option<(Option<PathBuf>, HashSet<IrPhase>)>,
}

impl Log {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let (path, level) = match env::var("OGRED_LOG") {
            Ok(s) => {
                let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
                    [path, level] => {
                        if path == "-" {
                            (None, level.to_owned())
                        } else {
                            let path = PathBuf::from(path);
                            // If there's an existing log file, truncate it, so that later
                            // appends to the log aren't appending to a previous log run.
                            File::create(&path).ok();
                            (Some(path), level.to_owned())
                        }
                    }
                    [level] => (None, level.to_owned()),
                    [..] => return Err("OGRED_LOG must be of the format `[<path|->:]<level>".into()),
                };
                let level = level
                    .parse::<u8>()
                    .map_err(|e| format!("Invalid OGRED_LOG level '{s}': {e}"))?;
                let max_level = u8::try_from(Verbosity::COUNT).unwrap() - 1;
                let level = Verbosity::from_repr(level)
                    .ok_or_else(|| format!("OGRED_LOG level {level} exceeds maximum {max_level}"))?;
                (path, level)
            }
            Err(_) => (None, Verbosity::Error),
        };

        let ir = match env::var("OGRED_LOG_IR") {
            Ok(s) => {
                let (irpath, phases) = match s.split(':').collect::<Vec<_>>()[..] {
                    [path, phases] => (Some(PathBuf::from(path)), phases.to_owned()),
                    [phases] => (None, phases.to_owned()),
                    [..] => {
                        return Err(
                            "OGRED_LOG_IR must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'"
                                .into(),
                        )
                    }
                };
                let mut log_phases = HashSet::new();
                for x in phases.split(',') {
                    log_phases.insert(IrPhase::from_str(x)?);
                }
                if let Some(p) = &irpath {
                    File::create(p).ok();
                }
                Some((irpath, log_phases))
            }
            Err(_) => None,
        };

        Ok(Self { path, level, ir })
    }

    /// Log `msg` with the [Verbosity] level `level`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "ogre-error",
                Verbosity::Warning => "ogre-warning",
                Verbosity::Phase => "ogre-phase",
                Verbosity::Stats => "ogre-stats",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }

    /// Should the IR be dumped at `phase`?
    pub fn should_log_ir(&self, phase: IrPhase) -> bool {
        match &self.ir {
            Some((_, phases)) => phases.contains(&phase),
            None => false,
        }
    }

    /// Dump `s`, a rendering of the IR, to the `OGRED_LOG_IR` sink.
    pub fn log_ir(&self, s: &str) {
        match &self.ir {
            Some((Some(p), _)) => {
                File::options()
                    .append(true)
                    .open(p)
                    .map(|mut x| x.write(s.as_bytes()))
                    .ok();
            }
            Some((None, _)) => eprint!("{s}"),
            None => (),
        }
    }
}

/// The points in the pipeline at which the IR can be dumped.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub enum IrPhase {
    /// The graph as handed to us by the front end.
    PreOpt,
    /// After loop optimisations.
    PostLoop,
    /// After escape analysis.
    PostEscape,
    /// After vectorization.
    PostVector,
    /// The final graph, as handed to the code generator.
    PostOpt,
}

impl IrPhase {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "pre-opt" => Ok(Self::PreOpt),
            "post-loop" => Ok(Self::PostLoop),
            "post-escape" => Ok(Self::PostEscape),
            "post-vector" => Ok(Self::PostVector),
            "post-opt" => Ok(Self::PostOpt),
            _ => Err(format!("Invalid OGRED_LOG_IR phase: {s}").into()),
        }
    }
}
