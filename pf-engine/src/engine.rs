use std::fmt::{Display, Formatter};

use rand::{thread_rng, Rng};

use pf_core::error::{ConfigError, PfResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EngineKind {
    Cpu,
    Gpu,
}

/// A compute device. Every descriptor-to-stage construction receives one, memories remember theirs.
///
/// Clones refer to the same engine, separately constructed engines are always distinct.
#[derive(Debug, Clone)]
pub struct Engine {
    kind: EngineKind,
    index: usize,
    check: u64,
}

impl Engine {
    pub fn new(kind: EngineKind, index: usize) -> PfResult<Engine> {
        let count = Engine::count(kind);
        if index >= count {
            return Err(ConfigError::EngineUnavailable(format!(
                "{} engine {} requested, but only {} available",
                kind, index, count
            ))
            .into());
        }

        Ok(Engine {
            kind,
            index,
            check: thread_rng().gen(),
        })
    }

    /// The number of engines of the given kind. There is no GPU backend, so that count is always zero.
    pub fn count(kind: EngineKind) -> usize {
        match kind {
            EngineKind::Cpu => 1,
            EngineKind::Gpu => 0,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        self.check == other.check
    }
}

impl Eq for Engine {}

impl std::hash::Hash for Engine {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.check.hash(state)
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Cpu => write!(f, "cpu"),
            EngineKind::Gpu => write!(f, "gpu"),
        }
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}
