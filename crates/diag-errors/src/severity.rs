use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered severity attached to every [`crate::ErrorRecord`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Dump,
    Info,
    Warn,
    Error,
    Fatal,
}

const LADDER: [Severity; 6] = [
    Severity::None,
    Severity::Dump,
    Severity::Info,
    Severity::Warn,
    Severity::Error,
    Severity::Fatal,
];

impl Severity {
    /// One step up, saturating at `Fatal`.
    pub fn raise(self) -> Self {
        let index = self.index();
        LADDER[(index + 1).min(LADDER.len() - 1)]
    }

    /// One step down, saturating at `None`.
    pub fn lower(self) -> Self {
        LADDER[self.index().saturating_sub(1)]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Dump => "dump",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    fn index(self) -> usize {
        LADDER
            .iter()
            .position(|value| *value == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::None < Severity::Dump);
        assert!(Severity::Dump < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn raise_and_lower_move_one_step() {
        assert_eq!(Severity::Warn.raise(), Severity::Error);
        assert_eq!(Severity::Warn.lower(), Severity::Info);
        assert_eq!(Severity::Fatal.raise(), Severity::Fatal);
        assert_eq!(Severity::None.lower(), Severity::None);
    }
}
