use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::capability::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    ImmediateOffline,
    Short,
    Long,
    Conveyance,
}

impl TestKind {
    /// Argument passed to `smartctl -t`.
    pub fn smartctl_name(self) -> &'static str {
        match self {
            TestKind::ImmediateOffline => "offline",
            TestKind::Short => "short",
            TestKind::Long => "long",
            TestKind::Conveyance => "conveyance",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            TestKind::ImmediateOffline => "Immediate Offline Test",
            TestKind::Short => "Short Self-test",
            TestKind::Long => "Extended Self-test",
            TestKind::Conveyance => "Conveyance Self-test",
        }
    }

    /// Capability flag that must be set for the kind to be offered. The
    /// immediate offline test reports no progress through the self-test
    /// status, so it is never offered.
    pub(crate) fn support_key(self) -> Option<&'static str> {
        match self {
            TestKind::ImmediateOffline => None,
            TestKind::Short | TestKind::Long => Some(keys::SELF_TESTS_SUPPORTED),
            TestKind::Conveyance => Some(keys::CONVEYANCE_SUPPORTED),
        }
    }

    pub(crate) fn duration_key(self) -> Option<&'static str> {
        match self {
            TestKind::ImmediateOffline => Some(keys::OFFLINE_DURATION),
            TestKind::Short => Some(keys::SHORT_DURATION),
            TestKind::Long => Some(keys::EXTENDED_DURATION),
            TestKind::Conveyance => Some(keys::CONVEYANCE_DURATION),
        }
    }

    pub(crate) fn abort_unsupported_key(self) -> &'static str {
        match self {
            TestKind::ImmediateOffline => keys::OFFLINE_ABORT_UNSUPPORTED,
            TestKind::Short => keys::SHORT_ABORT_UNSUPPORTED,
            TestKind::Long => keys::EXTENDED_ABORT_UNSUPPORTED,
            TestKind::Conveyance => keys::CONVEYANCE_ABORT_UNSUPPORTED,
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for TestKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "offline" | "immediate_offline" => Ok(TestKind::ImmediateOffline),
            "short" => Ok(TestKind::Short),
            "long" | "extended" => Ok(TestKind::Long),
            "conveyance" => Ok(TestKind::Conveyance),
            other => Err(format!("unknown test kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("short".parse::<TestKind>(), Ok(TestKind::Short));
        assert_eq!("Extended".parse::<TestKind>(), Ok(TestKind::Long));
        assert!("weekly".parse::<TestKind>().is_err());
    }

    #[test]
    fn offline_has_no_support_flag() {
        assert!(TestKind::ImmediateOffline.support_key().is_none());
        assert_eq!(TestKind::Long.smartctl_name(), "long");
    }
}
