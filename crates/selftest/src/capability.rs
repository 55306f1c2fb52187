use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Property names looked up through [`CapabilitySource`].
pub mod keys {
    pub const SELF_TESTS_SUPPORTED: &str = "ata_smart_data/capabilities/self_tests_supported";
    pub const CONVEYANCE_SUPPORTED: &str =
        "ata_smart_data/capabilities/conveyance_self_test_supported";
    pub const OFFLINE_DURATION: &str = "ata_smart_data/offline_data_collection/completion_seconds";
    pub const SHORT_DURATION: &str = "ata_smart_data/self_test/duration_seconds/short";
    pub const EXTENDED_DURATION: &str = "ata_smart_data/self_test/duration_seconds/extended";
    pub const CONVEYANCE_DURATION: &str = "ata_smart_data/self_test/duration_seconds/conveyance";
    pub const OFFLINE_ABORT_UNSUPPORTED: &str =
        "ata_smart_data/offline_data_collection/abort_unsupported";
    pub const SHORT_ABORT_UNSUPPORTED: &str = "ata_smart_data/self_test/abort_unsupported/short";
    pub const EXTENDED_ABORT_UNSUPPORTED: &str =
        "ata_smart_data/self_test/abort_unsupported/extended";
    pub const CONVEYANCE_ABORT_UNSUPPORTED: &str =
        "ata_smart_data/self_test/abort_unsupported/conveyance";
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Flag(bool),
    Seconds(u64),
}

impl CapabilityValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            CapabilityValue::Flag(value) => Some(*value),
            CapabilityValue::Seconds(_) => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            CapabilityValue::Seconds(value) => Some(Duration::from_secs(*value)),
            CapabilityValue::Flag(_) => None,
        }
    }
}

/// Read-only view of previously parsed device properties.
pub trait CapabilitySource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<CapabilityValue>;

    fn flag(&self, key: &str) -> Option<bool> {
        self.lookup(key).and_then(|value| value.as_flag())
    }

    fn duration(&self, key: &str) -> Option<Duration> {
        self.lookup(key).and_then(|value| value.as_duration())
    }
}

/// Capabilities held in memory, typically loaded from a config table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticCapabilities {
    values: BTreeMap<String, CapabilityValue>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: CapabilityValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CapabilityValue) {
        self.values.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CapabilitySource for StaticCapabilities {
    fn lookup(&self, key: &str) -> Option<CapabilityValue> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_reject_wrong_shape() {
        let caps = StaticCapabilities::new()
            .with(keys::SELF_TESTS_SUPPORTED, CapabilityValue::Flag(true))
            .with(keys::SHORT_DURATION, CapabilityValue::Seconds(120));
        assert_eq!(caps.flag(keys::SELF_TESTS_SUPPORTED), Some(true));
        assert_eq!(
            caps.duration(keys::SHORT_DURATION),
            Some(Duration::from_secs(120))
        );
        assert_eq!(caps.flag(keys::SHORT_DURATION), None);
        assert_eq!(caps.duration(keys::CONVEYANCE_DURATION), None);
    }

    #[test]
    fn deserializes_from_toml_table() {
        let raw = r#"
"ata_smart_data/capabilities/self_tests_supported" = true
"ata_smart_data/self_test/duration_seconds/extended" = 6000
"#;
        let caps: StaticCapabilities = toml::from_str(raw).expect("parse");
        assert_eq!(caps.len(), 2);
        assert_eq!(
            caps.duration(keys::EXTENDED_DURATION),
            Some(Duration::from_secs(6000))
        );
    }
}
