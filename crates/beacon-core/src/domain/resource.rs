//! ResourceRecord domain entity and typed resource keys
//!
//! Resources are scoped key/value facts. A key is unique within its scope
//! `(resource_type, resource_type_id)`; writing the same key again in the
//! same scope replaces the value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ProcessId, SessionId};

/// Lifetime scope of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Owned by one process run
    Process,
    /// Owned by one session
    Session,
    /// Survives across sessions and processes
    Permanent,
}

impl ResourceType {
    /// Persisted tag for this scope
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Process => "process",
            ResourceType::Session => "session",
            ResourceType::Permanent => "permanent",
        }
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(ResourceType::Process),
            "session" => Ok(ResourceType::Session),
            "permanent" => Ok(ResourceType::Permanent),
            other => Err(DomainError::UnknownVariant {
                kind: "resource type",
                value: other.to_string(),
            }),
        }
    }
}

/// Well-known resource keys
///
/// `Custom` carries any key outside the table. Parsing a string that
/// matches a table entry always yields the typed variant, so a key has a
/// single representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    AppBundleVersion,
    AppEnvironment,
    AppEnvironmentDetailed,
    AppFramework,
    AppLaunchCount,
    SdkVersion,
    AppVersion,
    SessionUploadIndex,
    Custom(String),
}

impl ResourceKey {
    /// Every well-known key
    pub const KNOWN: &'static [ResourceKey] = &[
        ResourceKey::AppBundleVersion,
        ResourceKey::AppEnvironment,
        ResourceKey::AppEnvironmentDetailed,
        ResourceKey::AppFramework,
        ResourceKey::AppLaunchCount,
        ResourceKey::SdkVersion,
        ResourceKey::AppVersion,
        ResourceKey::SessionUploadIndex,
    ];

    /// Persisted form of this key
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKey::AppBundleVersion => "emb.app.bundle_version",
            ResourceKey::AppEnvironment => "emb.app.environment",
            ResourceKey::AppEnvironmentDetailed => "emb.app.environment_detailed",
            ResourceKey::AppFramework => "emb.app.framework",
            ResourceKey::AppLaunchCount => "emb.app.launch_count",
            ResourceKey::SdkVersion => "emb.app.sdk_version",
            ResourceKey::AppVersion => "emb.app.version",
            ResourceKey::SessionUploadIndex => "session.upload_index",
            ResourceKey::Custom(key) => key,
        }
    }

    /// Parses a persisted key; unknown keys become `Custom`
    pub fn parse(key: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|known| known.as_str() == key)
            .cloned()
            .unwrap_or_else(|| ResourceKey::Custom(key.to_string()))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Ok(Self::parse(&key))
    }
}

/// A persisted resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    pub value: String,
    pub resource_type: ResourceType,
    /// Owning process or session id; empty for permanent resources
    pub resource_type_id: String,
    pub collected_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// A resource owned by `process_id`
    pub fn process(key: impl Into<ResourceKey>, value: impl Into<String>, process_id: ProcessId) -> Self {
        Self::scoped(key.into(), value.into(), ResourceType::Process, process_id.to_string())
    }

    /// A resource owned by `session_id`
    pub fn session(key: impl Into<ResourceKey>, value: impl Into<String>, session_id: &SessionId) -> Self {
        Self::scoped(key.into(), value.into(), ResourceType::Session, session_id.to_string())
    }

    /// A resource that outlives sessions and processes
    pub fn permanent(key: impl Into<ResourceKey>, value: impl Into<String>) -> Self {
        Self::scoped(key.into(), value.into(), ResourceType::Permanent, String::new())
    }

    fn scoped(key: ResourceKey, value: String, resource_type: ResourceType, resource_type_id: String) -> Self {
        Self {
            key,
            value,
            resource_type,
            resource_type_id,
            collected_at: Utc::now(),
        }
    }

    /// Value parsed as an integer, if it is one
    pub fn integer_value(&self) -> Option<i64> {
        self.value.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_key_round_trips() {
        for key in ResourceKey::KNOWN {
            assert!(!key.as_str().is_empty());
            assert_eq!(&ResourceKey::parse(key.as_str()), key);
        }
        assert_eq!(ResourceKey::SessionUploadIndex.as_str(), "session.upload_index");
    }

    #[test]
    fn test_unknown_key_is_custom() {
        let key = ResourceKey::parse("device.model");
        assert_eq!(key, ResourceKey::Custom("device.model".to_string()));
        assert_eq!(key.as_str(), "device.model");
    }

    #[test]
    fn test_custom_with_known_name_normalizes_on_parse() {
        let key = ResourceKey::Custom("emb.app.version".to_string());
        assert_eq!(ResourceKey::parse(key.as_str()), ResourceKey::AppVersion);
    }

    #[test]
    fn test_scopes() {
        let pid = ProcessId::new();
        let r = ResourceRecord::process("k", "v", pid);
        assert_eq!(r.resource_type, ResourceType::Process);
        assert_eq!(r.resource_type_id, pid.to_string());

        let p = ResourceRecord::permanent(ResourceKey::SessionUploadIndex, "7");
        assert_eq!(p.resource_type_id, "");
        assert_eq!(p.integer_value(), Some(7));
    }
}
