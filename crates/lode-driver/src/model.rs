//! Data model shared between drivers and the process boundary.
//!
//! Everything here crosses the wire as JSON, so the field names are part of
//! the protocol and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry in a storage listing. Directories and files share the shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl Object {
    /// A directory object rooted at `path`, as passed to list operations.
    #[must_use]
    pub fn dir(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path,
            is_dir: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path,
            size,
            ..Self::default()
        }
    }
}

/// Resolved access to a file's content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Map<String, Value>>,
}

impl Link {
    #[must_use]
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            header: None,
        }
    }
}

/// Arguments for a listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ListArgs {
    /// Bypass any driver-side cache.
    #[serde(default)]
    pub refresh: bool,
}

/// Arguments for link resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Arguments for a driver-defined extra operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<Object>,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

/// Persistent state of one storage instance. `addition` holds the
/// driver-specific configuration as a raw JSON document; drivers decode it
/// themselves during init.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub id: i64,
    pub mount_path: String,
    pub driver: String,
    #[serde(default)]
    pub addition: String,
    #[serde(default)]
    pub status: String,
}

/// Static metadata a driver declares about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_root: String,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert: String,
}

/// Kind of a configuration item, drives form rendering on the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    #[default]
    String,
    Number,
    Bool,
    Text,
    Select,
}

/// One configurable field in a driver's addition schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    /// Comma-separated choices, only meaningful for [`ItemType::Select`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
}

impl DriverItem {
    #[must_use]
    pub fn required(name: impl Into<String>, item_type: ItemType, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_type,
            required: true,
            help: help.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, item_type: ItemType, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_type,
            default: default.into(),
            ..Self::default()
        }
    }
}

/// What optional interfaces a driver implements, reported without ever
/// invoking the optional operations themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub supports_get: bool,
    pub supports_other: bool,
    pub supports_root: bool,
}
