//! Driver catalog.
//!
//! A [`DriverRegistry`] holds the driver kinds one manager process offers.
//! Registration is explicit; whoever assembles the process decides what goes
//! in, and nothing is shared globally.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::driver::Driver;
use crate::model::{DriverConfig, DriverItem, ItemType};

/// Builds a fresh, un-initialized driver instance.
pub type DriverConstructor = fn() -> Box<dyn Driver>;

/// One registered driver kind: its metadata plus the constructor.
pub struct DriverEntry {
    pub name: String,
    pub config: DriverConfig,
    pub items: Vec<DriverItem>,
    pub i18n: Value,
    constructor: DriverConstructor,
}

impl DriverEntry {
    #[must_use]
    pub fn construct(&self) -> Box<dyn Driver> {
        (self.constructor)()
    }

    /// The catalog payload for this driver, as announced in the handshake.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "config": self.config,
            "items": self.items,
            "i18n": self.i18n,
        })
    }
}

/// The set of driver kinds available in this process.
#[derive(Default)]
pub struct DriverRegistry {
    entries: BTreeMap<String, DriverEntry>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver kind under `config.name`. Re-registering a name
    /// replaces the earlier entry.
    pub fn register(&mut self, config: DriverConfig, items: Vec<DriverItem>, constructor: DriverConstructor) {
        let name = config.name.clone();
        let i18n = build_i18n(&name, &items);
        let entry = DriverEntry {
            name: name.clone(),
            config,
            items,
            i18n,
            constructor,
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            warn!("Driver {} registered twice, keeping the later entry", name);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DriverEntry> {
        self.entries.get(name)
    }

    /// Build a fresh instance of the named driver kind.
    #[must_use]
    pub fn construct(&self, name: &str) -> Option<Box<dyn Driver>> {
        self.entries.get(name).map(DriverEntry::construct)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The full catalog keyed by driver name, as carried in the handshake
    /// and in `list_drivers` responses.
    #[must_use]
    pub fn catalog(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.descriptor()))
            .collect()
    }
}

/// Turn a `snake_case` identifier into a display label.
fn display_name(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate per-locale labels for a driver and its configuration items.
/// Both locales start from the generated English labels; real translations
/// can overwrite them downstream.
fn build_i18n(driver_name: &str, items: &[DriverItem]) -> Value {
    let mut labels = Map::new();
    labels.insert("name".to_string(), Value::String(display_name(driver_name)));

    let mut item_labels = Map::new();
    for item in items {
        item_labels.insert(item.name.clone(), Value::String(display_name(&item.name)));
        if item.item_type == ItemType::Select {
            for option in item.options.split(',').filter(|o| !o.is_empty()) {
                item_labels.insert(option.to_string(), Value::String(display_name(option)));
            }
        }
    }
    labels.insert("items".to_string(), Value::Object(item_labels));

    json!({
        "en_us": labels.clone(),
        "zh_cn": labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::model::{Link, LinkArgs, ListArgs, Object, Storage};
    use async_trait::async_trait;

    struct Null;

    #[async_trait]
    impl Driver for Null {
        fn config(&self) -> DriverConfig {
            DriverConfig {
                name: "Null".to_string(),
                ..DriverConfig::default()
            }
        }

        fn storage(&self) -> Option<&Storage> {
            None
        }

        fn set_storage(&mut self, _storage: Storage) {}

        async fn init(&mut self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list(&self, _dir: &Object, _args: &ListArgs) -> Result<Vec<Object>> {
            Ok(Vec::new())
        }

        async fn link(&self, _file: &Object, _args: &LinkArgs) -> Result<Link> {
            Ok(Link::default())
        }
    }

    fn null_config() -> DriverConfig {
        DriverConfig {
            name: "Null".to_string(),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("root_folder_path"), "Root Folder Path");
        assert_eq!(display_name("url"), "Url");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_register_and_construct() {
        let mut registry = DriverRegistry::new();
        registry.register(null_config(), Vec::new(), || Box::new(Null));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["Null"]);
        let driver = registry.construct("Null").unwrap();
        assert_eq!(driver.config().name, "Null");
        assert!(registry.construct("Missing").is_none());
    }

    #[test]
    fn test_catalog_descriptor_shape() {
        let mut registry = DriverRegistry::new();
        let items = vec![DriverItem::required(
            "root_folder_path",
            ItemType::String,
            "base directory served by this driver",
        )];
        registry.register(null_config(), items, || Box::new(Null));

        let catalog = registry.catalog();
        let entry = &catalog["Null"];
        assert_eq!(entry["name"], "Null");
        assert_eq!(entry["config"]["name"], "Null");
        assert_eq!(entry["items"][0]["name"], "root_folder_path");
        assert_eq!(entry["items"][0]["type"], "string");
        assert_eq!(
            entry["i18n"]["en_us"]["items"]["root_folder_path"],
            "Root Folder Path"
        );
        assert_eq!(entry["i18n"]["zh_cn"]["name"], "Null");
    }

    #[test]
    fn test_select_options_get_labels() {
        let items = vec![DriverItem {
            name: "sort_by".to_string(),
            item_type: ItemType::Select,
            options: "name,size,modified_time".to_string(),
            ..DriverItem::default()
        }];
        let i18n = build_i18n("Null", &items);
        assert_eq!(i18n["en_us"]["items"]["modified_time"], "Modified Time");
        assert_eq!(i18n["en_us"]["items"]["sort_by"], "Sort By");
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = DriverRegistry::new();
        registry.register(null_config(), Vec::new(), || Box::new(Null));
        registry.register(
            DriverConfig {
                default_root: "/data".to_string(),
                ..null_config()
            },
            Vec::new(),
            || Box::new(Null),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Null").unwrap().config.default_root, "/data");
    }
}
