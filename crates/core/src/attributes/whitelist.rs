//! The admin-configured attribute whitelist.
//!
//! Mapping a directory record always runs in this order:
//! [`filter_to_whitelisted`](AttributeWhitelist::filter_to_whitelisted),
//! then [`convert`](AttributeWhitelist::convert), then
//! [`filter_empty`](AttributeWhitelist::filter_empty). The empty filter needs
//! the `overwrite_with_empty` flag, which only whitelisted keys carry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::converter::{self, AttributeType};
use crate::models::{LocalValue, RawAttributes};

/// One directory -> local attribute mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeWhitelistEntry {
    /// Directory attribute name (case-insensitive).
    pub directory_key: String,

    #[serde(rename = "type", default)]
    pub attribute_type: AttributeType,

    /// Key under which the value is stored locally. Unique across entries.
    pub local_key: String,

    /// Write an empty value over a previously stored one.
    #[serde(default)]
    pub overwrite_with_empty: bool,

    /// Push local changes of this attribute back to the directory.
    #[serde(default)]
    pub sync_to_directory: bool,
}

impl AttributeWhitelistEntry {
    pub fn new(directory_key: &str, attribute_type: AttributeType, local_key: &str) -> Self {
        Self {
            directory_key: directory_key.to_string(),
            attribute_type,
            local_key: local_key.to_string(),
            overwrite_with_empty: false,
            sync_to_directory: false,
        }
    }

    fn matches_directory_key(&self, key: &str) -> bool {
        self.directory_key.eq_ignore_ascii_case(key)
    }
}

/// Immutable whitelist snapshot for one pass.
#[derive(Debug, Clone, Default)]
pub struct AttributeWhitelist {
    entries: Vec<AttributeWhitelistEntry>,
}

impl AttributeWhitelist {
    pub fn new(entries: Vec<AttributeWhitelistEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AttributeWhitelistEntry] {
        &self.entries
    }

    pub fn directory_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.directory_key.as_str())
    }

    pub fn entry_for_local_key(&self, local_key: &str) -> Option<&AttributeWhitelistEntry> {
        self.entries.iter().find(|e| e.local_key == local_key)
    }

    /// Entries that may be written back to the directory.
    pub fn writable_entries(&self) -> impl Iterator<Item = &AttributeWhitelistEntry> {
        self.entries
            .iter()
            .filter(|e| e.sync_to_directory && e.attribute_type.is_writable())
    }

    /// Drop every raw attribute no entry maps.
    pub fn filter_to_whitelisted(&self, raw: &RawAttributes) -> RawAttributes {
        raw.iter()
            .filter(|(key, _)| {
                let known = self.entries.iter().any(|e| e.matches_directory_key(key));
                if !known {
                    debug!(attribute = %key, "attribute not whitelisted, dropping");
                }
                known
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Convert every entry from `raw`, keyed by local key. An entry without a
    /// raw value is left out, or converts to the empty value of its type when
    /// it opts into `overwrite_with_empty`.
    pub fn convert(&self, raw: &RawAttributes) -> BTreeMap<String, LocalValue> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let value = raw.get(&entry.directory_key.to_lowercase());
                if value.is_none() && !entry.overwrite_with_empty {
                    debug!(attribute = %entry.directory_key, "attribute absent, not mapped");
                    return None;
                }
                Some((
                    entry.local_key.clone(),
                    converter::convert(entry.attribute_type, value),
                ))
            })
            .collect()
    }

    /// Drop empty converted values unless their entry opts into overwriting.
    pub fn filter_empty(
        &self,
        converted: BTreeMap<String, LocalValue>,
    ) -> BTreeMap<String, LocalValue> {
        converted
            .into_iter()
            .filter(|(local_key, value)| {
                if !value.is_empty() {
                    return true;
                }
                let overwrite = self
                    .entry_for_local_key(local_key)
                    .map(|e| e.overwrite_with_empty)
                    .unwrap_or(false);
                if !overwrite {
                    debug!(attribute = %local_key, "empty value dropped");
                }
                overwrite
            })
            .collect()
    }

    /// The full mapping: whitelist filter, conversion, empty filter.
    pub fn map(&self, raw: &RawAttributes) -> BTreeMap<String, LocalValue> {
        let whitelisted = self.filter_to_whitelisted(raw);
        self.filter_empty(self.convert(&whitelisted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectoryValue;

    fn whitelist() -> AttributeWhitelist {
        let mut aliases = AttributeWhitelistEntry::new("proxyAddresses", AttributeType::List, "aliases");
        aliases.overwrite_with_empty = true;
        let mut phone = AttributeWhitelistEntry::new("telephoneNumber", AttributeType::String, "phone");
        phone.sync_to_directory = true;
        let mut logon = AttributeWhitelistEntry::new("lastLogon", AttributeType::Timestamp, "last_logon");
        logon.sync_to_directory = true;
        AttributeWhitelist::new(vec![
            AttributeWhitelistEntry::new("department", AttributeType::String, "department"),
            aliases,
            phone,
            logon,
        ])
    }

    #[test]
    fn test_filter_to_whitelisted_drops_unknown() {
        let raw = RawAttributes::from([
            ("department".to_string(), DirectoryValue::text("Sales")),
            ("homedirectory".to_string(), DirectoryValue::text("\\\\fs\\jdoe")),
        ]);
        let filtered = whitelist().filter_to_whitelisted(&raw);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("department"));
    }

    #[test]
    fn test_filter_empty_honours_overwrite_flag() {
        let raw = RawAttributes::from([(
            "department".to_string(),
            DirectoryValue::text("   "),
        )]);
        let mapped = whitelist().map(&raw);
        // department is empty and not overwriting; aliases is absent but overwrites
        assert!(!mapped.contains_key("department"));
        assert_eq!(mapped.get("aliases"), Some(&LocalValue::List(vec![])));
        assert!(!mapped.contains_key("phone"));
    }

    #[test]
    fn test_absent_integer_and_bool_are_not_mapped() {
        let mut number = AttributeWhitelistEntry::new("employeeNumber", AttributeType::Integer, "employee_number");
        number.sync_to_directory = true;
        let mut hidden = AttributeWhitelistEntry::new("msExchHideFromAddressLists", AttributeType::Bool, "hidden");
        hidden.sync_to_directory = true;
        let mut wl = AttributeWhitelist::new(vec![number, hidden]);

        let raw = RawAttributes::from([("samaccountname".to_string(), DirectoryValue::text("jdoe"))]);
        assert!(wl.convert(&raw).is_empty());
        assert!(wl.map(&raw).is_empty());

        wl.entries[0].overwrite_with_empty = true;
        let mapped = wl.map(&raw);
        assert_eq!(mapped.get("employee_number"), Some(&LocalValue::Integer(0)));
        assert!(!mapped.contains_key("hidden"));

        let raw = RawAttributes::from([
            ("employeenumber".to_string(), DirectoryValue::text("4711")),
            ("msexchhidefromaddresslists".to_string(), DirectoryValue::text("TRUE")),
        ]);
        let mapped = wl.map(&raw);
        assert_eq!(mapped.get("employee_number"), Some(&LocalValue::Integer(4711)));
        assert_eq!(mapped.get("hidden"), Some(&LocalValue::Bool(true)));
    }

    #[test]
    fn test_map_converts_by_local_key() {
        let raw = RawAttributes::from([
            ("department".to_string(), DirectoryValue::text(" Sales ")),
            ("telephonenumber".to_string(), DirectoryValue::text("+1 555 0100")),
        ]);
        let mapped = whitelist().map(&raw);
        assert_eq!(mapped.get("department"), Some(&LocalValue::Text("Sales".into())));
        assert_eq!(mapped.get("phone"), Some(&LocalValue::Text("+1 555 0100".into())));
    }

    #[test]
    fn test_writable_entries() {
        let wl = whitelist();
        let writable: Vec<&str> = wl.writable_entries().map(|e| e.local_key.as_str()).collect();
        assert_eq!(writable, vec!["phone"]);
    }
}
