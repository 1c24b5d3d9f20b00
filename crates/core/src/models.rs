//! Domain model types shared by the directory client, the local account
//! store, and the sync orchestrators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::sid::ObjectSid;
use crate::directory::{attr, guid};
use crate::errors::AccountError;
use crate::lifecycle::account_control::UserAccountControl;

/// Primary key of a persisted local account.
pub type AccountId = i64;

// ---------------------------------------------------------------------------
// Directory side
// ---------------------------------------------------------------------------

/// A raw directory attribute value, as returned by the directory client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryValue {
    Text(Vec<String>),
    Binary(Vec<Vec<u8>>),
}

impl DirectoryValue {
    /// Convenience constructor for a single text value.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(vec![value.into()])
    }

    /// First text value, if any.
    pub fn first_text(&self) -> Option<&str> {
        match self {
            Self::Text(values) => values.first().map(String::as_str),
            Self::Binary(_) => None,
        }
    }

    /// First binary value, if any.
    pub fn first_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(values) => values.first().map(Vec::as_slice),
            Self::Text(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.iter().all(|v| v.trim().is_empty()),
            Self::Binary(values) => values.iter().all(Vec::is_empty),
        }
    }
}

/// Raw directory attributes keyed by lowercased attribute name.
pub type RawAttributes = BTreeMap<String, DirectoryValue>;

/// Directory-side facts for one principal.
///
/// Built once per pass from the raw attributes and never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryIdentity {
    pub object_guid: String,
    pub sam_account_name: String,
    pub user_principal_name: String,
    pub object_sid: Option<ObjectSid>,
    pub user_account_control: UserAccountControl,
}

impl DirectoryIdentity {
    /// Extract the identity facts from a raw attribute map.
    pub fn from_attributes(attributes: &RawAttributes) -> Self {
        let object_guid = match attributes.get(attr::OBJECT_GUID) {
            Some(DirectoryValue::Binary(values)) => values
                .first()
                .map(|bytes| guid::format_guid(bytes))
                .unwrap_or_default(),
            Some(DirectoryValue::Text(values)) => values
                .first()
                .map(|v| v.trim().to_lowercase())
                .unwrap_or_default(),
            None => String::new(),
        };
        let object_sid = match attributes.get(attr::OBJECT_SID) {
            Some(DirectoryValue::Binary(values)) => {
                values.first().and_then(|b| ObjectSid::from_bytes(b).ok())
            }
            Some(DirectoryValue::Text(values)) => values.first().and_then(|s| s.parse().ok()),
            None => None,
        };
        let text = |name: &str| {
            attributes
                .get(name)
                .and_then(DirectoryValue::first_text)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        Self {
            object_guid,
            sam_account_name: text(attr::SAM_ACCOUNT_NAME),
            user_principal_name: text(attr::USER_PRINCIPAL_NAME),
            object_sid,
            user_account_control: UserAccountControl::parse(
                attributes
                    .get(attr::USER_ACCOUNT_CONTROL)
                    .and_then(DirectoryValue::first_text),
            ),
        }
    }

    /// Principal used to address this account in the directory.
    pub fn principal(&self) -> &str {
        if self.sam_account_name.is_empty() {
            &self.user_principal_name
        } else {
            &self.sam_account_name
        }
    }
}

/// A directory user: identity facts plus every raw attribute retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub identity: DirectoryIdentity,
    pub attributes: RawAttributes,
}

impl DirectoryUser {
    pub fn new(attributes: RawAttributes) -> Self {
        Self {
            identity: DirectoryIdentity::from_attributes(&attributes),
            attributes,
        }
    }

    /// First text value of a (case-insensitive) attribute, trimmed.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_lowercase())
            .and_then(DirectoryValue::first_text)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Local side
// ---------------------------------------------------------------------------

/// A value normalized for the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalValue {
    Text(String),
    List(Vec<String>),
    Integer(i64),
    Bool(bool),
}

impl LocalValue {
    /// Empty strings and empty lists are empty; numbers and booleans never are.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Integer(_) | Self::Bool(_) => false,
        }
    }

    /// Serialized form written to account meta.
    pub fn to_meta_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => serde_json::to_string(items).unwrap_or_default(),
            Self::Integer(i) => i.to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    /// Values as they would be written to the directory.
    pub fn to_directory_values(&self) -> Vec<String> {
        match self {
            Self::Text(s) if s.is_empty() => Vec::new(),
            Self::Text(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
            Self::Integer(i) => vec![i.to_string()],
            Self::Bool(b) => vec![if *b { "TRUE" } else { "FALSE" }.to_string()],
        }
    }
}

/// Roles the account should hold after synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub roles: Vec<String>,
}

impl RoleAssignment {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A local account, persisted or about to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    /// `None` until the account is persisted; assigned exactly once.
    pub id: Option<AccountId>,
    pub login_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub description: String,
    pub is_new_account: bool,
    pub role_assignment: RoleAssignment,
    pub raw_attributes: BTreeMap<String, LocalValue>,
}

impl LocalAccount {
    /// A not-yet-persisted account.
    pub fn new(login_name: impl Into<String>) -> Self {
        Self {
            id: None,
            login_name: login_name.into(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            display_name: String::new(),
            description: String::new(),
            is_new_account: true,
            role_assignment: RoleAssignment::default(),
            raw_attributes: BTreeMap::new(),
        }
    }

    /// Record the id handed out by the store. Fails if one is already set.
    pub fn assign_id(&mut self, id: AccountId) -> Result<(), AccountError> {
        if let Some(existing) = self.id {
            return Err(AccountError::InvalidAccountState {
                login_name: self.login_name.clone(),
                detail: format!("id already assigned ({existing})"),
            });
        }
        self.id = Some(id);
        self.is_new_account = false;
        Ok(())
    }

    /// The persisted id, or `InvalidAccountState` for an unsaved account.
    pub fn require_id(&self) -> Result<AccountId, AccountError> {
        self.id.ok_or_else(|| AccountError::InvalidAccountState {
            login_name: self.login_name.clone(),
            detail: "account has not been persisted".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Direction of a batch pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    DirectoryToLocal,
    LocalToDirectory,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectoryToLocal => write!(f, "directory_to_local"),
            Self::LocalToDirectory => write!(f, "local_to_directory"),
        }
    }
}

/// An audit-log entry for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub principal: Option<String>,
    pub details: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            principal: None,
            details: details.to_string(),
            success: true,
            created_at: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(action, details)
        }
    }

    pub fn with_principal(mut self, principal: &str) -> Self {
        self.principal = Some(principal.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DirectoryValue::text(*v)))
            .collect()
    }

    #[test]
    fn test_identity_from_text_attributes() {
        let attrs = raw(&[
            ("samaccountname", " jdoe "),
            ("userprincipalname", "jdoe@corp.example.com"),
            ("useraccountcontrol", "514"),
        ]);
        let identity = DirectoryIdentity::from_attributes(&attrs);
        assert_eq!(identity.sam_account_name, "jdoe");
        assert_eq!(identity.principal(), "jdoe");
        assert!(identity.object_guid.is_empty());
        assert!(identity.user_account_control.is_disabled());
    }

    #[test]
    fn test_identity_binary_guid() {
        let mut attrs = raw(&[("samaccountname", "jdoe")]);
        attrs.insert(
            "objectguid".into(),
            DirectoryValue::Binary(vec![(0u8..16).collect()]),
        );
        let identity = DirectoryIdentity::from_attributes(&attrs);
        assert_eq!(identity.object_guid, "03020100-0504-0706-0809-0a0b0c0d0e0f");
    }

    #[test]
    fn test_assign_id_once() {
        let mut account = LocalAccount::new("jdoe");
        assert!(account.require_id().is_err());
        account.assign_id(7).unwrap();
        assert_eq!(account.require_id().unwrap(), 7);
        assert!(!account.is_new_account);
        assert!(matches!(
            account.assign_id(8),
            Err(AccountError::InvalidAccountState { .. })
        ));
        assert_eq!(account.id, Some(7));
    }

    #[test]
    fn test_local_value_emptiness() {
        assert!(LocalValue::Text(String::new()).is_empty());
        assert!(LocalValue::List(vec![]).is_empty());
        assert!(!LocalValue::Integer(0).is_empty());
        assert!(!LocalValue::Bool(false).is_empty());
        assert_eq!(
            LocalValue::List(vec!["a".into(), "b".into()]).to_meta_string(),
            r#"["a","b"]"#
        );
    }
}
