//! `ldap3`-backed [`DirectoryClient`].
//!
//! Uses the synchronous [`LdapConn`]; the sync passes are blocking loops and
//! run on a blocking thread when hosted by the daemon.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use ldap3::{ldap_escape, LdapConn, LdapConnSettings, Mod, Scope, SearchEntry};
use tracing::{debug, info, warn};

use super::{attr, guid, DirectoryClient, Principal};
use crate::config::DirectoryConfig;
use crate::errors::DirectoryError;
use crate::models::{DirectoryUser, DirectoryValue, RawAttributes};

/// OID of the AD "matching rule in chain" used for transitive membership.
const IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

const USER_FILTER: &str = "(objectClass=user)(objectCategory=person)";

pub struct LdapDirectoryClient {
    url: String,
    base_dn: String,
    account_suffix: String,
    timeout: Duration,
    conn: Option<LdapConn>,
}

impl LdapDirectoryClient {
    /// Create a client. No connection is made until [`bind`](DirectoryClient::bind).
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            url: config.url.clone(),
            base_dn: config.base_dn.clone(),
            account_suffix: config.account_suffix.clone(),
            timeout: Duration::from_secs(config.connect_timeout_secs),
            conn: None,
        }
    }

    /// Bare account names get the configured suffix appended.
    fn bind_name(&self, username: &str) -> String {
        if username.contains('@') || username.contains('\\') || username.contains('=') {
            username.to_string()
        } else {
            format!("{username}{}", self.account_suffix)
        }
    }

    fn conn(&mut self) -> Result<&mut LdapConn, DirectoryError> {
        self.conn.as_mut().ok_or(DirectoryError::NotBound)
    }

    fn search(
        &mut self,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let base_dn = self.base_dn.clone();
        debug!(filter, "directory search");
        let (entries, _res) = self
            .conn()?
            .search(&base_dn, Scope::Subtree, filter, attributes.to_vec())
            .and_then(|r| r.success())
            .map_err(|e| DirectoryError::SearchFailed(e.to_string()))?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    fn find_group_dn(&mut self, group: &str) -> Result<Option<String>, DirectoryError> {
        let filter = format!("(&(objectClass=group)(cn={}))", ldap_escape(group));
        let entries = self.search(&filter, &[attr::DISTINGUISHED_NAME.to_string()])?;
        Ok(entries.into_iter().next().map(|e| e.dn))
    }

    fn find_one(
        &mut self,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let mut entries = self.search(filter, attributes)?;
        if entries.len() > 1 {
            warn!(filter, count = entries.len(), "lookup matched several entries, using the first");
        }
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entry_to_user(entries.swap_remove(0)))
        })
    }

    fn find_dn(&mut self, principal: &str) -> Result<String, DirectoryError> {
        let filter = principal_filter(principal);
        let entries = self.search(&filter, &[attr::DISTINGUISHED_NAME.to_string()])?;
        entries
            .into_iter()
            .next()
            .map(|e| e.dn)
            .ok_or_else(|| DirectoryError::ModifyFailed {
                principal: principal.to_string(),
                detail: "principal not found".into(),
            })
    }
}

impl DirectoryClient for LdapDirectoryClient {
    fn bind(&mut self, username: &str, password: &str) -> Result<(), DirectoryError> {
        self.unbind();

        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let mut conn =
            LdapConn::with_settings(settings, &self.url).map_err(|e| DirectoryError::Unavailable {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        let bind_name = self.bind_name(username);
        conn.simple_bind(&bind_name, password)
            .and_then(|r| r.success())
            .map_err(|e| DirectoryError::BindFailed {
                username: bind_name.clone(),
                detail: e.to_string(),
            })?;

        info!(url = %self.url, username = %bind_name, "bound to directory");
        self.conn = Some(conn);
        Ok(())
    }

    fn find_users_in_groups(
        &mut self,
        groups: &[String],
        attributes: &[String],
    ) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let mut seen = HashSet::new();
        let mut users = Vec::new();

        for group in groups {
            let Some(group_dn) = self.find_group_dn(group)? else {
                warn!(group = %group, "security group not found in directory");
                continue;
            };
            let filter = format!(
                "(&{USER_FILTER}(memberOf:{IN_CHAIN}:={}))",
                ldap_escape(&group_dn)
            );
            let entries = self.search(&filter, attributes)?;
            debug!(group = %group, members = entries.len(), "enumerated group members");

            for entry in entries {
                if seen.insert(entry.dn.to_lowercase()) {
                    users.push(entry_to_user(entry));
                }
            }
        }

        Ok(users)
    }

    fn find_user_attributes(
        &mut self,
        principal: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let filter = principal_filter(principal);
        self.find_one(&filter, attributes)
    }

    fn find_user_by_guid(
        &mut self,
        guid: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let value = guid::guid_filter_value(guid)
            .ok_or_else(|| DirectoryError::InvalidFilterValue(guid.to_string()))?;
        let filter = format!("(&{USER_FILTER}(objectGUID={value}))");
        self.find_one(&filter, attributes)
    }

    fn modify_user(
        &mut self,
        principal: &str,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), DirectoryError> {
        if changes.is_empty() {
            return Ok(());
        }
        let dn = self.find_dn(principal)?;

        let mods: Vec<Mod<String>> = changes
            .iter()
            .map(|(name, values)| Mod::Replace(name.clone(), values.iter().cloned().collect()))
            .collect();

        self.conn()?
            .modify(&dn, mods)
            .and_then(|r| r.success())
            .map_err(|e| DirectoryError::ModifyFailed {
                principal: principal.to_string(),
                detail: e.to_string(),
            })?;

        debug!(principal, dn = %dn, attributes = changes.len(), "modified directory user");
        Ok(())
    }

    fn unbind(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.unbind() {
                debug!(error = %e, "directory unbind failed");
            }
        }
    }
}

impl Drop for LdapDirectoryClient {
    fn drop(&mut self) {
        self.unbind();
    }
}

fn principal_filter(principal: &str) -> String {
    match Principal::parse(principal) {
        Principal::UserPrincipalName { .. } => format!(
            "(&{USER_FILTER}(userPrincipalName={}))",
            ldap_escape(principal.trim())
        ),
        other => format!(
            "(&{USER_FILTER}(sAMAccountName={}))",
            ldap_escape(other.account_name())
        ),
    }
}

/// Attributes that are always binary. ldap3 files a value under `attrs`
/// whenever its bytes happen to be valid UTF-8.
const BINARY_ATTRIBUTES: [&str; 2] = [attr::OBJECT_GUID, attr::OBJECT_SID];

/// Flatten an entry into lowercased raw attributes.
fn entry_to_user(entry: SearchEntry) -> DirectoryUser {
    let mut attributes = RawAttributes::new();
    for (name, values) in entry.attrs {
        let name = name.to_lowercase();
        let value = if BINARY_ATTRIBUTES.contains(&name.as_str()) {
            DirectoryValue::Binary(values.into_iter().map(String::into_bytes).collect())
        } else {
            DirectoryValue::Text(values)
        };
        attributes.insert(name, value);
    }
    for (name, values) in entry.bin_attrs {
        attributes.insert(name.to_lowercase(), DirectoryValue::Binary(values));
    }
    attributes
        .entry(attr::DISTINGUISHED_NAME.to_string())
        .or_insert_with(|| DirectoryValue::text(entry.dn));
    DirectoryUser::new(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn client() -> LdapDirectoryClient {
        LdapDirectoryClient::new(&DirectoryConfig {
            url: "ldap://127.0.0.1:1".into(),
            base_dn: "DC=corp,DC=example,DC=com".into(),
            account_suffix: "@corp.example.com".into(),
            domain_sid: None,
            connect_timeout_secs: 1,
        })
    }

    #[test]
    fn test_bind_name_suffix() {
        let c = client();
        assert_eq!(c.bind_name("svc-sync"), "svc-sync@corp.example.com");
        assert_eq!(c.bind_name("svc@other.com"), "svc@other.com");
        assert_eq!(c.bind_name("CORP\\svc"), "CORP\\svc");
    }

    #[test]
    fn test_principal_filter_escapes() {
        assert_eq!(
            principal_filter("CORP\\j*doe"),
            format!("(&{USER_FILTER}(sAMAccountName=j\\2adoe))")
        );
        assert!(principal_filter("jdoe@corp.example.com").contains("userPrincipalName="));
    }

    #[test]
    fn test_search_requires_bind() {
        let mut c = client();
        assert!(matches!(
            c.find_user_attributes("jdoe", &[]),
            Err(DirectoryError::NotBound)
        ));
    }

    #[test]
    fn test_entry_to_user_lowercases_and_keeps_binary() {
        let entry = SearchEntry {
            dn: "CN=John Doe,OU=Staff,DC=corp".into(),
            attrs: HashMap::from([("sAMAccountName".to_string(), vec!["jdoe".to_string()])]),
            bin_attrs: HashMap::from([("objectGUID".to_string(), vec![vec![0u8; 16]])]),
        };
        let user = entry_to_user(entry);
        assert_eq!(user.identity.sam_account_name, "jdoe");
        assert_eq!(user.identity.object_guid, "00000000-0000-0000-0000-000000000000");
        assert_eq!(user.text("distinguishedName"), Some("CN=John Doe,OU=Staff,DC=corp"));
    }

    #[test]
    fn test_entry_to_user_decodes_utf8_guid_and_sid_as_bytes() {
        let guid: Vec<u8> = (0x41..=0x50).collect();
        let sid: Vec<u8> = vec![1, 2, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 0x7f, 0x04, 0, 0];
        let entry = SearchEntry {
            dn: "CN=John Doe,OU=Staff,DC=corp".into(),
            attrs: HashMap::from([
                ("sAMAccountName".to_string(), vec!["jdoe".to_string()]),
                ("objectGUID".to_string(), vec![String::from_utf8(guid.clone()).unwrap()]),
                ("objectSid".to_string(), vec![String::from_utf8(sid).unwrap()]),
            ]),
            bin_attrs: HashMap::new(),
        };
        let user = entry_to_user(entry);
        assert_eq!(user.identity.object_guid, "44434241-4645-4847-494a-4b4c4d4e4f50");
        assert_eq!(
            user.identity.object_sid.map(|s| s.to_string()).as_deref(),
            Some("S-1-5-21-1151")
        );
        assert!(matches!(
            user.attributes.get(attr::OBJECT_GUID),
            Some(DirectoryValue::Binary(values)) if values[0] == guid
        ));
        assert_eq!(user.identity.sam_account_name, "jdoe");
    }
}
