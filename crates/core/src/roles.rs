//! Directory group to local role mapping.
//!
//! Equivalences are configured as ordered `"Group=role"` lines. A user may
//! match any number of them; matches are applied in configured order.

use tracing::{debug, info};

use crate::config::{ConfigurationProvider, OptionKey};
use crate::directory::{attr, common_name};
use crate::errors::AccountError;
use crate::models::{DirectoryUser, DirectoryValue, LocalAccount, RoleAssignment};
use crate::store::LocalAccountStore;

/// One `(directory group, local role)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEquivalence {
    pub group: String,
    pub role: String,
}

impl RoleEquivalence {
    /// Parse `"Group=role"`. Returns `None` when either side is empty.
    pub fn parse(line: &str) -> Option<Self> {
        let (group, role) = line.split_once('=')?;
        let (group, role) = (group.trim(), role.trim());
        if group.is_empty() || role.is_empty() {
            return None;
        }
        Some(Self {
            group: group.to_string(),
            role: role.to_string(),
        })
    }

    fn matches(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| g.eq_ignore_ascii_case(&self.group))
    }
}

/// Group names (CN of each `memberOf` DN) of a directory user.
pub fn group_names(user: &DirectoryUser) -> Vec<String> {
    match user.attributes.get(attr::MEMBER_OF) {
        Some(DirectoryValue::Text(dns)) => dns
            .iter()
            .filter_map(|dn| common_name(dn))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub struct RoleMapper<'a> {
    store: &'a dyn LocalAccountStore,
    config: &'a dyn ConfigurationProvider,
}

impl<'a> RoleMapper<'a> {
    pub fn new(store: &'a dyn LocalAccountStore, config: &'a dyn ConfigurationProvider) -> Self {
        Self { store, config }
    }

    /// Roles implied by the user's current group membership.
    pub fn role_assignment(&self, user: &DirectoryUser) -> RoleAssignment {
        let groups = group_names(user);
        let mut assignment = RoleAssignment::default();
        for equivalence in self.config.role_equivalences() {
            if equivalence.matches(&groups) && !assignment.contains(&equivalence.role) {
                assignment.roles.push(equivalence.role);
            }
        }
        assignment
    }

    /// Write the account's final role set and return it.
    ///
    /// With cleaning enabled the final set is exactly the computed one;
    /// otherwise the computed roles are added to the existing ones. An empty
    /// computed set never removes roles, and gives a new account the default
    /// role when one is configured.
    pub fn synchronize_roles(
        &self,
        account: &LocalAccount,
        assignment: &RoleAssignment,
        is_new_account: bool,
    ) -> Result<Vec<String>, AccountError> {
        let id = account.require_id()?;
        let existing = self.store.get_roles(id)?;

        let target = if assignment.is_empty() {
            let default_role = self.config.get_string(OptionKey::DefaultRole);
            if is_new_account && !default_role.trim().is_empty() {
                vec![default_role.trim().to_string()]
            } else {
                debug!(login = %account.login_name, "no mapped roles, leaving roles untouched");
                return Ok(existing);
            }
        } else if is_new_account || self.config.get_bool(OptionKey::CleanExistingRoles) {
            assignment.roles.clone()
        } else {
            let mut merged = existing.clone();
            for role in &assignment.roles {
                if !merged.contains(role) {
                    merged.push(role.clone());
                }
            }
            merged
        };

        if target != existing {
            self.store.set_roles(id, &target)?;
            info!(login = %account.login_name, roles = ?target, "roles synchronized");
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::models::RawAttributes;

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn config(clean: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.sync_to_local.clean_existing_roles = clean;
        config.roles.equivalences = vec![
            "Authors=author".into(),
            "Domain Admins=administrator".into(),
            "authors=author".into(),
        ];
        config
    }

    fn member_of(dns: &[&str]) -> DirectoryUser {
        let mut attrs = RawAttributes::new();
        attrs.insert("samaccountname".into(), DirectoryValue::text("jdoe"));
        attrs.insert(
            "memberof".into(),
            DirectoryValue::Text(dns.iter().map(|s| s.to_string()).collect()),
        );
        DirectoryUser::new(attrs)
    }

    fn persisted(db: &Database, roles: &[&str]) -> LocalAccount {
        let mut account = LocalAccount::new("jdoe");
        let id = db.create(&account, "", false).unwrap();
        account.assign_id(id).unwrap();
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        db.set_roles(id, &roles).unwrap();
        account
    }

    #[test]
    fn test_parse_equivalence() {
        assert_eq!(
            RoleEquivalence::parse(" Domain Admins = administrator "),
            Some(RoleEquivalence {
                group: "Domain Admins".into(),
                role: "administrator".into()
            })
        );
        assert_eq!(RoleEquivalence::parse("no-separator"), None);
        assert_eq!(RoleEquivalence::parse("=role"), None);
        assert_eq!(RoleEquivalence::parse("group="), None);
    }

    #[test]
    fn test_role_assignment_case_insensitive_and_deduplicated() {
        let db = store();
        let config = config(false);
        let mapper = RoleMapper::new(&db, &config);
        let user = member_of(&["CN=AUTHORS,OU=Groups,DC=corp,DC=example,DC=com"]);
        assert_eq!(mapper.role_assignment(&user).roles, vec!["author"]);
        assert!(mapper.role_assignment(&member_of(&[])).is_empty());
    }

    #[test]
    fn test_union_without_cleaning() {
        let db = store();
        let config = config(false);
        let mapper = RoleMapper::new(&db, &config);
        let account = persisted(&db, &["editor"]);
        let assignment = RoleAssignment {
            roles: vec!["author".into()],
        };
        let roles = mapper.synchronize_roles(&account, &assignment, false).unwrap();
        assert_eq!(roles, vec!["editor", "author"]);
        assert_eq!(db.get_roles(account.id.unwrap()).unwrap(), vec!["editor", "author"]);
    }

    #[test]
    fn test_cleaning_replaces_roles() {
        let db = store();
        let config = config(true);
        let mapper = RoleMapper::new(&db, &config);
        let account = persisted(&db, &["editor"]);
        let assignment = RoleAssignment {
            roles: vec!["author".into()],
        };
        let roles = mapper.synchronize_roles(&account, &assignment, false).unwrap();
        assert_eq!(roles, vec!["author"]);
    }

    #[test]
    fn test_empty_assignment_and_default_role() {
        let db = store();
        let mut config = config(true);
        config.sync_to_local.default_role = Some("subscriber".into());
        let mapper = RoleMapper::new(&db, &config);

        let existing = persisted(&db, &["editor"]);
        let roles = mapper
            .synchronize_roles(&existing, &RoleAssignment::default(), false)
            .unwrap();
        assert_eq!(roles, vec!["editor"]);

        let mut fresh = LocalAccount::new("new");
        let id = db.create(&fresh, "", false).unwrap();
        fresh.assign_id(id).unwrap();
        let roles = mapper
            .synchronize_roles(&fresh, &RoleAssignment::default(), true)
            .unwrap();
        assert_eq!(roles, vec!["subscriber"]);
    }

    #[test]
    fn test_unsaved_account_is_rejected() {
        let db = store();
        let config = config(false);
        let mapper = RoleMapper::new(&db, &config);
        let err = mapper
            .synchronize_roles(&LocalAccount::new("x"), &RoleAssignment::default(), true)
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidAccountState { .. }));
    }
}
