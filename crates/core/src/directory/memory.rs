//! In-memory [`DirectoryClient`] for tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::{attr, common_name, DirectoryClient, Principal};
use crate::errors::DirectoryError;
use crate::models::{DirectoryUser, DirectoryValue};

/// A directory held in memory.
///
/// Group membership is derived from each user's `memberOf` values. Writes go
/// to the stored users and are also recorded so callers can inspect them.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: Vec<DirectoryUser>,
    credentials: HashMap<String, String>,
    unavailable: bool,
    failing_principals: HashSet<String>,
    bound_as: Option<String>,
    modifications: Vec<(String, BTreeMap<String, Vec<String>>)>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, user: DirectoryUser) {
        self.users.push(user);
    }

    /// Remove every user matching `principal`.
    pub fn remove_user(&mut self, principal: &str) {
        self.users.retain(|u| !matches_principal(u, principal));
    }

    pub fn add_credentials(&mut self, username: &str, password: &str) {
        self.credentials
            .insert(username.to_lowercase(), password.to_string());
    }

    /// Make every subsequent bind fail with `Unavailable`.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Make lookups and writes for `principal` fail with `SearchFailed`.
    pub fn fail_principal(&mut self, principal: &str) {
        self.failing_principals.insert(principal.to_lowercase());
    }

    pub fn bound_as(&self) -> Option<&str> {
        self.bound_as.as_deref()
    }

    pub fn modifications(&self) -> &[(String, BTreeMap<String, Vec<String>>)] {
        &self.modifications
    }

    pub fn user(&self, principal: &str) -> Option<&DirectoryUser> {
        self.users.iter().find(|u| matches_principal(u, principal))
    }

    fn ensure_bound(&self) -> Result<(), DirectoryError> {
        if self.bound_as.is_none() {
            return Err(DirectoryError::NotBound);
        }
        Ok(())
    }

    fn ensure_not_failing(&self, user: &DirectoryUser) -> Result<(), DirectoryError> {
        let identity = &user.identity;
        for key in [&identity.sam_account_name, &identity.user_principal_name] {
            if !key.is_empty() && self.failing_principals.contains(&key.to_lowercase()) {
                return Err(DirectoryError::SearchFailed(format!(
                    "lookup of '{key}' failed"
                )));
            }
        }
        Ok(())
    }
}

impl DirectoryClient for InMemoryDirectory {
    fn bind(&mut self, username: &str, password: &str) -> Result<(), DirectoryError> {
        self.bound_as = None;
        if self.unavailable {
            return Err(DirectoryError::Unavailable {
                url: "memory://".into(),
                detail: "directory marked unavailable".into(),
            });
        }
        match self.credentials.get(&username.to_lowercase()) {
            Some(expected) if expected == password => {
                self.bound_as = Some(username.to_string());
                Ok(())
            }
            _ => Err(DirectoryError::BindFailed {
                username: username.to_string(),
                detail: "invalid credentials".into(),
            }),
        }
    }

    fn find_users_in_groups(
        &mut self,
        groups: &[String],
        _attributes: &[String],
    ) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.ensure_bound()?;
        let wanted: HashSet<String> = groups.iter().map(|g| g.to_lowercase()).collect();
        let members: Vec<DirectoryUser> = self
            .users
            .iter()
            .filter(|u| {
                group_names(u)
                    .iter()
                    .any(|g| wanted.contains(&g.to_lowercase()))
            })
            .cloned()
            .collect();
        debug!(groups = groups.len(), members = members.len(), "in-memory group enumeration");
        Ok(members)
    }

    fn find_user_attributes(
        &mut self,
        principal: &str,
        _attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.ensure_bound()?;
        if self.failing_principals.contains(&principal.to_lowercase()) {
            return Err(DirectoryError::SearchFailed(format!(
                "lookup of '{principal}' failed"
            )));
        }
        match self.user(principal) {
            Some(user) => {
                self.ensure_not_failing(user)?;
                Ok(Some(user.clone()))
            }
            None => Ok(None),
        }
    }

    fn find_user_by_guid(
        &mut self,
        guid: &str,
        _attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.ensure_bound()?;
        let guid = guid.trim().to_lowercase();
        match self.users.iter().find(|u| u.identity.object_guid == guid) {
            Some(user) => {
                self.ensure_not_failing(user)?;
                Ok(Some(user.clone()))
            }
            None => Ok(None),
        }
    }

    fn modify_user(
        &mut self,
        principal: &str,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), DirectoryError> {
        self.ensure_bound()?;
        if self.failing_principals.contains(&principal.to_lowercase()) {
            return Err(DirectoryError::ModifyFailed {
                principal: principal.to_string(),
                detail: "write rejected".into(),
            });
        }
        let user = self
            .users
            .iter_mut()
            .find(|u| matches_principal(u, principal))
            .ok_or_else(|| DirectoryError::ModifyFailed {
                principal: principal.to_string(),
                detail: "principal not found".into(),
            })?;

        for (name, values) in changes {
            let key = name.to_lowercase();
            if values.is_empty() {
                user.attributes.remove(&key);
            } else {
                user.attributes
                    .insert(key, DirectoryValue::Text(values.clone()));
            }
        }
        *user = DirectoryUser::new(std::mem::take(&mut user.attributes));

        self.modifications
            .push((principal.to_string(), changes.clone()));
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound_as = None;
    }
}

fn matches_principal(user: &DirectoryUser, principal: &str) -> bool {
    let identity = &user.identity;
    let parsed = Principal::parse(principal);
    let principal = principal.trim();
    (!identity.user_principal_name.is_empty()
        && identity.user_principal_name.eq_ignore_ascii_case(principal))
        || (!identity.sam_account_name.is_empty()
            && identity
                .sam_account_name
                .eq_ignore_ascii_case(parsed.account_name())
            && !matches!(parsed, Principal::UserPrincipalName { .. }))
}

fn group_names(user: &DirectoryUser) -> Vec<String> {
    match user.attributes.get(attr::MEMBER_OF) {
        Some(DirectoryValue::Text(dns)) => dns
            .iter()
            .map(|dn| common_name(dn).unwrap_or(dn).to_string())
            .collect(),
        _ => Vec::new(),
    }
}
