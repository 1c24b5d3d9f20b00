//! Directory access.
//!
//! The sync core talks to the directory only through [`DirectoryClient`].
//! [`ldap::LdapDirectoryClient`] is the production implementation on top of
//! `ldap3`; [`memory::InMemoryDirectory`] serves tests and dry runs.

pub mod guid;
pub mod ldap;
pub mod memory;
pub mod sid;

use std::collections::BTreeMap;

use crate::errors::DirectoryError;
use crate::models::DirectoryUser;

/// Lowercased names of the attributes the core itself relies on.
pub mod attr {
    pub const OBJECT_GUID: &str = "objectguid";
    pub const OBJECT_SID: &str = "objectsid";
    pub const SAM_ACCOUNT_NAME: &str = "samaccountname";
    pub const USER_PRINCIPAL_NAME: &str = "userprincipalname";
    pub const USER_ACCOUNT_CONTROL: &str = "useraccountcontrol";
    pub const DISTINGUISHED_NAME: &str = "distinguishedname";
    pub const MEMBER_OF: &str = "memberof";
    pub const MAIL: &str = "mail";
    pub const GIVEN_NAME: &str = "givenname";
    pub const SURNAME: &str = "sn";
    pub const DISPLAY_NAME: &str = "displayname";
    pub const DESCRIPTION: &str = "description";
}

/// Attributes fetched on every user lookup, whatever the whitelist says.
pub const IDENTITY_ATTRIBUTES: &[&str] = &[
    attr::OBJECT_GUID,
    attr::OBJECT_SID,
    attr::SAM_ACCOUNT_NAME,
    attr::USER_PRINCIPAL_NAME,
    attr::USER_ACCOUNT_CONTROL,
    attr::DISTINGUISHED_NAME,
    attr::MEMBER_OF,
    attr::MAIL,
    attr::GIVEN_NAME,
    attr::SURNAME,
    attr::DISPLAY_NAME,
    attr::DESCRIPTION,
];

/// The identity attributes plus `extra`, lowercased and deduplicated.
pub fn requested_attributes<'a>(extra: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut names: Vec<String> = IDENTITY_ATTRIBUTES.iter().map(|a| a.to_string()).collect();
    for name in extra {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Client for the directory service.
///
/// Implementations hold one connection; it is not shared between threads and
/// every call runs to completion or fails with its own timeout.
pub trait DirectoryClient: Send {
    /// Bind with the given credentials. Replaces any previous binding.
    fn bind(&mut self, username: &str, password: &str) -> Result<(), DirectoryError>;

    /// Users that are (transitive) members of any of `groups`.
    fn find_users_in_groups(
        &mut self,
        groups: &[String],
        attributes: &[String],
    ) -> Result<Vec<DirectoryUser>, DirectoryError>;

    /// One user by principal (`user`, `user@realm` or `DOMAIN\user`).
    fn find_user_attributes(
        &mut self,
        principal: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError>;

    /// One user by the text form of its `objectGUID`.
    fn find_user_by_guid(
        &mut self,
        guid: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryUser>, DirectoryError>;

    /// Replace the given attributes. An empty value list clears the attribute.
    fn modify_user(
        &mut self,
        principal: &str,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), DirectoryError>;

    /// Close the connection. Never fails.
    fn unbind(&mut self);
}

/// The forms a principal can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal<'a> {
    /// `user@realm`
    UserPrincipalName { name: &'a str, realm: &'a str },
    /// `DOMAIN\user`
    DownLevel { domain: &'a str, name: &'a str },
    /// `user`
    Bare(&'a str),
}

impl<'a> Principal<'a> {
    pub fn parse(principal: &'a str) -> Self {
        let principal = principal.trim();
        if let Some((domain, name)) = principal.split_once('\\') {
            return Self::DownLevel { domain, name };
        }
        if let Some((name, realm)) = principal.rsplit_once('@') {
            return Self::UserPrincipalName { name, realm };
        }
        Self::Bare(principal)
    }

    /// The account name without realm or domain.
    pub fn account_name(&self) -> &'a str {
        match *self {
            Self::UserPrincipalName { name, .. } => name,
            Self::DownLevel { name, .. } => name,
            Self::Bare(name) => name,
        }
    }
}

/// Value of the first `CN=` component of a distinguished name.
pub fn common_name(dn: &str) -> Option<&str> {
    dn.split(',')
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim().eq_ignore_ascii_case("cn").then(|| value.trim())
        })
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_forms() {
        assert_eq!(
            Principal::parse("jdoe@CORP.EXAMPLE.COM"),
            Principal::UserPrincipalName {
                name: "jdoe",
                realm: "CORP.EXAMPLE.COM"
            }
        );
        assert_eq!(Principal::parse("CORP\\jdoe").account_name(), "jdoe");
        assert_eq!(Principal::parse(" jdoe "), Principal::Bare("jdoe"));
    }

    #[test]
    fn test_common_name() {
        assert_eq!(
            common_name("CN=Domain Admins,OU=Groups,DC=corp,DC=example,DC=com"),
            Some("Domain Admins")
        );
        assert_eq!(common_name("cn=staff"), Some("staff"));
        assert_eq!(common_name("OU=Groups,DC=corp"), None);
        assert_eq!(common_name("Staff"), None);
    }

    #[test]
    fn test_requested_attributes_dedup() {
        let attrs = requested_attributes(["Mail", "department", "department"]);
        assert_eq!(attrs.len(), IDENTITY_ATTRIBUTES.len() + 1);
        assert!(attrs.contains(&"department".to_string()));
    }
}
