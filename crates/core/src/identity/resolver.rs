//! Resolution of local accounts from directory identities.

use tracing::debug;

use super::chain::ResolverChain;
use crate::directory::Principal;
use crate::errors::DatabaseError;
use crate::models::{DirectoryIdentity, LocalAccount};
use crate::store::LocalAccountStore;

/// Finds the local account that belongs to a directory principal.
///
/// A miss is `Ok(None)`: it is the ordinary "new account" case.
pub struct IdentityResolver<'a> {
    store: &'a dyn LocalAccountStore,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn LocalAccountStore) -> Self {
        Self { store }
    }

    /// Resolve by, in order: stored object GUID, stored sAMAccountName,
    /// login name = userPrincipalName, login name = sAMAccountName.
    ///
    /// The GUID survives renames, so it is tried first; the name fallbacks
    /// adopt accounts that were created by hand before the first sync.
    pub fn resolve(
        &self,
        identity: &DirectoryIdentity,
    ) -> Result<Option<LocalAccount>, DatabaseError> {
        let store = self.store;
        let found = ResolverChain::new()
            .with("object_guid", &identity.object_guid, |guid| {
                store.find_by_object_guid(guid)
            })
            .with("sam_account_name", &identity.sam_account_name, |name| {
                store.find_by_sam_account_name(name)
            })
            .with("login=user_principal_name", &identity.user_principal_name, |upn| {
                store.find_by_login_name(upn)
            })
            .with("login=sam_account_name", &identity.sam_account_name, |name| {
                store.find_by_login_name(name)
            })
            .resolve()?;

        if found.is_none() {
            debug!(principal = %identity.principal(), "no local account for directory identity");
        }
        Ok(found)
    }

    /// Resolve a principal obtained outside a directory record, such as an
    /// SSO header: `user@REALM`, `DOMAIN\user` or `user`.
    pub fn resolve_principal(&self, principal: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        let store = self.store;
        let account_name = Principal::parse(principal).account_name();

        ResolverChain::new()
            .with("login=principal", principal, |p| store.find_by_login_name(p))
            .with("sam_account_name", account_name, |name| {
                store.find_by_sam_account_name(name)
            })
            .with("login=account_name", account_name, |name| {
                store.find_by_login_name(name)
            })
            .resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::lifecycle::account_control::UserAccountControl;
    use crate::store::meta;

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn identity(guid: &str, sam: &str, upn: &str) -> DirectoryIdentity {
        DirectoryIdentity {
            object_guid: guid.into(),
            sam_account_name: sam.into(),
            user_principal_name: upn.into(),
            object_sid: None,
            user_account_control: UserAccountControl::default(),
        }
    }

    fn account(db: &Database, login: &str, guid: Option<&str>, sam: Option<&str>) -> i64 {
        let id = db.create(&LocalAccount::new(login), "", false).unwrap();
        if let Some(guid) = guid {
            db.update_meta(id, meta::OBJECT_GUID, guid).unwrap();
        }
        if let Some(sam) = sam {
            db.update_meta(id, meta::SAM_ACCOUNT_NAME, sam).unwrap();
        }
        id
    }

    #[test]
    fn test_guid_match_only() {
        let db = store();
        let id = account(&db, "renamed", Some("guid-1"), None);
        let resolver = IdentityResolver::new(&db);
        let found = resolver
            .resolve(&identity("guid-1", "jdoe", "jdoe@corp.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(id));
    }

    #[test]
    fn test_sam_meta_when_guid_differs() {
        let db = store();
        let id = account(&db, "someone", Some("guid-old"), Some("jdoe"));
        let resolver = IdentityResolver::new(&db);
        let found = resolver
            .resolve(&identity("guid-new", "jdoe", "jdoe@corp.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(id));
    }

    #[test]
    fn test_guid_wins_over_names() {
        let db = store();
        let by_guid = account(&db, "first", Some("guid-1"), None);
        account(&db, "jdoe", None, Some("jdoe"));
        let resolver = IdentityResolver::new(&db);
        let found = resolver
            .resolve(&identity("guid-1", "jdoe", "jdoe@corp.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(by_guid));
    }

    #[test]
    fn test_login_name_fallbacks() {
        let db = store();
        let upn_id = account(&db, "jdoe@corp.example.com", None, None);
        let sam_id = account(&db, "asmith", None, None);
        let resolver = IdentityResolver::new(&db);

        let found = resolver
            .resolve(&identity("", "jdoe", "jdoe@corp.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(upn_id));

        let found = resolver
            .resolve(&identity("", "asmith", "asmith@corp.example.com"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(sam_id));
    }

    #[test]
    fn test_nothing_matches() {
        let db = store();
        account(&db, "other", Some("guid-x"), Some("other"));
        let resolver = IdentityResolver::new(&db);
        assert!(resolver
            .resolve(&identity("guid-1", "jdoe", "jdoe@corp.example.com"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_resolve_principal_forms() {
        let db = store();
        let id = account(&db, "jdoe@corp.example.com", None, Some("jdoe"));
        let resolver = IdentityResolver::new(&db);

        for principal in ["jdoe@corp.example.com", "CORP\\jdoe", "jdoe", "jdoe@CORP.EXAMPLE.COM"] {
            let found = resolver.resolve_principal(principal).unwrap();
            assert_eq!(found.and_then(|a| a.id), Some(id), "principal {principal}");
        }
        assert!(resolver.resolve_principal("nobody").unwrap().is_none());
    }
}
