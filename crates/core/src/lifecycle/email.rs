//! Initial email selection and duplicate email resolution.

use tracing::{debug, info};

use crate::config::DuplicateEmailPolicy;
use crate::directory::attr;
use crate::errors::AccountError;
use crate::models::{AccountId, DirectoryUser};
use crate::store::LocalAccountStore;

/// The email to write and whether the store's uniqueness check must be
/// suppressed for that one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailResolution {
    pub email: String,
    pub allow_duplicate: bool,
}

impl EmailResolution {
    fn unique(email: &str) -> Self {
        Self {
            email: email.to_string(),
            allow_duplicate: false,
        }
    }
}

/// Email for a directory user: the `mail` attribute, else
/// `login@default_domain`, else the login name when it already looks like an
/// address, else empty.
pub fn get_email(user: &DirectoryUser, login_name: &str, default_domain: &str) -> String {
    if let Some(mail) = user.text(attr::MAIL) {
        return mail.to_string();
    }
    let default_domain = default_domain.trim().trim_start_matches('@');
    if !default_domain.is_empty() && !login_name.is_empty() {
        return format!("{login_name}@{default_domain}");
    }
    if login_name.contains('@') {
        return login_name.to_string();
    }
    String::new()
}

/// Decide which email an account may use.
///
/// `owner` is the account being written (`None` while creating) and
/// `current_email` the email it holds right now.
pub fn resolve_email_conflict(
    store: &dyn LocalAccountStore,
    policy: DuplicateEmailPolicy,
    owner: Option<AccountId>,
    current_email: &str,
    preferred: &str,
) -> Result<EmailResolution, AccountError> {
    let preferred = preferred.trim();
    if preferred.is_empty() {
        return Ok(EmailResolution::unique(""));
    }

    match store.email_owner(preferred)? {
        None => return Ok(EmailResolution::unique(preferred)),
        Some(existing) if Some(existing) == owner => return Ok(EmailResolution::unique(preferred)),
        Some(_) => {}
    }

    match policy {
        DuplicateEmailPolicy::Allow => {
            debug!(email = preferred, "duplicate email allowed by policy");
            Ok(EmailResolution {
                email: preferred.to_string(),
                allow_duplicate: true,
            })
        }
        DuplicateEmailPolicy::Prevent => Err(AccountError::DuplicateEmailConflict {
            email: preferred.to_string(),
        }),
        DuplicateEmailPolicy::Create if !current_email.trim().is_empty() => {
            debug!(
                email = preferred,
                current = current_email,
                "account already has an email, keeping preferred address"
            );
            Ok(EmailResolution {
                email: preferred.to_string(),
                allow_duplicate: true,
            })
        }
        DuplicateEmailPolicy::Create => {
            let email = unique_variant(store, preferred)?;
            info!(preferred, email = %email, "generated unique email");
            Ok(EmailResolution::unique(&email))
        }
    }
}

/// `user@x` becomes `user0@x`, `user1@x`, ... until one is unused.
fn unique_variant(store: &dyn LocalAccountStore, email: &str) -> Result<String, AccountError> {
    let (local, domain) = match email.rsplit_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (email, None),
    };
    let mut n: u64 = 0;
    loop {
        let candidate = match domain {
            Some(domain) => format!("{local}{n}@{domain}"),
            None => format!("{local}{n}"),
        };
        if !store.is_email_existing(&candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}
