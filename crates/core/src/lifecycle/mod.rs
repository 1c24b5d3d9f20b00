//! Local account lifecycle driven by directory state.

pub mod account;
pub mod account_control;
pub mod email;

pub use account::{
    AccountLifecycle, ChangeNotifier, LoggingNotifier, QUARANTINE_SUFFIX, REASON_NOT_FOUND,
};
pub use account_control::{AccountControlFlags, UserAccountControl};
pub use email::{get_email, resolve_email_conflict, EmailResolution};
