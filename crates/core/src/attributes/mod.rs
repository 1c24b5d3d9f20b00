//! Attribute mapping between directory records and local accounts.

pub mod converter;
pub mod whitelist;

pub use converter::{convert, AttributeType};
pub use whitelist::{AttributeWhitelist, AttributeWhitelistEntry};
