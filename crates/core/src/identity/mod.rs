//! Identity resolution between directory principals and local accounts.
//!
//! The lookup order is:
//! 1. Stored object GUID (stable across renames)
//! 2. Stored sAMAccountName
//! 3. Login name equal to the userPrincipalName
//! 4. Login name equal to the sAMAccountName

pub mod chain;
pub mod resolver;

pub use chain::ResolverChain;
pub use resolver::IdentityResolver;
