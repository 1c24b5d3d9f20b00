//! The Active Directory `userAccountControl` flag set.

use serde::{Deserialize, Serialize};

/// `userAccountControl` as a named bit-flag type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserAccountControl(pub u32);

impl UserAccountControl {
    /// ACCOUNTDISABLE
    pub const DISABLED: u32 = 0x0000_0002;
    /// NORMAL_ACCOUNT
    pub const NORMAL: u32 = 0x0000_0200;
    /// INTERDOMAIN_TRUST_ACCOUNT
    pub const INTERDOMAIN_TRUST: u32 = 0x0000_0800;
    /// WORKSTATION_TRUST_ACCOUNT
    pub const WORKSTATION_TRUST: u32 = 0x0000_1000;
    /// SERVER_TRUST_ACCOUNT (domain controllers)
    pub const SERVER_TRUST: u32 = 0x0000_2000;
    /// MNS_LOGON_ACCOUNT
    pub const MNS_LOGON: u32 = 0x0002_0000;
    /// SMARTCARD_REQUIRED
    pub const SMARTCARD_REQUIRED: u32 = 0x0004_0000;
    /// PARTIAL_SECRETS_ACCOUNT (read-only domain controllers)
    pub const PARTIAL_SECRETS: u32 = 0x0400_0000;

    /// Flags that mark an account as something other than a person.
    const NON_USER: u32 = Self::INTERDOMAIN_TRUST
        | Self::WORKSTATION_TRUST
        | Self::SERVER_TRUST
        | Self::MNS_LOGON
        | Self::PARTIAL_SECRETS;

    /// Parse the raw attribute value. Absent or non-numeric input is `0`.
    pub fn parse(raw: Option<&str>) -> Self {
        let value = raw
            .map(str::trim)
            .and_then(|s| {
                s.parse::<u32>()
                    .ok()
                    .or_else(|| s.parse::<i64>().ok().map(|v| v as u32))
            })
            .unwrap_or(0);
        Self(value)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn is_disabled(self) -> bool {
        self.has(Self::DISABLED)
    }

    /// True when none of the trust, MNS-logon or partial-secrets flags is set.
    pub fn is_normal_account(self) -> bool {
        !self.has(Self::NON_USER)
    }

    pub fn is_smartcard_required(self) -> bool {
        self.has(Self::SMARTCARD_REQUIRED)
    }

    pub fn interpret(self) -> AccountControlFlags {
        AccountControlFlags {
            is_normal_account: self.is_normal_account(),
            is_disabled: self.is_disabled(),
            is_smartcard_required: self.is_smartcard_required(),
        }
    }
}

impl std::fmt::Display for UserAccountControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Interpreted view of a [`UserAccountControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountControlFlags {
    pub is_normal_account: bool,
    pub is_disabled: bool,
    pub is_smartcard_required: bool,
}
