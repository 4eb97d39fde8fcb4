//! Privilege Mask
//! Mission: Fixed-width permission bit set with grant/revoke/contains-all

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Permission flags granted to one (subject-or-group, module) pair.
    ///
    /// | Flag | Meaning |
    /// |------|---------|
    /// | [`OWNER_READ`](Self::OWNER_READ) | read own documents |
    /// | [`OWNER_WRITE`](Self::OWNER_WRITE) | create documents |
    /// | [`OWNER_UPDATE`](Self::OWNER_UPDATE) | update own documents |
    /// | [`OWNER_DELETE`](Self::OWNER_DELETE) | delete own documents |
    /// | [`PUBLIC_READ`](Self::PUBLIC_READ) | read other accounts' documents |
    /// | [`PUBLIC_WRITE`](Self::PUBLIC_WRITE) | create documents on behalf of others |
    /// | [`PUBLIC_UPDATE`](Self::PUBLIC_UPDATE) | update other accounts' documents |
    /// | [`PUBLIC_DELETE`](Self::PUBLIC_DELETE) | delete other accounts' documents |
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrivilegeMask: u32 {
        const OWNER_READ    = 1;
        const OWNER_WRITE   = 1 << 1;
        const OWNER_UPDATE  = 1 << 2;
        const OWNER_DELETE  = 1 << 3;
        const PUBLIC_READ   = 1 << 4;
        const PUBLIC_WRITE  = 1 << 5;
        const PUBLIC_UPDATE = 1 << 6;
        const PUBLIC_DELETE = 1 << 7;

        const OWNER_ALL = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_UPDATE.bits()
            | Self::OWNER_DELETE.bits();
    }
}

impl PrivilegeMask {
    /// Union of both masks
    pub fn grant(self, flags: PrivilegeMask) -> Self {
        self | flags
    }

    /// Difference of both masks
    pub fn revoke(self, flags: PrivilegeMask) -> Self {
        self - flags
    }

    /// True only when every required bit is present
    pub fn allows(self, required: PrivilegeMask) -> bool {
        self.contains(required)
    }

    /// Integer form used by the persisted table
    pub fn to_stored(self) -> i64 {
        i64::from(self.bits())
    }

    /// Unknown bits from the durable copy are dropped rather than trusted
    pub fn from_stored(value: i64) -> Self {
        u32::try_from(value)
            .map(Self::from_bits_truncate)
            .unwrap_or_else(|_| Self::empty())
    }

    /// Parse a flag name such as `public_read` (case-insensitive)
    pub fn parse_flag(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

impl fmt::Display for PrivilegeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}
