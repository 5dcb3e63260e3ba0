//! Discord permission bits.
//!
//! Only the bits the bot checks are named; unknown bits survive parsing so
//! the value can round-trip.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const ADMINISTRATOR = 1 << 3;
        const MANAGE_GUILD = 1 << 5;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;
        const MANAGE_MESSAGES = 1 << 13;
        const ATTACH_FILES = 1 << 15;
        const MODERATE_MEMBERS = 1 << 40;

        const _ = !0;
    }
}

impl Permissions {
    /// Parse the decimal string Discord puts on the wire.
    pub fn from_wire(raw: &str) -> Self {
        raw.trim()
            .parse::<u64>()
            .map(Self::from_bits_retain)
            .unwrap_or_else(|_| Self::empty())
    }

    /// Server admins (owners are sent with every bit set).
    pub fn is_admin(self) -> bool {
        self.contains(Self::ADMINISTRATOR)
    }

    /// Moderators may force spawns and edit inventories.
    pub fn is_moderator(self) -> bool {
        self.is_admin() || self.contains(Self::MODERATE_MEMBERS)
    }
}
