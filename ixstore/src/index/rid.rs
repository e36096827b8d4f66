//! Record locators.

use crate::storage::PageId;

/// Slot number within a record page.
pub type SlotId = i32;

/// A (page, slot) pair.
///
/// Record locators have `slot >= 0`. Internal nodes store routing locators,
/// which name a child page and carry slot `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    page: PageId,
    slot: SlotId,
}

impl Rid {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Slot value marking a routing locator.
    pub const ROUTING_SLOT: SlotId = -1;

    #[must_use]
    pub const fn new(page: PageId, slot: SlotId) -> Self {
        Self { page, slot }
    }

    /// A locator pointing at a child node.
    #[must_use]
    pub const fn routing(page: PageId) -> Self {
        Self {
            page,
            slot: Self::ROUTING_SLOT,
        }
    }

    #[must_use]
    pub const fn page(self) -> PageId {
        self.page
    }

    #[must_use]
    pub const fn slot(self) -> SlotId {
        self.slot
    }

    #[must_use]
    pub const fn is_routing(self) -> bool {
        self.slot == Self::ROUTING_SLOT
    }

    /// Whether this names a record: non-negative page and slot.
    #[must_use]
    pub const fn is_record(self) -> bool {
        self.page >= 0 && self.slot >= 0
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Decode from the first eight bytes of `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            slot: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_vs_record() {
        let routing = Rid::routing(12);
        assert!(routing.is_routing());
        assert!(!routing.is_record());
        assert_eq!(routing.page(), 12);

        let record = Rid::new(3, 0);
        assert!(!record.is_routing());
        assert!(record.is_record());
        assert!(!Rid::new(-4, 2).is_record());
    }

    #[test]
    fn test_encoding_and_display() {
        let rid = Rid::new(7, 9);
        let bytes = rid.to_bytes();
        assert_eq!(&bytes[4..8], &9i32.to_le_bytes());
        assert_eq!(Rid::from_bytes(&bytes), rid);
        assert_eq!(rid.to_string(), "(7, 9)");
    }
}
