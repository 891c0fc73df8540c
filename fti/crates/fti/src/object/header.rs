//! Object Header - Mark Word Layout
//!
//! Every managed object starts with a mark word. Outside a heap walk it holds
//! synchronization and identity metadata; during a walk the marker borrows it
//! to record "visited".
//!
//! Mark Word Layout (64 bits):
//! ┌─────────────────────────────────────────┐
//! │  - Bits 0-1: Lock state                 │
//! │      01 unlocked   00 stack-locked      │
//! │      10 monitor    11 marked (walk)     │
//! │  - Bit 2: Biased                        │
//! │  - Bits 3-6: Age                        │
//! │  - Bit 7: unused                        │
//! │  - Bits 8-38: Identity hash (31 bits)   │
//! │  - Bits 39-63: unused                   │
//! └─────────────────────────────────────────┘
//!
//! The prototype (freshly allocated) header is `0b01`: unlocked, unbiased,
//! age 0, no hash. Any other value carries state that a heap walk must save
//! before marking and put back afterwards.

use std::fmt;

/// Lock bit positions
pub const LOCK_BITS: u32 = 2;
pub const BIASED_BIT: u32 = 2;
pub const AGE_SHIFT: u32 = 3;
pub const HASH_SHIFT: u32 = 8;

/// Masks for mark word fields
pub const LOCK_MASK: u64 = (1 << LOCK_BITS) - 1;
pub const BIASED_MASK: u64 = 1 << BIASED_BIT;
pub const AGE_MASK: u64 = 0b1111 << AGE_SHIFT;
pub const HASH_MASK: u64 = 0x7FFF_FFFF << HASH_SHIFT;

/// Lock state values (bits 0-1)
pub const LOCKED_VALUE: u64 = 0b00;
pub const UNLOCKED_VALUE: u64 = 0b01;
pub const MONITOR_VALUE: u64 = 0b10;
pub const MARKED_VALUE: u64 = 0b11;

/// Decoded lock bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    StackLocked,
    Monitor,
    Marked,
}

/// Mark word value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkWord(u64);

impl MarkWord {
    /// Header of a freshly allocated object
    #[inline]
    pub const fn prototype() -> Self {
        MarkWord(UNLOCKED_VALUE)
    }

    /// Header written over visited objects during a walk
    #[inline]
    pub const fn marked() -> Self {
        MarkWord(MARKED_VALUE)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        MarkWord(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    // === Lock Bits ===

    #[inline]
    pub fn lock_state(self) -> LockState {
        match self.0 & LOCK_MASK {
            LOCKED_VALUE => LockState::StackLocked,
            UNLOCKED_VALUE => LockState::Unlocked,
            MONITOR_VALUE => LockState::Monitor,
            _ => LockState::Marked,
        }
    }

    #[inline]
    pub fn with_lock_state(self, state: LockState) -> Self {
        let bits = match state {
            LockState::StackLocked => LOCKED_VALUE,
            LockState::Unlocked => UNLOCKED_VALUE,
            LockState::Monitor => MONITOR_VALUE,
            LockState::Marked => MARKED_VALUE,
        };
        MarkWord((self.0 & !LOCK_MASK) | bits)
    }

    /// Check if the walk's visited pattern is present
    #[inline]
    pub fn is_marked(self) -> bool {
        self.0 & LOCK_MASK == MARKED_VALUE
    }

    #[inline]
    pub fn is_unlocked(self) -> bool {
        self.0 & LOCK_MASK == UNLOCKED_VALUE
    }

    // === Biasing and Age ===

    #[inline]
    pub fn is_biased(self) -> bool {
        self.0 & BIASED_MASK != 0
    }

    #[inline]
    pub fn with_biased(self, biased: bool) -> Self {
        if biased {
            MarkWord(self.0 | BIASED_MASK)
        } else {
            MarkWord(self.0 & !BIASED_MASK)
        }
    }

    #[inline]
    pub fn age(self) -> u8 {
        ((self.0 & AGE_MASK) >> AGE_SHIFT) as u8
    }

    /// Set age, saturating at 15
    #[inline]
    pub fn with_age(self, age: u8) -> Self {
        let age = u64::from(age.min(15));
        MarkWord((self.0 & !AGE_MASK) | (age << AGE_SHIFT))
    }

    // === Identity Hash ===

    #[inline]
    pub fn hash(self) -> u32 {
        ((self.0 & HASH_MASK) >> HASH_SHIFT) as u32
    }

    #[inline]
    pub fn has_hash(self) -> bool {
        self.hash() != 0
    }

    /// Install an identity hash (31 bits kept)
    #[inline]
    pub fn with_hash(self, hash: u32) -> Self {
        let hash = u64::from(hash) << HASH_SHIFT & HASH_MASK;
        MarkWord((self.0 & !HASH_MASK) | hash)
    }

    /// Check if marking would lose information
    ///
    /// Only the prototype can be recreated without a saved copy.
    #[inline]
    pub fn must_be_preserved(self) -> bool {
        self != Self::prototype()
    }
}

impl Default for MarkWord {
    fn default() -> Self {
        Self::prototype()
    }
}

impl fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkWord")
            .field("lock", &self.lock_state())
            .field("biased", &self.is_biased())
            .field("age", &self.age())
            .field("hash", &format_args!("{:#x}", self.hash()))
            .finish()
    }
}
