//! Session handles
//!
//! A handle is an arena index paired with the generation of the slot it was
//! minted from. Freeing a session bumps the slot generation, so a handle kept
//! around after `free` can never resolve to whatever session reuses the slot.

use std::fmt;

/// Opaque reference to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this handle was minted from
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer for boundary layers that can only carry one.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`Handle::to_raw`]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}
