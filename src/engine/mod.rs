//! Protocol engine interface
//!
//! The engine implements the wire protocol and is external to this crate. It
//! is driven through [`Engine`] and reports back through
//! [`EngineCallbacks`](crate::bridge::EngineCallbacks), always naming the
//! originating session by handle.
//!
//! - **sim**: scripted in-process engine with one worker thread per session

pub mod sim;

#[cfg(test)]
pub(crate) mod recording;

use std::path::Path;

use bitflags::bitflags;
use thiserror::Error;

use crate::bridge::Rect;
use crate::core::Handle;
use crate::marshal::EngineConfiguration;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine has no instance for session {0}")]
    NoInstance(Handle),

    #[error("engine instance for session {0} already exists")]
    InstanceExists(Handle),

    #[error("engine has no configuration for session {0}")]
    NotConfigured(Handle),

    #[error("engine refused to {operation} session {handle}")]
    Refused {
        handle: Handle,
        operation: &'static str,
    },

    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
}

bitflags! {
    /// Pointer event flags (RDP slow-path/fast-path values)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PointerFlags: u16 {
        /// Signed wheel rotation magnitude
        const WHEEL_ROTATION_MASK = 0x01FF;
        const WHEEL_NEGATIVE      = 0x0100;
        const WHEEL               = 0x0200;
        const MOVE                = 0x0800;
        const BUTTON1             = 0x1000;
        const BUTTON2             = 0x2000;
        const BUTTON3             = 0x4000;
        const DOWN                = 0x8000;
    }
}

impl PointerFlags {
    /// Wheel event rotating by `delta` (positive is away from the user)
    pub fn wheel(delta: i16) -> Self {
        let rotation = (delta.clamp(-255, 255) as u16) & Self::WHEEL_ROTATION_MASK.bits();
        Self::WHEEL | Self::from_bits_retain(rotation)
    }

    pub fn is_wheel(self) -> bool {
        self.contains(Self::WHEEL)
    }

    /// Signed wheel rotation carried in the low bits
    pub fn wheel_delta(self) -> i16 {
        let raw = self.bits() & Self::WHEEL_ROTATION_MASK.bits();
        if raw & Self::WHEEL_NEGATIVE.bits() != 0 {
            raw as i16 - 0x200
        } else {
            raw as i16
        }
    }
}

/// Entry points of a protocol engine.
///
/// Implementations run each connection on their own execution context and
/// must not block the caller waiting on callbacks they emit.
pub trait Engine: Send + Sync {
    fn create_instance(&self, handle: Handle) -> Result<(), EngineError>;

    fn destroy_instance(&self, handle: Handle);

    /// Where the instance keeps per-user data such as known certificates
    fn set_data_directory(&self, handle: Handle, directory: &Path) -> Result<(), EngineError>;

    /// Connection parameters, performance flags and advanced settings in one push
    fn push_configuration(
        &self,
        handle: Handle,
        config: &EngineConfiguration,
    ) -> Result<(), EngineError>;

    /// Start connecting. Outcome is reported later through callbacks.
    fn connect(&self, handle: Handle) -> Result<(), EngineError>;

    /// Start teardown. Completion is reported later through callbacks.
    fn disconnect(&self, handle: Handle) -> Result<(), EngineError>;

    /// Ask an in-progress attempt to stop. Advisory.
    fn cancel_connection(&self, handle: Handle);

    fn send_pointer_event(
        &self,
        handle: Handle,
        x: u16,
        y: u16,
        flags: PointerFlags,
    ) -> Result<(), EngineError>;

    fn send_key_event(&self, handle: Handle, keycode: u16, down: bool) -> Result<(), EngineError>;

    fn send_unicode_key_event(&self, handle: Handle, codepoint: u32) -> Result<(), EngineError>;

    /// Copy `rect` of the current frame into `out`, rows packed without
    /// padding. Returns `false` when nothing was copied.
    fn update_graphics(&self, handle: Handle, rect: Rect, out: &mut [u8])
        -> Result<bool, EngineError>;

    fn version(&self) -> String;
}
