//! Engine double that records entry-point calls

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Engine, EngineError, PointerFlags};
use crate::bridge::Rect;
use crate::core::Handle;
use crate::marshal::EngineConfiguration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    Create(Handle),
    Destroy(Handle),
    DataDirectory(Handle, PathBuf),
    Configure(Handle),
    Connect(Handle),
    Disconnect(Handle),
    Cancel(Handle),
    Pointer(Handle, u16, u16, PointerFlags),
    Key(Handle, u16, bool),
    Unicode(Handle, u32),
    UpdateGraphics(Handle, Rect),
}

#[derive(Default)]
pub(crate) struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    refuse_connect: AtomicBool,
    refuse_disconnect: AtomicBool,
    /// Pushes for this hostname stall before they are recorded
    slow_push: Mutex<Option<(String, Duration)>>,
}

impl RecordingEngine {
    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn refuse_disconnect(&self, refuse: bool) {
        self.refuse_disconnect.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn slow_push(&self, hostname: &str, delay: Duration) {
        *self.slow_push.lock() = Some((hostname.to_string(), delay));
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

impl Engine for RecordingEngine {
    fn create_instance(&self, handle: Handle) -> Result<(), EngineError> {
        self.record(EngineCall::Create(handle));
        Ok(())
    }

    fn destroy_instance(&self, handle: Handle) {
        self.record(EngineCall::Destroy(handle));
    }

    fn set_data_directory(&self, handle: Handle, directory: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::DataDirectory(handle, directory.to_path_buf()));
        Ok(())
    }

    fn push_configuration(
        &self,
        handle: Handle,
        config: &EngineConfiguration,
    ) -> Result<(), EngineError> {
        let delay = match &*self.slow_push.lock() {
            Some((host, delay)) if *host == config.connection.hostname => Some(*delay),
            _ => None,
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.record(EngineCall::Configure(handle));
        Ok(())
    }

    fn connect(&self, handle: Handle) -> Result<(), EngineError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(EngineError::Refused {
                handle,
                operation: "connect",
            });
        }
        self.record(EngineCall::Connect(handle));
        Ok(())
    }

    fn disconnect(&self, handle: Handle) -> Result<(), EngineError> {
        if self.refuse_disconnect.load(Ordering::SeqCst) {
            return Err(EngineError::Refused {
                handle,
                operation: "disconnect",
            });
        }
        self.record(EngineCall::Disconnect(handle));
        Ok(())
    }

    fn cancel_connection(&self, handle: Handle) {
        self.record(EngineCall::Cancel(handle));
    }

    fn send_pointer_event(
        &self,
        handle: Handle,
        x: u16,
        y: u16,
        flags: PointerFlags,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::Pointer(handle, x, y, flags));
        Ok(())
    }

    fn send_key_event(&self, handle: Handle, keycode: u16, down: bool) -> Result<(), EngineError> {
        self.record(EngineCall::Key(handle, keycode, down));
        Ok(())
    }

    fn send_unicode_key_event(&self, handle: Handle, codepoint: u32) -> Result<(), EngineError> {
        self.record(EngineCall::Unicode(handle, codepoint));
        Ok(())
    }

    fn update_graphics(
        &self,
        handle: Handle,
        rect: Rect,
        out: &mut [u8],
    ) -> Result<bool, EngineError> {
        self.record(EngineCall::UpdateGraphics(handle, rect));
        let needed = rect.width as usize * rect.height as usize * 4;
        Ok(out.len() >= needed && !rect.is_empty())
    }

    fn version(&self) -> String {
        "recording".to_string()
    }
}
