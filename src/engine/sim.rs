//! Simulated engine
//!
//! Plays a scripted server per session on its own worker thread: optional
//! credential prompt, certificate check, settings change, connection result,
//! a few frame updates, then waits for disconnect. Used by the demo binary
//! and by tests that need real cross-thread callbacks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Engine, EngineError, PointerFlags};
use crate::bridge::{CertificateInfo, EngineCallbacks, PixelBuffer, PixelFormat, Rect};
use crate::core::Handle;
use crate::marshal::EngineConfiguration;
use crate::profile::Credentials;

/// Behaviour of the simulated server
#[derive(Debug, Clone)]
pub struct SimulatedServer {
    /// Largest desktop the server grants
    pub max_width: u32,
    pub max_height: u32,
    /// Prompt for credentials even when the profile carries them
    pub require_auth: bool,
    /// Password the server accepts, if it checks one
    pub accepted_password: Option<String>,
    /// Certificate presented during the handshake
    pub certificate: Option<CertificateInfo>,
    /// Reject the connection after the handshake
    pub refuse: bool,
    /// Frame updates sent after connecting
    pub frames: u32,
    /// Pause between handshake steps
    pub step_delay: Duration,
}

impl Default for SimulatedServer {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1200,
            require_auth: false,
            accepted_password: None,
            certificate: Some(CertificateInfo {
                subject: "CN=sim.local".to_string(),
                issuer: "CN=sim.local".to_string(),
                fingerprint: "5e:1f:00:0d:aa:42:17:c3".to_string(),
            }),
            refuse: false,
            frames: 3,
            step_delay: Duration::from_millis(5),
        }
    }
}

/// Input received by an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRecord {
    Pointer { x: u16, y: u16, flags: PointerFlags },
    Key { keycode: u16, down: bool },
    Unicode(u32),
}

enum Command {
    Disconnect,
}

struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgb565,
            data: Vec::new(),
        }
    }
}

struct Worker {
    commands: Sender<Command>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    #[allow(dead_code)]
    thread: JoinHandle<()>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // The thread notices on its next step; it is not joined because it may
        // be waiting on the very thread dropping it.
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Instance {
    config: Option<EngineConfiguration>,
    data_directory: Option<PathBuf>,
    worker: Option<Worker>,
    frame: Arc<Mutex<Frame>>,
    inputs: Vec<InputRecord>,
}

/// In-process engine with one worker thread per connected session
pub struct SimulatedEngine {
    callbacks: EngineCallbacks,
    server: SimulatedServer,
    instances: Mutex<HashMap<Handle, Instance>>,
}

impl SimulatedEngine {
    pub fn new(callbacks: EngineCallbacks, server: SimulatedServer) -> Self {
        Self {
            callbacks,
            server,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Input events the instance has received so far
    pub fn inputs(&self, handle: Handle) -> Vec<InputRecord> {
        self.instances
            .lock()
            .get(&handle)
            .map(|instance| instance.inputs.clone())
            .unwrap_or_default()
    }

    /// Configuration last pushed to the instance
    pub fn configuration(&self, handle: Handle) -> Option<EngineConfiguration> {
        self.instances.lock().get(&handle)?.config.clone()
    }

    pub fn data_directory(&self, handle: Handle) -> Option<PathBuf> {
        self.instances.lock().get(&handle)?.data_directory.clone()
    }

    pub fn has_instance(&self, handle: Handle) -> bool {
        self.instances.lock().contains_key(&handle)
    }

    fn with_instance<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut Instance) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(&handle)
            .ok_or(EngineError::NoInstance(handle))?;
        f(instance)
    }
}

impl Engine for SimulatedEngine {
    fn create_instance(&self, handle: Handle) -> Result<(), EngineError> {
        let mut instances = self.instances.lock();
        if instances.contains_key(&handle) {
            return Err(EngineError::InstanceExists(handle));
        }
        instances.insert(handle, Instance::default());
        debug!(%handle, "instance created");
        Ok(())
    }

    fn destroy_instance(&self, handle: Handle) {
        // Dropping the worker closes its command channel and stops it
        if self.instances.lock().remove(&handle).is_some() {
            debug!(%handle, "instance destroyed");
        }
    }

    fn set_data_directory(&self, handle: Handle, directory: &Path) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            instance.data_directory = Some(directory.to_path_buf());
            Ok(())
        })
    }

    fn push_configuration(
        &self,
        handle: Handle,
        config: &EngineConfiguration,
    ) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            instance.config = Some(config.clone());
            Ok(())
        })
    }

    fn connect(&self, handle: Handle) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            let config = instance
                .config
                .clone()
                .ok_or(EngineError::NotConfigured(handle))?;

            // Replaces whatever is left of a previous attempt
            instance.worker.take();

            let (commands, command_rx) = mpsc::channel();
            let cancel = Arc::new(AtomicBool::new(false));
            let running = Arc::new(AtomicBool::new(true));

            let script = Script {
                handle,
                config,
                server: self.server.clone(),
                callbacks: self.callbacks.clone(),
                cancel: cancel.clone(),
                running: running.clone(),
                commands: command_rx,
                frame: instance.frame.clone(),
            };
            let thread = thread::Builder::new()
                .name(format!("engine-{}", handle.index()))
                .spawn(move || script.run())
                .map_err(EngineError::Spawn)?;

            instance.worker = Some(Worker {
                commands,
                cancel,
                running,
                thread,
            });
            Ok(())
        })
    }

    fn disconnect(&self, handle: Handle) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            let refused = || EngineError::Refused {
                handle,
                operation: "disconnect",
            };
            let worker = instance.worker.as_ref().ok_or_else(refused)?;
            worker
                .commands
                .send(Command::Disconnect)
                .map_err(|_| refused())
        })
    }

    fn cancel_connection(&self, handle: Handle) {
        if let Some(worker) = self
            .instances
            .lock()
            .get(&handle)
            .and_then(|instance| instance.worker.as_ref())
        {
            worker.cancel.store(true, Ordering::SeqCst);
        }
    }

    fn send_pointer_event(
        &self,
        handle: Handle,
        x: u16,
        y: u16,
        flags: PointerFlags,
    ) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            instance.inputs.push(InputRecord::Pointer { x, y, flags });
            Ok(())
        })
    }

    fn send_key_event(&self, handle: Handle, keycode: u16, down: bool) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            instance.inputs.push(InputRecord::Key { keycode, down });
            Ok(())
        })
    }

    fn send_unicode_key_event(&self, handle: Handle, codepoint: u32) -> Result<(), EngineError> {
        self.with_instance(handle, |instance| {
            instance.inputs.push(InputRecord::Unicode(codepoint));
            Ok(())
        })
    }

    fn update_graphics(
        &self,
        handle: Handle,
        rect: Rect,
        out: &mut [u8],
    ) -> Result<bool, EngineError> {
        let frame = self.with_instance(handle, |instance| Ok(instance.frame.clone()))?;
        let frame = frame.lock();

        if rect.is_empty() || rect.right() > frame.width || rect.bottom() > frame.height {
            return Ok(false);
        }
        let Some(surface) = PixelBuffer::packed(&frame.data, frame.width, frame.height, frame.format)
        else {
            return Ok(false);
        };
        let Some(region) = surface.view(rect) else {
            return Ok(false);
        };

        let row_bytes = rect.width as usize * frame.format.bytes_per_pixel();
        if out.len() < row_bytes * rect.height as usize {
            return Ok(false);
        }
        for (y, chunk) in out.chunks_mut(row_bytes).take(rect.height as usize).enumerate() {
            if let Some(row) = region.row(y as u32) {
                chunk.copy_from_slice(row);
            }
        }
        Ok(true)
    }

    fn version(&self) -> String {
        format!("rdpbridge-sim {}", env!("CARGO_PKG_VERSION"))
    }
}

/// One connection attempt, run on the worker thread
struct Script {
    handle: Handle,
    config: EngineConfiguration,
    server: SimulatedServer,
    callbacks: EngineCallbacks,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    commands: Receiver<Command>,
    frame: Arc<Mutex<Frame>>,
}

impl Script {
    fn run(self) {
        let handle = self.handle;
        let events = self.callbacks.events.clone();

        if !self.step() || self.cancelled() {
            return;
        }

        let conn = &self.config.connection;
        let mut credentials = Credentials::new(&conn.username, &conn.domain, &conn.password);
        if self.server.require_auth || credentials.username.is_empty() {
            if !events.on_authenticate(handle, &mut credentials) {
                info!(%handle, "logon declined");
                events.on_connection_failure(handle);
                return;
            }
        }
        if let Some(expected) = &self.server.accepted_password {
            if credentials.password != *expected {
                info!(%handle, user = %credentials.username, "logon rejected");
                events.on_connection_failure(handle);
                return;
            }
        }

        if !self.step() || self.cancelled() {
            return;
        }

        if let Some(certificate) = &self.server.certificate {
            if !events.on_verify_certificate(handle, certificate) {
                info!(%handle, "certificate not trusted");
                events.on_connection_failure(handle);
                return;
            }
        }
        if self.server.refuse {
            events.on_connection_failure(handle);
            return;
        }

        if !self.step() || self.cancelled() {
            return;
        }

        let width = conn.width.clamp(1, self.server.max_width);
        let height = conn.height.clamp(1, self.server.max_height);
        let bpp = conn.color_depth;
        events.on_settings_changed(handle, width, height, bpp);
        events.on_connection_success(handle);
        self.callbacks.graphics.resize(handle, width, height);

        let format = PixelFormat::for_color_depth(bpp);
        let mut surface = vec![0u8; width as usize * height as usize * format.bytes_per_pixel()];
        *self.frame.lock() = Frame {
            width,
            height,
            format,
            data: surface.clone(),
        };

        for n in 0..self.server.frames {
            match self.commands.try_recv() {
                Ok(Command::Disconnect) => return self.teardown(),
                Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => {}
            }

            let band = paint_band(&mut surface, width, height, format, handle, n, self.server.frames);
            self.frame.lock().data.copy_from_slice(&surface);
            if let Some(pixels) = PixelBuffer::packed(&surface, width, height, format) {
                self.callbacks.graphics.update(handle, band, &pixels);
            }

            if !self.step() {
                return;
            }
        }

        // Connected; wait for the application to hang up
        if let Ok(Command::Disconnect) = self.commands.recv() {
            self.teardown();
        }
    }

    /// Pause between steps. `false` once the instance is gone.
    fn step(&self) -> bool {
        thread::sleep(self.server.step_delay);
        self.running.load(Ordering::SeqCst)
    }

    /// End a cancelled attempt without success
    fn cancelled(&self) -> bool {
        if !self.cancel.load(Ordering::SeqCst) {
            return false;
        }
        info!(handle = %self.handle, "attempt cancelled");
        self.callbacks.events.on_disconnected(self.handle);
        true
    }

    fn teardown(&self) {
        self.callbacks.events.on_disconnecting(self.handle);
        thread::sleep(self.server.step_delay);
        self.callbacks.events.on_disconnected(self.handle);
    }
}

/// Fill horizontal band `n` of `count` with a per-session shade
fn paint_band(
    surface: &mut [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    handle: Handle,
    n: u32,
    count: u32,
) -> Rect {
    let count = count.max(1);
    let top = height * n / count;
    let bottom = height * (n + 1) / count;
    let row_bytes = width as usize * format.bytes_per_pixel();
    let shade = band_shade(handle, n);

    let start = top as usize * row_bytes;
    let end = bottom as usize * row_bytes;
    if let Some(band) = surface.get_mut(start..end) {
        band.fill(shade);
    }
    Rect::new(0, top, width, bottom - top)
}

/// Byte value painted by session `handle` into band `n`
pub fn band_shade(handle: Handle, n: u32) -> u8 {
    (handle.index() as u8).wrapping_mul(16).wrapping_add(n as u8).wrapping_add(1)
}
