//! Event bridge
//!
//! Entry point for every engine callback. Each callback names its session by
//! handle; the bridge resolves it, reads the listener binding once, and hands
//! the call to the listener either inline on the engine thread or on the
//! application context. Callbacks for handles that no longer resolve, or for
//! sessions without a listener, are dropped.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use super::context::ApplicationContext;
use super::graphics::{OwnedFrame, PixelBuffer, Rect};
use super::listener::{CertificateInfo, EventListener, UiEventListener};
use crate::core::{Handle, InstanceRegistry, LifecycleEvent, LifecycleStatus, SessionState};
use crate::profile::Credentials;

/// Where listener calls run
#[derive(Clone)]
pub enum Dispatcher {
    /// Directly on the calling engine thread
    Inline,
    /// On the application thread, waited for with a deadline
    Application(ApplicationContext),
}

/// Deadlines for crossing into the application context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimeouts {
    /// Authenticate and verify-certificate
    pub request: Duration,
    /// Everything else
    pub notification: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            notification: Duration::from_secs(5),
        }
    }
}

pub struct EventBridge {
    registry: Arc<InstanceRegistry>,
    lifecycle_listener: RwLock<Option<Weak<dyn EventListener>>>,
    dispatcher: Dispatcher,
    timeouts: DispatchTimeouts,
}

impl EventBridge {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        dispatcher: Dispatcher,
        timeouts: DispatchTimeouts,
    ) -> Self {
        Self {
            registry,
            lifecycle_listener: RwLock::new(None),
            dispatcher,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Register the lifecycle listener. Held weakly.
    pub fn set_event_listener(&self, listener: &Arc<dyn EventListener>) {
        *self.lifecycle_listener.write() = Some(Arc::downgrade(listener));
    }

    pub fn clear_event_listener(&self) {
        self.lifecycle_listener.write().take();
    }

    fn event_listener(&self) -> Option<Arc<dyn EventListener>> {
        let binding = self.lifecycle_listener.read().clone();
        binding.and_then(|weak| weak.upgrade())
    }

    fn resolve(&self, handle: Handle) -> Option<Arc<SessionState>> {
        let session = self.registry.resolve(handle);
        if session.is_none() {
            trace!(%handle, "callback for unknown session dropped");
        }
        session
    }

    // --- lifecycle ---

    pub fn on_connection_success(&self, handle: Handle) {
        self.lifecycle(handle, LifecycleEvent::ConnectionSucceeded);
    }

    pub fn on_connection_failure(&self, handle: Handle) {
        self.lifecycle(handle, LifecycleEvent::ConnectionFailed);
    }

    pub fn on_disconnecting(&self, handle: Handle) {
        self.lifecycle(handle, LifecycleEvent::Disconnecting);
    }

    pub fn on_disconnected(&self, handle: Handle) {
        self.lifecycle(handle, LifecycleEvent::Disconnected);
    }

    /// Apply a lifecycle event reported by the engine and notify on success.
    ///
    /// Events that are not legal from the current status are dropped, which
    /// keeps every terminal callback to a single delivery. That includes
    /// `disconnected` while still `Connected`: only a disconnect that was
    /// announced can complete.
    fn lifecycle(&self, handle: Handle, event: LifecycleEvent) {
        let Some(session) = self.resolve(handle) else {
            return;
        };

        match session.transition(event) {
            Ok(transition) => {
                info!(%handle, from = %transition.from, to = %transition.to, "lifecycle");
            }
            Err(LifecycleStatus::Disconnecting) if event == LifecycleEvent::Disconnecting => {
                // Already announced by the controller
                debug!(%handle, "disconnecting already announced");
                return;
            }
            Err(status) => {
                warn!(%handle, ?event, %status, "lifecycle callback out of sequence dropped");
                return;
            }
        }

        self.deliver_lifecycle(&session);
    }

    /// Deliver the session's queued lifecycle notifications in transition order.
    ///
    /// One caller delivers at a time. A caller that finds delivery already
    /// running leaves its queued event to that caller and returns, so a
    /// listener may call back into the controller without waiting on itself.
    pub(crate) fn deliver_lifecycle(&self, session: &SessionState) {
        if !session.begin_delivery() {
            trace!(handle = %session.handle(), "lifecycle delivery already running");
            return;
        }

        let _guard = DeliveryGuard(session);
        while let Some(event) = session.next_pending() {
            self.emit_lifecycle(session.handle(), event);
        }
    }

    fn emit_lifecycle(&self, handle: Handle, event: LifecycleEvent) {
        let Some(listener) = self.event_listener() else {
            trace!(%handle, ?event, "no lifecycle listener");
            return;
        };

        self.notify(handle, move || match event {
            LifecycleEvent::ConnectionSucceeded => listener.on_connection_success(handle),
            LifecycleEvent::ConnectionFailed => listener.on_connection_failure(handle),
            LifecycleEvent::Disconnecting => listener.on_disconnecting(handle),
            LifecycleEvent::Disconnected => listener.on_disconnected(handle),
            LifecycleEvent::Connect => {}
        });
    }

    // --- interactive ---

    pub fn on_settings_changed(&self, handle: Handle, width: u32, height: u32, bpp: u32) {
        let Some(session) = self.resolve(handle) else {
            return;
        };
        let Some(listener) = session.listener() else {
            return;
        };
        debug!(%handle, width, height, bpp, "settings changed");
        self.notify(handle, move || listener.on_settings_changed(width, height, bpp));
    }

    /// Ask the listener for credentials. Denies when nobody answers.
    pub fn on_authenticate(&self, handle: Handle, credentials: &mut Credentials) -> bool {
        let Some(session) = self.resolve(handle) else {
            return false;
        };
        let Some(listener) = session.listener() else {
            debug!(%handle, "authenticate denied: no listener");
            return false;
        };

        let mut slots = credentials.clone();
        let answer = self.request(handle, move || {
            let accepted = listener.on_authenticate(&mut slots);
            (accepted, slots)
        });

        match answer {
            Some((true, slots)) => {
                *credentials = slots;
                true
            }
            Some((false, _)) => false,
            None => {
                warn!(%handle, "authenticate unanswered, denying");
                false
            }
        }
    }

    /// Ask the listener whether to trust a certificate. Rejects when nobody answers.
    pub fn on_verify_certificate(&self, handle: Handle, certificate: &CertificateInfo) -> bool {
        let Some(session) = self.resolve(handle) else {
            return false;
        };
        let Some(listener) = session.listener() else {
            debug!(%handle, "certificate rejected: no listener");
            return false;
        };

        let certificate = certificate.clone();
        match self.request(handle, move || listener.on_verify_certificate(&certificate)) {
            Some(trusted) => trusted,
            None => {
                warn!(%handle, "certificate check unanswered, rejecting");
                false
            }
        }
    }

    pub fn on_graphics_update(&self, handle: Handle, rect: Rect, pixels: &PixelBuffer<'_>) {
        let Some(session) = self.resolve(handle) else {
            return;
        };
        let Some(listener) = session.listener() else {
            return;
        };

        match &self.dispatcher {
            Dispatcher::Inline => listener.on_graphics_update(rect, pixels),
            Dispatcher::Application(_) => {
                // The engine's buffer cannot cross threads; the listener gets a copy
                let frame = OwnedFrame::copy_of(pixels);
                self.notify(handle, move || {
                    if let Some(pixels) = frame.as_buffer() {
                        listener.on_graphics_update(rect, &pixels);
                    }
                });
            }
        }
    }

    pub fn on_graphics_resize(&self, handle: Handle, width: u32, height: u32) {
        let Some(session) = self.resolve(handle) else {
            return;
        };
        let Some(listener) = session.listener() else {
            return;
        };
        debug!(%handle, width, height, "graphics resize");
        self.notify(handle, move || listener.on_graphics_resize(width, height));
    }

    // --- dispatch ---

    fn notify<F>(&self, handle: Handle, deliver: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.dispatcher {
            Dispatcher::Inline => deliver(),
            Dispatcher::Application(context) => {
                if let Err(err) = context.run_sync(self.timeouts.notification, deliver) {
                    warn!(%handle, %err, "notification delivery incomplete");
                }
            }
        }
    }

    fn request<R, F>(&self, handle: Handle, ask: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        match &self.dispatcher {
            Dispatcher::Inline => Some(ask()),
            Dispatcher::Application(context) => match context.run_sync(self.timeouts.request, ask) {
                Ok(answer) => Some(answer),
                Err(err) => {
                    warn!(%handle, %err, "request dispatch failed");
                    None
                }
            },
        }
    }
}

/// Releases the delivery claim if an inline listener unwinds through it
struct DeliveryGuard<'a>(&'a SessionState);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abandon_delivery();
        }
    }
}
