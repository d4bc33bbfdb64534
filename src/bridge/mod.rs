//! Application-facing bridge.
//!
//! - **context**: the application thread listener calls can be marshalled onto
//! - **events**: engine callbacks → listeners
//! - **graphics**: frame and resize notifications
//! - **controller**: application commands → engine
//! - **listener**: traits the application implements
//!
//! [`RdpBridge`] wires these together around one engine.

pub mod context;
pub mod controller;
pub mod events;
pub mod graphics;
pub mod listener;

pub use context::{ApplicationContext, DispatchError};
pub use controller::ConnectionController;
pub use events::{DispatchTimeouts, Dispatcher, EventBridge};
pub use graphics::{GraphicsChannel, PixelBuffer, PixelFormat, Rect};
pub use listener::{CertificateInfo, EventListener, UiEventListener};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::core::{Handle, InstanceRegistry};
use crate::engine::Engine;
use crate::error::{BridgeError, Result};

/// What an engine calls back into
#[derive(Clone)]
pub struct EngineCallbacks {
    pub events: Arc<EventBridge>,
    pub graphics: GraphicsChannel,
}

/// Registry, event bridge, controller and engine for one application
pub struct RdpBridge {
    registry: Arc<InstanceRegistry>,
    events: Arc<EventBridge>,
    engine: Arc<dyn Engine>,
    controller: ConnectionController,
    context: Option<ApplicationContext>,
    data_directory: Option<PathBuf>,
}

impl RdpBridge {
    /// Build a bridge from `config`; `make_engine` receives the callbacks
    /// the engine reports through.
    pub fn new<E, F>(config: &BridgeConfig, make_engine: F) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce(EngineCallbacks) -> Arc<E>,
    {
        let registry = Arc::new(InstanceRegistry::new(config.session.max_sessions));

        let context = if config.dispatch.application_context {
            Some(ApplicationContext::spawn("rdpbridge-app").map_err(BridgeError::ContextStart)?)
        } else {
            None
        };
        let dispatcher = match &context {
            Some(context) => Dispatcher::Application(context.clone()),
            None => Dispatcher::Inline,
        };

        let events = Arc::new(EventBridge::new(
            registry.clone(),
            dispatcher,
            config.dispatch.timeouts(),
        ));
        let callbacks = EngineCallbacks {
            events: events.clone(),
            graphics: GraphicsChannel::new(events.clone()),
        };
        let engine: Arc<dyn Engine> = make_engine(callbacks);
        let controller = ConnectionController::new(registry.clone(), engine.clone(), events.clone());

        info!(
            engine = %engine.version(),
            max_sessions = registry.capacity(),
            application_context = context.is_some(),
            "bridge ready"
        );

        Ok(Self {
            registry,
            events,
            engine,
            controller,
            context,
            data_directory: config.engine.data_directory.clone(),
        })
    }

    /// Create a session and its engine instance
    pub fn allocate(&self) -> Result<Handle> {
        let handle = self.registry.allocate()?;
        if let Err(err) = self.engine.create_instance(handle) {
            let _ = self.registry.free(handle);
            return Err(err.into());
        }

        if let Some(directory) = &self.data_directory {
            if let Err(err) = self.engine.set_data_directory(handle, directory) {
                warn!(%handle, %err, "data directory not applied");
            }
        }
        debug!(%handle, "session allocated");
        Ok(handle)
    }

    /// Release a session. Callbacks already running finish against the old
    /// state; later ones for `handle` are dropped.
    pub fn free(&self, handle: Handle) -> Result<()> {
        self.registry.free(handle)?;
        self.engine.destroy_instance(handle);
        debug!(%handle, "session freed");
        Ok(())
    }

    /// Bind the interactive listener for one session. Held weakly.
    pub fn bind_listener(&self, handle: Handle, listener: &Arc<dyn UiEventListener>) -> Result<()> {
        self.registry
            .resolve(handle)
            .ok_or(BridgeError::UnknownHandle(handle))?
            .bind_listener(listener);
        Ok(())
    }

    pub fn unbind_listener(&self, handle: Handle) -> Result<()> {
        self.registry
            .resolve(handle)
            .ok_or(BridgeError::UnknownHandle(handle))?
            .unbind_listener();
        Ok(())
    }

    pub fn set_event_listener(&self, listener: &Arc<dyn EventListener>) {
        self.events.set_event_listener(listener);
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBridge> {
        &self.events
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Stop the application context and free every session
    pub fn shutdown(&mut self) {
        // Pending requests answer deny from here on
        if let Some(context) = self.context.take() {
            context.shutdown();
        }
        for handle in self.registry.handles() {
            let _ = self.free(handle);
        }
    }
}

impl Drop for RdpBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
