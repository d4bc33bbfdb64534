//! rdpbridge - session registry and callback bridge for a remote-desktop engine
//!
//! The engine speaks the protocol and runs each connection on its own
//! threads. The application owns the sessions and wants to be told what
//! happens to them. rdpbridge sits between the two:
//!
//! - **Handles**: every session is named by a generation-checked [`Handle`];
//!   callbacks for freed sessions are dropped instead of reaching stale state.
//! - **Lifecycle**: `Idle → Connecting → Connected → Disconnecting →
//!   Disconnected`, with `Failed` and cancel-to-`Idle` exits. Each terminal
//!   callback is delivered once.
//! - **Dispatch**: listener calls run inline on the engine thread or on a
//!   dedicated application thread, with deadlines on the engine side.
//! - **Requests**: authentication and certificate checks answer deny when no
//!   one is listening.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rdpbridge::engine::sim::{SimulatedEngine, SimulatedServer};
//! use rdpbridge::{BridgeConfig, ConnectionProfile, RdpBridge};
//!
//! # fn main() -> rdpbridge::Result<()> {
//! let config = BridgeConfig::load();
//! let bridge = RdpBridge::new(&config, |callbacks| {
//!     Arc::new(SimulatedEngine::new(callbacks, SimulatedServer::default()))
//! })?;
//!
//! let handle = bridge.allocate()?;
//! bridge
//!     .controller()
//!     .set_connection_info(handle, &ConnectionProfile::manual("10.0.0.5", 3389))?;
//! bridge.controller().connect(handle)?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod input;
pub mod marshal;
pub mod profile;

pub use bridge::{
    CertificateInfo, ConnectionController, EngineCallbacks, EventListener, PixelBuffer,
    PixelFormat, RdpBridge, Rect, UiEventListener,
};
pub use config::BridgeConfig;
pub use core::{Handle, LifecycleStatus};
pub use engine::{Engine, EngineError, PointerFlags};
pub use error::{BridgeError, Result};
pub use marshal::{ConfigMarshaller, EngineConfiguration};
pub use profile::{ConnectionProfile, Credentials};
