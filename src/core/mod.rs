//! Core session bookkeeping.
//!
//! - **handle**: generation-checked session handles
//! - **session**: per-session state and the lifecycle automaton
//! - **registry**: handle → session arena shared by application and engine contexts
//!
//! # Architecture
//!
//! ```text
//! InstanceRegistry
//! └── Slot (index, generation)
//!     └── Arc<SessionState>
//!         ├── LifecycleStatus
//!         ├── Weak<dyn UiEventListener>
//!         ├── ConnectionProfile
//!         └── Arc<EngineConfiguration> (current attempt)
//! ```

pub mod handle;
pub mod registry;
pub mod session;

pub use handle::Handle;
pub use registry::InstanceRegistry;
pub use session::{LifecycleEvent, LifecycleStatus, SessionState, Transition};
