//! Session state
//!
//! One `SessionState` per allocated handle. The lifecycle automaton lives here
//! so that both the controller (application side) and the event bridge (engine
//! side) move a session through it under the same lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};

use super::handle::Handle;
use crate::bridge::UiEventListener;
use crate::marshal::EngineConfiguration;
use crate::profile::ConnectionProfile;

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStatus {
    /// Allocated, not connecting
    Idle,
    /// Engine is establishing the connection
    Connecting,
    /// Connection established
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Torn down after a successful connection
    Disconnected,
    /// Connection attempt failed
    Failed,
}

/// Input to the lifecycle automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Application started a connection attempt
    Connect,
    /// Engine reported success
    ConnectionSucceeded,
    /// Engine reported failure
    ConnectionFailed,
    /// Teardown began (application or engine initiated)
    Disconnecting,
    /// Engine finished teardown, or ended an attempt that never succeeded
    Disconnected,
}

impl LifecycleStatus {
    /// Status reached by applying `event`, or `None` when the automaton has no
    /// such edge.
    pub fn apply(self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent as E;
        use LifecycleStatus as S;

        match (self, event) {
            (S::Idle, E::Connect) => Some(S::Connecting),
            (S::Connecting, E::ConnectionSucceeded) => Some(S::Connected),
            (S::Connecting, E::ConnectionFailed) => Some(S::Failed),
            // Attempt ended without success (cancelled)
            (S::Connecting, E::Disconnected) => Some(S::Idle),
            (S::Connected, E::Disconnecting) => Some(S::Disconnecting),
            (S::Disconnecting, E::Disconnected) => Some(S::Disconnected),
            _ => None,
        }
    }

    /// No further lifecycle callbacks are accepted
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleStatus::Disconnected | LifecycleStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Idle => "idle",
            LifecycleStatus::Connecting => "connecting",
            LifecycleStatus::Connected => "connected",
            LifecycleStatus::Disconnecting => "disconnecting",
            LifecycleStatus::Disconnected => "disconnected",
            LifecycleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status change applied by [`SessionState::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
}

/// Status plus the notifications its transitions still owe the listener,
/// in transition order
struct Lifecycle {
    status: LifecycleStatus,
    pending: VecDeque<LifecycleEvent>,
    /// A thread is draining `pending`
    delivering: bool,
}

/// State of one session
pub struct SessionState {
    handle: Handle,
    lifecycle: Mutex<Lifecycle>,
    /// Serialises configure and connect against each other
    control: ReentrantMutex<()>,
    /// Interactive listener. Weak: the application owns listener lifetime.
    listener: RwLock<Option<Weak<dyn UiEventListener>>>,
    /// Profile last accepted by `set_connection_info`
    profile: Mutex<Option<ConnectionProfile>>,
    /// Configuration marshalled for the current attempt
    config: Mutex<Option<Arc<EngineConfiguration>>>,
    cancel_requested: AtomicBool,
}

impl SessionState {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            lifecycle: Mutex::new(Lifecycle {
                status: LifecycleStatus::Idle,
                pending: VecDeque::new(),
                delivering: false,
            }),
            control: ReentrantMutex::new(()),
            listener: RwLock::new(None),
            profile: Mutex::new(None),
            config: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn status(&self) -> LifecycleStatus {
        self.lifecycle.lock().status
    }

    /// Apply a lifecycle event atomically.
    ///
    /// Every applied event except `Connect` is queued for notification under
    /// the same lock, so notifications follow transition order. Returns the
    /// current status unchanged as the error when the event is not a legal
    /// edge from it.
    pub fn transition(&self, event: LifecycleEvent) -> Result<Transition, LifecycleStatus> {
        let mut lifecycle = self.lifecycle.lock();
        let from = lifecycle.status;
        let to = from.apply(event).ok_or(from)?;
        lifecycle.status = to;
        if event == LifecycleEvent::Connect {
            self.cancel_requested.store(false, Ordering::SeqCst);
        } else {
            lifecycle.pending.push_back(event);
        }
        Ok(Transition { from, to })
    }

    /// Undo a `Connect` the engine refused to start. No-op unless still connecting.
    pub(crate) fn abort_connect(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status == LifecycleStatus::Connecting {
            lifecycle.status = LifecycleStatus::Idle;
            self.config.lock().take();
            true
        } else {
            false
        }
    }

    /// Claim the right to deliver queued notifications. `false` when another
    /// call is already delivering; it will pick up anything queued meanwhile.
    pub(crate) fn begin_delivery(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.delivering {
            return false;
        }
        lifecycle.delivering = true;
        true
    }

    /// Next notification to deliver. Releases the claim when the queue is empty.
    pub(crate) fn next_pending(&self) -> Option<LifecycleEvent> {
        let mut lifecycle = self.lifecycle.lock();
        let event = lifecycle.pending.pop_front();
        if event.is_none() {
            lifecycle.delivering = false;
        }
        event
    }

    /// Release the claim without draining, after a listener panicked
    pub(crate) fn abandon_delivery(&self) {
        self.lifecycle.lock().delivering = false;
    }

    /// Held across state check and engine push by configure and connect
    pub(crate) fn control(&self) -> ReentrantMutexGuard<'_, ()> {
        self.control.lock()
    }

    /// Bind the interactive listener, replacing any previous binding
    pub fn bind_listener(&self, listener: &Arc<dyn UiEventListener>) {
        *self.listener.write() = Some(Arc::downgrade(listener));
    }

    pub fn unbind_listener(&self) {
        self.listener.write().take();
    }

    /// Current listener, if bound and still alive.
    ///
    /// Reads the binding exactly once; callers must hold on to the result for
    /// the whole dispatch rather than calling this again.
    pub fn listener(&self) -> Option<Arc<dyn UiEventListener>> {
        let binding = self.listener.read().clone();
        binding.and_then(|weak| weak.upgrade())
    }

    pub(crate) fn set_profile(&self, profile: ConnectionProfile) {
        *self.profile.lock() = Some(profile);
    }

    pub fn profile(&self) -> Option<ConnectionProfile> {
        self.profile.lock().clone()
    }

    pub(crate) fn store_config_snapshot(&self, config: Arc<EngineConfiguration>) {
        *self.config.lock() = Some(config);
    }

    /// Configuration of the current (or last) connection attempt
    pub fn config_snapshot(&self) -> Option<Arc<EngineConfiguration>> {
        self.config.lock().clone()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel_connection` was called during the current attempt
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("handle", &self.handle)
            .field("status", &self.status())
            .field("listener", &self.listener.read().is_some())
            .field("cancel_requested", &self.cancel_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::UiEventListener;

    struct Quiet;
    impl UiEventListener for Quiet {}

    #[test]
    fn test_happy_path() {
        let session = SessionState::new(Handle::new(0, 0));
        assert_eq!(session.status(), LifecycleStatus::Idle);

        let steps = [
            (LifecycleEvent::Connect, LifecycleStatus::Connecting),
            (LifecycleEvent::ConnectionSucceeded, LifecycleStatus::Connected),
            (LifecycleEvent::Disconnecting, LifecycleStatus::Disconnecting),
            (LifecycleEvent::Disconnected, LifecycleStatus::Disconnected),
        ];
        for (event, expected) in steps {
            let transition = session.transition(event).unwrap();
            assert_eq!(transition.to, expected);
        }
        assert!(session.status().is_terminal());
    }

    #[test]
    fn test_terminal_callbacks_fire_once() {
        let session = SessionState::new(Handle::new(0, 0));
        session.transition(LifecycleEvent::Connect).unwrap();
        session.transition(LifecycleEvent::ConnectionFailed).unwrap();

        assert_eq!(
            session.transition(LifecycleEvent::ConnectionFailed),
            Err(LifecycleStatus::Failed)
        );
        assert_eq!(
            session.transition(LifecycleEvent::ConnectionSucceeded),
            Err(LifecycleStatus::Failed)
        );
        assert_eq!(
            session.transition(LifecycleEvent::Disconnected),
            Err(LifecycleStatus::Failed)
        );
    }

    #[test]
    fn test_cancelled_attempt_returns_to_idle() {
        let session = SessionState::new(Handle::new(0, 0));
        session.transition(LifecycleEvent::Connect).unwrap();
        session.request_cancel();
        assert!(session.cancel_requested());

        let transition = session.transition(LifecycleEvent::Disconnected).unwrap();
        assert_eq!(transition.to, LifecycleStatus::Idle);

        // A fresh attempt clears the cancel request
        session.transition(LifecycleEvent::Connect).unwrap();
        assert!(!session.cancel_requested());
    }

    #[test]
    fn test_disconnected_requires_disconnecting() {
        assert_eq!(
            LifecycleStatus::Connected.apply(LifecycleEvent::Disconnected),
            None
        );
        assert_eq!(LifecycleStatus::Idle.apply(LifecycleEvent::Disconnecting), None);
        assert_eq!(LifecycleStatus::Connected.apply(LifecycleEvent::Connect), None);
    }

    #[test]
    fn test_listener_is_weak() {
        let session = SessionState::new(Handle::new(0, 0));
        assert!(session.listener().is_none());

        let listener: Arc<dyn UiEventListener> = Arc::new(Quiet);
        session.bind_listener(&listener);
        assert!(session.listener().is_some());

        drop(listener);
        assert!(session.listener().is_none());
    }

    #[test]
    fn test_notifications_queue_in_transition_order() {
        let session = SessionState::new(Handle::new(0, 0));
        session.transition(LifecycleEvent::Connect).unwrap();
        session.transition(LifecycleEvent::ConnectionSucceeded).unwrap();

        assert!(session.begin_delivery());
        // A second deliverer leaves its event to the first
        session.transition(LifecycleEvent::Disconnecting).unwrap();
        assert!(!session.begin_delivery());

        assert_eq!(session.next_pending(), Some(LifecycleEvent::ConnectionSucceeded));
        assert_eq!(session.next_pending(), Some(LifecycleEvent::Disconnecting));
        assert_eq!(session.next_pending(), None);

        // Claim released once drained
        assert!(session.begin_delivery());
        session.abandon_delivery();
        assert!(session.begin_delivery());
    }

    #[test]
    fn test_control_is_reentrant() {
        let session = SessionState::new(Handle::new(0, 0));
        let _outer = session.control();
        let _inner = session.control();
    }

    #[test]
    fn test_abort_connect() {
        let session = SessionState::new(Handle::new(0, 0));
        assert!(!session.abort_connect());
        session.transition(LifecycleEvent::Connect).unwrap();
        assert!(session.abort_connect());
        assert_eq!(session.status(), LifecycleStatus::Idle);
    }
}
