//! Connection controller
//!
//! Application-side operations on a session: configure, connect, disconnect,
//! cancel, and input. Each operation checks the session's lifecycle status
//! before it touches the engine, so a rejected call has no engine side effect.
//! Configure and connect hold the session's control lock from that check
//! until the engine has taken the call.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::events::EventBridge;
use super::graphics::Rect;
use crate::core::{Handle, InstanceRegistry, LifecycleEvent, LifecycleStatus, SessionState};
use crate::engine::{Engine, PointerFlags};
use crate::error::{BridgeError, Result};
use crate::marshal::ConfigMarshaller;
use crate::profile::ConnectionProfile;

pub struct ConnectionController {
    registry: Arc<InstanceRegistry>,
    engine: Arc<dyn Engine>,
    events: Arc<EventBridge>,
}

impl ConnectionController {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        engine: Arc<dyn Engine>,
        events: Arc<EventBridge>,
    ) -> Self {
        Self {
            registry,
            engine,
            events,
        }
    }

    fn session(&self, handle: Handle) -> Result<Arc<SessionState>> {
        self.registry
            .resolve(handle)
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    fn session_in(
        &self,
        handle: Handle,
        expected: LifecycleStatus,
        operation: &'static str,
    ) -> Result<Arc<SessionState>> {
        let session = self.session(handle)?;
        check_status(&session, expected, operation)?;
        Ok(session)
    }

    /// Current lifecycle status
    pub fn status(&self, handle: Handle) -> Result<LifecycleStatus> {
        Ok(self.session(handle)?.status())
    }

    /// Validate and store a profile, and push its configuration to the engine
    pub fn set_connection_info(&self, handle: Handle, profile: &ConnectionProfile) -> Result<()> {
        let session = self.session(handle)?;
        let _control = session.control();
        check_status(&session, LifecycleStatus::Idle, "configure")?;
        let config = ConfigMarshaller::marshal(profile)?;
        self.engine.push_configuration(handle, &config)?;
        session.set_profile(profile.clone());
        debug!(%handle, host = %config.connection.hostname, "connection info set");
        Ok(())
    }

    pub fn set_data_directory(&self, handle: Handle, directory: &Path) -> Result<()> {
        self.session(handle)?;
        self.engine.set_data_directory(handle, directory)?;
        Ok(())
    }

    /// Start a connection attempt from `Idle`.
    ///
    /// The outcome arrives later as a success or failure callback.
    pub fn connect(&self, handle: Handle) -> Result<()> {
        let session = self.session(handle)?;
        let _control = session.control();
        check_status(&session, LifecycleStatus::Idle, "connect")?;
        let profile = session.profile().ok_or(BridgeError::MissingProfile(handle))?;
        let config = Arc::new(ConfigMarshaller::marshal(&profile)?);

        // Enter Connecting before the engine can report anything back
        session
            .transition(LifecycleEvent::Connect)
            .map_err(|state| BridgeError::InvalidState {
                handle,
                state,
                operation: "connect",
            })?;
        session.store_config_snapshot(config.clone());

        let started = self
            .engine
            .push_configuration(handle, &config)
            .and_then(|()| self.engine.connect(handle));
        if let Err(err) = started {
            error!(%handle, %err, "engine did not start connecting");
            session.abort_connect();
            return Err(err.into());
        }

        info!(%handle, host = %config.connection.hostname, port = config.connection.port, "connecting");
        Ok(())
    }

    /// Tear down a connected session.
    ///
    /// `OnDisconnecting` is queued before the engine starts teardown and
    /// reaches the listener after any lifecycle notification already in
    /// flight. `OnDisconnected` follows from the engine once it completes.
    /// If the engine refuses, the session is settled as `Disconnected` here
    /// and the error is returned.
    pub fn disconnect(&self, handle: Handle) -> Result<()> {
        let session = self.session(handle)?;
        session
            .transition(LifecycleEvent::Disconnecting)
            .map_err(|state| BridgeError::InvalidState {
                handle,
                state,
                operation: "disconnect",
            })?;

        info!(%handle, "disconnecting");
        self.events.deliver_lifecycle(&session);

        if let Err(err) = self.engine.disconnect(handle) {
            error!(%handle, %err, "engine refused disconnect, settling as disconnected");
            if session.transition(LifecycleEvent::Disconnected).is_ok() {
                self.events.deliver_lifecycle(&session);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Ask the engine to abandon an attempt in progress.
    ///
    /// Advisory: the engine still reports how the attempt ended.
    pub fn cancel_connection(&self, handle: Handle) -> Result<()> {
        let session = self.session_in(handle, LifecycleStatus::Connecting, "cancel")?;
        session.request_cancel();
        self.engine.cancel_connection(handle);
        info!(%handle, "cancel requested");
        Ok(())
    }

    pub fn send_pointer_event(&self, handle: Handle, x: u16, y: u16, flags: PointerFlags) -> Result<()> {
        self.session_in(handle, LifecycleStatus::Connected, "send pointer event")?;
        self.engine.send_pointer_event(handle, x, y, flags)?;
        Ok(())
    }

    pub fn send_key_event(&self, handle: Handle, keycode: u16, down: bool) -> Result<()> {
        self.session_in(handle, LifecycleStatus::Connected, "send key event")?;
        self.engine.send_key_event(handle, keycode, down)?;
        Ok(())
    }

    pub fn send_unicode_key_event(&self, handle: Handle, codepoint: u32) -> Result<()> {
        self.session_in(handle, LifecycleStatus::Connected, "send unicode key event")?;
        self.engine.send_unicode_key_event(handle, codepoint)?;
        Ok(())
    }

    /// Copy `rect` of the session's current frame into `out`
    pub fn request_buffer_update(&self, handle: Handle, rect: Rect, out: &mut [u8]) -> Result<bool> {
        self.session_in(handle, LifecycleStatus::Connected, "request buffer update")?;
        Ok(self.engine.update_graphics(handle, rect, out)?)
    }

    pub fn engine_version(&self) -> String {
        self.engine.version()
    }
}

fn check_status(
    session: &SessionState,
    expected: LifecycleStatus,
    operation: &'static str,
) -> Result<()> {
    let state = session.status();
    if state != expected {
        debug!(handle = %session.handle(), %state, operation, "rejected");
        return Err(BridgeError::InvalidState {
            handle: session.handle(),
            state,
            operation,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::events::{DispatchTimeouts, Dispatcher};
    use crate::bridge::listener::EventListener;
    use crate::engine::recording::{EngineCall, RecordingEngine};
    use crate::engine::EngineError;
    use crate::profile::ProfileKind;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Fixture {
        registry: Arc<InstanceRegistry>,
        engine: Arc<RecordingEngine>,
        events: Arc<EventBridge>,
        controller: ConnectionController,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(InstanceRegistry::default());
        let engine = Arc::new(RecordingEngine::default());
        let events = Arc::new(EventBridge::new(
            registry.clone(),
            Dispatcher::Inline,
            DispatchTimeouts::default(),
        ));
        let controller = ConnectionController::new(registry.clone(), engine.clone(), events.clone());
        Fixture {
            registry,
            engine,
            events,
            controller,
        }
    }

    fn configured(fixture: &Fixture) -> Handle {
        let handle = fixture.registry.allocate().unwrap();
        fixture
            .controller
            .set_connection_info(handle, &ConnectionProfile::manual("host", 3389))
            .unwrap();
        handle
    }

    #[derive(Default)]
    struct Order(Mutex<Vec<&'static str>>);

    impl EventListener for Order {
        fn on_connection_success(&self, _: Handle) {
            self.0.lock().push("success");
        }
        fn on_connection_failure(&self, _: Handle) {
            self.0.lock().push("failure");
        }
        fn on_disconnecting(&self, _: Handle) {
            self.0.lock().push("disconnecting");
        }
        fn on_disconnected(&self, _: Handle) {
            self.0.lock().push("disconnected");
        }
    }

    #[test]
    fn test_connect_stores_snapshot() {
        let f = fixture();
        let handle = configured(&f);

        f.controller.connect(handle).unwrap();
        let session = f.registry.resolve(handle).unwrap();
        assert_eq!(session.status(), LifecycleStatus::Connecting);
        let snapshot = session.config_snapshot().unwrap();
        assert_eq!(snapshot.connection.hostname, "host");
        assert!(f.engine.calls().contains(&EngineCall::Connect(handle)));
    }

    #[test]
    fn test_connect_twice_is_invalid_without_engine_calls() {
        let f = fixture();
        let handle = configured(&f);
        f.controller.connect(handle).unwrap();

        let before = f.engine.calls().len();
        assert!(matches!(
            f.controller.connect(handle),
            Err(BridgeError::InvalidState {
                state: LifecycleStatus::Connecting,
                ..
            })
        ));

        f.events.on_connection_success(handle);
        assert!(matches!(
            f.controller.connect(handle),
            Err(BridgeError::InvalidState {
                state: LifecycleStatus::Connected,
                ..
            })
        ));
        assert_eq!(f.engine.calls().len(), before);
    }

    #[test]
    fn test_connect_without_profile() {
        let f = fixture();
        let handle = f.registry.allocate().unwrap();
        assert!(matches!(
            f.controller.connect(handle),
            Err(BridgeError::MissingProfile(h)) if h == handle
        ));
        assert_eq!(f.controller.status(handle).unwrap(), LifecycleStatus::Idle);
    }

    #[test]
    fn test_unsupported_profile_rejected_early() {
        let f = fixture();
        let handle = f.registry.allocate().unwrap();
        let mut profile = ConnectionProfile::manual("host", 3389);
        profile.kind = ProfileKind::Other {
            kind: "workspace".to_string(),
        };

        assert!(matches!(
            f.controller.set_connection_info(handle, &profile),
            Err(BridgeError::UnsupportedProfileKind(_))
        ));
        assert!(f.engine.calls().is_empty());
    }

    #[test]
    fn test_engine_refusal_returns_to_idle() {
        let f = fixture();
        let handle = configured(&f);
        f.engine.refuse_connect(true);

        assert!(matches!(
            f.controller.connect(handle),
            Err(BridgeError::Engine(EngineError::Refused { .. }))
        ));
        assert_eq!(f.controller.status(handle).unwrap(), LifecycleStatus::Idle);

        f.engine.refuse_connect(false);
        f.controller.connect(handle).unwrap();
    }

    #[test]
    fn test_disconnect_order() {
        let f = fixture();
        let order = Arc::new(Order::default());
        let listener: Arc<dyn EventListener> = order.clone();
        f.events.set_event_listener(&listener);

        let handle = configured(&f);
        f.controller.connect(handle).unwrap();
        f.events.on_connection_success(handle);

        f.controller.disconnect(handle).unwrap();
        assert_eq!(f.controller.status(handle).unwrap(), LifecycleStatus::Disconnecting);
        assert!(f.engine.calls().contains(&EngineCall::Disconnect(handle)));

        // Engine echoes disconnecting, then completes
        f.events.on_disconnecting(handle);
        f.events.on_disconnected(handle);

        assert_eq!(
            *order.0.lock(),
            vec!["success", "disconnecting", "disconnected"]
        );
        assert_eq!(f.controller.status(handle).unwrap(), LifecycleStatus::Disconnected);
    }

    #[test]
    fn test_refused_disconnect_settles_as_disconnected() {
        let f = fixture();
        let order = Arc::new(Order::default());
        let listener: Arc<dyn EventListener> = order.clone();
        f.events.set_event_listener(&listener);

        let handle = configured(&f);
        f.controller.connect(handle).unwrap();
        f.events.on_connection_success(handle);
        f.engine.refuse_disconnect(true);

        assert!(matches!(
            f.controller.disconnect(handle),
            Err(BridgeError::Engine(EngineError::Refused { .. }))
        ));
        assert_eq!(f.controller.status(handle).unwrap(), LifecycleStatus::Disconnected);

        // A late engine report changes nothing
        f.events.on_disconnected(handle);
        assert_eq!(
            *order.0.lock(),
            vec!["success", "disconnecting", "disconnected"]
        );
    }

    struct SlowSuccess(Mutex<Vec<&'static str>>);

    impl EventListener for SlowSuccess {
        fn on_connection_success(&self, _: Handle) {
            thread::sleep(Duration::from_millis(100));
            self.0.lock().push("success");
        }
        fn on_connection_failure(&self, _: Handle) {
            self.0.lock().push("failure");
        }
        fn on_disconnecting(&self, _: Handle) {
            self.0.lock().push("disconnecting");
        }
        fn on_disconnected(&self, _: Handle) {
            self.0.lock().push("disconnected");
        }
    }

    #[test]
    fn test_disconnect_waits_for_success_notification() {
        let f = fixture();
        let slow = Arc::new(SlowSuccess(Mutex::new(Vec::new())));
        let listener: Arc<dyn EventListener> = slow.clone();
        f.events.set_event_listener(&listener);

        let handle = configured(&f);
        f.controller.connect(handle).unwrap();

        thread::scope(|scope| {
            let events = f.events.clone();
            scope.spawn(move || events.on_connection_success(handle));

            let deadline = Instant::now() + Duration::from_secs(2);
            while f.controller.status(handle).unwrap() != LifecycleStatus::Connected {
                assert!(Instant::now() < deadline);
                thread::sleep(Duration::from_millis(1));
            }
            // Success is still being delivered on the engine thread
            f.controller.disconnect(handle).unwrap();
        });

        assert_eq!(*slow.0.lock(), vec!["success", "disconnecting"]);
        assert!(f.engine.calls().contains(&EngineCall::Disconnect(handle)));
    }

    #[test]
    fn test_configure_and_connect_do_not_interleave() {
        let f = fixture();
        let handle = configured(&f);
        f.engine.slow_push("late", Duration::from_millis(200));

        let configured_late = thread::scope(|scope| {
            let late = scope.spawn(|| {
                f.controller
                    .set_connection_info(handle, &ConnectionProfile::manual("late", 3389))
            });
            thread::sleep(Duration::from_millis(20));
            f.controller.connect(handle).unwrap();
            late.join().unwrap()
        });

        // Nothing is pushed once the engine was told to connect
        let calls = f.engine.calls();
        let connect_at = calls
            .iter()
            .position(|call| *call == EngineCall::Connect(handle))
            .unwrap();
        assert!(!calls[connect_at..]
            .iter()
            .any(|call| matches!(call, EngineCall::Configure(_))));

        let snapshot = f.registry.resolve(handle).unwrap().config_snapshot().unwrap();
        match configured_late {
            Ok(()) => assert_eq!(snapshot.connection.hostname, "late"),
            Err(err) => {
                assert!(matches!(
                    err,
                    BridgeError::InvalidState {
                        state: LifecycleStatus::Connecting,
                        ..
                    }
                ));
                assert_eq!(snapshot.connection.hostname, "host");
            }
        }
    }

    #[test]
    fn test_disconnect_requires_connected() {
        let f = fixture();
        let handle = configured(&f);
        assert!(matches!(
            f.controller.disconnect(handle),
            Err(BridgeError::InvalidState {
                state: LifecycleStatus::Idle,
                ..
            })
        ));
        assert!(!f.engine.calls().contains(&EngineCall::Disconnect(handle)));
    }

    #[test]
    fn test_cancel_only_while_connecting() {
        let f = fixture();
        let handle = configured(&f);
        assert!(f.controller.cancel_connection(handle).is_err());

        f.controller.connect(handle).unwrap();
        f.controller.cancel_connection(handle).unwrap();
        assert!(f.engine.calls().contains(&EngineCall::Cancel(handle)));

        // Advisory: still connecting until the engine reports back
        let session = f.registry.resolve(handle).unwrap();
        assert_eq!(session.status(), LifecycleStatus::Connecting);
        assert!(session.cancel_requested());

        f.events.on_disconnected(handle);
        assert_eq!(session.status(), LifecycleStatus::Idle);
    }

    #[test]
    fn test_input_requires_connected() {
        let f = fixture();
        let handle = configured(&f);
        assert!(f.controller.send_key_event(handle, 0x41, true).is_err());

        f.controller.connect(handle).unwrap();
        f.events.on_connection_success(handle);

        f.controller
            .send_pointer_event(handle, 10, 20, PointerFlags::MOVE)
            .unwrap();
        f.controller.send_key_event(handle, 0x41, true).unwrap();
        f.controller.send_unicode_key_event(handle, 'é' as u32).unwrap();

        let calls = f.engine.calls();
        assert!(calls.contains(&EngineCall::Pointer(handle, 10, 20, PointerFlags::MOVE)));
        assert!(calls.contains(&EngineCall::Key(handle, 0x41, true)));
        assert!(calls.contains(&EngineCall::Unicode(handle, 0xE9)));
    }

    #[test]
    fn test_unknown_handle() {
        let f = fixture();
        let handle = f.registry.allocate().unwrap();
        f.registry.free(handle).unwrap();

        assert!(matches!(
            f.controller.connect(handle),
            Err(BridgeError::UnknownHandle(_))
        ));
        assert!(matches!(
            f.controller.status(handle),
            Err(BridgeError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_request_buffer_update() {
        let f = fixture();
        let handle = configured(&f);
        let mut out = vec![0u8; 16];
        assert!(f
            .controller
            .request_buffer_update(handle, Rect::new(0, 0, 2, 2), &mut out)
            .is_err());

        f.controller.connect(handle).unwrap();
        f.events.on_connection_success(handle);
        assert!(f
            .controller
            .request_buffer_update(handle, Rect::new(0, 0, 2, 2), &mut out)
            .unwrap());
        assert_eq!(f.controller.engine_version(), "recording");
    }
}
