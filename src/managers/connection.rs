use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::app::Logger;
use crate::device::{DeviceManager, DeviceSession};
use crate::platform::Platform;
use crate::Result;

/// Minimum gap between reconnection attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// How often an established session is health-checked.
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Monitor loop timing. Tests compress these to keep scenarios fast.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTiming {
    pub reconnect_interval: Duration,
    pub check_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            reconnect_interval: RECONNECT_INTERVAL,
            check_interval: CONNECTION_CHECK_INTERVAL,
            poll_interval: Duration::from_millis(10),
        }
    }
}

pub type ConnectedHook = Box<dyn Fn(&mut DeviceSession) + Send + Sync>;
pub type DisconnectedHook = Box<dyn Fn() + Send + Sync>;

struct ConnectionShared {
    device_manager: Mutex<DeviceManager>,
    session: Mutex<Option<DeviceSession>>,
    on_connected: Mutex<Option<ConnectedHook>>,
    on_disconnected: Mutex<Option<DisconnectedHook>>,
    running: AtomicBool,
    shutting_down: AtomicBool,
    locked: AtomicBool,
    /// `None` means a reconnect attempt is immediately eligible.
    last_attempt: Mutex<Option<Instant>>,
    platform: Option<Arc<dyn Platform>>,
    logger: Arc<Logger>,
    timing: ConnectionTiming,
}

/// Session lifecycle state machine: establishes, supervises and tears down
/// the single device session, with throttled reconnection and screen-lock
/// integration. Session failures are never fatal; the monitor loop only
/// exits on an explicit stop.
pub struct ConnectionManager {
    shared: Arc<ConnectionShared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        device_manager: DeviceManager,
        platform: Option<Arc<dyn Platform>>,
        logger: Arc<Logger>,
    ) -> Self {
        Self::with_timing(device_manager, platform, logger, ConnectionTiming::default())
    }

    pub fn with_timing(
        device_manager: DeviceManager,
        platform: Option<Arc<dyn Platform>>,
        logger: Arc<Logger>,
        timing: ConnectionTiming,
    ) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                device_manager: Mutex::new(device_manager),
                session: Mutex::new(None),
                on_connected: Mutex::new(None),
                on_disconnected: Mutex::new(None),
                running: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                locked: AtomicBool::new(false),
                last_attempt: Mutex::new(None),
                platform,
                logger,
                timing,
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Hook run on a freshly opened session, before it becomes visible to
    /// the rest of the daemon. This is where brightness, the key callback
    /// and the initial page draw happen.
    pub fn set_on_connected(&self, hook: ConnectedHook) {
        *lock(&self.shared.on_connected) = Some(hook);
    }

    pub fn set_on_disconnected(&self, hook: DisconnectedHook) {
        *lock(&self.shared.on_disconnected) = Some(hook);
    }

    pub fn connect(&self) -> bool {
        self.shared.connect()
    }

    pub fn disconnect(&self) {
        self.shared.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Borrow the live session for one call. Returns `None` when there is
    /// no session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut DeviceSession) -> R) -> Option<R> {
        let mut session = lock(&self.shared.session);
        session.as_mut().map(f)
    }

    /// Spawn the monitor thread. Idempotent: a second call while running
    /// warns and does nothing.
    pub fn start_monitoring(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            self.shared.logger.warn("connection monitor already running");
            return Ok(());
        }
        self.shared.shutting_down.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("deckhand-monitor".into())
            .spawn(move || monitor_loop(&shared))?;
        *lock(&self.monitor) = Some(handle);
        self.shared.logger.debug("connection monitor started");
        Ok(())
    }

    /// Stop the monitor thread and wait for it. The shutdown flag goes up
    /// before the run flag drops so the loop never mistakes shutdown for a
    /// device failure. Safe to call repeatedly.
    pub fn stop_monitoring(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.monitor).take() {
            let _ = handle.join();
            self.shared.logger.debug("connection monitor stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

impl ConnectionShared {
    /// One connection attempt. The attempt timestamp is recorded up front
    /// so failures are throttled exactly like successes.
    fn connect(&self) -> bool {
        *lock(&self.last_attempt) = Some(Instant::now());

        // The device manager lock is released before the session lock is
        // taken; the two are never held together.
        let opened = {
            let mut manager = lock(&self.device_manager);
            manager.connect()
        };
        let Some(mut session) = opened else {
            return false;
        };

        if let Some(hook) = lock(&self.on_connected).as_ref() {
            hook(&mut session);
        }
        *lock(&self.session) = Some(session);
        true
    }

    /// Tear down the session if one exists. The session slot is cleared
    /// unconditionally; whether the device acknowledged the teardown is
    /// only logged.
    fn disconnect(&self) {
        let taken = lock(&self.session).take();
        let Some(mut session) = taken else {
            return;
        };

        let clean = {
            let manager = lock(&self.device_manager);
            manager.disconnect(&mut session)
        };
        if clean {
            self.logger.info("panel disconnected");
        } else {
            self.logger.info("panel disconnected (device did not acknowledge)");
        }

        if let Some(hook) = lock(&self.on_disconnected).as_ref() {
            hook();
        }
    }

    fn is_connected(&self) -> bool {
        let mut session = lock(&self.session);
        match session.as_mut() {
            // Probing under the session lock is safe: no code path takes
            // the session lock while holding the device manager's.
            Some(session) => lock(&self.device_manager).is_connected(session),
            None => false,
        }
    }

    fn has_session(&self) -> bool {
        lock(&self.session).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn monitor_loop(shared: &ConnectionShared) {
    let timing = shared.timing;
    // First health check is due immediately.
    let mut last_check: Option<Instant> = None;
    let mut was_locked = false;

    while shared.running.load(Ordering::SeqCst) && !shared.shutting_down.load(Ordering::SeqCst) {
        monitor_iteration(shared, &mut last_check, &mut was_locked);
        thread::sleep(timing.poll_interval);
    }
    shared.logger.debug("connection monitor loop exiting");
}

fn monitor_iteration(
    shared: &ConnectionShared,
    last_check: &mut Option<Instant>,
    was_locked: &mut bool,
) {
    let now = Instant::now();

    // Screen lock transitions are edge-triggered: disconnect on lock,
    // immediate reconnect (cooldown bypass) on unlock. A failing probe is
    // logged and otherwise ignored: lock state keeps its last value and the
    // health check below still runs.
    if let Some(platform) = shared.platform.as_ref() {
        match platform.is_screen_locked() {
            Ok(locked_now) => {
                if locked_now && !*was_locked {
                    shared.logger.info("screen locked; releasing panel");
                    shared.locked.store(true, Ordering::SeqCst);
                    shared.disconnect();
                } else if !locked_now && *was_locked {
                    shared.logger.info("screen unlocked; reconnecting");
                    shared.locked.store(false, Ordering::SeqCst);
                    shared.connect();
                }
                *was_locked = locked_now;
            }
            Err(err) => {
                shared
                    .logger
                    .debug(format!("screen-lock probe failed: {err}"));
            }
        }
    }

    if shared.locked.load(Ordering::SeqCst) {
        return;
    }

    let check_due = match *last_check {
        None => true,
        Some(last) => now.duration_since(last) >= shared.timing.check_interval,
    };
    if check_due {
        *last_check = Some(now);
        if shared.has_session() && !shared.is_connected() {
            shared.logger.warn("panel unresponsive; dropping session");
            shared.disconnect();
            // The device vanished on its own: retry without cooldown.
            *lock(&shared.last_attempt) = None;
        }
    }

    if !shared.has_session() {
        let eligible = match *lock(&shared.last_attempt) {
            None => true,
            Some(last) => now.duration_since(last) >= shared.timing.reconnect_interval,
        };
        if eligible {
            shared.connect();
        }
    }
}
