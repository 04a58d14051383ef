use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use crate::{Error, Result};

use super::{KeyCallback, KeyImageFormat, Panel, PanelEnumerator};

/// Minimal scripted panel used in tests: failures can be injected per
/// operation and every image push is recorded.
#[derive(Default)]
struct FakeState {
    opened: bool,
    closed: bool,
    reset_count: usize,
    brightness: Option<u8>,
    fail_open: bool,
    fail_reset: bool,
    fail_probe: bool,
    fail_writes: bool,
    write_delay: Option<Duration>,
    images: HashMap<u8, Vec<u8>>,
    pushes: Vec<(u8, Vec<u8>)>,
    callback: Option<Arc<dyn Fn(u8, bool) + Send + Sync>>,
}

pub struct FakePanel {
    state: Arc<Mutex<FakeState>>,
    key_count: u8,
}

impl Panel for FakePanel {
    fn model(&self) -> &str {
        "Fake Panel"
    }

    fn key_count(&self) -> u8 {
        self.key_count
    }

    fn key_image_format(&self) -> KeyImageFormat {
        KeyImageFormat {
            width: 72,
            height: 72,
        }
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(Error::Transport("scripted open failure".into()));
        }
        state.opened = true;
        state.closed = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reset {
            return Err(Error::Transport("scripted reset failure".into()));
        }
        state.reset_count += 1;
        state.images.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(Error::Transport("scripted write failure".into()));
        }
        state.brightness = Some(percent);
        Ok(())
    }

    fn set_key_image(&mut self, key: u8, image: &[u8]) -> Result<()> {
        let delay = {
            let state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(Error::Transport("scripted write failure".into()));
            }
            state.write_delay
        };
        // Delay outside the lock so test observers are not blocked.
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock().unwrap();
        state.images.insert(key, image.to_vec());
        state.pushes.push((key, image.to_vec()));
        Ok(())
    }

    fn set_key_callback(&mut self, callback: KeyCallback) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.callback = Some(Arc::from(callback));
        Ok(())
    }

    fn probe(&mut self) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.fail_probe {
            return Err(Error::Transport("scripted probe failure".into()));
        }
        Ok(())
    }
}

/// Shared observer/controller for a `FakePanel`; lives on the test side
/// while the panel itself is owned by the session under test.
#[derive(Clone)]
pub struct FakePanelHandle {
    state: Arc<Mutex<FakeState>>,
    key_count: u8,
}

impl FakePanelHandle {
    pub fn standalone(key_count: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            key_count,
        }
    }

    pub fn panel(&self) -> Box<dyn Panel> {
        Box::new(FakePanel {
            state: self.state.clone(),
            key_count: self.key_count,
        })
    }

    pub fn was_opened(&self) -> bool {
        self.state.lock().unwrap().opened
    }

    pub fn was_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().unwrap().reset_count
    }

    pub fn brightness(&self) -> Option<u8> {
        self.state.lock().unwrap().brightness
    }

    pub fn key_image(&self, key: u8) -> Option<Vec<u8>> {
        self.state.lock().unwrap().images.get(&key).cloned()
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().unwrap().pushes.len()
    }

    pub fn pushes_for(&self, key: u8) -> usize {
        self.state
            .lock()
            .unwrap()
            .pushes
            .iter()
            .filter(|(k, _)| *k == key)
            .count()
    }

    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    pub fn fail_reset(&self) {
        self.state.lock().unwrap().fail_reset = true;
    }

    pub fn fail_probe(&self) {
        self.state.lock().unwrap().fail_probe = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = Some(delay);
    }

    /// Simulate a physical key transition via the registered callback.
    pub fn press(&self, key: u8, pressed: bool) {
        let callback = self.state.lock().unwrap().callback.clone();
        if let Some(callback) = callback {
            callback(key, pressed);
        }
    }
}

/// Scripted enumerator: panels are registered up front and "plugged in" or
/// "unplugged" at will; every enumeration call is timestamped so tests can
/// assert reconnect throttling.
pub struct FakeEnumerator {
    panels: Arc<Mutex<Vec<FakePanelHandle>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
    absent: Arc<AtomicBool>,
}

impl FakeEnumerator {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            panels: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            absent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_panel(&self, key_count: u8) -> FakePanelHandle {
        let handle = FakePanelHandle::standalone(key_count);
        self.panels.lock().unwrap().push(handle.clone());
        handle
    }

    pub fn handle(&self) -> FakeEnumeratorHandle {
        FakeEnumeratorHandle {
            panels: self.panels.clone(),
            calls: self.calls.clone(),
            absent: self.absent.clone(),
        }
    }
}

impl PanelEnumerator for FakeEnumerator {
    fn enumerate(&mut self) -> Result<Vec<Box<dyn Panel>>> {
        self.calls.lock().unwrap().push(Instant::now());
        if self.absent.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self
            .panels
            .lock()
            .unwrap()
            .iter()
            .map(|handle| handle.panel())
            .collect())
    }
}

#[derive(Clone)]
pub struct FakeEnumeratorHandle {
    panels: Arc<Mutex<Vec<FakePanelHandle>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
    absent: Arc<AtomicBool>,
}

impl FakeEnumeratorHandle {
    pub fn push_panel(&self, key_count: u8) -> FakePanelHandle {
        let handle = FakePanelHandle::standalone(key_count);
        self.panels.lock().unwrap().push(handle.clone());
        handle
    }

    pub fn set_absent(&self, absent: bool) {
        self.absent.store(absent, Ordering::SeqCst);
    }

    pub fn enumerate_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn enumerate_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}
