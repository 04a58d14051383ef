use std::sync::Arc;

use crate::app::Logger;
use crate::Result;

use super::{DeviceSession, Panel, PanelEnumerator};

/// Low-level connect/disconnect/health operations on panel devices.
/// All transport failures degrade to "no session"; nothing here is fatal.
pub struct DeviceManager {
    enumerator: Box<dyn PanelEnumerator>,
    logger: Arc<Logger>,
}

impl DeviceManager {
    pub fn new(enumerator: Box<dyn PanelEnumerator>, logger: Arc<Logger>) -> Self {
        Self { enumerator, logger }
    }

    /// Connect to the first available panel. Devices are re-enumerated on
    /// every call so a freshly plugged panel is found without restart.
    pub fn connect(&mut self) -> Option<DeviceSession> {
        let panels = match self.enumerator.enumerate() {
            Ok(panels) => panels,
            Err(err) => {
                self.logger.error(format!("device enumeration failed: {err}"));
                return None;
            }
        };

        let Some(panel) = panels.into_iter().next() else {
            self.logger.debug("no panel devices detected during enumeration");
            return None;
        };

        match self.open_and_reset(panel) {
            Ok(session) => {
                self.logger.info(format!(
                    "connected to {} ({} keys)",
                    session.model(),
                    session.key_count()
                ));
                Some(session)
            }
            Err(err) => {
                self.logger.error(format!("panel connection failed: {err}"));
                None
            }
        }
    }

    fn open_and_reset(&self, mut panel: Box<dyn Panel>) -> Result<DeviceSession> {
        panel.open()?;
        // Clear whatever the previous owner left on the displays.
        panel.reset()?;
        Ok(DeviceSession::new(panel))
    }

    /// Best-effort teardown. Reset and close are attempted independently so
    /// a failed reset never prevents the close call. The return value is
    /// purely informational; callers must not branch on it.
    pub fn disconnect(&self, session: &mut DeviceSession) -> bool {
        let mut clean = true;

        if let Err(err) = session.reset() {
            self.logger
                .debug(format!("could not reset panel (may be unplugged): {err}"));
            clean = false;
        }

        if let Err(err) = session.close() {
            self.logger
                .debug(format!("could not close panel connection: {err}"));
            clean = false;
        }

        clean
    }

    /// One lightweight probe; any error at all reads as "disconnected".
    pub fn is_connected(&self, session: &mut DeviceSession) -> bool {
        match session.probe() {
            Ok(()) => true,
            Err(err) => {
                self.logger.debug(format!("panel not responsive: {err}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::device::fake::{FakeEnumerator, FakePanelHandle};

    fn new_logger() -> Arc<Logger> {
        Arc::new(Logger::new(LogLevel::Error, None))
    }

    #[test]
    fn connect_returns_none_when_no_devices() {
        let enumerator = FakeEnumerator::new();
        let mut manager = DeviceManager::new(Box::new(enumerator), new_logger());
        assert!(manager.connect().is_none());
    }

    #[test]
    fn connect_opens_and_resets_first_device() {
        let enumerator = FakeEnumerator::new();
        let handle = enumerator.push_panel(15);
        let mut manager = DeviceManager::new(Box::new(enumerator), new_logger());
        let session = manager.connect().expect("panel should connect");
        assert_eq!(session.key_count(), 15);
        assert!(handle.was_opened());
        assert_eq!(handle.reset_count(), 1);
    }

    #[test]
    fn connect_fails_when_open_errors() {
        let enumerator = FakeEnumerator::new();
        let handle = enumerator.push_panel(15);
        handle.fail_open();
        let mut manager = DeviceManager::new(Box::new(enumerator), new_logger());
        assert!(manager.connect().is_none());
    }

    #[test]
    fn disconnect_attempts_close_even_after_reset_failure() {
        let enumerator = FakeEnumerator::new();
        let handle = enumerator.push_panel(15);
        let mut manager = DeviceManager::new(Box::new(enumerator), new_logger());
        let mut session = manager.connect().unwrap();

        handle.fail_reset();
        let clean = manager.disconnect(&mut session);
        assert!(!clean);
        assert!(handle.was_closed());
    }

    #[test]
    fn is_connected_degrades_probe_errors() {
        let enumerator = FakeEnumerator::new();
        let handle = enumerator.push_panel(15);
        let mut manager = DeviceManager::new(Box::new(enumerator), new_logger());
        let mut session = manager.connect().unwrap();

        assert!(manager.is_connected(&mut session));
        handle.fail_probe();
        assert!(!manager.is_connected(&mut session));
    }

    #[test]
    fn fake_handle_reports_key_images() {
        let handle = FakePanelHandle::standalone(6);
        let mut session = DeviceSession::new(handle.panel());
        session.set_key_image(2, &[1, 2, 3]).unwrap();
        assert_eq!(handle.key_image(2), Some(vec![1, 2, 3]));
    }
}
