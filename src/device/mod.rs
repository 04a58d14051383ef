use crate::Result;

pub mod fake;
pub mod hid;
pub mod manager;

pub use manager::DeviceManager;

/// Callback invoked from the driver's reader thread on key state changes.
/// Receives the zero-based key index and whether the key is now pressed.
pub type KeyCallback = Box<dyn Fn(u8, bool) + Send + Sync + 'static>;

/// Pixel dimensions of a single key display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyImageFormat {
    pub width: u32,
    pub height: u32,
}

/// One physical button-panel device. Every operation may fail; callers never
/// assume success and degrade transport errors to "disconnected".
pub trait Panel: Send {
    fn model(&self) -> &str;
    fn key_count(&self) -> u8;
    fn key_image_format(&self) -> KeyImageFormat;

    fn open(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn set_brightness(&mut self, percent: u8) -> Result<()>;
    fn set_key_image(&mut self, key: u8, image: &[u8]) -> Result<()>;
    fn set_key_callback(&mut self, callback: KeyCallback) -> Result<()>;
    /// Lightweight, side-effect-free liveness probe.
    fn probe(&mut self) -> Result<()>;
}

/// Device discovery. Enumeration happens on every call so USB hot-plug is
/// picked up; results are never cached.
pub trait PanelEnumerator: Send {
    fn enumerate(&mut self) -> Result<Vec<Box<dyn Panel>>>;
}

/// Live, exclusively-owned handle to a connected panel plus its static
/// capabilities. Exactly zero or one session exists at any time; other
/// components only borrow it for the duration of a single call.
pub struct DeviceSession {
    panel: Box<dyn Panel>,
    model: String,
    key_count: u8,
    image_format: KeyImageFormat,
}

impl DeviceSession {
    pub fn new(panel: Box<dyn Panel>) -> Self {
        let model = panel.model().to_string();
        let key_count = panel.key_count();
        let image_format = panel.key_image_format();
        Self {
            panel,
            model,
            key_count,
            image_format,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn key_count(&self) -> u8 {
        self.key_count
    }

    pub fn image_format(&self) -> KeyImageFormat {
        self.image_format
    }

    pub fn reset(&mut self) -> Result<()> {
        self.panel.reset()
    }

    pub fn close(&mut self) -> Result<()> {
        self.panel.close()
    }

    pub fn set_brightness(&mut self, percent: u8) -> Result<()> {
        self.panel.set_brightness(percent)
    }

    pub fn set_key_image(&mut self, key: u8, image: &[u8]) -> Result<()> {
        self.panel.set_key_image(key, image)
    }

    pub fn set_key_callback(&mut self, callback: KeyCallback) -> Result<()> {
        self.panel.set_key_callback(callback)
    }

    pub fn probe(&mut self) -> Result<()> {
        self.panel.probe()
    }
}
