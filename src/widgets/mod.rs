use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};
use image::RgbaImage;

use crate::config::WidgetConfig;
use crate::{Error, Result};

pub mod clock;
pub mod system;

pub use clock::ClockWidget;
pub use system::{CpuWidget, DiskWidget, MemoryWidget, NetworkWidget};

/// Typed data produced by a widget fetch. Render methods turn this into
/// text/icons; the manager compares values to detect changes.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetValue {
    Time(DateTime<Local>),
    Percent(f32),
    Memory { used_bytes: u64, total_bytes: u64 },
    Network { rx_bytes_per_sec: u64, tx_bytes_per_sec: u64 },
    Text(String),
    None,
}

/// A source of dynamic button content. Fetch may hit slow or failing data
/// sources; rendering must be pure and cheap.
pub trait Widget: Send {
    fn kind(&self) -> &'static str;

    /// Default refresh cadence; a per-button `update_interval` in the
    /// configuration overrides it.
    fn update_interval(&self) -> Duration;

    /// Parameters the configuration must supply for this widget.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Cheap semantic validation of the configured parameters.
    fn validate(&self) -> bool {
        true
    }

    fn fetch(&mut self) -> Result<WidgetValue>;

    fn render_text(&self, value: &WidgetValue) -> String;

    fn render_icon(&self, _value: &WidgetValue) -> Option<RgbaImage> {
        None
    }

    /// Value to render when fetch fails and no previous data exists.
    fn fallback(&self) -> WidgetValue {
        WidgetValue::None
    }
}

type WidgetFactory = fn(&WidgetConfig) -> Result<Box<dyn Widget>>;

/// Maps declared widget type strings to constructors. Types are registered
/// explicitly at startup; an unknown type is a configuration error surfaced
/// when the page is drawn.
pub struct WidgetRegistry {
    factories: HashMap<&'static str, WidgetFactory>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("datetime", ClockWidget::from_config);
        registry.register("cpu", CpuWidget::from_config);
        registry.register("memory", MemoryWidget::from_config);
        registry.register("disk", DiskWidget::from_config);
        registry.register("network", NetworkWidget::from_config);
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: WidgetFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn create(&self, config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        let factory = self
            .factories
            .get(config.kind.as_str())
            .ok_or_else(|| Error::DataSource(format!("unknown widget type '{}'", config.kind)))?;
        let widget = factory(config)?;

        for param in widget.required_params() {
            if config.params.get(*param).is_none() {
                return Err(Error::DataSource(format!(
                    "widget '{}' requires parameter '{param}'",
                    config.kind
                )));
            }
        }
        if !widget.validate() {
            return Err(Error::DataSource(format!(
                "widget '{}' has invalid parameters",
                config.kind
            )));
        }
        Ok(widget)
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
