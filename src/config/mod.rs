use serde::Deserialize;
use std::collections::BTreeMap;

pub mod loader;

pub use loader::ConfigLoader;

pub const DEFAULT_CONFIG_DIR: &str = ".deckhand";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_BRIGHTNESS: u8 = 100;

/// Full declarative panel configuration: device settings, named styles and
/// named pages. Immutable once loaded; replaced wholesale on reload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub styles: BTreeMap<String, Style>,
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub brightness: u8,
    pub default_page: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            brightness: DEFAULT_BRIGHTNESS,
            default_page: None,
        }
    }
}

/// Text/background styling shared by buttons via the `style` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Style {
    pub font: String,
    pub font_size: f32,
    pub text_color: String,
    pub background_color: String,
    pub text_align: TextAlign,
    pub text_offset: i32,
    pub border_size: Option<u32>,
    pub border_color: String,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            font: "DejaVu Sans".to_string(),
            font_size: 14.0,
            text_color: "#FFFFFF".to_string(),
            background_color: "#000000".to_string(),
            text_align: TextAlign::Bottom,
            text_offset: 0,
            border_size: None,
            border_color: "#000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Top,
    Center,
    #[default]
    Bottom,
}

/// A named, fully independent set of key-number to button assignments.
/// Button keys are 1-based in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub buttons: BTreeMap<u8, ButtonConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonConfig {
    pub label: Option<String>,
    pub text: Option<String>,
    pub icon: Option<String>,
    pub style: Option<String>,
    pub action: Option<ActionConfig>,
    pub widget: Option<WidgetConfig>,
}

impl ButtonConfig {
    /// Text drawn on the key; `text` wins over `label`.
    pub fn display_text(&self) -> Option<&str> {
        self.text.as_deref().or(self.label.as_deref())
    }
}

/// Declared action block for a button press; extra keys are kept as raw
/// values so each action type can pull out its own parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl ActionConfig {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Declared widget block for a button with dynamic content.
#[derive(Debug, Clone, Deserialize)]
pub struct WidgetConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub update_interval: Option<f64>,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl WidgetConfig {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }
}

impl Config {
    /// Resolve a style by name, falling back to the `default` entry.
    pub fn style(&self, name: Option<&str>) -> Style {
        name.and_then(|n| self.styles.get(n))
            .or_else(|| self.styles.get("default"))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_prefers_text_over_label() {
        let button = ButtonConfig {
            label: Some("label".into()),
            text: Some("text".into()),
            ..ButtonConfig::default()
        };
        assert_eq!(button.display_text(), Some("text"));
    }

    #[test]
    fn style_falls_back_to_default_entry() {
        let mut config = Config::default();
        let mut custom = Style::default();
        custom.font_size = 20.0;
        config.styles.insert("default".into(), custom.clone());
        assert_eq!(config.style(Some("missing")), custom);
        assert_eq!(config.style(None), custom);
    }

    #[test]
    fn action_params_flatten() {
        let raw = r#"
type: command
command: "echo hi"
"#;
        let action: ActionConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(action.kind, "command");
        assert_eq!(action.param_str("command"), Some("echo hi"));
    }
}
