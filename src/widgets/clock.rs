use std::fmt::Write as _;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::Local;

use crate::config::WidgetConfig;
use crate::Result;

use super::{Widget, WidgetValue};

const DEFAULT_FORMAT: &str = "%H:%M:%S";

/// Local date/time widget. The refresh cadence is derived from the
/// configured strftime format so a seconds-less clock is not redrawn every
/// second.
pub struct ClockWidget {
    format: String,
}

impl ClockWidget {
    pub fn from_config(config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        let format = config
            .param_str("format")
            .unwrap_or(DEFAULT_FORMAT)
            .to_string();
        Ok(Box::new(Self { format }))
    }
}

impl Widget for ClockWidget {
    fn kind(&self) -> &'static str {
        "datetime"
    }

    fn update_interval(&self) -> Duration {
        if contains_specifier(&self.format, &["%S", "%T", "%X", "%r", "%s"]) {
            Duration::from_secs(1)
        } else if contains_specifier(&self.format, &["%M", "%H", "%I", "%R", "%p", "%P"]) {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(60)
        }
    }

    fn validate(&self) -> bool {
        !StrftimeItems::new(&self.format).any(|item| matches!(item, Item::Error))
    }

    fn fetch(&mut self) -> Result<WidgetValue> {
        Ok(WidgetValue::Time(Local::now()))
    }

    fn render_text(&self, value: &WidgetValue) -> String {
        let WidgetValue::Time(time) = value else {
            return String::new();
        };
        let mut out = String::new();
        // DelayedFormat reports malformed specifiers through fmt::Error.
        if write!(out, "{}", time.format(&self.format)).is_err() {
            out.clear();
            let _ = write!(out, "{}", time.format(DEFAULT_FORMAT));
        }
        out
    }
}

fn contains_specifier(format: &str, specifiers: &[&str]) -> bool {
    specifiers.iter().any(|s| format.contains(s))
}
