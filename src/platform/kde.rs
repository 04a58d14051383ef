use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::app::Logger;
use crate::{Error, Result};

use super::Platform;

/// KDE Plasma integration via command-line tools. D-Bus is reached through
/// qdbus6/qdbus rather than a bus library; logind's LockedHint is the last
/// resort when neither is installed.
pub struct KdePlatform {
    logger: Arc<Logger>,
}

impl KdePlatform {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }

    /// Environment-based session detection.
    pub fn is_present() -> bool {
        if std::env::var("KDE_FULL_SESSION").is_ok() {
            return true;
        }
        std::env::var("XDG_CURRENT_DESKTOP")
            .map(|desktop| desktop.to_ascii_lowercase().contains("kde"))
            .unwrap_or(false)
    }

    fn screensaver_active(binary: &str) -> Option<bool> {
        let output = Command::new(binary)
            .args(["org.freedesktop.ScreenSaver", "/ScreenSaver", "GetActive"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        match String::from_utf8_lossy(&output.stdout).trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    fn logind_locked_hint() -> Option<bool> {
        let session = std::env::var("XDG_SESSION_ID").unwrap_or_else(|_| "self".to_string());
        let output = Command::new("loginctl")
            .args(["show-session", &session, "-p", "LockedHint"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        match String::from_utf8_lossy(&output.stdout).trim() {
            "LockedHint=yes" => Some(true),
            "LockedHint=no" => Some(false),
            _ => None,
        }
    }

    fn try_launcher(&self, program: &str, args: &[&str]) -> bool {
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => {
                self.logger.debug(format!("launched via {program}"));
                true
            }
            Err(_) => false,
        }
    }
}

impl Platform for KdePlatform {
    fn name(&self) -> &'static str {
        "kde"
    }

    /// Probe order: qdbus6, qdbus, loginctl. Errors only when every probe
    /// is unavailable or unparseable.
    fn is_screen_locked(&self) -> Result<bool> {
        for binary in ["qdbus6", "qdbus"] {
            if let Some(active) = Self::screensaver_active(binary) {
                return Ok(active);
            }
        }
        if let Some(locked) = Self::logind_locked_hint() {
            return Ok(locked);
        }
        Err(Error::Platform(
            "no working screen-lock probe (tried qdbus6, qdbus, loginctl)".to_string(),
        ))
    }

    fn launch_application(&self, target: &str) -> bool {
        let desktop_id = target.strip_suffix(".desktop").unwrap_or(target);
        if self.try_launcher("kioclient", &["exec", target])
            || self.try_launcher("gtk-launch", &[desktop_id])
            || self.try_launcher("xdg-open", &[target])
        {
            return true;
        }
        self.logger
            .warn(format!("could not launch application '{target}'"));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_stable() {
        use crate::app::LogLevel;
        let platform = KdePlatform::new(Arc::new(Logger::new(LogLevel::Error, None)));
        assert_eq!(platform.name(), "kde");
    }
}
