use std::sync::Arc;

use crate::app::Logger;
use crate::Result;

pub mod kde;

pub use kde::KdePlatform;

/// Desktop-environment integration. Everything here talks to external
/// processes, so every operation can fail; callers degrade failures to
/// "unlocked" / "not launched" and keep going.
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the session's screen is currently locked.
    fn is_screen_locked(&self) -> Result<bool>;

    /// Launch a desktop application; returns whether the launcher was
    /// started.
    fn launch_application(&self, target: &str) -> bool;
}

/// Detect the running desktop environment. `None` means no integration:
/// the daemon works, minus screen-lock handling and application launching.
pub fn detect(logger: &Arc<Logger>) -> Option<Arc<dyn Platform>> {
    if KdePlatform::is_present() {
        logger.info("detected KDE Plasma session");
        return Some(Arc::new(KdePlatform::new(logger.clone())));
    }
    logger.info("no supported desktop environment detected");
    None
}
