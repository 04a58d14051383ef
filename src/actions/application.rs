use std::process::{Command, Stdio};

use crate::config::ActionConfig;

use super::{Action, ActionContext};

/// Launches a desktop application through the platform integration, or by
/// spawning the named program directly when no platform was detected.
pub struct ApplicationAction;

impl Action for ApplicationAction {
    fn kind(&self) -> &'static str {
        "application"
    }

    fn validate(&self, config: &ActionConfig) -> bool {
        config
            .param_str("application")
            .is_some_and(|app| !app.trim().is_empty())
    }

    fn execute(&self, ctx: &ActionContext<'_>, config: &ActionConfig) -> bool {
        let Some(application) = config.param_str("application") else {
            return false;
        };

        if let Some(platform) = ctx.platform {
            return platform.launch_application(application);
        }

        match Command::new(application)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => true,
            Err(err) => {
                ctx.logger.warn(format!(
                    "key {}: could not launch '{application}': {err}",
                    ctx.key + 1
                ));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{LogLevel, Logger};
    use crate::config::ButtonConfig;
    use crate::platform::Platform;
    use crate::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingPlatform {
        launches: AtomicUsize,
    }

    impl Platform for RecordingPlatform {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn is_screen_locked(&self) -> Result<bool> {
            Ok(false)
        }

        fn launch_application(&self, _target: &str) -> bool {
            self.launches.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn prefers_the_platform_launcher() {
        let platform = RecordingPlatform {
            launches: AtomicUsize::new(0),
        };
        let config: ActionConfig =
            serde_yaml::from_str("type: application\napplication: editor").unwrap();
        let button = ButtonConfig::default();
        let logger = Logger::new(LogLevel::Error, None);
        let ctx = ActionContext {
            key: 0,
            button: &button,
            platform: Some(&platform),
            logger: &logger,
        };

        assert!(ApplicationAction.execute(&ctx, &config));
        assert_eq!(platform.launches.load(Ordering::SeqCst), 1);
    }
}
