use std::process::{Command, Stdio};

use crate::config::ActionConfig;

use super::{Action, ActionContext};

/// Runs a shell command line. The child is spawned and left alone; its
/// exit status is never collected here.
pub struct CommandAction;

impl Action for CommandAction {
    fn kind(&self) -> &'static str {
        "command"
    }

    fn validate(&self, config: &ActionConfig) -> bool {
        config
            .param_str("command")
            .is_some_and(|cmd| !cmd.trim().is_empty())
    }

    fn execute(&self, ctx: &ActionContext<'_>, config: &ActionConfig) -> bool {
        let Some(command_line) = config.param_str("command") else {
            return false;
        };
        match Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => true,
            Err(err) => {
                ctx.logger
                    .warn(format!("key {}: command failed to start: {err}", ctx.key + 1));
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

    #[test]
    fn validate_requires_nonempty_command() {
        let action = CommandAction;
        let valid: ActionConfig = serde_yaml::from_str("type: command\ncommand: 'true'").unwrap();
        let empty: ActionConfig = serde_yaml::from_str("type: command\ncommand: '  '").unwrap();
        let missing: ActionConfig = serde_yaml::from_str("type: command").unwrap();
        assert!(action.validate(&valid));
        assert!(!action.validate(&empty));
        assert!(!action.validate(&missing));
    }

    #[test]
    fn executes_a_trivial_command() {
        let action = CommandAction;
        let config: ActionConfig = serde_yaml::from_str("type: command\ncommand: 'true'").unwrap();
        let button = ButtonConfig::default();
        let logger = Logger::new(LogLevel::Error, None);
        let ctx = ActionContext {
            key: 0,
            button: &button,
            platform: None,
            logger: &logger,
        };
        assert!(action.execute(&ctx, &config));
    }
}
