use std::collections::HashMap;

use crate::app::Logger;
use crate::config::{ActionConfig, ButtonConfig};
use crate::platform::Platform;

pub mod application;
pub mod command;
pub mod url;

pub use application::ApplicationAction;
pub use command::CommandAction;
pub use url::UrlAction;

/// Page switches are not dispatched here: they need the page manager and
/// the device session, so the controller handles them directly.
pub const PAGE_ACTION: &str = "page";

/// Everything an action execution may need, borrowed for the call.
pub struct ActionContext<'a> {
    pub key: u8,
    pub button: &'a ButtonConfig,
    pub platform: Option<&'a dyn Platform>,
    pub logger: &'a Logger,
}

/// One executable action type. Execution is fire-and-forget: the return
/// value says whether the action was started, and nothing waits on it.
pub trait Action: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Whether the declared parameters are usable.
    fn validate(&self, config: &ActionConfig) -> bool;

    fn execute(&self, ctx: &ActionContext<'_>, config: &ActionConfig) -> bool;
}

/// Maps declared action type strings to implementations.
pub struct ActionRegistry {
    actions: HashMap<&'static str, Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CommandAction));
        registry.register(Box::new(UrlAction));
        registry.register(Box::new(ApplicationAction));
        registry
    }

    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.insert(action.kind(), action);
    }

    /// Look up, validate and execute. Every failure path logs and returns
    /// false; a key press must never take the daemon down.
    pub fn dispatch(&self, ctx: &ActionContext<'_>, config: &ActionConfig) -> bool {
        if config.kind == PAGE_ACTION {
            ctx.logger
                .warn("page actions are routed by the controller, not the registry");
            return false;
        }
        let Some(action) = self.actions.get(config.kind.as_str()) else {
            ctx.logger
                .warn(format!("key {}: unknown action type '{}'", ctx.key + 1, config.kind));
            return false;
        };
        if !action.validate(config) {
            ctx.logger.warn(format!(
                "key {}: invalid parameters for '{}' action",
                ctx.key + 1,
                config.kind
            ));
            return false;
        }
        ctx.logger
            .debug(format!("key {}: executing '{}' action", ctx.key + 1, config.kind));
        action.execute(ctx, config)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;

    fn context<'a>(button: &'a ButtonConfig, logger: &'a Logger) -> ActionContext<'a> {
        ActionContext {
            key: 0,
            button,
            platform: None,
            logger,
        }
    }

    fn action_config(yaml: &str) -> ActionConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let registry = ActionRegistry::with_builtins();
        let button = ButtonConfig::default();
        let logger = Logger::new(LogLevel::Error, None);
        assert!(!registry.dispatch(&context(&button, &logger), &action_config("type: teleport")));
    }

    #[test]
    fn page_actions_are_not_dispatched() {
        let registry = ActionRegistry::with_builtins();
        let button = ButtonConfig::default();
        let logger = Logger::new(LogLevel::Error, None);
        assert!(!registry.dispatch(
            &context(&button, &logger),
            &action_config("type: page\npage: main")
        ));
    }

    #[test]
    fn missing_parameters_fail_validation() {
        let registry = ActionRegistry::with_builtins();
        let button = ButtonConfig::default();
        let logger = Logger::new(LogLevel::Error, None);
        assert!(!registry.dispatch(&context(&button, &logger), &action_config("type: command")));
        assert!(!registry.dispatch(&context(&button, &logger), &action_config("type: url")));
    }
}
