use std::process::{Command, Stdio};

use crate::config::ActionConfig;

use super::{Action, ActionContext};

/// Opens a URL in the desktop's default handler via xdg-open.
pub struct UrlAction;

impl Action for UrlAction {
    fn kind(&self) -> &'static str {
        "url"
    }

    fn validate(&self, config: &ActionConfig) -> bool {
        config
            .param_str("url")
            .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"))
    }

    fn execute(&self, ctx: &ActionContext<'_>, config: &ActionConfig) -> bool {
        let Some(url) = config.param_str("url") else {
            return false;
        };
        match Command::new("xdg-open")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => true,
            Err(err) => {
                ctx.logger
                    .warn(format!("key {}: could not open url: {err}", ctx.key + 1));
                false
            }
        }
    }
}
