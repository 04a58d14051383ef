use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{Error, Result};

use super::{Config, Style, DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE};

/// Configs larger than this are rejected outright.
pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Loads the YAML page configuration and tracks the file's mtime so the
/// daemon can poll for wholesale reloads.
pub struct ConfigLoader {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigLoader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_modified: None,
        }
    }

    /// Build a loader from an optional CLI override, defaulting to
    /// `~/.deckhand/config.yaml`.
    pub fn from_options(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(p) => PathBuf::from(p),
            None => default_config_path()?,
        };
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, validate and default-fill the configuration.
    pub fn load(&mut self) -> Result<Config> {
        if !self.path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                self.path.display()
            )));
        }

        let metadata = fs::metadata(&self.path)?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(Error::Config(format!(
                "configuration file too large: {} bytes (maximum {MAX_CONFIG_SIZE})",
                metadata.len()
            )));
        }

        let raw = fs::read_to_string(&self.path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        validate(&config)?;
        apply_defaults(&mut config);

        self.last_modified = metadata.modified().ok();
        Ok(config)
    }

    /// Whether the file's mtime has moved since the last successful load.
    /// A missing file or unreadable metadata reads as "unchanged".
    pub fn changed(&self) -> bool {
        let Some(last) = self.last_modified else {
            return false;
        };
        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(current) => current != last,
            Err(_) => false,
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.pages.is_empty() {
        return Err(Error::Config(
            "configuration must have a non-empty 'pages' section".to_string(),
        ));
    }
    for (name, page) in &config.pages {
        for key in page.buttons.keys() {
            if *key == 0 {
                return Err(Error::Config(format!(
                    "page '{name}': button numbers are 1-based, found 0"
                )));
            }
        }
    }
    Ok(())
}

fn apply_defaults(config: &mut Config) {
    config
        .styles
        .entry("default".to_string())
        .or_insert_with(Style::default);
}

fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::InvalidArgs("HOME not set; cannot locate config directory".into()))?;
    Ok(home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    const MINIMAL: &str = r#"
pages:
  main:
    buttons:
      1:
        label: "Hello"
"#;

    #[test]
    fn loads_minimal_config_and_injects_default_style() {
        let (_dir, path) = write_config(MINIMAL);
        let mut loader = ConfigLoader::new(path);
        let config = loader.load().unwrap();
        assert!(config.pages.contains_key("main"));
        assert!(config.styles.contains_key("default"));
        assert_eq!(config.device.brightness, 100);
    }

    #[test]
    fn rejects_missing_file() {
        let mut loader = ConfigLoader::new(PathBuf::from("/nonexistent/config.yaml"));
        let err = loader.load().unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn rejects_empty_pages() {
        let (_dir, path) = write_config("pages: {}\n");
        let mut loader = ConfigLoader::new(path);
        let err = loader.load().unwrap_err();
        assert!(format!("{err}").contains("non-empty 'pages'"));
    }

    #[test]
    fn rejects_zero_button_number() {
        let (_dir, path) = write_config(
            r#"
pages:
  main:
    buttons:
      0:
        label: "bad"
"#,
        );
        let mut loader = ConfigLoader::new(path);
        let err = loader.load().unwrap_err();
        assert!(format!("{err}").contains("1-based"));
    }

    #[test]
    fn rejects_invalid_yaml() {
        let (_dir, path) = write_config("pages: [not: a: mapping\n");
        let mut loader = ConfigLoader::new(path);
        assert!(loader.load().is_err());
    }

    #[test]
    fn changed_tracks_mtime() {
        let (_dir, path) = write_config(MINIMAL);
        let mut loader = ConfigLoader::new(path.clone());
        loader.load().unwrap();
        assert!(!loader.changed());

        // Force a different mtime; some filesystems have coarse resolution.
        let later = SystemTime::now() + std::time::Duration::from_secs(2);
        let file = fs::File::open(&path).unwrap();
        file.set_modified(later).unwrap();
        assert!(loader.changed());
    }

    #[test]
    fn parses_widget_and_action_blocks() {
        let (_dir, path) = write_config(
            r#"
pages:
  main:
    buttons:
      1:
        label: "Clock"
        widget:
          type: datetime
          format: "%H:%M"
      2:
        label: "Terminal"
        action:
          type: command
          command: "xterm"
"#,
        );
        let mut loader = ConfigLoader::new(path);
        let config = loader.load().unwrap();
        let page = &config.pages["main"];
        assert_eq!(page.buttons[&1].widget.as_ref().unwrap().kind, "datetime");
        assert_eq!(page.buttons[&2].action.as_ref().unwrap().kind, "command");
    }
}
