use std::sync::{atomic::Ordering, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel;

pub mod lifecycle;
pub mod logger;

pub use logger::{LogLevel, Logger};

use crate::actions::{ActionContext, ActionRegistry, PAGE_ACTION};
use crate::cli::RunOptions;
use crate::config::{Config, ConfigLoader};
use crate::device::{hid::HidEnumerator, DeviceManager};
use crate::managers::{AnimationManager, ConnectionManager, PageManager, WidgetManager};
use crate::platform::{self, Platform};
use crate::render::Renderer;
use crate::widgets::WidgetRegistry;
use crate::{Error, Result};

/// Main loop cadence; bounds key-press latency and tick resolution.
const LOOP_INTERVAL: Duration = Duration::from_millis(10);

/// How often the configuration file's mtime is checked.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The daemon: wires configuration, rendering, the managers and the device
/// layer together and drives the main loop.
pub struct App {
    options: RunOptions,
    logger: Arc<Logger>,
}

impl App {
    pub fn from_options(options: RunOptions) -> Result<Self> {
        let level = match options.log_level.as_deref() {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::InvalidArgs(format!("unknown log level '{raw}'")))?,
            None => LogLevel::default(),
        };
        let logger = Arc::new(Logger::new(level, options.log_file.clone()));
        Ok(Self { options, logger })
    }

    pub fn run(self) -> Result<()> {
        let logger = self.logger.clone();
        logger.info(format!("deckhand {} starting", env!("CARGO_PKG_VERSION")));

        let running = lifecycle::create_shutdown_flag()?;
        let mut loader = ConfigLoader::from_options(self.options.config.as_deref())?;
        let config = Arc::new(loader.load()?);
        logger.info(format!(
            "loaded configuration from {} ({} pages)",
            loader.path().display(),
            config.pages.len()
        ));
        let shared_config = Arc::new(Mutex::new(config));

        let renderer = Arc::new(Renderer::new(logger.clone()));
        let animations = Arc::new(AnimationManager::new(logger.clone()));
        let widgets = Arc::new(WidgetManager::new(
            WidgetRegistry::with_builtins(),
            renderer.clone(),
            logger.clone(),
        ));
        let pages = Arc::new(PageManager::new(
            animations,
            widgets,
            renderer,
            logger.clone(),
        ));

        let platform = platform::detect(&logger);
        let enumerator = HidEnumerator::new()?;
        let device_manager = DeviceManager::new(Box::new(enumerator), logger.clone());
        let connection = Arc::new(ConnectionManager::new(
            device_manager,
            platform.clone(),
            logger.clone(),
        ));

        // Key presses cross from the driver's reader thread to the main
        // loop as plain key indices; all action work happens here.
        let (press_tx, press_rx) = channel::unbounded::<u8>();

        {
            let pages = pages.clone();
            let shared_config = shared_config.clone();
            let logger = logger.clone();
            let cli_brightness = self.options.brightness;
            connection.set_on_connected(Box::new(move |session| {
                let config = current_config(&shared_config);

                let brightness = cli_brightness.unwrap_or(config.device.brightness);
                if let Err(err) = session.set_brightness(brightness) {
                    logger.warn(format!("could not set brightness: {err}"));
                }

                let tx = press_tx.clone();
                if let Err(err) = session.set_key_callback(Box::new(move |key, pressed| {
                    if pressed {
                        let _ = tx.send(key);
                    }
                })) {
                    logger.warn(format!("could not install key callback: {err}"));
                }

                let target = target_page(&pages, &config);
                let drawn = if pages.current_page() == target {
                    pages.redraw(&config, session)
                } else {
                    pages.switch_page(&target, &config, session)
                };
                if let Err(err) = drawn {
                    logger.warn(format!("initial page draw failed: {err}"));
                }
            }));
        }
        {
            let logger = logger.clone();
            connection.set_on_disconnected(Box::new(move || {
                logger.debug("device session closed");
            }));
        }

        connection.start_monitoring()?;

        let actions = ActionRegistry::with_builtins();
        let mut last_config_poll = Instant::now();

        while running.load(Ordering::SeqCst) {
            while let Ok(key) = press_rx.try_recv() {
                self.handle_press(
                    key,
                    &connection,
                    &pages,
                    &shared_config,
                    &actions,
                    platform.as_deref(),
                    &logger,
                );
            }

            let config = current_config(&shared_config);
            connection.with_session(|session| {
                if let Err(err) = pages.tick(&config, session) {
                    logger.debug(format!("animation tick failed: {err}"));
                }
                if let Err(err) = pages.update_widgets(&config, session) {
                    logger.debug(format!("widget update failed: {err}"));
                }
            });

            if last_config_poll.elapsed() >= CONFIG_POLL_INTERVAL {
                last_config_poll = Instant::now();
                if loader.changed() {
                    reload_config(&mut loader, &shared_config, &connection, &pages, &logger);
                }
            }

            std::thread::sleep(LOOP_INTERVAL);
        }

        logger.info("shutting down");
        connection.stop_monitoring();
        connection.disconnect();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_press(
        &self,
        key: u8,
        connection: &ConnectionManager,
        pages: &PageManager,
        shared_config: &Arc<Mutex<Arc<Config>>>,
        actions: &ActionRegistry,
        platform: Option<&dyn Platform>,
        logger: &Arc<Logger>,
    ) {
        let config = current_config(shared_config);
        let page_name = pages.current_page();
        let Some(page) = config.pages.get(&page_name) else {
            return;
        };
        // Button numbers are 1-based in configuration.
        let Some(button) = page.buttons.get(&(key + 1)) else {
            logger.debug(format!(
                "key {} pressed but unassigned on page '{page_name}'",
                key + 1
            ));
            return;
        };
        let Some(action) = button.action.as_ref() else {
            return;
        };

        if action.kind == PAGE_ACTION {
            let Some(target) = action.param_str("page") else {
                logger.warn(format!("key {}: page action without a 'page' value", key + 1));
                return;
            };
            let switched =
                connection.with_session(|session| pages.switch_page(target, &config, session));
            if let Some(Err(err)) = switched {
                logger.warn(format!("page switch to '{target}' failed: {err}"));
            }
            return;
        }

        let ctx = ActionContext {
            key,
            button,
            platform,
            logger: logger.as_ref(),
        };
        actions.dispatch(&ctx, action);
    }
}

fn current_config(shared: &Arc<Mutex<Arc<Config>>>) -> Arc<Config> {
    shared
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Page to show: the current page when the new config still has it, else
/// the configured default page, else the first page.
fn target_page(pages: &PageManager, config: &Config) -> String {
    let current = pages.current_page();
    if config.pages.contains_key(&current) {
        return current;
    }
    if let Some(default) = config
        .device
        .default_page
        .as_ref()
        .filter(|name| config.pages.contains_key(*name))
    {
        return default.clone();
    }
    config.pages.keys().next().cloned().unwrap_or_default()
}

/// Wholesale reload: on success the new config replaces the old and the
/// panel is redrawn; on failure the previous config stays active.
fn reload_config(
    loader: &mut ConfigLoader,
    shared_config: &Arc<Mutex<Arc<Config>>>,
    connection: &ConnectionManager,
    pages: &Arc<PageManager>,
    logger: &Arc<Logger>,
) {
    match loader.load() {
        Ok(new_config) => {
            let new_config = Arc::new(new_config);
            *shared_config.lock().unwrap_or_else(PoisonError::into_inner) = new_config.clone();
            logger.info("configuration reloaded");
            connection.with_session(|session| {
                let target = target_page(pages, &new_config);
                let drawn = if pages.current_page() == target {
                    pages.redraw(&new_config, session)
                } else {
                    pages.switch_page(&target, &new_config, session)
                };
                if let Err(err) = drawn {
                    logger.warn(format!("redraw after reload failed: {err}"));
                }
            });
        }
        Err(err) => {
            logger.error(format!(
                "configuration reload failed, keeping previous: {err}"
            ));
        }
    }
}
