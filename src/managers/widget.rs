use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::app::Logger;
use crate::config::{ButtonConfig, Style};
use crate::device::KeyImageFormat;
use crate::render::Renderer;
use crate::widgets::{Widget, WidgetRegistry, WidgetValue};
use crate::{Error, Result};

/// Per-instance cache cap. A rendered key image above this is served to the
/// device but never cached.
pub const MAX_CACHE_SIZE: usize = 100 * 1024;

/// Global cache cap across all widget instances.
pub const MAX_TOTAL_CACHE_SIZE: usize = 5 * 1024 * 1024;

struct WidgetInstance {
    widget: Box<dyn Widget>,
    config: ButtonConfig,
    /// Static icon decoded at page draw; used as the render base whenever
    /// no animation frame is supplied.
    icon: Option<RgbaImage>,
    interval: Duration,
    last_update: Option<Instant>,
    last_data: Option<WidgetValue>,
    cached_image: Option<Vec<u8>>,
    cached_text: Option<String>,
    last_render: Option<Instant>,
}

#[derive(Default)]
struct WidgetState {
    active: HashMap<u8, WidgetInstance>,
    total_cache: usize,
}

/// Owns the widget instances of the current page, their refresh schedule and
/// a size-bounded cache of rendered key images. Compositing over animation
/// frames is the caller's job: the current frame is passed in as an optional
/// background so this manager never touches the animation state.
pub struct WidgetManager {
    state: Mutex<WidgetState>,
    registry: WidgetRegistry,
    renderer: Arc<Renderer>,
    logger: Arc<Logger>,
    max_item_cache: usize,
    max_total_cache: usize,
}

impl WidgetManager {
    pub fn new(registry: WidgetRegistry, renderer: Arc<Renderer>, logger: Arc<Logger>) -> Self {
        Self::with_cache_limits(registry, renderer, logger, MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE)
    }

    pub fn with_cache_limits(
        registry: WidgetRegistry,
        renderer: Arc<Renderer>,
        logger: Arc<Logger>,
        max_item_cache: usize,
        max_total_cache: usize,
    ) -> Self {
        Self {
            state: Mutex::new(WidgetState::default()),
            registry,
            renderer,
            logger,
            max_item_cache,
            max_total_cache,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WidgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instantiate the declared widget for a key. The instance starts with
    /// no `last_update`, so it is due immediately.
    pub fn setup(&self, key: u8, config: &ButtonConfig, icon: Option<RgbaImage>) -> Result<()> {
        let declared = config
            .widget
            .as_ref()
            .ok_or_else(|| Error::DataSource(format!("key {key} has no widget block")))?;
        let widget = self.registry.create(declared)?;

        let interval = declared
            .update_interval
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| widget.update_interval());
        self.logger.debug(format!(
            "key {key}: widget '{}' every {:.1}s",
            widget.kind(),
            interval.as_secs_f64()
        ));

        self.lock().active.insert(
            key,
            WidgetInstance {
                widget,
                config: config.clone(),
                icon,
                interval,
                last_update: None,
                last_data: None,
                cached_image: None,
                cached_text: None,
                last_render: None,
            },
        );
        Ok(())
    }

    pub fn is_widget(&self, key: u8) -> bool {
        self.lock().active.contains_key(&key)
    }

    pub fn widget_keys(&self) -> Vec<u8> {
        let mut keys: Vec<u8> = self.lock().active.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Keys whose refresh interval has elapsed (or that never fetched).
    pub fn due_keys(&self, now: Instant) -> Vec<u8> {
        let state = self.lock();
        let mut keys: Vec<u8> = state
            .active
            .iter()
            .filter(|(_, inst)| match inst.last_update {
                None => true,
                Some(last) => now.duration_since(last) >= inst.interval,
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Last rendered text for a key, used by the animation tick to
    /// recomposite text over a fresh frame without refetching.
    pub fn cached_text(&self, key: u8) -> Option<String> {
        self.lock().active.get(&key).and_then(|i| i.cached_text.clone())
    }

    pub fn button_config(&self, key: u8) -> Option<ButtonConfig> {
        self.lock().active.get(&key).map(|i| i.config.clone())
    }

    /// Fetch and render a key's widget. Returns `Ok(None)` when there is
    /// nothing new to push: the key is not due, or the data is unchanged and
    /// a cached image already covers it. `background` is the current
    /// animation frame for keys that are both animated and widget-driven.
    pub fn render(
        &self,
        key: u8,
        format: KeyImageFormat,
        style: &Style,
        background: Option<&RgbaImage>,
        now: Instant,
        force: bool,
    ) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        let Some(instance) = state.active.get_mut(&key) else {
            return Ok(None);
        };

        let due = force
            || match instance.last_update {
                None => true,
                Some(last) => now.duration_since(last) >= instance.interval,
            };
        if !due {
            return Ok(None);
        }

        let value = match instance.widget.fetch() {
            Ok(value) => {
                let changed = instance.last_data.as_ref() != Some(&value);
                instance.last_data = Some(value.clone());
                instance.last_update = Some(now);
                if !force && !changed && instance.cached_image.is_some() {
                    return Ok(None);
                }
                value
            }
            Err(err) => {
                self.logger
                    .debug(format!("key {key}: widget fetch failed: {err}"));
                instance.last_update = Some(now);
                match instance.last_data.clone() {
                    Some(previous) => previous,
                    None => instance.widget.fallback(),
                }
            }
        };

        let text = instance.widget.render_text(&value);
        let icon = instance.widget.render_icon(&value);
        // Precedence: the widget's own icon, then the animation frame, then
        // the button's static icon.
        let base = icon.as_ref().or(background).or(instance.icon.as_ref());
        let composed = self
            .renderer
            .compose(format, style, Some(&text), base);
        let bytes = self.renderer.encode(&composed)?;

        instance.cached_text = Some(text);
        instance.last_render = Some(now);
        let replaced = instance.cached_image.take().map(|old| old.len());
        if let Some(old_len) = replaced {
            state.total_cache -= old_len;
        }
        if bytes.len() <= self.max_item_cache {
            // Re-borrow: the eviction scan below needs the whole map.
            if let Some(instance) = state.active.get_mut(&key) {
                instance.cached_image = Some(bytes.clone());
            }
            state.total_cache += bytes.len();
            self.evict_if_needed(&mut state, key);
        } else {
            self.logger.debug(format!(
                "key {key}: rendered image ({} bytes) exceeds cache cap, not cached",
                bytes.len()
            ));
        }

        Ok(Some(bytes))
    }

    /// Drop cached images oldest-render-first until the total is back under
    /// 80% of the cap. The entry just rendered is never the victim.
    fn evict_if_needed(&self, state: &mut WidgetState, just_rendered: u8) {
        if state.total_cache <= self.max_total_cache {
            return;
        }
        let target = self.max_total_cache * 4 / 5;
        while state.total_cache > target {
            let victim = state
                .active
                .iter()
                .filter(|(key, inst)| **key != just_rendered && inst.cached_image.is_some())
                .min_by_key(|(_, inst)| inst.last_render)
                .map(|(key, _)| *key);
            let Some(victim) = victim else {
                break;
            };
            if let Some(dropped) = state
                .active
                .get_mut(&victim)
                .and_then(|inst| inst.cached_image.take())
            {
                state.total_cache -= dropped.len();
                self.logger
                    .debug(format!("evicted cached image for key {victim} ({} bytes)", dropped.len()));
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.active.clear();
        state.total_cache = 0;
    }

    #[cfg(test)]
    fn total_cache_size(&self) -> usize {
        self.lock().total_cache
    }

    #[cfg(test)]
    fn has_cached_image(&self, key: u8) -> bool {
        self.lock()
            .active
            .get(&key)
            .is_some_and(|i| i.cached_image.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::config::WidgetConfig;

    /// Scripted widget driven entirely by config parameters so it can be
    /// built through the registry's fn-pointer factories.
    struct ProbeWidget {
        text: String,
        fail_after: Option<u64>,
        fetches: u64,
    }

    impl ProbeWidget {
        fn from_config(config: &WidgetConfig) -> Result<Box<dyn Widget>> {
            Ok(Box::new(Self {
                text: config.param_str("text").unwrap_or("probe").to_string(),
                fail_after: config
                    .params
                    .get("fail_after")
                    .and_then(|v| v.as_u64()),
                fetches: 0,
            }))
        }
    }

    impl Widget for ProbeWidget {
        fn kind(&self) -> &'static str {
            "probe"
        }

        fn update_interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn fetch(&mut self) -> Result<WidgetValue> {
            self.fetches += 1;
            if self.fail_after.is_some_and(|n| self.fetches > n) {
                return Err(Error::DataSource("scripted fetch failure".into()));
            }
            Ok(WidgetValue::Text(format!("{} {}", self.text, self.fetches)))
        }

        fn render_text(&self, value: &WidgetValue) -> String {
            match value {
                WidgetValue::Text(text) => text.clone(),
                _ => "??".to_string(),
            }
        }

        fn fallback(&self) -> WidgetValue {
            WidgetValue::Text("offline".to_string())
        }
    }

    fn manager_with_caps(max_item: usize, max_total: usize) -> WidgetManager {
        let logger = Arc::new(Logger::new(LogLevel::Error, None));
        let mut registry = WidgetRegistry::new();
        registry.register("probe", ProbeWidget::from_config);
        WidgetManager::with_cache_limits(
            registry,
            Arc::new(Renderer::new(logger.clone())),
            logger,
            max_item,
            max_total,
        )
    }

    fn probe_button(yaml: &str) -> ButtonConfig {
        ButtonConfig {
            widget: Some(serde_yaml::from_str(yaml).unwrap()),
            ..ButtonConfig::default()
        }
    }

    fn format() -> KeyImageFormat {
        KeyImageFormat {
            width: 72,
            height: 72,
        }
    }

    #[test]
    fn setup_rejects_unknown_widget_type() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        let err = manager
            .setup(1, &probe_button("type: nonexistent"), None)
            .unwrap_err();
        assert!(format!("{err}").contains("unknown widget type"));
        assert!(!manager.is_widget(1));
    }

    #[test]
    fn new_instance_is_due_immediately() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager.setup(1, &probe_button("type: probe"), None).unwrap();
        assert_eq!(manager.due_keys(Instant::now()), vec![1]);
    }

    #[test]
    fn render_caches_and_respects_interval() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager.setup(1, &probe_button("type: probe"), None).unwrap();

        let now = Instant::now();
        let style = Style::default();
        let first = manager
            .render(1, format(), &style, None, now, false)
            .unwrap();
        assert!(first.is_some());
        assert!(manager.cached_text(1).unwrap().starts_with("probe"));

        // Not yet due again: nothing to push.
        let again = manager
            .render(1, format(), &style, None, now + Duration::from_millis(100), false)
            .unwrap();
        assert!(again.is_none());

        // Past the interval, the data changed (fetch counter), so a new
        // image comes back.
        let later = manager
            .render(1, format(), &style, None, now + Duration::from_secs(2), false)
            .unwrap();
        assert!(later.is_some());
    }

    #[test]
    fn fetch_failure_falls_back_to_last_good_data() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager
            .setup(1, &probe_button("type: probe\nfail_after: 1"), None)
            .unwrap();

        let now = Instant::now();
        let style = Style::default();
        manager
            .render(1, format(), &style, None, now, true)
            .unwrap();
        assert_eq!(manager.cached_text(1).unwrap(), "probe 1");

        manager
            .render(1, format(), &style, None, now + Duration::from_secs(2), true)
            .unwrap();
        assert_eq!(manager.cached_text(1).unwrap(), "probe 1");
    }

    #[test]
    fn fetch_failure_without_history_uses_fallback() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager
            .setup(1, &probe_button("type: probe\nfail_after: 0"), None)
            .unwrap();

        manager
            .render(1, format(), &Style::default(), None, Instant::now(), true)
            .unwrap();
        assert_eq!(manager.cached_text(1).unwrap(), "offline");
    }

    #[test]
    fn oversized_images_are_served_but_not_cached() {
        let manager = manager_with_caps(8, MAX_TOTAL_CACHE_SIZE);
        manager.setup(1, &probe_button("type: probe"), None).unwrap();

        let bytes = manager
            .render(1, format(), &Style::default(), None, Instant::now(), true)
            .unwrap();
        assert!(bytes.is_some());
        assert!(!manager.has_cached_image(1));
        assert_eq!(manager.total_cache_size(), 0);
    }

    #[test]
    fn global_cap_evicts_oldest_renders_first() {
        // Flat 72x72 JPEGs come out around a kilobyte; a 2 KiB global cap
        // forces eviction after a few keys.
        let manager = manager_with_caps(MAX_CACHE_SIZE, 2 * 1024);
        let style = Style::default();
        let now = Instant::now();
        for key in 1..=4 {
            manager
                .setup(key, &probe_button("type: probe"), None)
                .unwrap();
            manager
                .render(
                    key,
                    format(),
                    &style,
                    None,
                    now + Duration::from_secs(u64::from(key)),
                    true,
                )
                .unwrap();
        }

        assert!(manager.total_cache_size() <= 2 * 1024);
        // The most recent render always survives eviction.
        assert!(manager.has_cached_image(4));
        assert!(!manager.has_cached_image(1));
    }

    #[test]
    fn clear_resets_cache_accounting() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager.setup(1, &probe_button("type: probe"), None).unwrap();
        manager
            .render(1, format(), &Style::default(), None, Instant::now(), true)
            .unwrap();
        assert!(manager.total_cache_size() > 0);

        manager.clear();
        assert_eq!(manager.total_cache_size(), 0);
        assert!(manager.widget_keys().is_empty());
    }

    #[test]
    fn interval_override_from_config() {
        let manager = manager_with_caps(MAX_CACHE_SIZE, MAX_TOTAL_CACHE_SIZE);
        manager
            .setup(1, &probe_button("type: probe\nupdate_interval: 0.05"), None)
            .unwrap();

        let now = Instant::now();
        manager
            .render(1, format(), &Style::default(), None, now, false)
            .unwrap();
        assert!(manager.due_keys(now + Duration::from_millis(60)).contains(&1));
        assert!(manager.due_keys(now + Duration::from_millis(10)).is_empty());
    }
}
