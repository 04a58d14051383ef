use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::app::Logger;
use crate::config::{ButtonConfig, Config};
use crate::device::DeviceSession;
use crate::render::{icons, Renderer};
use crate::{Error, Result};

use super::{AnimationManager, WidgetManager};

/// Owns the current-page pointer and the discipline around it. The page
/// lock is a mutex over the page *name*: switching and redrawing hold it for
/// their full duration, while the animation tick only try-locks and walks
/// away when a transition is in progress.
///
/// Lock order: page lock strictly before either manager's lock, and the two
/// manager locks are never held at the same time.
pub struct PageManager {
    current: Mutex<String>,
    animations: Arc<AnimationManager>,
    widgets: Arc<WidgetManager>,
    renderer: Arc<Renderer>,
    logger: Arc<Logger>,
}

impl PageManager {
    pub fn new(
        animations: Arc<AnimationManager>,
        widgets: Arc<WidgetManager>,
        renderer: Arc<Renderer>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            current: Mutex::new(String::new()),
            animations,
            widgets,
            renderer,
            logger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_page(&self) -> String {
        self.lock().clone()
    }

    /// Switch to a named page and redraw. An unknown page is rejected before
    /// the pointer moves, so the panel keeps showing the old page.
    pub fn switch_page(
        &self,
        name: &str,
        config: &Config,
        session: &mut DeviceSession,
    ) -> Result<()> {
        if !config.pages.contains_key(name) {
            return Err(Error::Config(format!("page '{name}' does not exist")));
        }
        let mut guard = self.lock();
        if *guard == name {
            self.logger.debug(format!("already on page '{name}'"));
            return Ok(());
        }
        self.logger.info(format!("switching page: '{guard}' -> '{name}'"));
        *guard = name.to_string();
        self.redraw_locked(&guard, config, session)
    }

    /// Full redraw of the current page. Blocks on the page lock; a tick
    /// running concurrently finishes first.
    pub fn redraw(&self, config: &Config, session: &mut DeviceSession) -> Result<()> {
        let guard = self.lock();
        self.redraw_locked(&guard, config, session)
    }

    fn redraw_locked(
        &self,
        page_name: &str,
        config: &Config,
        session: &mut DeviceSession,
    ) -> Result<()> {
        let page = config
            .pages
            .get(page_name)
            .ok_or_else(|| Error::Config(format!("page '{page_name}' does not exist")))?;

        // Stale animation and widget state must not outlive the page.
        self.animations.clear();
        self.widgets.clear();

        let format = session.image_format();
        let blank = self.renderer.blank_key(format, &config.style(None))?;
        let now = Instant::now();

        // Every key is blanked first so no stale pixels from the previous
        // page survive, then assigned buttons are drawn over the blanks.
        for key in 0..session.key_count() {
            session.set_key_image(key, &blank)?;
        }
        for key in 0..session.key_count() {
            // Button numbers are 1-based in configuration.
            if let Some(button) = page.buttons.get(&(key + 1)) {
                self.draw_button(key, button, config, session, now)?;
            }
        }

        // All animations restart their cycle together.
        self.animations.synchronize();
        Ok(())
    }

    /// Draw one configured key. Content problems (bad icon, unknown widget)
    /// degrade to a plainer rendering; transport errors propagate.
    fn draw_button(
        &self,
        key: u8,
        button: &ButtonConfig,
        config: &Config,
        session: &mut DeviceSession,
        now: Instant,
    ) -> Result<()> {
        let style = config.style(button.style.as_deref());
        let format = session.image_format();
        let static_icon = self.load_icon(key, button);

        if button.widget.is_some() {
            match self.widgets.setup(key, button, static_icon.clone()) {
                Ok(()) => {
                    let background = self.animations.current_frame(key).map(|(frame, _)| frame);
                    if let Some(bytes) = self.widgets.render(
                        key,
                        format,
                        &style,
                        background.as_deref(),
                        now,
                        true,
                    )? {
                        return session.set_key_image(key, &bytes);
                    }
                }
                Err(err) => {
                    self.logger
                        .warn(format!("key {}: widget setup failed: {err}", key + 1));
                }
            }
        }

        if self.animations.is_animated(key) {
            if let Some((frame, _)) = self.animations.current_frame(key) {
                let composed =
                    self.renderer
                        .compose(format, &style, button.display_text(), Some(&frame));
                let bytes = self.renderer.encode(&composed)?;
                return session.set_key_image(key, &bytes);
            }
        }

        let bytes = self.renderer.render_key(
            format,
            &style,
            button.display_text(),
            static_icon.as_ref(),
        )?;
        session.set_key_image(key, &bytes)
    }

    /// Resolve and decode a button's icon. Multi-frame GIFs register with
    /// the animation manager and return no static image; everything else
    /// decodes to one.
    fn load_icon(&self, key: u8, button: &ButtonConfig) -> Option<image::RgbaImage> {
        let name = button.icon.as_deref()?;
        let Some(path) = icons::resolve_icon(name) else {
            self.logger
                .warn(format!("key {}: icon '{name}' not found", key + 1));
            return None;
        };

        if icons::is_gif(&path) {
            match icons::decode_animation(&path) {
                Ok(Some(animation)) => {
                    if let Err(err) = self.animations.setup(key, animation, button.clone()) {
                        self.logger
                            .warn(format!("key {}: animation rejected: {err}", key + 1));
                    }
                    return None;
                }
                Ok(None) => {
                    // Single-frame GIF, fall through to a static decode.
                }
                Err(err) => {
                    self.logger
                        .warn(format!("key {}: could not decode '{name}': {err}", key + 1));
                    return None;
                }
            }
        }

        match icons::load_static(&path) {
            Ok(image) => Some(image),
            Err(err) => {
                self.logger
                    .warn(format!("key {}: could not load '{name}': {err}", key + 1));
                None
            }
        }
    }

    /// One animation step. Never blocks: if a switch or redraw holds the
    /// page lock the tick is skipped outright, not queued.
    pub fn tick(&self, config: &Config, session: &mut DeviceSession) -> Result<()> {
        let Ok(_guard) = self.current.try_lock() else {
            return Ok(());
        };

        let changed = self.animations.advance(Instant::now());
        for key in changed {
            let Some((frame, button)) = self.animations.current_frame(key) else {
                continue;
            };
            let style = config.style(button.style.as_deref());
            let format = session.image_format();

            // Widget keys keep their last rendered text over the new frame;
            // no data fetch happens on the tick path.
            let cached = self.widgets.cached_text(key);
            let text = cached.as_deref().or(button.display_text());

            let composed = self.renderer.compose(format, &style, text, Some(&frame));
            let bytes = self.renderer.encode(&composed)?;
            session.set_key_image(key, &bytes)?;
        }
        Ok(())
    }

    /// Refresh pass for due widgets outside the tick path. The caller owns
    /// the cadence; this pushes whatever images changed.
    pub fn update_widgets(&self, config: &Config, session: &mut DeviceSession) -> Result<()> {
        let Ok(_guard) = self.current.try_lock() else {
            return Ok(());
        };

        let now = Instant::now();
        for key in self.widgets.due_keys(now) {
            let Some(button) = self.widgets.button_config(key) else {
                continue;
            };
            let style = config.style(button.style.as_deref());
            let background = self.animations.current_frame(key).map(|(frame, _)| frame);
            match self.widgets.render(
                key,
                session.image_format(),
                &style,
                background.as_deref(),
                now,
                false,
            ) {
                Ok(Some(bytes)) => session.set_key_image(key, &bytes)?,
                Ok(None) => {}
                Err(err) => {
                    self.logger
                        .warn(format!("key {}: widget render failed: {err}", key + 1));
                }
            }
        }
        Ok(())
    }
}
