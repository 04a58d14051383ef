use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::app::Logger;
use crate::config::ButtonConfig;
use crate::render::icons::Animation;
use crate::{Error, Result};

/// Minimum gap between advance passes. Callers may tick much faster; the
/// throttle bounds the per-frame bookkeeping cost.
const ADVANCE_THROTTLE: Duration = Duration::from_millis(50);

struct AnimatedButton {
    frames: Vec<Arc<RgbaImage>>,
    durations_ms: Vec<u64>,
    current_frame: usize,
    last_advance: Instant,
    config: ButtonConfig,
}

#[derive(Default)]
struct AnimationState {
    buttons: HashMap<u8, AnimatedButton>,
    last_pass: Option<Instant>,
}

/// Tracks frame timing for animated keys on the current page. Owns no
/// rendering or device access; callers fetch the current frame and push it
/// themselves.
pub struct AnimationManager {
    state: Mutex<AnimationState>,
    logger: Arc<Logger>,
}

impl AnimationManager {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            state: Mutex::new(AnimationState::default()),
            logger,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnimationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an animation for a key, starting at frame 0. Single-frame
    /// inputs are rejected; the caller should render those statically.
    pub fn setup(&self, key: u8, animation: Animation, config: ButtonConfig) -> Result<()> {
        if animation.frames.len() < 2 {
            return Err(Error::DataSource(format!(
                "animation for key {key} has fewer than 2 frames"
            )));
        }
        if animation.frames.len() != animation.durations_ms.len() {
            return Err(Error::DataSource(format!(
                "animation for key {key} has {} frames but {} durations",
                animation.frames.len(),
                animation.durations_ms.len()
            )));
        }
        self.logger.debug(format!(
            "key {key}: animation with {} frames",
            animation.frames.len()
        ));
        self.lock().buttons.insert(
            key,
            AnimatedButton {
                frames: animation.frames,
                durations_ms: animation.durations_ms,
                current_frame: 0,
                last_advance: Instant::now(),
                config,
            },
        );
        Ok(())
    }

    pub fn is_animated(&self, key: u8) -> bool {
        self.lock().buttons.contains_key(&key)
    }

    pub fn animated_keys(&self) -> Vec<u8> {
        let mut keys: Vec<u8> = self.lock().buttons.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Current frame plus the button's config snapshot, for compositing.
    pub fn current_frame(&self, key: u8) -> Option<(Arc<RgbaImage>, ButtonConfig)> {
        let state = self.lock();
        let button = state.buttons.get(&key)?;
        Some((
            button.frames[button.current_frame].clone(),
            button.config.clone(),
        ))
    }

    /// Advance every animation that is due at `now`; returns the keys whose
    /// frame changed. Each frame is held for its own declared duration.
    pub fn advance(&self, now: Instant) -> Vec<u8> {
        let mut state = self.lock();
        if let Some(last) = state.last_pass {
            if now.duration_since(last) < ADVANCE_THROTTLE {
                return Vec::new();
            }
        }
        state.last_pass = Some(now);

        let mut changed = Vec::new();
        for (key, button) in state.buttons.iter_mut() {
            let hold = Duration::from_millis(button.durations_ms[button.current_frame]);
            if now.duration_since(button.last_advance) >= hold {
                button.current_frame = (button.current_frame + 1) % button.frames.len();
                button.last_advance = now;
                changed.push(*key);
            }
        }
        changed.sort_unstable();
        changed
    }

    /// Rewind every animation to frame 0 with a single shared timestamp, so
    /// all keys start their cycle together after a redraw.
    pub fn synchronize(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.last_pass = None;
        for button in state.buttons.values_mut() {
            button.current_frame = 0;
            button.last_advance = now;
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.buttons.clear();
        state.last_pass = None;
    }
}
