use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};

use crate::config::DEFAULT_CONFIG_DIR;
use crate::Result;

/// Frame delay used when a GIF declares a zero delay, matching what
/// browsers do with such files.
const DEFAULT_FRAME_DELAY_MS: u64 = 100;

/// Decoded animation: frames are shared so they can be handed out to the
/// render path without copying pixel data.
pub struct Animation {
    pub frames: Vec<Arc<RgbaImage>>,
    pub durations_ms: Vec<u64>,
}

/// Resolve an icon reference from configuration to a concrete path.
/// Absolute paths and `~` expansions are used as-is; bare names are looked
/// up under the config directory, its `icons/` subdirectory, then the
/// working directory.
pub fn resolve_icon(name: &str) -> Option<PathBuf> {
    let expanded = expand_home(name);
    if expanded.is_absolute() {
        return expanded.is_file().then_some(expanded);
    }

    let mut candidates = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        let config_dir = home.join(DEFAULT_CONFIG_DIR);
        candidates.push(config_dir.join(name));
        candidates.push(config_dir.join("icons").join(name));
    }
    candidates.push(PathBuf::from(name));

    candidates.into_iter().find(|p| p.is_file())
}

fn expand_home(name: &str) -> PathBuf {
    if let Some(rest) = name.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(name)
}

pub fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"))
}

/// Load a static icon image as RGBA.
pub fn load_static(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// Decode a GIF into its frames. Returns `Ok(None)` for single-frame GIFs,
/// which callers treat as static images.
pub fn decode_animation(path: &Path) -> Result<Option<Animation>> {
    let reader = BufReader::new(File::open(path)?);
    let decoder = GifDecoder::new(reader)?;
    let frames = decoder.into_frames().collect_frames()?;
    if frames.len() < 2 {
        return Ok(None);
    }

    let mut out = Animation {
        frames: Vec::with_capacity(frames.len()),
        durations_ms: Vec::with_capacity(frames.len()),
    };
    for frame in frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let millis = if denom == 0 {
            0
        } else {
            u64::from(numer) / u64::from(denom)
        };
        out.durations_ms.push(if millis == 0 {
            DEFAULT_FRAME_DELAY_MS
        } else {
            millis
        });
        out.frames.push(Arc::new(frame.into_buffer()));
    }
    Ok(Some(out))
}
