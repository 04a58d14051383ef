use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use fontdue::layout::{
    CoordinateSystem, HorizontalAlign, Layout, LayoutSettings, TextStyle, VerticalAlign,
};
use fontdue::{Font, FontSettings};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgba, RgbaImage};

use crate::app::Logger;
use crate::config::{Style, TextAlign};
use crate::device::KeyImageFormat;
use crate::Result;

pub mod icons;

/// JPEG quality for key images; the panels accept anything but artifacts
/// are visible on the tiny displays below this.
const JPEG_QUALITY: u8 = 90;

const FONT_DIRS: &[&str] = &["/usr/share/fonts", "/usr/local/share/fonts"];

/// Composites key images (background, icon, text) and encodes them into the
/// JPEG payloads the panels consume. Fonts are loaded once and cached;
/// a font that cannot be found is only searched for (and warned about) once.
pub struct Renderer {
    fonts: Mutex<HashMap<String, Option<Arc<Font>>>>,
    logger: Arc<Logger>,
}

impl Renderer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            fonts: Mutex::new(HashMap::new()),
            logger,
        }
    }

    /// Full pipeline: compose then encode.
    pub fn render_key(
        &self,
        format: KeyImageFormat,
        style: &Style,
        text: Option<&str>,
        icon: Option<&RgbaImage>,
    ) -> Result<Vec<u8>> {
        let image = self.compose(format, style, text, icon);
        self.encode(&image)
    }

    /// A key image with only the background color. Used to clear keys that
    /// have no button assigned.
    pub fn blank_key(&self, format: KeyImageFormat, style: &Style) -> Result<Vec<u8>> {
        self.render_key(format, style, None, None)
    }

    /// Compose a key image in memory: background, scaled icon, border and
    /// text, in that order.
    pub fn compose(
        &self,
        format: KeyImageFormat,
        style: &Style,
        text: Option<&str>,
        icon: Option<&RgbaImage>,
    ) -> RgbaImage {
        let (w, h) = (format.width, format.height);
        let mut canvas = RgbaImage::from_pixel(w, h, parse_color(&style.background_color));

        if let Some(icon) = icon {
            let scaled = scale_to_fill(icon, w, h);
            imageops::overlay(&mut canvas, &scaled, 0, 0);
        }

        if let Some(border) = style.border_size.filter(|b| *b > 0) {
            draw_border(&mut canvas, border.min(w / 2), parse_color(&style.border_color));
        }

        if let Some(text) = text.filter(|t| !t.is_empty()) {
            self.draw_text(&mut canvas, style, text);
        }

        canvas
    }

    /// Encode a composed image as a baseline JPEG.
    pub fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&rgb)?;
        Ok(buf)
    }

    fn draw_text(&self, canvas: &mut RgbaImage, style: &Style, text: &str) {
        let Some(font) = self.font(&style.font) else {
            return;
        };
        let color = parse_color(&style.text_color);
        let (w, h) = canvas.dimensions();
        // Keep text off the border.
        let inset = style.border_size.unwrap_or(0).min(w / 4) as f32;

        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x: inset,
            y: inset + style.text_offset as f32,
            max_width: Some(w as f32 - 2.0 * inset),
            max_height: Some(h as f32 - 2.0 * inset),
            horizontal_align: HorizontalAlign::Center,
            vertical_align: match style.text_align {
                TextAlign::Top => VerticalAlign::Top,
                TextAlign::Center => VerticalAlign::Middle,
                TextAlign::Bottom => VerticalAlign::Bottom,
            },
            ..LayoutSettings::default()
        });
        layout.append(
            std::slice::from_ref(font.as_ref()),
            &TextStyle::new(text, style.font_size, 0),
        );

        for glyph in layout.glyphs() {
            if glyph.width == 0 {
                continue;
            }
            let (metrics, coverage) = font.rasterize_config(glyph.key);
            for (i, &alpha) in coverage.iter().enumerate() {
                if alpha == 0 {
                    continue;
                }
                let px = glyph.x as i64 + (i % metrics.width) as i64;
                let py = glyph.y as i64 + (i / metrics.width) as i64;
                if px < 0 || py < 0 || px >= i64::from(w) || py >= i64::from(h) {
                    continue;
                }
                blend(canvas.get_pixel_mut(px as u32, py as u32), color, alpha);
            }
        }
    }

    fn font(&self, name: &str) -> Option<Arc<Font>> {
        let mut cache = self.fonts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = cache.get(name) {
            return entry.clone();
        }

        let loaded = find_font_file(name)
            .and_then(|path| std::fs::read(path).ok())
            .and_then(|data| Font::from_bytes(data, FontSettings::default()).ok())
            .map(Arc::new);
        if loaded.is_none() {
            self.logger
                .warn(format!("font '{name}' not found; key text will be skipped"));
        }
        cache.insert(name.to_string(), loaded.clone());
        loaded
    }
}

/// Source-over blend of a solid color with the given coverage.
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: u8) {
    let a = u16::from(alpha);
    for channel in 0..3 {
        let s = u16::from(src.0[channel]);
        let d = u16::from(dst.0[channel]);
        dst.0[channel] = ((s * a + d * (255 - a)) / 255) as u8;
    }
    dst.0[3] = 255;
}

/// Scale preserving aspect ratio so the image covers the full key, then
/// crop to the center.
fn scale_to_fill(icon: &RgbaImage, w: u32, h: u32) -> RgbaImage {
    let (iw, ih) = icon.dimensions();
    if (iw, ih) == (w, h) {
        return icon.clone();
    }
    let scale = f64::max(f64::from(w) / f64::from(iw), f64::from(h) / f64::from(ih));
    let nw = ((f64::from(iw) * scale).ceil() as u32).max(w);
    let nh = ((f64::from(ih) * scale).ceil() as u32).max(h);
    let resized = imageops::resize(icon, nw, nh, imageops::FilterType::Lanczos3);
    imageops::crop_imm(&resized, (nw - w) / 2, (nh - h) / 2, w, h).to_image()
}

fn draw_border(canvas: &mut RgbaImage, size: u32, color: Rgba<u8>) {
    let (w, h) = canvas.dimensions();
    for y in 0..h {
        for x in 0..w {
            if x < size || y < size || x >= w - size || y >= h - size {
                canvas.put_pixel(x, y, color);
            }
        }
    }
}

/// Parse `#RRGGBB` (leading `#` optional). Anything unparseable is black.
pub fn parse_color(value: &str) -> Rgba<u8> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() == 6 {
        if let Ok(rgb) = u32::from_str_radix(hex, 16) {
            return Rgba([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 255]);
        }
    }
    Rgba([0, 0, 0, 255])
}

fn find_font_file(name: &str) -> Option<PathBuf> {
    let target = normalize(name);
    let mut dirs: Vec<PathBuf> = FONT_DIRS.iter().map(PathBuf::from).collect();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join(".fonts"));
    }

    let mut fallback = None;
    for dir in dirs {
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_font = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
                if !is_font {
                    continue;
                }
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(normalize)
                    .unwrap_or_default();
                if stem == target {
                    return Some(path);
                }
                if fallback.is_none() && stem.starts_with(&target) {
                    fallback = Some(path);
                }
            }
        }
    }
    fallback
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;

    fn renderer() -> Renderer {
        Renderer::new(Arc::new(Logger::new(LogLevel::Error, None)))
    }

    fn format() -> KeyImageFormat {
        KeyImageFormat {
            width: 72,
            height: 72,
        }
    }

    #[test]
    fn parse_color_handles_hex_and_garbage() {
        assert_eq!(parse_color("#FF8000"), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_color("00ff00"), Rgba([0, 255, 0, 255]));
        assert_eq!(parse_color("not-a-color"), Rgba([0, 0, 0, 255]));
        assert_eq!(parse_color(""), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn compose_fills_background() {
        let mut style = Style::default();
        style.background_color = "#102030".to_string();
        let image = renderer().compose(format(), &style, None, None);
        assert_eq!(image.dimensions(), (72, 72));
        assert_eq!(*image.get_pixel(36, 36), Rgba([16, 32, 48, 255]));
    }

    #[test]
    fn encode_produces_jpeg() {
        let image = renderer().compose(format(), &Style::default(), None, None);
        let bytes = renderer().encode(&image).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn icons_are_scaled_to_fill_and_cropped() {
        let icon = RgbaImage::from_pixel(144, 36, Rgba([200, 0, 0, 255]));
        let scaled = scale_to_fill(&icon, 72, 72);
        assert_eq!(scaled.dimensions(), (72, 72));
        assert_eq!(*scaled.get_pixel(36, 36), Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn border_is_drawn_over_background() {
        let mut style = Style::default();
        style.border_size = Some(3);
        style.border_color = "#FFFFFF".to_string();
        let image = renderer().compose(format(), &style, None, None);
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*image.get_pixel(36, 36), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn blend_mixes_by_coverage() {
        let mut dst = Rgba([0, 0, 0, 255]);
        blend(&mut dst, Rgba([255, 255, 255, 255]), 255);
        assert_eq!(dst, Rgba([255, 255, 255, 255]));

        let mut dst = Rgba([0, 0, 0, 255]);
        blend(&mut dst, Rgba([255, 255, 255, 255]), 0);
        assert_eq!(dst, Rgba([0, 0, 0, 255]));
    }
}
