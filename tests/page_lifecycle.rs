use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, Rgba, RgbaImage};

use deckhand::app::{LogLevel, Logger};
use deckhand::config::Config;
use deckhand::device::fake::FakePanelHandle;
use deckhand::device::DeviceSession;
use deckhand::managers::{AnimationManager, PageManager, WidgetManager};
use deckhand::render::Renderer;
use deckhand::widgets::WidgetRegistry;

fn new_logger() -> Arc<Logger> {
    Arc::new(Logger::new(LogLevel::Error, None))
}

fn page_manager() -> Arc<PageManager> {
    let logger = new_logger();
    let renderer = Arc::new(Renderer::new(logger.clone()));
    Arc::new(PageManager::new(
        Arc::new(AnimationManager::new(logger.clone())),
        Arc::new(WidgetManager::new(
            WidgetRegistry::with_builtins(),
            renderer.clone(),
            logger.clone(),
        )),
        renderer,
        logger,
    ))
}

fn config(yaml: &str) -> Config {
    serde_yaml::from_str(yaml).unwrap()
}

fn write_gif(path: &Path, frame_count: u32, delay_ms: u64) {
    let file = File::create(path).unwrap();
    let mut encoder = GifEncoder::new(file);
    for i in 0..frame_count {
        let shade = (i * 60) as u8;
        let buffer = RgbaImage::from_pixel(16, 16, Rgba([shade, 0, 0, 255]));
        let delay = Delay::from_saturating_duration(Duration::from_millis(delay_ms));
        encoder
            .encode_frame(Frame::from_parts(buffer, 0, 0, delay))
            .unwrap();
    }
}

#[test]
fn switch_page_draws_every_key() {
    let pages = page_manager();
    let handle = FakePanelHandle::standalone(6);
    let mut session = DeviceSession::new(handle.panel());
    let config = config(
        r#"
pages:
  main:
    buttons:
      1:
        label: "One"
      3:
        label: "Three"
  other:
    buttons:
      1:
        label: "Elsewhere"
"#,
    );

    pages.switch_page("main", &config, &mut session).unwrap();
    assert_eq!(pages.current_page(), "main");
    for key in 0..6 {
        assert!(handle.key_image(key).is_some());
    }
    // Every key is blanked before assigned buttons are drawn over the
    // blanks, so assigned keys see two pushes and unassigned keys one.
    assert_eq!(handle.push_count(), 8);
    assert_eq!(handle.pushes_for(0), 2);
    assert_eq!(handle.pushes_for(1), 1);
    assert_eq!(handle.pushes_for(2), 2);

    pages.switch_page("other", &config, &mut session).unwrap();
    assert_eq!(handle.push_count(), 15);
}

#[test]
fn unknown_page_is_rejected_without_redraw() {
    let pages = page_manager();
    let handle = FakePanelHandle::standalone(4);
    let mut session = DeviceSession::new(handle.panel());
    let config = config("pages:\n  main:\n    buttons: {}\n");

    pages.switch_page("main", &config, &mut session).unwrap();
    let drawn = handle.push_count();

    assert!(pages.switch_page("missing", &config, &mut session).is_err());
    assert_eq!(pages.current_page(), "main");
    assert_eq!(handle.push_count(), drawn);
}

#[test]
fn animated_keys_advance_on_tick() {
    let dir = tempfile::tempdir().unwrap();
    let gif = dir.path().join("spinner.gif");
    write_gif(&gif, 3, 30);

    let pages = page_manager();
    let handle = FakePanelHandle::standalone(4);
    let mut session = DeviceSession::new(handle.panel());
    let config = config(&format!(
        r#"
pages:
  main:
    buttons:
      1:
        label: "Busy"
        icon: "{}"
"#,
        gif.display()
    ));

    pages.switch_page("main", &config, &mut session).unwrap();
    // Blank plus the first animation frame.
    let after_redraw = handle.pushes_for(0);
    assert_eq!(after_redraw, 2);

    // Past the frame duration and the advance throttle.
    std::thread::sleep(Duration::from_millis(80));
    pages.tick(&config, &mut session).unwrap();
    assert!(handle.pushes_for(0) > after_redraw);

    // An immediate second tick is inside the throttle window.
    let pushed = handle.pushes_for(0);
    pages.tick(&config, &mut session).unwrap();
    assert_eq!(handle.pushes_for(0), pushed);
}

#[test]
fn ticks_do_not_block_while_a_redraw_holds_the_page_lock() {
    let pages = page_manager();
    let slow_handle = FakePanelHandle::standalone(6);
    slow_handle.set_write_delay(Duration::from_millis(40));
    let mut slow_session = DeviceSession::new(slow_handle.panel());
    let cfg = config("pages:\n  main:\n    buttons: {}\n");

    // Seed the current page without the write delay applied yet.
    let redraw_pages = pages.clone();
    let redraw_cfg = cfg.clone();
    let worker = std::thread::spawn(move || {
        redraw_pages
            .switch_page("main", &redraw_cfg, &mut slow_session)
            .unwrap();
    });

    // Wait until the redraw is under way, then verify ticks walk away
    // instead of queueing behind the page lock.
    while slow_handle.push_count() == 0 && !worker.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }

    let fast_handle = FakePanelHandle::standalone(6);
    let mut fast_session = DeviceSession::new(fast_handle.panel());
    for _ in 0..5 {
        let started = Instant::now();
        pages.tick(&cfg, &mut fast_session).unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    worker.join().unwrap();
    assert_eq!(slow_handle.push_count(), 6);
}

#[test]
fn widget_keys_refresh_on_update_pass() {
    let pages = page_manager();
    let handle = FakePanelHandle::standalone(4);
    let mut session = DeviceSession::new(handle.panel());
    // Sub-second format so the rendered value changes between passes.
    let config = config(
        r#"
pages:
  main:
    buttons:
      1:
        widget:
          type: datetime
          format: "%H:%M:%S%.3f"
          update_interval: 0.05
"#,
    );

    pages.switch_page("main", &config, &mut session).unwrap();
    // Blank plus the initial forced widget render.
    let after_redraw = handle.pushes_for(0);
    assert_eq!(after_redraw, 2);

    std::thread::sleep(Duration::from_millis(70));
    pages.update_widgets(&config, &mut session).unwrap();
    assert!(handle.pushes_for(0) > after_redraw);
}

#[test]
fn animated_widget_key_keeps_text_across_frames() {
    let dir = tempfile::tempdir().unwrap();
    let gif = dir.path().join("bg.gif");
    write_gif(&gif, 2, 30);

    let pages = page_manager();
    let handle = FakePanelHandle::standalone(4);
    let mut session = DeviceSession::new(handle.panel());
    let config = config(&format!(
        r#"
pages:
  main:
    buttons:
      1:
        icon: "{}"
        widget:
          type: datetime
          format: "%H:%M"
"#,
        gif.display()
    ));

    pages.switch_page("main", &config, &mut session).unwrap();
    // Blank plus the widget render over the first frame.
    let after_redraw = handle.pushes_for(0);
    assert_eq!(after_redraw, 2);

    // The tick recomposites cached widget text over the next frame without
    // waiting for the widget's own interval.
    std::thread::sleep(Duration::from_millis(80));
    pages.tick(&config, &mut session).unwrap();
    assert!(handle.pushes_for(0) > after_redraw);
}
