use std::ffi::CString;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hidapi::{HidApi, HidDevice};

use crate::{Error, Result};

use super::{KeyCallback, KeyImageFormat, Panel, PanelEnumerator};

pub const ELGATO_VENDOR_ID: u16 = 0x0fd9;

/// Output report layout shared by the v2-generation panels: 8-byte header
/// followed by up to 1016 bytes of JPEG payload per report.
const IMAGE_REPORT_SIZE: usize = 1024;
const IMAGE_HEADER_SIZE: usize = 8;
const IMAGE_PAYLOAD_SIZE: usize = IMAGE_REPORT_SIZE - IMAGE_HEADER_SIZE;
const FEATURE_REPORT_SIZE: usize = 32;

/// Input reports carry key states starting at this offset.
const KEY_STATE_OFFSET: usize = 4;

/// How long the reader thread blocks per poll; also bounds how long a
/// concurrent image write can be held up by the shared device handle.
const READ_POLL_MS: i32 = 20;

#[derive(Debug)]
struct PanelModel {
    product_id: u16,
    name: &'static str,
    keys: u8,
    image_size: u32,
}

/// Panels speaking the v2 JPEG wire format. Older BMP-based models are not
/// supported.
const SUPPORTED_MODELS: &[PanelModel] = &[
    PanelModel {
        product_id: 0x006d,
        name: "Stream Deck V2",
        keys: 15,
        image_size: 72,
    },
    PanelModel {
        product_id: 0x0080,
        name: "Stream Deck MK.2",
        keys: 15,
        image_size: 72,
    },
    PanelModel {
        product_id: 0x006c,
        name: "Stream Deck XL",
        keys: 32,
        image_size: 96,
    },
];

/// Enumerates supported USB panels through hidapi. The device list is
/// refreshed on every call; nothing is cached between calls.
pub struct HidEnumerator {
    api: Arc<Mutex<HidApi>>,
}

impl HidEnumerator {
    pub fn new() -> Result<Self> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }
}

impl PanelEnumerator for HidEnumerator {
    fn enumerate(&mut self) -> Result<Vec<Box<dyn Panel>>> {
        let mut api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        api.refresh_devices()?;

        let mut panels: Vec<Box<dyn Panel>> = Vec::new();
        for info in api.device_list() {
            if info.vendor_id() != ELGATO_VENDOR_ID {
                continue;
            }
            let Some(model) = SUPPORTED_MODELS
                .iter()
                .find(|m| m.product_id == info.product_id())
            else {
                continue;
            };
            panels.push(Box::new(HidPanel {
                api: self.api.clone(),
                path: info.path().to_owned(),
                model,
                device: None,
                reader_stop: Arc::new(AtomicBool::new(false)),
                reader: None,
            }));
        }
        Ok(panels)
    }
}

pub struct HidPanel {
    api: Arc<Mutex<HidApi>>,
    path: CString,
    model: &'static PanelModel,
    device: Option<Arc<Mutex<HidDevice>>>,
    reader_stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl HidPanel {
    fn device(&self) -> Result<&Arc<Mutex<HidDevice>>> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::Transport("panel is not open".into()))
    }

    fn stop_reader(&mut self) {
        self.reader_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }

    fn send_feature(&self, payload: &[u8]) -> Result<()> {
        let device = self.device()?;
        let mut report = [0u8; FEATURE_REPORT_SIZE];
        report[..payload.len()].copy_from_slice(payload);
        let guard = device.lock().unwrap_or_else(PoisonError::into_inner);
        guard.send_feature_report(&report)?;
        Ok(())
    }
}

impl Panel for HidPanel {
    fn model(&self) -> &str {
        self.model.name
    }

    fn key_count(&self) -> u8 {
        self.model.keys
    }

    fn key_image_format(&self) -> KeyImageFormat {
        KeyImageFormat {
            width: self.model.image_size,
            height: self.model.image_size,
        }
    }

    fn open(&mut self) -> Result<()> {
        let api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        let device = api.open_path(&self.path)?;
        self.device = Some(Arc::new(Mutex::new(device)));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.send_feature(&[0x03, 0x02])
    }

    fn close(&mut self) -> Result<()> {
        self.stop_reader();
        self.device = None;
        Ok(())
    }

    fn set_brightness(&mut self, percent: u8) -> Result<()> {
        self.send_feature(&[0x03, 0x08, percent.min(100)])
    }

    fn set_key_image(&mut self, key: u8, image: &[u8]) -> Result<()> {
        if key >= self.model.keys {
            return Err(Error::Transport(format!(
                "key index {key} out of range for {}",
                self.model.name
            )));
        }
        let device = self.device()?.clone();
        let guard = device.lock().unwrap_or_else(PoisonError::into_inner);

        let mut offset = 0usize;
        let mut page = 0u16;
        loop {
            let remaining = image.len() - offset;
            let chunk = remaining.min(IMAGE_PAYLOAD_SIZE);
            let last = chunk == remaining;

            let mut report = vec![0u8; IMAGE_REPORT_SIZE];
            report[0] = 0x02;
            report[1] = 0x07;
            report[2] = key;
            report[3] = u8::from(last);
            report[4..6].copy_from_slice(&(chunk as u16).to_le_bytes());
            report[6..8].copy_from_slice(&page.to_le_bytes());
            report[IMAGE_HEADER_SIZE..IMAGE_HEADER_SIZE + chunk]
                .copy_from_slice(&image[offset..offset + chunk]);
            guard.write(&report)?;

            offset += chunk;
            page += 1;
            if last {
                break;
            }
        }
        Ok(())
    }

    fn set_key_callback(&mut self, callback: KeyCallback) -> Result<()> {
        let device = self.device()?.clone();
        self.stop_reader();
        self.reader_stop = Arc::new(AtomicBool::new(false));

        let stop = self.reader_stop.clone();
        let key_count = self.model.keys as usize;
        let handle = thread::Builder::new()
            .name("deckhand-hidreader".into())
            .spawn(move || {
                let mut previous = vec![0u8; key_count];
                let mut buf = [0u8; 512];
                while !stop.load(Ordering::SeqCst) {
                    let read = {
                        let guard = device.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.read_timeout(&mut buf, READ_POLL_MS)
                    };
                    match read {
                        Ok(n) if n > KEY_STATE_OFFSET && buf[0] == 0x01 => {
                            let states = &buf[KEY_STATE_OFFSET..n.min(KEY_STATE_OFFSET + key_count)];
                            for (key, (&now, prev)) in
                                states.iter().zip(previous.iter_mut()).enumerate()
                            {
                                if now != *prev {
                                    callback(key as u8, now != 0);
                                    *prev = now;
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(_) => {
                            // Transport hiccup; the connection monitor owns
                            // disconnect detection, so just back off here.
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            })
            .map_err(|e| Error::Transport(format!("failed to spawn hid reader: {e}")))?;
        self.reader = Some(handle);
        Ok(())
    }

    fn probe(&mut self) -> Result<()> {
        let device = self.device()?;
        let guard = device.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get_serial_number_string()?;
        Ok(())
    }
}

impl Drop for HidPanel {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_models_are_unique_and_square() {
        for (i, model) in SUPPORTED_MODELS.iter().enumerate() {
            assert!(model.keys > 0);
            assert!(model.image_size == 72 || model.image_size == 96);
            for other in &SUPPORTED_MODELS[i + 1..] {
                assert_ne!(model.product_id, other.product_id);
            }
        }
    }

    #[test]
    fn image_payload_fits_report() {
        assert_eq!(IMAGE_HEADER_SIZE + IMAGE_PAYLOAD_SIZE, IMAGE_REPORT_SIZE);
    }
}
