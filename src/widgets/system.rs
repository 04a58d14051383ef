use std::path::Path;
use std::time::{Duration, Instant};

use sysinfo::{Disks, Networks, System};

use crate::config::WidgetConfig;
use crate::{Error, Result};

use super::{Widget, WidgetValue};

const KIB: f64 = 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Overall CPU usage. Keeps its own `System` so successive refreshes can
/// measure the delta; the very first reading after startup is zero.
pub struct CpuWidget {
    system: System,
}

impl CpuWidget {
    pub fn from_config(_config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Ok(Box::new(Self { system }))
    }
}

impl Widget for CpuWidget {
    fn kind(&self) -> &'static str {
        "cpu"
    }

    fn update_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn fetch(&mut self) -> Result<WidgetValue> {
        self.system.refresh_cpu_usage();
        Ok(WidgetValue::Percent(self.system.global_cpu_usage()))
    }

    fn render_text(&self, value: &WidgetValue) -> String {
        match value {
            WidgetValue::Percent(pct) => format!("CPU\n{pct:.0}%"),
            _ => "CPU\n--".to_string(),
        }
    }
}

/// Memory usage, optionally with a used/total detail line.
pub struct MemoryWidget {
    system: System,
    detail: bool,
}

impl MemoryWidget {
    pub fn from_config(config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        Ok(Box::new(Self {
            system: System::new(),
            detail: config.param_bool("detail").unwrap_or(false),
        }))
    }
}

impl Widget for MemoryWidget {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn update_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn fetch(&mut self) -> Result<WidgetValue> {
        self.system.refresh_memory();
        Ok(WidgetValue::Memory {
            used_bytes: self.system.used_memory(),
            total_bytes: self.system.total_memory(),
        })
    }

    fn render_text(&self, value: &WidgetValue) -> String {
        let WidgetValue::Memory {
            used_bytes,
            total_bytes,
        } = value
        else {
            return "MEM\n--".to_string();
        };
        let pct = if *total_bytes == 0 {
            0.0
        } else {
            *used_bytes as f64 / *total_bytes as f64 * 100.0
        };
        if self.detail {
            format!(
                "MEM\n{pct:.0}%\n{:.1}/{:.1}G",
                *used_bytes as f64 / GIB,
                *total_bytes as f64 / GIB
            )
        } else {
            format!("MEM\n{pct:.0}%")
        }
    }
}

/// Filesystem usage for the disk holding a configured path (default `/`).
pub struct DiskWidget {
    disks: Disks,
    path: String,
    detail: bool,
}

impl DiskWidget {
    pub fn from_config(config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        Ok(Box::new(Self {
            disks: Disks::new(),
            path: config.param_str("path").unwrap_or("/").to_string(),
            detail: config.param_bool("detail").unwrap_or(false),
        }))
    }
}

impl Widget for DiskWidget {
    fn kind(&self) -> &'static str {
        "disk"
    }

    fn update_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn fetch(&mut self) -> Result<WidgetValue> {
        self.disks.refresh(true);
        // Longest mount-point prefix wins, so /home beats / for paths
        // under it.
        let disk = self
            .disks
            .list()
            .iter()
            .filter(|d| Path::new(&self.path).starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| Error::DataSource(format!("no disk mounted for '{}'", self.path)))?;
        let total = disk.total_space();
        Ok(WidgetValue::Memory {
            used_bytes: total.saturating_sub(disk.available_space()),
            total_bytes: total,
        })
    }

    fn render_text(&self, value: &WidgetValue) -> String {
        let WidgetValue::Memory {
            used_bytes,
            total_bytes,
        } = value
        else {
            return "DISK\n--".to_string();
        };
        let pct = if *total_bytes == 0 {
            0.0
        } else {
            *used_bytes as f64 / *total_bytes as f64 * 100.0
        };
        if self.detail {
            format!(
                "DISK\n{pct:.0}%\n{:.0}/{:.0}G",
                *used_bytes as f64 / GIB,
                *total_bytes as f64 / GIB
            )
        } else {
            format!("DISK\n{pct:.0}%")
        }
    }
}

/// Network throughput, summed over all interfaces or narrowed to one via
/// the `interface` parameter. Rates are derived from the byte counts since
/// the previous fetch, so the first reading after startup is zero.
pub struct NetworkWidget {
    networks: Networks,
    interface: Option<String>,
    last_fetch: Option<Instant>,
}

impl NetworkWidget {
    pub fn from_config(config: &WidgetConfig) -> Result<Box<dyn Widget>> {
        Ok(Box::new(Self {
            networks: Networks::new(),
            interface: config.param_str("interface").map(str::to_string),
            last_fetch: None,
        }))
    }
}

impl Widget for NetworkWidget {
    fn kind(&self) -> &'static str {
        "network"
    }

    fn update_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn fetch(&mut self) -> Result<WidgetValue> {
        self.networks.refresh(true);
        let now = Instant::now();
        let elapsed = self
            .last_fetch
            .replace(now)
            .map(|last| now.duration_since(last))
            .unwrap_or_default();

        let mut rx = 0u64;
        let mut tx = 0u64;
        for (name, data) in self.networks.list() {
            if self
                .interface
                .as_deref()
                .is_some_and(|want| want != name.as_str())
            {
                continue;
            }
            rx += data.received();
            tx += data.transmitted();
        }

        let secs = elapsed.as_secs_f64();
        let (rx_rate, tx_rate) = if secs > 0.0 {
            ((rx as f64 / secs) as u64, (tx as f64 / secs) as u64)
        } else {
            (0, 0)
        };
        Ok(WidgetValue::Network {
            rx_bytes_per_sec: rx_rate,
            tx_bytes_per_sec: tx_rate,
        })
    }

    fn render_text(&self, value: &WidgetValue) -> String {
        let WidgetValue::Network {
            rx_bytes_per_sec,
            tx_bytes_per_sec,
        } = value
        else {
            return "NET\n--".to_string();
        };
        format!(
            "NET\n\u{2193}{}\n\u{2191}{}",
            format_rate(*rx_bytes_per_sec),
            format_rate(*tx_bytes_per_sec)
        )
    }
}

fn format_rate(bytes_per_sec: u64) -> String {
    let rate = bytes_per_sec as f64;
    if rate >= KIB * KIB {
        format!("{:.1}M", rate / (KIB * KIB))
    } else if rate >= KIB {
        format!("{:.0}K", rate / KIB)
    } else {
        format!("{rate:.0}B")
    }
}
