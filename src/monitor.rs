//! Host resource monitoring
//!
//! One [`ResourceMonitor`] per traffic-generator host, shared by every pair
//! of a campaign. A background thread samples CPU and RAM once per second
//! over its own session and fans each sample out to memory, a CSV file and
//! (best-effort) the Redis store. A failed sample is logged and skipped; the
//! loop never aborts over one bad probe.

use crate::config::StoreConfig;
use crate::defaults;
use crate::error::Result;
use crate::session::Connector;
use crate::sink::clean_ansi;
use crate::store::RedisStore;
use chrono::Local;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Store namespace for host-level samples (not tied to any one pair)
const HOST_PAIR_INDEX: usize = 0;

/// One CPU/RAM observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSample {
    pub timestamp: String,
    pub cpu_usage: f64,
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
    pub ram_usage: f64,
}

/// Extract the CPU idle percentage from the probe output.
///
/// Probes can come back wrapped in shell noise (echoed command, prompt
/// lines), so scan the lines backwards and take the last one that parses
/// as a bare number.
pub fn parse_cpu_idle(output: &str) -> Option<f64> {
    let cleaned = clean_ansi(output);
    cleaned
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.contains('#'))
        .find_map(|line| line.parse::<f64>().ok())
}

/// Extract `(used_mb, total_mb)` from the RAM probe output.
pub fn parse_ram(output: &str) -> Option<(u64, u64)> {
    let cleaned = clean_ansi(output);
    cleaned
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && !line.contains('#'))
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            let used = parts.next()?.parse::<u64>().ok()?;
            let total = parts.next()?.parse::<u64>().ok()?;
            Some((used, total))
        })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

struct Shared {
    running: AtomicBool,
    samples: Mutex<Vec<MonitorSample>>,
}

/// Background CPU/RAM sampler for the traffic-generator host
pub struct ResourceMonitor {
    connector: Arc<dyn Connector>,
    store_config: StoreConfig,
    shared: Arc<Shared>,
    worker: Option<(JoinHandle<()>, mpsc::Receiver<()>)>,
}

impl ResourceMonitor {
    pub fn new(connector: Arc<dyn Connector>, store_config: StoreConfig) -> Self {
        Self {
            connector,
            store_config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                samples: Mutex::new(Vec::new()),
            }),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Samples collected so far
    pub fn snapshot(&self) -> Vec<MonitorSample> {
        self.shared.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Start sampling into `csv_path`. A second start while running is a
    /// logged no-op.
    pub fn start(&mut self, csv_path: &std::path::Path) -> Result<()> {
        if self.is_running() {
            log::warn!("monitor already running, ignoring start");
            return Ok(());
        }

        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(csv_path)?;
        writer.write_record([
            "Timestamp",
            "CPU_Usage_Percent",
            "RAM_Used_MB",
            "RAM_Total_MB",
            "RAM_Usage_Percent",
        ])?;
        writer.flush()?;

        self.shared.samples.lock().map(|mut s| s.clear()).ok();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let connector = Arc::clone(&self.connector);
        let store_config = self.store_config.clone();
        let path = csv_path.to_path_buf();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("resource-monitor".to_string())
            .spawn(move || {
                sample_loop(shared, connector, store_config, path);
                let _ = done_tx.send(());
            })?;

        self.worker = Some((handle, done_rx));
        log::info!("resource monitor started, writing {}", csv_path.display());
        Ok(())
    }

    /// Signal the sampler to stop and wait a bounded time for it to finish.
    /// Stopping a stopped monitor is a no-op.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some((handle, done_rx)) = self.worker.take() else {
            return;
        };
        match done_rx.recv_timeout(defaults::MONITOR_JOIN_TIMEOUT) {
            Ok(()) => {
                let _ = handle.join();
                log::info!("resource monitor stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                // the thread is stuck in a remote read; leave it detached
                log::warn!(
                    "monitor thread did not stop within {:?}",
                    defaults::MONITOR_JOIN_TIMEOUT
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample_loop(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    store_config: StoreConfig,
    csv_path: std::path::PathBuf,
) {
    let mut executor = match connector.connect(false) {
        Ok(executor) => executor,
        Err(e) => {
            log::error!("monitor cannot connect: {}", e);
            shared.running.store(false, Ordering::SeqCst);
            return;
        }
    };
    let mut store = RedisStore::open(&store_config);

    while shared.running.load(Ordering::SeqCst) {
        let timestamp = Local::now().format(crate::store::TIMESTAMP_FORMAT).to_string();

        let cpu_idle = executor
            .execute(defaults::CPU_PROBE)
            .ok()
            .and_then(|r| parse_cpu_idle(&r.stdout));
        let ram = executor
            .execute(defaults::RAM_PROBE)
            .ok()
            .and_then(|r| parse_ram(&r.stdout));

        let (Some(cpu_idle), Some((ram_used_mb, ram_total_mb))) = (cpu_idle, ram) else {
            log::warn!("monitor probe failed, skipping sample");
            std::thread::sleep(Duration::from_secs(1));
            continue;
        };

        let ram_usage = if ram_total_mb > 0 {
            round2(ram_used_mb as f64 / ram_total_mb as f64 * 100.0)
        } else {
            0.0
        };
        let sample = MonitorSample {
            timestamp: timestamp.clone(),
            cpu_usage: round2(100.0 - cpu_idle),
            ram_used_mb,
            ram_total_mb,
            ram_usage,
        };

        if let Ok(mut samples) = shared.samples.lock() {
            samples.push(sample.clone());
        }

        if let Err(e) = append_csv(&csv_path, &sample) {
            log::warn!("monitor CSV append failed: {}", e);
        }

        match store.save_monitor_data(
            HOST_PAIR_INDEX,
            &sample.timestamp,
            sample.cpu_usage,
            sample.ram_used_mb,
            sample.ram_total_mb,
            sample.ram_usage,
        ) {
            Ok(_) => {}
            Err(e) => log::warn!("monitor redis write failed: {}", e),
        }

        std::thread::sleep(Duration::from_secs(1));
    }

    executor.close();
    log::debug!("monitor loop exited");
}

fn append_csv(path: &std::path::Path, sample: &MonitorSample) -> Result<()> {
    let file = std::fs::OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record([
        sample.timestamp.as_str(),
        &sample.cpu_usage.to_string(),
        &sample.ram_used_mb.to_string(),
        &sample.ram_total_mb.to_string(),
        &sample.ram_usage.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedConnector;

    #[test]
    fn test_parse_cpu_idle_plain() {
        assert_eq!(parse_cpu_idle("95.5\n"), Some(95.5));
    }

    #[test]
    fn test_parse_cpu_idle_with_shell_noise() {
        let output = "top -bn1 | grep 'Cpu(s)' | awk '{print $8}'\n92.1\n[user@host ~]$ \n";
        assert_eq!(parse_cpu_idle(output), Some(92.1));
    }

    #[test]
    fn test_parse_cpu_idle_skips_prompt_lines() {
        // root prompt contains '#', bracketed status lines start with '['
        let output = "[load 0.42]\nroot@host:~# top\n88.0\n";
        assert_eq!(parse_cpu_idle(output), Some(88.0));
    }

    #[test]
    fn test_parse_cpu_idle_garbage_is_none() {
        assert_eq!(parse_cpu_idle("command not found\n"), None);
        assert_eq!(parse_cpu_idle(""), None);
    }

    #[test]
    fn test_parse_ram() {
        assert_eq!(parse_ram("2048 16384\n"), Some((2048, 16384)));
        let noisy = "free -m | grep Mem\n1024 8192\nuser@host:~$ \n";
        assert_eq!(parse_ram(noisy), Some((1024, 8192)));
        assert_eq!(parse_ram("Mem: unavailable\n"), None);
    }

    #[test]
    fn test_monitor_collects_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("monitor.csv");

        // alternate CPU and RAM probe responses
        let connector = ScriptedConnector::repeating(vec![
            ("top -bn1", "90.0\n"),
            ("free -m", "1000 4000\n"),
        ]);
        let store = StoreConfig {
            enabled: false,
            ..StoreConfig::default()
        };

        let mut monitor = ResourceMonitor::new(Arc::new(connector), store);
        monitor.start(&csv_path).unwrap();
        assert!(monitor.is_running());
        std::thread::sleep(Duration::from_millis(1500));
        monitor.stop();
        assert!(!monitor.is_running());

        let samples = monitor.snapshot();
        assert!(!samples.is_empty());
        assert_eq!(samples[0].cpu_usage, 10.0);
        assert_eq!(samples[0].ram_used_mb, 1000);
        assert_eq!(samples[0].ram_usage, 25.0);

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.starts_with("Timestamp,CPU_Usage_Percent"));
        assert!(csv.lines().count() >= 2);
    }

    #[test]
    fn test_double_stop_is_noop() {
        let connector = ScriptedConnector::repeating(vec![("top", "99.0\n"), ("free", "1 2\n")]);
        let store = StoreConfig {
            enabled: false,
            ..StoreConfig::default()
        };
        let mut monitor = ResourceMonitor::new(Arc::new(connector), store);
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(monitor.snapshot().is_empty());
    }
}
