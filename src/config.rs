//! Lab configuration model and YAML loading
//!
//! The configuration mirrors the lab topology: one APV management endpoint,
//! one traffic-generator host, and a list of client/server traffic pairs.
//! A pair's index in the list is its stable identity for the lifetime of a
//! campaign and keys every persisted artifact.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Traffic protocol driven through the load balancer.
///
/// Unknown tags are rejected while loading the configuration, not when the
/// per-protocol command sequences are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "http" => Ok(Protocol::Http),
            other => Err(AppError::config(format!("Unsupported protocol: {}", other))),
        }
    }
}

/// Client side of a traffic pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEndpoint {
    /// PCI address of the NIC handed to the userspace driver
    pub nic_pci: String,
    /// OS connection name used to bring the interface down/up
    pub nic_name: String,
    /// Native kernel driver the NIC is rebound to on teardown
    pub nic_driver: String,
    /// First source address of the client pool
    pub ip: String,
    /// Size of the source IP pool
    pub source_ip_count: u32,
    pub gateway: String,
    /// Traffic duration, e.g. "30s"
    pub duration: String,
    pub cpu_cores: String,
    pub tx_burst: u32,
    pub launch_num: u32,
    /// Congestion-control tag passed through to the generator
    pub cc: String,
    pub keepalive: String,
    #[serde(default)]
    pub rss: bool,
    pub socket_mem: u32,
    /// Virtual server the client targets (the load balancer's VIP)
    pub virtual_server_ip: String,
    pub virtual_server_port: u16,
    #[serde(default = "default_one")]
    pub virtual_server_port_count: u32,
}

/// Server side of a traffic pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub nic_pci: String,
    pub nic_name: String,
    pub nic_driver: String,
    pub ip: String,
    pub gateway: String,
    /// Server runs longer than the client so it outlives the traffic window
    pub duration: String,
    pub cpu_cores: String,
    pub tx_burst: u32,
    pub keepalive: String,
    #[serde(default)]
    pub rss: bool,
    pub socket_mem: u32,
    pub listen_port: u16,
    #[serde(default = "default_one")]
    pub listen_port_count: u32,
}

/// One client/server traffic relationship under test.
///
/// Immutable during a run; its position in `GeneratorConfig::pairs` is the
/// stable index used as the namespace key for all persisted results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub protocol: Protocol,
    pub payload_size: u32,
    pub client: ClientEndpoint,
    pub server: ServerEndpoint,
}

/// Traffic-generator host and provisioning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub management_ip: String,
    #[serde(default = "default_ssh_port")]
    pub management_port: u16,
    pub username: String,
    pub password: String,
    /// DPDK checkout containing usertools/
    pub dpdk_path: String,
    /// dperf checkout containing build/dperf
    pub dperf_path: String,
    pub hugepage_frames: u32,
    /// Hugepage size with unit suffix, "1G" or "2M"
    pub hugepage_size: String,
    pub pairs: Vec<Pair>,
}

/// APV load-balancer management endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApvConfig {
    pub management_ip: String,
    #[serde(default = "default_ssh_port")]
    pub management_port: u16,
    pub username: String,
    pub password: String,
    pub enable_password: String,
}

/// Redis store settings; the store is best-effort and may be disabled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            enabled: true,
        }
    }
}

/// Test section of the lab configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub apv: ApvConfig,
    pub traffic_generator: GeneratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Top-level lab configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    pub test: TestConfig,
}

impl LabConfig {
    /// Load a configuration from a YAML file and validate it
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::config(format!(
                "Cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from YAML text and validate it
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: LabConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        let generator = &self.test.traffic_generator;

        if generator.management_ip.is_empty() {
            return Err(AppError::config("traffic_generator.management_ip is empty"));
        }
        if generator.pairs.is_empty() {
            return Err(AppError::config("at least one traffic pair is required"));
        }

        hugepage_total(generator.hugepage_frames, &generator.hugepage_size)?;

        for (index, pair) in generator.pairs.iter().enumerate() {
            if pair.payload_size == 0 {
                return Err(AppError::config(format!(
                    "pair {}: payload_size must be positive",
                    index
                )));
            }
            parse_duration(&pair.client.duration).map_err(|e| {
                AppError::config(format!("pair {}: client duration: {}", index, e))
            })?;
            parse_duration(&pair.server.duration).map_err(|e| {
                AppError::config(format!("pair {}: server duration: {}", index, e))
            })?;
        }

        Ok(())
    }

    pub fn pair_count(&self) -> usize {
        self.test.traffic_generator.pairs.len()
    }
}

/// Total hugepage reservation, e.g. 4 frames of "1G" -> "4G".
///
/// The unit suffix is preserved because the remote provisioning script takes
/// the total in the same unit as the page size.
pub fn hugepage_total(frames: u32, size: &str) -> Result<String> {
    let (digits, unit) = split_unit_suffix(size)
        .ok_or_else(|| AppError::config(format!("Invalid hugepage size: {}", size)))?;
    let per_page: u32 = digits
        .parse()
        .map_err(|_| AppError::config(format!("Invalid hugepage size: {}", size)))?;
    if unit != 'G' && unit != 'M' {
        return Err(AppError::config(format!(
            "Hugepage size must end in G or M, got: {}",
            size
        )));
    }
    Ok(format!("{}{}", frames * per_page, unit))
}

/// Parse a generator duration directive ("30s", "2m") into a Duration
pub fn parse_duration(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    let (digits, unit) = split_unit_suffix(trimmed)
        .ok_or_else(|| AppError::config(format!("Invalid duration: {}", text)))?;
    let value: u64 = digits
        .parse()
        .map_err(|_| AppError::config(format!("Invalid duration: {}", text)))?;
    match unit {
        's' => Ok(Duration::from_secs(value)),
        'm' => Ok(Duration::from_secs(value * 60)),
        _ => Err(AppError::config(format!(
            "Duration must end in s or m, got: {}",
            text
        ))),
    }
}

/// Split a value like "30s" or "1G" into its digits and final character.
/// Splitting on the character keeps multibyte input a plain error instead
/// of a byte-boundary panic.
fn split_unit_suffix(text: &str) -> Option<(&str, char)> {
    let unit = text.chars().last()?;
    Some((&text[..text.len() - unit.len_utf8()], unit))
}

fn default_ssh_port() -> u16 {
    22
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
