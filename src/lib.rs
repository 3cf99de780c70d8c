//! loadlab
//!
//! An SSH-driven load-testing lab: provisions a DPDK-based traffic generator
//! (dperf) across one or more client/server traffic pairs, configures an APV
//! hardware load balancer over its CLI, samples CPU/RAM on the generator host
//! while tests run, and persists throughput statistics to CSV files and an
//! optional Redis store.

pub mod apv;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod session;
pub mod sink;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::{LabConfig, Pair, Protocol};
pub use error::{AppError, Result};
pub use monitor::{MonitorSample, ResourceMonitor};
pub use orchestrator::{CampaignResult, Orchestrator, RunOptions};
pub use report::{parse_report, MetricValue, StatsReport};
pub use runner::{PairResult, PairRunner};
pub use session::{Connector, ExecutionResult, Executor, SessionConfig, SshConnector, SshSession};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Prompt suffixes that terminate in-session command output collection.
    /// A remote prompt customization that ends in none of these breaks
    /// detection; the in-session timeout is the fallback.
    pub const SHELL_PROMPTS: &[&str] = &["$ ", "# ", "> "];

    /// Wait for in-session command output before giving up on the prompt.
    pub const SHELL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Pause after opening the interactive shell before discarding the banner.
    pub const BANNER_WAIT: Duration = Duration::from_millis(500);

    /// Poll interval for non-blocking channel reads.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Bounded wait for the monitor thread to observe its stop flag.
    pub const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Warm-up after starting the monitor, before the first worker starts.
    pub const MONITOR_WARMUP: Duration = Duration::from_secs(2);

    /// Extra slack on top of the configured test duration when waiting for
    /// the traffic generator to print its completion banner.
    pub const RUN_GRACE: Duration = Duration::from_secs(60);

    /// Sentinel written into comparison tables for metrics one side lacks.
    pub const MISSING_METRIC: &str = "N/A";

    pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
    pub const DEFAULT_LOG_DIR: &str = "./logs";
    pub const DEFAULT_OUTPUT_DIR: &str = "./results";

    /// CPU idle percentage probe (column 8 of the `Cpu(s)` line).
    pub const CPU_PROBE: &str = "top -bn1 | grep 'Cpu(s)' | awk '{print $8}'";

    /// RAM used/total probe in megabytes.
    pub const RAM_PROBE: &str = "free -m | grep Mem | awk '{print $3, $2}'";
}
