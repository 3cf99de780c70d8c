//! Per-pair test lifecycle
//!
//! A [`PairRunner`] owns everything one traffic pair needs: a persistent
//! control session for environment provisioning, the rendered generator
//! configs, and the server/client run cycle. Provisioning runs through one
//! persistent shell so directory changes and environment survive between
//! steps; the run cycle opens a dedicated session per role so the two sides
//! execute concurrently.

use crate::artifacts;
use crate::config::{parse_duration, GeneratorConfig, Pair, StoreConfig};
use crate::defaults;
use crate::error::{AppError, Result};
use crate::report::{parse_report, StatsReport};
use crate::session::{Connector, Executor};
use crate::store::{RedisStore, StoredRun, TIMESTAMP_FORMAT};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Reports of one run cycle; a side that failed or never printed its
/// completion banner contributes `None` without affecting the other side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairResult {
    pub server: Option<StatsReport>,
    pub client: Option<StatsReport>,
}

/// Driver for one traffic pair on the generator host
pub struct PairRunner {
    pair_index: usize,
    pair: Pair,
    dpdk_path: String,
    dperf_path: String,
    hugepage_frames: u32,
    hugepage_size: String,
    connector: Arc<dyn Connector>,
    store_config: StoreConfig,
    output_dir: PathBuf,
    control: Option<Box<dyn Executor>>,
}

impl PairRunner {
    pub fn new(
        generator: &GeneratorConfig,
        pair_index: usize,
        connector: Arc<dyn Connector>,
        store_config: StoreConfig,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let pair = generator
            .pairs
            .get(pair_index)
            .cloned()
            .ok_or_else(|| AppError::config(format!("no pair with index {}", pair_index)))?;
        Ok(Self {
            pair_index,
            pair,
            dpdk_path: generator.dpdk_path.clone(),
            dperf_path: generator.dperf_path.clone(),
            hugepage_frames: generator.hugepage_frames,
            hugepage_size: generator.hugepage_size.clone(),
            connector,
            store_config,
            output_dir,
            control: None,
        })
    }

    pub fn pair_index(&self) -> usize {
        self.pair_index
    }

    /// Open the persistent control session used for provisioning
    pub fn connect(&mut self) -> Result<()> {
        if self.control.is_none() {
            self.control = Some(self.connector.connect(true)?);
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut control) = self.control.take() {
            control.close();
        }
    }

    fn control(&mut self) -> Result<&mut Box<dyn Executor>> {
        self.control
            .as_mut()
            .ok_or_else(|| AppError::session("control session is not connected"))
    }

    /// Reserve hugepages on the generator host
    pub fn set_hugepages(&mut self) -> Result<()> {
        let total =
            crate::config::hugepage_total(self.hugepage_frames, &self.hugepage_size)?;
        let size = self.hugepage_size.clone();
        let usertools = format!("cd {}/usertools", self.dpdk_path);
        let control = self.control()?;
        control.execute(&usertools)?;
        control.execute(&format!(
            "sudo python3 dpdk-hugepages.py -p {} --setup {}",
            size, total
        ))?;
        Ok(())
    }

    /// Detach both NICs from the kernel and hand them to the userspace driver
    pub fn bind_nics(&mut self) -> Result<()> {
        let usertools = format!("cd {}/usertools", self.dpdk_path);
        let commands = vec![
            usertools,
            format!("nmcli connection down {}", self.pair.client.nic_name),
            format!("nmcli connection down {}", self.pair.server.nic_name),
            format!(
                "sudo python3 dpdk-devbind.py -b vfio-pci {} --noiommu-mode",
                self.pair.client.nic_pci
            ),
            format!(
                "sudo python3 dpdk-devbind.py -b vfio-pci {} --noiommu-mode",
                self.pair.server.nic_pci
            ),
        ];
        let control = self.control()?;
        for command in commands {
            control.execute(&command)?;
        }
        Ok(())
    }

    /// Rebind NICs to their native drivers and bring the links back up
    pub fn unbind_nics(&mut self) -> Result<()> {
        let commands = vec![
            format!("cd {}/usertools", self.dpdk_path),
            format!(
                "sudo python3 dpdk-devbind.py -b {} {}",
                self.pair.client.nic_driver, self.pair.client.nic_pci
            ),
            format!(
                "sudo python3 dpdk-devbind.py -b {} {}",
                self.pair.server.nic_driver, self.pair.server.nic_pci
            ),
            format!("nmcli connection up {}", self.pair.client.nic_name),
            format!("nmcli connection up {}", self.pair.server.nic_name),
            "sudo python3 dpdk-devbind.py --status".to_string(),
        ];
        let control = self.control()?;
        for command in commands {
            control.execute(&command)?;
        }
        Ok(())
    }

    /// Render and upload both generator config files
    pub fn write_configs(&mut self) -> Result<()> {
        let server_conf = self.render_server_config();
        let client_conf = self.render_client_config();
        let commands = vec![
            format!("cd {}", self.dperf_path),
            "mkdir -p config".to_string(),
            format!(
                "cat > config/server_pair{}.conf << 'EOF'\n{}\nEOF",
                self.pair_index, server_conf
            ),
            format!(
                "cat > config/client_pair{}.conf << 'EOF'\n{}\nEOF",
                self.pair_index, client_conf
            ),
        ];
        let control = self.control()?;
        for command in commands {
            control.execute(&command)?;
        }
        Ok(())
    }

    /// Full provisioning: hugepages, NIC binding, config upload
    pub fn setup_env(&mut self) -> Result<()> {
        log::info!("pair {}: provisioning environment", self.pair_index);
        self.set_hugepages()
            .map_err(|e| AppError::setup(format!("pair {}: hugepages: {}", self.pair_index, e)))?;
        self.bind_nics()
            .map_err(|e| AppError::setup(format!("pair {}: bind NICs: {}", self.pair_index, e)))?;
        self.write_configs()
            .map_err(|e| AppError::setup(format!("pair {}: configs: {}", self.pair_index, e)))?;
        Ok(())
    }

    /// Return the host to its pre-test state
    pub fn teardown_env(&mut self) -> Result<()> {
        log::info!("pair {}: restoring environment", self.pair_index);
        self.unbind_nics()
            .map_err(|e| AppError::setup(format!("pair {}: unbind NICs: {}", self.pair_index, e)))
    }

    /// dperf server-mode configuration text
    pub fn render_server_config(&self) -> String {
        let server = &self.pair.server;
        let mut lines = vec![
            "mode            server".to_string(),
            format!("tx_burst        {}", server.tx_burst),
            format!("cpu             {}", server.cpu_cores),
        ];
        if server.rss {
            lines.push("rss".to_string());
        }
        lines.extend([
            format!("socket_mem      {}", server.socket_mem),
            format!("protocol        {}", self.pair.protocol),
            format!("duration        {}", server.duration),
            format!("payload_size    {}", self.pair.payload_size),
            format!("keepalive       {}", server.keepalive),
            String::new(),
            "# port           pci        addr        gateway        [mac]".to_string(),
            format!(
                "port            {}        {}        {}",
                server.nic_pci, server.ip, server.gateway
            ),
            String::new(),
            "# addr_start      num".to_string(),
            format!(
                "client          {}    {}",
                self.pair.client.ip, self.pair.client.source_ip_count
            ),
            String::new(),
            "# addr_start      num".to_string(),
            format!("server          {}    1", server.ip),
            String::new(),
            "# port_start      num".to_string(),
            format!(
                "listen          {}    {}",
                server.listen_port, server.listen_port_count
            ),
            String::new(),
        ]);
        lines.join("\n")
    }

    /// dperf client-mode configuration text
    pub fn render_client_config(&self) -> String {
        let client = &self.pair.client;
        let mut lines = vec![
            "mode            client".to_string(),
            format!("tx_burst        {}", client.tx_burst),
            format!("launch_num      {}", client.launch_num),
            format!("cpu             {}", client.cpu_cores),
        ];
        if client.rss {
            lines.push("rss".to_string());
        }
        lines.extend([
            format!("socket_mem      {}", client.socket_mem),
            format!("protocol        {}", self.pair.protocol),
            format!("payload_size    {}", self.pair.payload_size),
            format!("duration        {}", client.duration),
            String::new(),
            format!("cc              {}", client.cc),
            format!("keepalive       {}", client.keepalive),
            String::new(),
            "# port           pci             addr         gateway       [mac]".to_string(),
            format!(
                "port            {}    {}    {}",
                client.nic_pci, client.ip, client.gateway
            ),
            String::new(),
            "# addr_start      num".to_string(),
            format!("client          {}    {}", client.ip, client.source_ip_count),
            String::new(),
            "# addr_start      num".to_string(),
            format!("server          {}    1", client.virtual_server_ip),
            String::new(),
            "# port_start      num".to_string(),
            format!(
                "listen          {}    {}",
                client.virtual_server_port, client.virtual_server_port_count
            ),
            String::new(),
        ]);
        lines.join("\n")
    }

    fn role_timeout(&self, role: &str) -> Duration {
        let duration = if role == "server" {
            &self.pair.server.duration
        } else {
            &self.pair.client.duration
        };
        // validated at config load; fall back to the grace window alone
        parse_duration(duration).unwrap_or(Duration::ZERO) + defaults::RUN_GRACE
    }

    /// Run one side of the pair on its own session and parse its report
    fn run_role(
        connector: &Arc<dyn Connector>,
        dperf_path: &str,
        pair_index: usize,
        role: &str,
        timeout: Duration,
    ) -> Result<Option<StatsReport>> {
        let mut executor = connector.connect(true)?;
        executor.execute(&format!("cd {}", dperf_path))?;
        let launch = format!(
            "sudo ./build/dperf -c config/{}_pair{}.conf",
            role, pair_index
        );
        let result = executor.execute_with_timeout(&launch, timeout)?;
        executor.close();

        let report = parse_report(&result.stdout);
        if report.is_none() {
            log::warn!(
                "pair {} {}: no completion report in output",
                pair_index,
                role
            );
        }
        Ok(report)
    }

    /// Execute one server+client cycle.
    ///
    /// Both roles start concurrently; the server's longer configured
    /// duration keeps it listening for the whole traffic window. Each role
    /// runs on its own thread and session; one role failing leaves the
    /// other's report intact.
    pub fn run_cycle(&mut self) -> Result<PairResult> {
        let pair_index = self.pair_index;
        let dperf_path = self.dperf_path.clone();
        let connector = Arc::clone(&self.connector);
        let server_timeout = self.role_timeout("server");
        let client_timeout = self.role_timeout("client");

        log::info!("pair {}: starting run cycle", pair_index);

        let (server, client) = std::thread::scope(|scope| {
            let server_handle = scope.spawn({
                let connector = Arc::clone(&connector);
                let dperf_path = dperf_path.clone();
                move || {
                    Self::run_role(&connector, &dperf_path, pair_index, "server", server_timeout)
                }
            });
            let client_handle = scope.spawn({
                let connector = Arc::clone(&connector);
                let dperf_path = dperf_path.clone();
                move || {
                    Self::run_role(&connector, &dperf_path, pair_index, "client", client_timeout)
                }
            });

            let collect = |handle: std::thread::ScopedJoinHandle<'_, Result<Option<StatsReport>>>,
                           role: &str| {
                match handle.join() {
                    Ok(Ok(report)) => report,
                    Ok(Err(e)) => {
                        log::error!("pair {} {} worker failed: {}", pair_index, role, e);
                        None
                    }
                    Err(_) => {
                        log::error!("pair {} {} worker panicked", pair_index, role);
                        None
                    }
                }
            };
            (
                collect(server_handle, "server"),
                collect(client_handle, "client"),
            )
        });

        let result = PairResult { server, client };
        self.persist_results(&result);
        Ok(result)
    }

    /// Store both reports, then build the comparison artifact from the
    /// store's read-back when available (it reflects what was actually
    /// persisted), falling back to the in-memory reports.
    fn persist_results(&self, result: &PairResult) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut store = RedisStore::open(&self.store_config);

        let mut stored: BTreeMap<&str, StoredRun> = BTreeMap::new();
        for (role, report) in [("server", &result.server), ("client", &result.client)] {
            let Some(report) = report else { continue };
            match store.save_test_output(self.pair_index, role, report, &timestamp) {
                Ok(true) => {
                    match store.get_test_output(self.pair_index, role, Some(&timestamp)) {
                        Ok(Some(run)) => {
                            stored.insert(role, run);
                        }
                        Ok(None) => {}
                        Err(e) => log::warn!(
                            "pair {} {}: read-back failed: {}",
                            self.pair_index,
                            role,
                            e
                        ),
                    }
                }
                Ok(false) => {}
                Err(e) => log::warn!(
                    "pair {} {}: store write failed: {}",
                    self.pair_index,
                    role,
                    e
                ),
            }
        }

        let comparison_path = self
            .output_dir
            .join(format!("dperf_pair{}_results.csv", self.pair_index));

        let written = if stored.contains_key("server") || stored.contains_key("client") {
            let to_map = |role: &str, fallback: &Option<StatsReport>| {
                stored.get(role).map(|run| run.metrics.clone()).unwrap_or_else(|| {
                    fallback
                        .as_ref()
                        .map(|r| r.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
                        .unwrap_or_default()
                })
            };
            artifacts::write_comparison_maps(
                &comparison_path,
                &to_map("server", &result.server),
                &to_map("client", &result.client),
            )
        } else {
            artifacts::write_comparison(&comparison_path, result)
        };
        if let Err(e) = written {
            log::warn!(
                "pair {}: comparison artifact failed: {}",
                self.pair_index,
                e
            );
        }
    }
}
