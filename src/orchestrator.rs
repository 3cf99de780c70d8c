//! Campaign orchestration
//!
//! The [`Orchestrator`] binds the whole lab together: one [`PairRunner`] per
//! configured pair, one shared [`ResourceMonitor`] for the generator host.
//! A campaign runs the selected pairs sequentially or in parallel, with the
//! monitor bracketing the run, then aggregates reports and resource samples
//! into a [`CampaignResult`] and the output-directory artifacts.

use crate::artifacts;
use crate::config::{LabConfig, StoreConfig};
use crate::defaults;
use crate::error::Result;
use crate::monitor::{MonitorSample, ResourceMonitor};
use crate::runner::{PairResult, PairRunner};
use crate::session::Connector;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything one campaign produced
#[derive(Debug, Clone, Default)]
pub struct CampaignResult {
    pub pairs: BTreeMap<usize, PairResult>,
    pub monitor: Vec<MonitorSample>,
}

/// Knobs for one campaign run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pairs to run; `None` means all configured pairs
    pub indices: Option<Vec<usize>>,
    pub parallel: bool,
    pub enable_monitor: bool,
    /// Monitor CSV destination; defaults into the log directory
    pub monitor_output: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            indices: None,
            parallel: false,
            enable_monitor: true,
            monitor_output: None,
        }
    }
}

/// Campaign driver for one lab configuration
pub struct Orchestrator {
    runners: Vec<PairRunner>,
    monitor: ResourceMonitor,
    log_dir: PathBuf,
    output_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: &LabConfig,
        connector: Arc<dyn Connector>,
        log_dir: PathBuf,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let generator = &config.test.traffic_generator;
        let store: StoreConfig = config.test.store.clone();

        let mut runners = Vec::with_capacity(generator.pairs.len());
        for index in 0..generator.pairs.len() {
            runners.push(PairRunner::new(
                generator,
                index,
                Arc::clone(&connector),
                store.clone(),
                output_dir.clone(),
            )?);
        }
        log::info!("orchestrator: {} pair(s) configured", runners.len());

        Ok(Self {
            runners,
            monitor: ResourceMonitor::new(connector, store),
            log_dir,
            output_dir,
        })
    }

    pub fn pair_count(&self) -> usize {
        self.runners.len()
    }

    /// Open every pair's control session
    pub fn connect(&mut self) -> Result<()> {
        for runner in &mut self.runners {
            runner.connect()?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.monitor.stop();
        for runner in &mut self.runners {
            runner.disconnect();
        }
    }

    /// Indices to act on, with unknown ones logged and dropped
    fn select(&self, indices: Option<&[usize]>) -> Vec<usize> {
        match indices {
            None => (0..self.runners.len()).collect(),
            Some(requested) => requested
                .iter()
                .copied()
                .filter(|&index| {
                    let known = index < self.runners.len();
                    if !known {
                        log::warn!("pair {} does not exist, skipping", index);
                    }
                    known
                })
                .collect(),
        }
    }

    /// Provision the selected pairs' environments
    pub fn setup_env(&mut self, indices: Option<&[usize]>) -> Result<()> {
        for index in self.select(indices) {
            self.runners[index].setup_env()?;
        }
        Ok(())
    }

    /// Restore the selected pairs' environments
    pub fn teardown_env(&mut self, indices: Option<&[usize]>) -> Result<()> {
        for index in self.select(indices) {
            self.runners[index].teardown_env()?;
        }
        Ok(())
    }

    /// Run a campaign over the selected pairs.
    ///
    /// A pair whose cycle fails is logged and contributes no entry; the
    /// others still run. The monitor is stopped however the cycles end.
    pub fn run(&mut self, options: &RunOptions) -> Result<CampaignResult> {
        let selected = self.select(options.indices.as_deref());
        log::info!(
            "campaign: pairs {:?}, parallel={}, monitor={}",
            selected,
            options.parallel,
            options.enable_monitor
        );

        if options.enable_monitor {
            let csv_path = options
                .monitor_output
                .clone()
                .unwrap_or_else(|| self.log_dir.join("system_monitor.csv"));
            self.monitor.start(&csv_path)?;
            std::thread::sleep(defaults::MONITOR_WARMUP);
        }

        let pairs = if options.parallel {
            Self::run_parallel(&mut self.runners, &selected)
        } else {
            Self::run_sequential(&mut self.runners, &selected)
        };

        if options.enable_monitor {
            self.monitor.stop();
        }

        let result = CampaignResult {
            pairs,
            monitor: self.monitor.snapshot(),
        };
        self.write_artifacts(&result);
        Ok(result)
    }

    fn run_sequential(
        runners: &mut [PairRunner],
        selected: &[usize],
    ) -> BTreeMap<usize, PairResult> {
        let mut pairs = BTreeMap::new();
        for &index in selected {
            match runners[index].run_cycle() {
                Ok(result) => {
                    pairs.insert(index, result);
                }
                Err(e) => log::error!("pair {} cycle failed: {}", index, e),
            }
        }
        pairs
    }

    fn run_parallel(
        runners: &mut [PairRunner],
        selected: &[usize],
    ) -> BTreeMap<usize, PairResult> {
        let mut pairs = BTreeMap::new();
        let outcomes = std::thread::scope(|scope| {
            let handles: Vec<_> = runners
                .iter_mut()
                .enumerate()
                .filter(|entry| selected.contains(&entry.0))
                .map(|(index, runner)| (index, scope.spawn(move || runner.run_cycle())))
                .collect();
            handles
                .into_iter()
                .map(|(index, handle)| (index, handle.join()))
                .collect::<Vec<_>>()
        });

        for (index, outcome) in outcomes {
            match outcome {
                Ok(Ok(result)) => {
                    pairs.insert(index, result);
                }
                Ok(Err(e)) => log::error!("pair {} cycle failed: {}", index, e),
                Err(_) => log::error!("pair {} cycle panicked", index),
            }
        }
        pairs
    }

    /// Campaign summary and the monitor series under the output directory
    fn write_artifacts(&self, result: &CampaignResult) {
        if let Err(e) =
            artifacts::write_campaign_summary(self.output_dir.join("campaign_summary.json"), result)
        {
            log::warn!("campaign summary not written: {}", e);
        }
        if !result.monitor.is_empty() {
            if let Err(e) = artifacts::write_monitor_series(
                self.output_dir.join("system_monitor.csv"),
                &result.monitor,
            ) {
                log::warn!("monitor series not written: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::config::LabConfig;
    use crate::report::MetricValue;
    use crate::testutil::ScriptedConnector;

    const FINISHED: &str = "dperf Test Finished\nTotal Numbers\nSent: 100 Errors: 0\n";

    fn two_pair_config() -> LabConfig {
        let mut config = sample_config();
        let second = config.test.traffic_generator.pairs[0].clone();
        config.test.traffic_generator.pairs.push(second);
        config
    }

    fn orchestrator(
        config: &LabConfig,
        connector: ScriptedConnector,
        dir: &std::path::Path,
    ) -> (Orchestrator, Arc<ScriptedConnector>) {
        let mut config = config.clone();
        config.test.store.enabled = false;
        let connector = Arc::new(connector);
        let orchestrator = Orchestrator::new(
            &config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            dir.join("logs"),
            dir.join("results"),
        )
        .unwrap();
        (orchestrator, connector)
    }

    fn all_finished() -> ScriptedConnector {
        ScriptedConnector::repeating(vec![("dperf -c config/", FINISHED)])
    }

    #[test]
    fn test_sequential_campaign_covers_all_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_pair_config();
        let (mut orch, _) = orchestrator(&config, all_finished(), dir.path());
        assert_eq!(orch.pair_count(), 2);

        let options = RunOptions {
            enable_monitor: false,
            ..RunOptions::default()
        };
        let result = orch.run(&options).unwrap();

        assert_eq!(result.pairs.len(), 2);
        for (_, pair_result) in &result.pairs {
            let server = pair_result.server.as_ref().unwrap();
            assert_eq!(server.get("Sent:"), Some(&MetricValue::Integer(100)));
            assert!(pair_result.client.is_some());
        }
        assert!(dir.path().join("results/campaign_summary.json").exists());
    }

    #[test]
    fn test_parallel_campaign_matches_sequential_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_pair_config();
        let (mut orch, _) = orchestrator(&config, all_finished(), dir.path());

        let options = RunOptions {
            parallel: true,
            enable_monitor: false,
            ..RunOptions::default()
        };
        let result = orch.run(&options).unwrap();

        let indices: Vec<usize> = result.pairs.keys().copied().collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_unknown_index_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        let (mut orch, _) = orchestrator(&config, all_finished(), dir.path());

        let options = RunOptions {
            indices: Some(vec![0, 9]),
            enable_monitor: false,
            ..RunOptions::default()
        };
        let result = orch.run(&options).unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert!(result.pairs.contains_key(&0));
    }

    #[test]
    fn test_subset_selection_runs_only_requested_pair() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_pair_config();
        let (mut orch, connector) = orchestrator(&config, all_finished(), dir.path());

        let options = RunOptions {
            indices: Some(vec![1]),
            enable_monitor: false,
            ..RunOptions::default()
        };
        let result = orch.run(&options).unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert!(result.pairs.contains_key(&1));
        assert!(connector
            .commands()
            .iter()
            .all(|c| !c.contains("pair0.conf")));
    }

    #[test]
    fn test_setup_env_runs_for_selected_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_pair_config();
        let (mut orch, connector) = orchestrator(&config, all_finished(), dir.path());
        orch.connect().unwrap();
        orch.setup_env(Some(&[1])).unwrap();

        let commands = connector.commands();
        assert!(commands
            .iter()
            .any(|c| c.starts_with("cat > config/server_pair1.conf")));
        assert!(commands.iter().all(|c| !c.contains("server_pair0.conf")));
        orch.disconnect();
    }
}
