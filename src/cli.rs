//! Command-line interface and subcommand dispatch

use crate::apv::ApvSetup;
use crate::config::LabConfig;
use crate::defaults;
use crate::error::{AppError, Result};
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::session::{Connector, Executor, SessionConfig, SshConnector, SshSession};
use crate::sink::OutputSink;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// SSH-driven load-testing lab for dperf traffic pairs behind an APV load balancer
#[derive(Parser, Debug, Clone)]
#[command(name = "loadlab")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the lab configuration YAML
    #[arg(short, long, default_value = defaults::DEFAULT_CONFIG_PATH, env = "LOADLAB_CONFIG")]
    pub config: PathBuf,

    /// Directory for session trace logs
    #[arg(long, default_value = defaults::DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Directory for result artifacts
    #[arg(long, default_value = defaults::DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Provision the generator host: hugepages, NIC binding, dperf configs
    Setup {
        /// Pairs to provision (comma-separated indices, default all)
        #[arg(long, value_delimiter = ',')]
        pairs: Option<Vec<usize>>,
    },

    /// Run a test campaign over the configured pairs
    Run {
        /// Pairs to run (comma-separated indices, default all)
        #[arg(long, value_delimiter = ',')]
        pairs: Option<Vec<usize>>,

        /// Run the selected pairs concurrently
        #[arg(long)]
        parallel: bool,

        /// Skip CPU/RAM monitoring during the run
        #[arg(long)]
        no_monitor: bool,

        /// Monitor CSV destination (default: <log-dir>/system_monitor.csv)
        #[arg(long)]
        monitor_output: Option<PathBuf>,
    },

    /// Restore the generator host: native drivers, links back up
    Teardown {
        /// Pairs to restore (comma-separated indices, default all)
        #[arg(long, value_delimiter = ',')]
        pairs: Option<Vec<usize>>,
    },

    /// Configure the APV load balancer for the configured pairs
    Apv {
        /// Print the command sequence instead of sending it
        #[arg(long)]
        dry_run: bool,

        /// Remove the load-balancer objects instead of creating them
        #[arg(long)]
        teardown: bool,
    },

    /// Run an ad-hoc command or script on the generator host
    Exec {
        /// Command to execute
        #[arg(long, conflicts_with = "script")]
        command: Option<String>,

        /// Local script whose lines run in one persistent shell
        #[arg(long)]
        script: Option<PathBuf>,

        /// Stream output live (Ctrl-C interrupts the remote command)
        #[arg(long)]
        realtime: bool,
    },
}

impl Cli {
    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Command::Exec {
            command,
            script,
            realtime,
        } = &self.command
        {
            if command.is_none() && script.is_none() {
                return Err("exec needs --command or --script".to_string());
            }
            if *realtime && script.is_some() {
                return Err("--realtime only applies to --command".to_string());
            }
        }
        Ok(())
    }
}

fn generator_session(config: &LabConfig) -> SessionConfig {
    let generator = &config.test.traffic_generator;
    SessionConfig::new(
        &generator.management_ip,
        generator.management_port,
        &generator.username,
        &generator.password,
    )
}

fn generator_connector(config: &LabConfig, log_dir: &PathBuf) -> Arc<dyn Connector> {
    Arc::new(SshConnector::new(
        generator_session(config),
        Some(log_dir.clone()),
        "traffic_generator",
    ))
}

/// Dispatch one parsed invocation
pub fn run(cli: &Cli) -> Result<()> {
    let config = LabConfig::from_yaml(&cli.config)?;

    match &cli.command {
        Command::Setup { pairs } => {
            let mut orchestrator = Orchestrator::new(
                &config,
                generator_connector(&config, &cli.log_dir),
                cli.log_dir.clone(),
                cli.output_dir.clone(),
            )?;
            orchestrator.connect()?;
            let outcome = orchestrator.setup_env(pairs.as_deref());
            orchestrator.disconnect();
            outcome?;
            println!("{}", "environment ready".green());
            Ok(())
        }

        Command::Run {
            pairs,
            parallel,
            no_monitor,
            monitor_output,
        } => {
            let mut orchestrator = Orchestrator::new(
                &config,
                generator_connector(&config, &cli.log_dir),
                cli.log_dir.clone(),
                cli.output_dir.clone(),
            )?;
            let options = RunOptions {
                indices: pairs.clone(),
                parallel: *parallel,
                enable_monitor: !no_monitor,
                monitor_output: monitor_output.clone(),
            };
            let result = orchestrator.run(&options)?;
            orchestrator.disconnect();

            for (index, pair_result) in &result.pairs {
                let describe = |side: &Option<crate::report::StatsReport>| match side {
                    Some(report) => format!("{} metrics", report.len()).green().to_string(),
                    None => "no report".red().to_string(),
                };
                println!(
                    "pair {}: server {}, client {}",
                    index,
                    describe(&pair_result.server),
                    describe(&pair_result.client)
                );
            }
            println!(
                "{} sample(s) captured, artifacts under {}",
                result.monitor.len(),
                cli.output_dir.display()
            );
            Ok(())
        }

        Command::Teardown { pairs } => {
            let mut orchestrator = Orchestrator::new(
                &config,
                generator_connector(&config, &cli.log_dir),
                cli.log_dir.clone(),
                cli.output_dir.clone(),
            )?;
            orchestrator.connect()?;
            let outcome = orchestrator.teardown_env(pairs.as_deref());
            orchestrator.disconnect();
            outcome?;
            println!("{}", "environment restored".green());
            Ok(())
        }

        Command::Apv { dry_run, teardown } => {
            let apv = &config.test.apv;
            let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(
                SessionConfig::new(
                    &apv.management_ip,
                    apv.management_port,
                    &apv.username,
                    &apv.password,
                ),
                Some(cli.log_dir.clone()),
                "apv",
            ));
            let setup = ApvSetup::new(
                apv.clone(),
                config.test.traffic_generator.pairs.clone(),
                connector,
            );
            if *teardown {
                setup.remove(*dry_run)?;
            } else {
                setup.apply(*dry_run)?;
            }
            Ok(())
        }

        Command::Exec {
            command,
            script,
            realtime,
        } => exec_adhoc(&config, command.as_deref(), script.as_deref(), *realtime),
    }
}

/// Ad-hoc execution against the generator host
fn exec_adhoc(
    config: &LabConfig,
    command: Option<&str>,
    script: Option<&std::path::Path>,
    realtime: bool,
) -> Result<()> {
    let session_config = generator_session(config);

    if let Some(path) = script {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::io(format!("cannot read script {}: {}", path.display(), e))
        })?;
        let mut session = SshSession::new(session_config, OutputSink::console());
        session.connect(true)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            session.execute_in_session(line, defaults::SHELL_TIMEOUT)?;
        }
        session.close();
        return Ok(());
    }

    let command = command.ok_or_else(|| AppError::internal("exec without command"))?;
    let mut session = SshSession::new(session_config, OutputSink::console());
    session.connect(false)?;

    if realtime {
        let interrupt = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            handler_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .map_err(|e| AppError::internal(format!("cannot install Ctrl-C handler: {}", e)))?;
        let interrupted = session.execute_realtime(command, interrupt)?;
        if interrupted {
            log::warn!("remote command interrupted");
        }
    } else {
        session.execute_blocking(command)?;
    }
    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments parse")
    }

    #[test]
    fn test_run_arguments() {
        let cli = parse(&[
            "loadlab", "-c", "lab.yaml", "run", "--pairs", "0,2", "--parallel",
        ]);
        assert_eq!(cli.config, PathBuf::from("lab.yaml"));
        match cli.command {
            Command::Run {
                pairs, parallel, no_monitor, ..
            } => {
                assert_eq!(pairs, Some(vec![0, 2]));
                assert!(parallel);
                assert!(!no_monitor);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["loadlab", "setup"]);
        assert_eq!(cli.config, PathBuf::from(defaults::DEFAULT_CONFIG_PATH));
        assert_eq!(cli.log_dir, PathBuf::from(defaults::DEFAULT_LOG_DIR));
        assert_eq!(cli.output_dir, PathBuf::from(defaults::DEFAULT_OUTPUT_DIR));
        assert!(!cli.no_color);
    }

    #[test]
    fn test_exec_requires_command_or_script() {
        let cli = parse(&["loadlab", "exec", "--realtime"]);
        assert!(cli.validate().is_err());

        let cli = parse(&["loadlab", "exec", "--command", "uptime"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_exec_command_and_script_conflict() {
        assert!(Cli::try_parse_from([
            "loadlab", "exec", "--command", "uptime", "--script", "steps.sh",
        ])
        .is_err());
    }

    #[test]
    fn test_realtime_script_rejected() {
        let cli = parse(&["loadlab", "exec", "--script", "steps.sh", "--realtime"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_apv_flags() {
        let cli = parse(&["loadlab", "apv", "--dry-run", "--teardown"]);
        match cli.command {
            Command::Apv { dry_run, teardown } => {
                assert!(dry_run);
                assert!(teardown);
            }
            _ => panic!("expected apv"),
        }
    }
}
