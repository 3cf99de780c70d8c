//! APV load-balancer provisioning
//!
//! Drives the APV appliance's command-line over a persistent session: enter
//! privileged mode, then declare one real server, virtual server, group and
//! policy per traffic pair. Command generation is pure so the sequences can
//! be inspected (dry run) and asserted without an appliance.

use crate::config::{ApvConfig, Pair, Protocol};
use crate::error::Result;
use crate::session::Connector;
use std::sync::Arc;

/// CLI sequence that wires one pair's real server through to its policy.
///
/// UDP real servers take the extra health-check arguments the appliance
/// requires for connectionless checks; TCP and HTTP use the plain form.
pub fn setup_commands(pair_index: usize, pair: &Pair) -> Vec<String> {
    let proto = pair.protocol.as_str();
    let real = format!("{}_rs_{}", proto, pair_index);
    let virtual_server = format!("{}_slb_vs", proto);
    let group = format!("{}_slb_rs_group", proto);

    let real_args = match pair.protocol {
        Protocol::Udp => "0 3 3 60 none",
        Protocol::Tcp | Protocol::Http => "0 none",
    };

    vec![
        format!(
            "slb real {} {} {} {} {}",
            proto, real, pair.server.ip, pair.server.listen_port, real_args
        ),
        format!("slb real enable {}", real),
        format!(
            "slb virtual {} {} {} {}",
            proto, virtual_server, pair.client.virtual_server_ip, pair.client.virtual_server_port
        ),
        format!("slb virtual enable {}", virtual_server),
        format!("slb group method {} rr", group),
        format!("slb group member {} {}", group, real),
        format!("slb group enable {}", group),
        format!("slb policy default {} {}", virtual_server, group),
    ]
}

/// Inverse of [`setup_commands`]: the same declarations negated, unwound in
/// reverse so nothing is removed while something else still references it.
pub fn teardown_commands(pair_index: usize, pair: &Pair) -> Vec<String> {
    setup_commands(pair_index, pair)
        .into_iter()
        .rev()
        .map(|command| format!("no {}", command))
        .collect()
}

/// APV provisioning driver
pub struct ApvSetup {
    config: ApvConfig,
    pairs: Vec<Pair>,
    connector: Arc<dyn Connector>,
}

impl ApvSetup {
    pub fn new(config: ApvConfig, pairs: Vec<Pair>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            pairs,
            connector,
        }
    }

    /// Configure the load balancer for every pair and persist the config.
    /// With `dry_run`, the command sequence is printed instead of sent.
    pub fn apply(&self, dry_run: bool) -> Result<()> {
        self.drive(dry_run, setup_commands)
    }

    /// Remove every pair's load-balancer objects
    pub fn remove(&self, dry_run: bool) -> Result<()> {
        self.drive(dry_run, teardown_commands)
    }

    fn drive(&self, dry_run: bool, generate: fn(usize, &Pair) -> Vec<String>) -> Result<()> {
        if dry_run {
            for (index, pair) in self.pairs.iter().enumerate() {
                println!("# pair {} ({})", index, pair.protocol);
                for command in generate(index, pair) {
                    println!("{}", command);
                }
            }
            return Ok(());
        }

        let mut executor = self.connector.connect(true)?;
        executor.execute("enable")?;
        executor.execute(&self.config.enable_password)?;
        executor.execute("config terminal")?;
        for (index, pair) in self.pairs.iter().enumerate() {
            log::info!("apv: configuring pair {} ({})", index, pair.protocol);
            for command in generate(index, pair) {
                executor.execute(&command)?;
            }
        }
        executor.execute("write memory")?;
        executor.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::testutil::ScriptedConnector;

    fn tcp_pair() -> Pair {
        sample_config().test.traffic_generator.pairs[0].clone()
    }

    fn with_protocol(protocol: Protocol) -> Pair {
        let mut pair = tcp_pair();
        pair.protocol = protocol;
        pair
    }

    #[test]
    fn test_tcp_setup_commands() {
        let commands = setup_commands(0, &tcp_pair());
        assert_eq!(
            commands,
            vec![
                "slb real tcp tcp_rs_0 192.168.20.1 80 0 none",
                "slb real enable tcp_rs_0",
                "slb virtual tcp tcp_slb_vs 192.168.20.1 80",
                "slb virtual enable tcp_slb_vs",
                "slb group method tcp_slb_rs_group rr",
                "slb group member tcp_slb_rs_group tcp_rs_0",
                "slb group enable tcp_slb_rs_group",
                "slb policy default tcp_slb_vs tcp_slb_rs_group",
            ]
        );
    }

    #[test]
    fn test_udp_real_server_has_health_check_args() {
        let commands = setup_commands(2, &with_protocol(Protocol::Udp));
        assert_eq!(commands[0], "slb real udp udp_rs_2 192.168.20.1 80 0 3 3 60 none");
        assert_eq!(commands[1], "slb real enable udp_rs_2");
    }

    #[test]
    fn test_http_uses_plain_real_server_form() {
        let commands = setup_commands(1, &with_protocol(Protocol::Http));
        assert_eq!(commands[0], "slb real http http_rs_1 192.168.20.1 80 0 none");
        assert_eq!(
            commands[7],
            "slb policy default http_slb_vs http_slb_rs_group"
        );
    }

    #[test]
    fn test_teardown_negates_in_reverse() {
        let pair = tcp_pair();
        let setup = setup_commands(0, &pair);
        let teardown = teardown_commands(0, &pair);
        assert_eq!(teardown.len(), setup.len());
        assert_eq!(
            teardown[0],
            "no slb policy default tcp_slb_vs tcp_slb_rs_group"
        );
        assert_eq!(
            teardown.last().unwrap(),
            "no slb real tcp tcp_rs_0 192.168.20.1 80 0 none"
        );
    }

    #[test]
    fn test_apply_enters_privileged_mode_and_saves() {
        let config = sample_config();
        let connector = Arc::new(ScriptedConnector::repeating(vec![]));
        let apv = ApvSetup::new(
            config.test.apv.clone(),
            config.test.traffic_generator.pairs.clone(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        apv.apply(false).unwrap();

        let commands = connector.commands();
        assert_eq!(commands[0], "enable");
        assert_eq!(commands[1], "enablepw");
        assert_eq!(commands[2], "config terminal");
        assert_eq!(commands[3], "slb real tcp tcp_rs_0 192.168.20.1 80 0 none");
        assert_eq!(commands.last().unwrap(), "write memory");
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let config = sample_config();
        let connector = Arc::new(ScriptedConnector::unreachable());
        let apv = ApvSetup::new(
            config.test.apv.clone(),
            config.test.traffic_generator.pairs.clone(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        // an unreachable appliance is fine when nothing is sent
        apv.apply(true).unwrap();
        apv.remove(true).unwrap();
        assert!(connector.commands().is_empty());
    }
}
