use anyhow::Result;
use clap::Parser;
use ipnetwork::Ipv4Network;
use tokio::runtime::Builder;

use qlsr::config::{InterfaceConfig, RouterConfig, DEFAULT_PORT};
use qlsr::daemon::Daemon;
use qlsr::rib::NetRouteKernel;

#[derive(Parser)]
#[command(name = "qlsr", about = "Intent-aware link-state routing daemon")]
struct Cli {
    /// Stable router identifier, unique in the routing domain (e.g. "r3").
    router_id: String,

    /// Point-to-point link, repeatable: name:local_ip:peer_ip:bw:delay
    /// (bw in Mbps, delay in ms).
    #[arg(long = "iface", required = true)]
    interfaces: Vec<InterfaceConfig>,

    /// Control-plane UDP port shared by the whole domain.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directly attached prefix to advertise, repeatable (e.g. 10.0.1.0/24).
    #[arg(long = "stub")]
    stubs: Vec<Ipv4Network>,

    /// End-host attachment, repeatable: name=router (e.g. pc5=r5).
    /// Resolves intent endpoints that are not router ids.
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Start the named interface administratively down, repeatable.
    /// Equivalent to an immediately DEAD neighbor on that link.
    #[arg(long = "admin-down")]
    admin_down: Vec<String>,

    /// HELLO beacon cadence, seconds.
    #[arg(long, default_value_t = 2.0)]
    hello_interval: f64,

    /// Neighbor dead timer, seconds. Defaults to 4x the hello interval.
    #[arg(long)]
    dead_interval: Option<f64>,

    /// Periodic LSA re-origination, seconds.
    #[arg(long, default_value_t = 30.0)]
    lsa_refresh: f64,

    /// Recomputation coalescing window, milliseconds.
    #[arg(long, default_value_t = 100)]
    spf_hold_ms: u64,
}

fn build_config(cli: Cli) -> Result<RouterConfig> {
    let mut cfg = RouterConfig::new(cli.router_id);
    cfg.port = cli.port;
    cfg.stubs = cli.stubs;

    for iface in cli.interfaces {
        cfg.add_interface(iface)?;
    }
    for name in &cli.admin_down {
        cfg.set_admin_down(name)?;
    }
    for host in &cli.hosts {
        cfg.add_host(host)?;
    }

    cfg.timers.hello = std::time::Duration::from_secs_f64(cli.hello_interval);
    cfg.timers.dead = std::time::Duration::from_secs_f64(
        cli.dead_interval.unwrap_or(cli.hello_interval * 4.0),
    );
    cfg.timers.lsa_refresh = std::time::Duration::from_secs_f64(cli.lsa_refresh);
    cfg.timers.spf_hold = std::time::Duration::from_millis(cli.spf_hold_ms);

    cfg.validate()?;
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = build_config(cli)?;

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let kernel = NetRouteKernel::new()?;
        let daemon = Daemon::new(cfg, kernel)?;
        daemon.run().await?;
        Ok(())
    })
}
