use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::Ipv4Network;

use crate::error::Error;
use crate::RouterId;

pub const DEFAULT_PORT: u16 = 20001;
pub const DEFAULT_HELLO_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_LSA_REFRESH: Duration = Duration::from_secs(30);
pub const DEFAULT_SPF_HOLD: Duration = Duration::from_millis(100);

/// One point-to-point link, as given on the command line:
/// `name:local_ip:peer_ip:bw:delay` (bw in Mbps, delay in ms).
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub name: String,
    pub local_ip: Ipv4Addr,
    pub peer_ip: Ipv4Addr,
    pub bandwidth: f64,
    pub delay: f64,
    pub enabled: bool,
}

impl FromStr for InterfaceConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| Error::InterfaceSpec {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 5 {
            return Err(bad("expected name:local_ip:peer_ip:bw:delay"));
        }
        if parts[0].is_empty() {
            return Err(bad("empty interface name"));
        }

        let local_ip: Ipv4Addr = parts[1].parse().map_err(|_| bad("bad local ip"))?;
        let peer_ip: Ipv4Addr = parts[2].parse().map_err(|_| bad("bad peer ip"))?;
        let bandwidth: f64 = parts[3].parse().map_err(|_| bad("bad bandwidth"))?;
        let delay: f64 = parts[4].parse().map_err(|_| bad("bad delay"))?;

        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(bad("bandwidth must be positive"));
        }
        if !delay.is_finite() || delay < 0.0 {
            return Err(bad("delay must be non-negative"));
        }

        Ok(Self {
            name: parts[0].to_string(),
            local_ip,
            peer_ip,
            bandwidth,
            delay,
            enabled: true,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Timers {
    pub hello: Duration,
    pub dead: Duration,
    pub lsa_refresh: Duration,
    pub spf_hold: Duration,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            hello: DEFAULT_HELLO_INTERVAL,
            dead: DEFAULT_HELLO_INTERVAL * 4,
            lsa_refresh: DEFAULT_LSA_REFRESH,
            spf_hold: DEFAULT_SPF_HOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub router_id: RouterId,
    pub port: u16,
    pub interfaces: HashMap<String, InterfaceConfig>,
    /// Directly attached prefixes advertised in our LSA.
    pub stubs: Vec<Ipv4Network>,
    /// End-host attachment map, e.g. "pc5" -> "r5". Used to resolve
    /// intent endpoints that are not router ids.
    pub hosts: HashMap<String, RouterId>,
    pub timers: Timers,
}

impl RouterConfig {
    pub fn new(router_id: RouterId) -> Self {
        Self {
            router_id,
            port: DEFAULT_PORT,
            interfaces: HashMap::new(),
            stubs: Vec::new(),
            hosts: HashMap::new(),
            timers: Timers::default(),
        }
    }

    pub fn add_interface(&mut self, iface: InterfaceConfig) -> Result<(), Error> {
        if self.interfaces.contains_key(&iface.name) {
            return Err(Error::Config(format!("duplicate interface {}", iface.name)));
        }
        self.interfaces.insert(iface.name.clone(), iface);
        Ok(())
    }

    /// Start an interface administratively down. Its neighbor is DEAD
    /// from the outset: no HELLOs are sent on it and inbound traffic is
    /// dropped.
    pub fn set_admin_down(&mut self, name: &str) -> Result<(), Error> {
        match self.interfaces.get_mut(name) {
            Some(iface) => {
                iface.enabled = false;
                Ok(())
            }
            None => Err(Error::Config(format!("--admin-down names unknown interface {}", name))),
        }
    }

    pub fn add_host(&mut self, spec: &str) -> Result<(), Error> {
        let (host, router) = spec
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("bad host mapping {:?}, expected name=router", spec)))?;
        if host.is_empty() || router.is_empty() {
            return Err(Error::Config(format!("bad host mapping {:?}", spec)));
        }
        self.hosts.insert(host.to_string(), router.to_string());
        Ok(())
    }

    /// Misconfigured timers produce spurious DEADs; dead <= hello makes
    /// every neighbor flap, so reject it outright.
    pub fn validate(&self) -> Result<(), Error> {
        if self.router_id.is_empty() {
            return Err(Error::Config("empty router id".to_string()));
        }
        if self.timers.dead <= self.timers.hello {
            return Err(Error::Config(format!(
                "dead interval {:?} must exceed hello interval {:?}",
                self.timers.dead, self.timers.hello
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interface_tuple() {
        let iface: InterfaceConfig = "r1-eth0:10.0.12.1:10.0.12.2:20:5".parse().unwrap();
        assert_eq!(iface.name, "r1-eth0");
        assert_eq!(iface.local_ip, Ipv4Addr::new(10, 0, 12, 1));
        assert_eq!(iface.peer_ip, Ipv4Addr::new(10, 0, 12, 2));
        assert_eq!(iface.bandwidth, 20.0);
        assert_eq!(iface.delay, 5.0);
        assert!(iface.enabled);
    }

    #[test]
    fn parse_fractional_metrics() {
        let iface: InterfaceConfig = "eth0:10.0.0.1:10.0.0.2:2.5:0.25".parse().unwrap();
        assert_eq!(iface.bandwidth, 2.5);
        assert_eq!(iface.delay, 0.25);
    }

    #[test]
    fn reject_bad_tuples() {
        assert!("eth0:10.0.0.1:10.0.0.2:20".parse::<InterfaceConfig>().is_err());
        assert!("eth0:nonsense:10.0.0.2:20:5".parse::<InterfaceConfig>().is_err());
        assert!("eth0:10.0.0.1:10.0.0.2:0:5".parse::<InterfaceConfig>().is_err());
        assert!("eth0:10.0.0.1:10.0.0.2:20:-1".parse::<InterfaceConfig>().is_err());
        assert!(":10.0.0.1:10.0.0.2:20:5".parse::<InterfaceConfig>().is_err());
    }

    #[test]
    fn dead_must_exceed_hello() {
        let mut cfg = RouterConfig::new("r1".to_string());
        cfg.timers.dead = cfg.timers.hello;
        assert!(cfg.validate().is_err());
        cfg.timers.dead = cfg.timers.hello * 4;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn admin_down_flags_interface() {
        let mut cfg = RouterConfig::new("r1".to_string());
        cfg.add_interface("eth0:10.0.0.1:10.0.0.2:20:5".parse().unwrap()).unwrap();

        cfg.set_admin_down("eth0").unwrap();
        assert!(!cfg.interfaces["eth0"].enabled);
        assert!(cfg.set_admin_down("eth9").is_err());
    }

    #[test]
    fn host_mapping() {
        let mut cfg = RouterConfig::new("r1".to_string());
        cfg.add_host("pc5=r5").unwrap();
        assert_eq!(cfg.hosts.get("pc5").map(String::as_str), Some("r5"));
        assert!(cfg.add_host("pc5").is_err());
        assert!(cfg.add_host("=r5").is_err());
    }
}
