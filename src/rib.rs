use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use log::{info, warn};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentDisposition {
    /// No intent governs this destination.
    None,
    /// Every edge on the installed path meets the intent's constraints.
    Satisfied,
    /// The intent was infeasible; this is the unconstrained fallback.
    Unsatisfied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub prefix: Ipv4Network,
    pub next_hop: Ipv4Addr,
    pub iface: String,
    pub cost: f64,
    pub intent: IntentDisposition,
}

/// Metric stamped on every route we install. The host table is shared
/// with the OS and other processes; this tag marks the prefixes we own.
pub const OWNED_METRIC: u32 = 201;

/// The host forwarding table, abstracted so tests run against an
/// in-memory kernel. `install` has replace semantics for an existing
/// prefix.
#[allow(async_fn_in_trait)]
pub trait Kernel {
    async fn install(&mut self, route: &RouteEntry) -> Result<(), Error>;
    async fn remove(&mut self, route: &RouteEntry) -> Result<(), Error>;
    /// Remove every kernel route carrying our ownership tag, e.g. left
    /// behind by a previous run that did not shut down cleanly.
    async fn flush_owned(&mut self) -> Result<(), Error>;
}

/// Shadow of the forwarding state this daemon owns. `reconcile` issues
/// the minimum add/remove set against the kernel; `installed` only ever
/// reflects confirmed kernel operations, so a failed call is retried on
/// the next recomputation.
pub struct Rib<K> {
    kernel: K,
    shadow: BTreeMap<Ipv4Network, RouteEntry>,
    installed: BTreeMap<Ipv4Network, RouteEntry>,
}

impl<K: Kernel> Rib<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            shadow: BTreeMap::new(),
            installed: BTreeMap::new(),
        }
    }

    /// What should be installed, per the latest recomputation.
    pub fn routes(&self) -> &BTreeMap<Ipv4Network, RouteEntry> {
        &self.shadow
    }

    pub async fn reconcile(&mut self, desired: BTreeMap<Ipv4Network, RouteEntry>) {
        let stale: Vec<Ipv4Network> = self
            .installed
            .keys()
            .filter(|p| !desired.contains_key(p))
            .copied()
            .collect();
        for prefix in stale {
            let entry = self.installed[&prefix].clone();
            match self.kernel.remove(&entry).await {
                Ok(()) => {
                    info!("RIB_REMOVE {} via {}", prefix, entry.next_hop);
                    self.installed.remove(&prefix);
                }
                Err(e) => warn!("RIB_FAIL remove {}: {}", prefix, e),
            }
        }

        for (prefix, entry) in &desired {
            if self.installed.get(prefix) == Some(entry) {
                continue;
            }
            match self.kernel.install(entry).await {
                Ok(()) => {
                    info!(
                        "RIB_INSTALL {} via {} dev {} cost {} ({:?})",
                        prefix, entry.next_hop, entry.iface, entry.cost, entry.intent
                    );
                    self.installed.insert(*prefix, entry.clone());
                }
                Err(e) => {
                    warn!("RIB_FAIL install {} via {}: {}", prefix, entry.next_hop, e);
                    // Kernel state is unknown for this prefix; forget it
                    // so the next pass re-issues the install.
                    self.installed.remove(prefix);
                }
            }
        }

        self.shadow = desired;
    }

    /// Purge routes tagged with our metric that are still in the kernel
    /// from a prior run. Called once before the first reconcile.
    pub async fn flush_stale(&mut self) {
        if let Err(e) = self.kernel.flush_owned().await {
            warn!("RIB_FAIL flush of stale owned routes: {}", e);
        }
    }

    /// Remove every route we own. Called on shutdown so stale protocol
    /// routes do not outlive the daemon.
    pub async fn shutdown(&mut self) {
        let all: Vec<RouteEntry> = self.installed.values().cloned().collect();
        for entry in all {
            match self.kernel.remove(&entry).await {
                Ok(()) => {
                    info!("RIB_REMOVE {} via {}", entry.prefix, entry.next_hop);
                    self.installed.remove(&entry.prefix);
                }
                Err(e) => warn!("RIB_FAIL remove {}: {}", entry.prefix, e),
            }
        }
        self.shadow.clear();
    }
}

/// Kernel writes through netlink via the `net_route` handle.
pub struct NetRouteKernel {
    handle: net_route::Handle,
}

impl NetRouteKernel {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            handle: net_route::Handle::new()?,
        })
    }

    fn to_route(entry: &RouteEntry) -> net_route::Route {
        net_route::Route::new(IpAddr::V4(entry.prefix.network()), entry.prefix.prefix())
            .with_gateway(IpAddr::V4(entry.next_hop))
            .with_metric(OWNED_METRIC)
    }
}

impl Kernel for NetRouteKernel {
    async fn install(&mut self, entry: &RouteEntry) -> Result<(), Error> {
        let route = Self::to_route(entry);
        if self.handle.add(&route).await.is_ok() {
            return Ok(());
        }
        // EEXIST for an already-present prefix: delete and re-add.
        let _ = self.handle.delete(&route).await;
        self.handle
            .add(&route)
            .await
            .map_err(|e| Error::Kernel(e.to_string()))
    }

    async fn remove(&mut self, entry: &RouteEntry) -> Result<(), Error> {
        self.handle
            .delete(&Self::to_route(entry))
            .await
            .map_err(|e| Error::Kernel(e.to_string()))
    }

    async fn flush_owned(&mut self) -> Result<(), Error> {
        let routes = self
            .handle
            .list()
            .await
            .map_err(|e| Error::Kernel(e.to_string()))?;
        for route in routes.into_iter().filter(|r| r.metric == Some(OWNED_METRIC)) {
            if let Err(e) = self.handle.delete(&route).await {
                warn!("RIB_FAIL flush {}: {}", route.destination, e);
            } else {
                info!("RIB_REMOVE {} (stale, owned metric)", route.destination);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct MockKernel {
        ops: Vec<String>,
        fail_install: HashSet<Ipv4Network>,
        fail_remove: HashSet<Ipv4Network>,
    }

    impl Kernel for MockKernel {
        async fn install(&mut self, entry: &RouteEntry) -> Result<(), Error> {
            if self.fail_install.contains(&entry.prefix) {
                return Err(Error::Kernel("EPERM".to_string()));
            }
            self.ops.push(format!("add {} via {}", entry.prefix, entry.next_hop));
            Ok(())
        }

        async fn remove(&mut self, entry: &RouteEntry) -> Result<(), Error> {
            if self.fail_remove.contains(&entry.prefix) {
                return Err(Error::Kernel("EPERM".to_string()));
            }
            self.ops.push(format!("del {}", entry.prefix));
            Ok(())
        }

        async fn flush_owned(&mut self) -> Result<(), Error> {
            self.ops.push("flush owned".to_string());
            Ok(())
        }
    }

    fn entry(prefix: &str, next_hop: &str) -> RouteEntry {
        RouteEntry {
            prefix: prefix.parse().unwrap(),
            next_hop: next_hop.parse().unwrap(),
            iface: "eth0".to_string(),
            cost: 6.0,
            intent: IntentDisposition::None,
        }
    }

    fn set(entries: &[RouteEntry]) -> BTreeMap<Ipv4Network, RouteEntry> {
        entries.iter().map(|e| (e.prefix, e.clone())).collect()
    }

    #[tokio::test]
    async fn unchanged_set_issues_nothing() {
        let mut rib = Rib::new(MockKernel::default());
        let routes = set(&[entry("10.0.5.0/24", "10.0.13.3")]);

        rib.reconcile(routes.clone()).await;
        assert_eq!(rib.kernel.ops, vec!["add 10.0.5.0/24 via 10.0.13.3"]);

        rib.kernel.ops.clear();
        rib.reconcile(routes).await;
        assert!(rib.kernel.ops.is_empty());
    }

    #[tokio::test]
    async fn next_hop_change_reinstalls() {
        let mut rib = Rib::new(MockKernel::default());
        rib.reconcile(set(&[entry("10.0.5.0/24", "10.0.12.2")])).await;
        rib.kernel.ops.clear();

        rib.reconcile(set(&[entry("10.0.5.0/24", "10.0.13.3")])).await;
        assert_eq!(rib.kernel.ops, vec!["add 10.0.5.0/24 via 10.0.13.3"]);
    }

    #[tokio::test]
    async fn disappeared_route_is_removed() {
        let mut rib = Rib::new(MockKernel::default());
        rib.reconcile(set(&[
            entry("10.0.5.0/24", "10.0.13.3"),
            entry("10.0.2.0/24", "10.0.12.2"),
        ]))
        .await;
        rib.kernel.ops.clear();

        rib.reconcile(set(&[entry("10.0.5.0/24", "10.0.13.3")])).await;
        assert_eq!(rib.kernel.ops, vec!["del 10.0.2.0/24"]);
    }

    #[tokio::test]
    async fn failed_install_retries_next_pass() {
        let mut rib = Rib::new(MockKernel::default());
        let routes = set(&[entry("10.0.5.0/24", "10.0.13.3")]);
        rib.kernel.fail_install.insert("10.0.5.0/24".parse().unwrap());

        rib.reconcile(routes.clone()).await;
        assert!(rib.kernel.ops.is_empty());
        // The shadow still records what should be installed.
        assert_eq!(rib.routes().len(), 1);

        rib.kernel.fail_install.clear();
        rib.reconcile(routes).await;
        assert_eq!(rib.kernel.ops, vec!["add 10.0.5.0/24 via 10.0.13.3"]);
    }

    #[tokio::test]
    async fn failed_remove_retries_next_pass() {
        let mut rib = Rib::new(MockKernel::default());
        rib.reconcile(set(&[entry("10.0.5.0/24", "10.0.13.3")])).await;
        rib.kernel.fail_remove.insert("10.0.5.0/24".parse().unwrap());
        rib.kernel.ops.clear();

        rib.reconcile(BTreeMap::new()).await;
        assert!(rib.kernel.ops.is_empty());

        rib.kernel.fail_remove.clear();
        rib.reconcile(BTreeMap::new()).await;
        assert_eq!(rib.kernel.ops, vec!["del 10.0.5.0/24"]);
    }

    #[tokio::test]
    async fn startup_flush_sweeps_tagged_leftovers() {
        let mut rib = Rib::new(MockKernel::default());
        rib.flush_stale().await;
        assert_eq!(rib.kernel.ops, vec!["flush owned"]);
        assert!(rib.routes().is_empty());
    }

    #[tokio::test]
    async fn shutdown_removes_owned_routes() {
        let mut rib = Rib::new(MockKernel::default());
        rib.reconcile(set(&[
            entry("10.0.5.0/24", "10.0.13.3"),
            entry("10.0.2.0/24", "10.0.12.2"),
        ]))
        .await;
        rib.kernel.ops.clear();

        rib.shutdown().await;
        assert_eq!(rib.kernel.ops, vec!["del 10.0.2.0/24", "del 10.0.5.0/24"]);
        assert!(rib.routes().is_empty());
    }
}
