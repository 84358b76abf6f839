use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::messages::Hello;
use crate::RouterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    Init,
    TwoWay,
    Dead,
}

/// Adjacency gained or lost. Either way the LSA generator must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub router_id: RouterId,
    pub state: NeighborState,
    pub last_heard: Instant,
}

/// Per-interface neighbor records, keyed by interface name. Point-to-point
/// links only, so at most one neighbor per interface.
#[derive(Debug, Default)]
pub struct NeighborTable {
    by_iface: HashMap<String, Neighbor>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an inbound HELLO on `iface`. Returns the adjacency
    /// transition, if any, so the caller can re-originate its LSA.
    pub fn on_hello(
        &mut self,
        iface: &str,
        hello: &Hello,
        our_id: &str,
        now: Instant,
    ) -> Option<Transition> {
        let was_two_way = matches!(
            self.by_iface.get(iface),
            Some(n) if n.router_id == hello.router_id && n.state == NeighborState::TwoWay
        );

        if let Some(existing) = self.by_iface.get(iface) {
            if existing.router_id != hello.router_id {
                // Two routers claiming the same point-to-point link is an
                // internal invariant violation. Reset the slot and start over.
                error!(
                    "duplicate neighbor on {}: had {}, now {}; resetting slot",
                    iface, existing.router_id, hello.router_id
                );
                let lost = existing.state == NeighborState::TwoWay;
                self.by_iface.remove(iface);
                if lost {
                    return Some(Transition::Down);
                }
            }
        }

        // Two-way holds only while the peer keeps listing us; a HELLO
        // without our id (peer restarted) demotes the adjacency.
        let state = if hello.seen.iter().any(|id| id == our_id) {
            NeighborState::TwoWay
        } else {
            NeighborState::Init
        };

        self.by_iface.insert(
            iface.to_string(),
            Neighbor {
                router_id: hello.router_id.clone(),
                state,
                last_heard: now,
            },
        );

        match (was_two_way, state) {
            (false, NeighborState::TwoWay) => {
                info!("NEIGHBOR_UP {} on {}", hello.router_id, iface);
                Some(Transition::Up)
            }
            (true, NeighborState::Init) => {
                info!("NEIGHBOR_DOWN {} on {} (one-way)", hello.router_id, iface);
                Some(Transition::Down)
            }
            _ => None,
        }
    }

    /// Mark neighbors unheard for longer than `dead_after` as DEAD.
    /// Returns the adjacencies that were TWO-WAY, i.e. those whose loss
    /// changes our LSA.
    pub fn sweep(&mut self, dead_after: Duration, now: Instant) -> Vec<(String, RouterId)> {
        let mut lost = Vec::new();
        for (iface, n) in self.by_iface.iter_mut() {
            if n.state == NeighborState::Dead {
                continue;
            }
            if now.duration_since(n.last_heard) > dead_after {
                if n.state == NeighborState::TwoWay {
                    info!("NEIGHBOR_DOWN {} on {} (dead interval)", n.router_id, iface);
                    lost.push((iface.clone(), n.router_id.clone()));
                }
                n.state = NeighborState::Dead;
            }
        }
        lost
    }

    /// Administrative removal: the interface went down, its neighbor is
    /// immediately DEAD. Returns true if a TWO-WAY adjacency was lost.
    pub fn force_down(&mut self, iface: &str) -> bool {
        match self.by_iface.get_mut(iface) {
            Some(n) if n.state != NeighborState::Dead => {
                let lost = n.state == NeighborState::TwoWay;
                if lost {
                    info!("NEIGHBOR_DOWN {} on {} (admin)", n.router_id, iface);
                }
                n.state = NeighborState::Dead;
                lost
            }
            _ => false,
        }
    }

    pub fn get(&self, iface: &str) -> Option<&Neighbor> {
        self.by_iface.get(iface)
    }

    /// Router-ids we currently have HELLOs from, for the `seen` field of
    /// outgoing HELLOs. Sorted so messages are deterministic.
    pub fn seen_ids(&self) -> Vec<RouterId> {
        let set: BTreeSet<&RouterId> = self
            .by_iface
            .values()
            .filter(|n| n.state != NeighborState::Dead)
            .map(|n| &n.router_id)
            .collect();
        set.into_iter().cloned().collect()
    }

    /// Interfaces with a TWO-WAY adjacency, sorted by name.
    pub fn two_way_ifaces(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_iface
            .iter()
            .filter(|(_, n)| n.state == NeighborState::TwoWay)
            .map(|(iface, _)| iface.clone())
            .collect();
        out.sort();
        out
    }

    /// TWO-WAY adjacencies as (iface, router_id), sorted by iface name.
    pub fn adjacencies(&self) -> Vec<(String, RouterId)> {
        let mut out: Vec<(String, RouterId)> = self
            .by_iface
            .iter()
            .filter(|(_, n)| n.state == NeighborState::TwoWay)
            .map(|(iface, n)| (iface.clone(), n.router_id.clone()))
            .collect();
        out.sort();
        out
    }

    /// Outbound interface for a TWO-WAY neighbor. Parallel links to the
    /// same router resolve to the smallest interface name.
    pub fn iface_for(&self, router_id: &str) -> Option<&str> {
        self.by_iface
            .iter()
            .filter(|(_, n)| n.state == NeighborState::TwoWay && n.router_id == router_id)
            .map(|(iface, _)| iface.as_str())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(from: &str, seen: &[&str]) -> Hello {
        Hello {
            router_id: from.to_string(),
            iface: "peer-eth0".to_string(),
            bw: 100.0,
            delay: 1.0,
            seen: seen.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn init_then_two_way() {
        let mut t = NeighborTable::new();
        let now = Instant::now();

        // First HELLO does not list us: INIT, no transition.
        assert_eq!(t.on_hello("eth0", &hello("r2", &[]), "r1", now), None);
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::Init);

        // Peer acknowledges us: TWO-WAY.
        assert_eq!(
            t.on_hello("eth0", &hello("r2", &["r1", "r3"]), "r1", now),
            Some(Transition::Up)
        );
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::TwoWay);

        // Repeat HELLO is a no-op transition-wise.
        assert_eq!(t.on_hello("eth0", &hello("r2", &["r1"]), "r1", now), None);
    }

    #[test]
    fn one_way_demotes() {
        let mut t = NeighborTable::new();
        let now = Instant::now();
        t.on_hello("eth0", &hello("r2", &["r1"]), "r1", now);

        // Peer restarted and no longer lists us.
        assert_eq!(
            t.on_hello("eth0", &hello("r2", &[]), "r1", now),
            Some(Transition::Down)
        );
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::Init);
    }

    #[test]
    fn dead_sweep_and_revival() {
        let mut t = NeighborTable::new();
        let start = Instant::now();
        t.on_hello("eth0", &hello("r2", &["r1"]), "r1", start);

        // Not yet past the dead interval.
        assert!(t.sweep(Duration::from_secs(8), start + Duration::from_secs(7)).is_empty());

        let lost = t.sweep(Duration::from_secs(8), start + Duration::from_secs(9));
        assert_eq!(lost, vec![("eth0".to_string(), "r2".to_string())]);
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::Dead);
        assert!(t.seen_ids().is_empty());

        // Dead neighbors only come back through a fresh HELLO exchange.
        let later = start + Duration::from_secs(20);
        assert_eq!(
            t.on_hello("eth0", &hello("r2", &["r1"]), "r1", later),
            Some(Transition::Up)
        );
    }

    #[test]
    fn sweep_reports_only_two_way_losses() {
        let mut t = NeighborTable::new();
        let start = Instant::now();
        t.on_hello("eth0", &hello("r2", &[]), "r1", start); // stays INIT
        let lost = t.sweep(Duration::from_secs(8), start + Duration::from_secs(9));
        assert!(lost.is_empty());
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::Dead);
    }

    #[test]
    fn duplicate_neighbor_resets_slot() {
        let mut t = NeighborTable::new();
        let now = Instant::now();
        t.on_hello("eth0", &hello("r2", &["r1"]), "r1", now);

        // A different router id on the same p2p interface: slot is reset
        // and the new peer starts from scratch.
        let tr = t.on_hello("eth0", &hello("r9", &[]), "r1", now);
        assert_eq!(tr, Some(Transition::Down));
        let n = t.get("eth0").unwrap();
        assert_eq!(n.router_id, "r9");
        assert_eq!(n.state, NeighborState::Init);
    }

    #[test]
    fn admin_down_is_immediate_dead() {
        let mut t = NeighborTable::new();
        let now = Instant::now();
        t.on_hello("eth0", &hello("r2", &["r1"]), "r1", now);
        assert!(t.force_down("eth0"));
        assert_eq!(t.get("eth0").unwrap().state, NeighborState::Dead);
        assert!(!t.force_down("eth0"));
    }

    #[test]
    fn parallel_links_pick_smallest_iface() {
        let mut t = NeighborTable::new();
        let now = Instant::now();
        t.on_hello("eth2", &hello("r2", &["r1"]), "r1", now);
        t.on_hello("eth0", &hello("r2", &["r1"]), "r1", now);
        assert_eq!(t.iface_for("r2"), Some("eth0"));
        assert_eq!(t.two_way_ifaces(), vec!["eth0", "eth2"]);
    }
}
