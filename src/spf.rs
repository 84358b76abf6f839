use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use log::{info, warn};

use crate::config::InterfaceConfig;
use crate::intent::IntentStore;
use crate::lsdb::Lsdb;
use crate::neighbor::NeighborTable;
use crate::rib::{IntentDisposition, RouteEntry};
use crate::RouterId;

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub bw: f64,
    pub delay: f64,
}

/// Directed graph over router-ids, rebuilt from the LSDB before every
/// SPF run. BTreeMaps keep iteration deterministic.
#[derive(Debug, Default)]
pub struct Graph {
    adj: BTreeMap<RouterId, BTreeMap<RouterId, Edge>>,
}

impl Graph {
    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adj.values().map(|m| m.len()).sum()
    }

    fn neighbors(&self, node: &str) -> impl Iterator<Item = (&RouterId, &Edge)> {
        self.adj.get(node).into_iter().flat_map(|m| m.iter())
    }
}

/// An edge u->v exists only when u's LSA lists v and v's LSA lists u
/// back. One-sided adjacencies are stale by definition and never routed
/// over. Attributes come from u's side.
pub fn build_graph(lsdb: &Lsdb) -> Graph {
    let mut adj: BTreeMap<RouterId, BTreeMap<RouterId, Edge>> = BTreeMap::new();
    for (origin, lsa) in lsdb.iter() {
        for link in &lsa.links {
            let confirmed = lsdb
                .get(&link.peer)
                .map_or(false, |peer_lsa| peer_lsa.link_to(origin).is_some());
            if confirmed {
                adj.entry(origin.clone()).or_default().insert(
                    link.peer.clone(),
                    Edge {
                        bw: link.bw,
                        delay: link.delay,
                    },
                );
            }
        }
    }
    Graph { adj }
}

#[derive(Debug, Clone)]
pub struct PathTo {
    /// Sum of edge delays along the path (the route metric).
    pub delay: f64,
    pub first_hop: RouterId,
    pub path: Vec<RouterId>,
}

#[derive(Debug)]
struct State {
    delay: f64,
    first_hop: Option<RouterId>,
    node: RouterId,
    path: Vec<RouterId>,
}

impl Eq for State {}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: smallest delay first, ties broken by
        // smallest first-hop router-id, then smallest node id.
        other
            .delay
            .total_cmp(&self.delay)
            .then_with(|| other.first_hop.cmp(&self.first_hop))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source shortest paths by delay. `min_bw` filters out edges
/// below the bandwidth floor before relaxation. The source itself is not
/// in the result.
pub fn shortest_paths(
    graph: &Graph,
    src: &str,
    min_bw: Option<f64>,
) -> BTreeMap<RouterId, PathTo> {
    let mut settled: BTreeMap<RouterId, PathTo> = BTreeMap::new();
    let mut visited: BTreeSet<RouterId> = BTreeSet::new();
    let mut heap = BinaryHeap::new();

    heap.push(State {
        delay: 0.0,
        first_hop: None,
        node: src.to_string(),
        path: vec![src.to_string()],
    });

    while let Some(State {
        delay,
        first_hop,
        node,
        path,
    }) = heap.pop()
    {
        if !visited.insert(node.clone()) {
            continue;
        }
        if let Some(fh) = &first_hop {
            settled.insert(
                node.clone(),
                PathTo {
                    delay,
                    first_hop: fh.clone(),
                    path: path.clone(),
                },
            );
        }

        for (peer, edge) in graph.neighbors(&node) {
            if visited.contains(peer) {
                continue;
            }
            if let Some(floor) = min_bw {
                if edge.bw < floor {
                    continue;
                }
            }
            let mut new_path = path.clone();
            new_path.push(peer.clone());
            heap.push(State {
                delay: delay + edge.delay,
                first_hop: Some(first_hop.clone().unwrap_or_else(|| peer.clone())),
                node: peer.clone(),
                path: new_path,
            });
        }
    }

    settled
}

#[derive(Debug)]
pub struct SpfOutcome {
    pub routes: BTreeMap<ipnetwork::Ipv4Network, RouteEntry>,
    pub nodes: usize,
    pub edges: usize,
}

/// One full recomputation pass: build the graph, run SPF per intent
/// constraint, and synthesize the route set over every remote stub
/// prefix. Pure over its snapshot inputs.
pub fn compute_routes(
    local_id: &str,
    lsdb: &Lsdb,
    neighbors: &NeighborTable,
    interfaces: &HashMap<String, InterfaceConfig>,
    intents: &IntentStore,
    hosts: &HashMap<String, RouterId>,
) -> SpfOutcome {
    let graph = build_graph(lsdb);
    let base = shortest_paths(&graph, local_id, None);

    let local_stubs: BTreeSet<ipnetwork::Ipv4Network> = lsdb
        .get(local_id)
        .map(|l| l.stubs.iter().copied().collect())
        .unwrap_or_default();

    let mut origins: Vec<_> = lsdb.iter().collect();
    origins.sort_by(|a, b| a.0.cmp(b.0));

    let mut routes = BTreeMap::new();
    for (origin, lsa) in origins {
        if origin.as_str() == local_id || lsa.stubs.is_empty() {
            continue;
        }

        let picked: Option<(PathTo, IntentDisposition)> =
            match intents.for_destination(origin, hosts) {
                None => base
                    .get(origin)
                    .map(|p| (p.clone(), IntentDisposition::None)),
                Some(intent) => {
                    let constrained = match intent.min_bandwidth {
                        Some(floor) => shortest_paths(&graph, local_id, Some(floor)),
                        None => base.clone(),
                    };
                    let feasible = constrained.get(origin).filter(|p| {
                        intent.max_latency.map_or(true, |limit| p.delay <= limit)
                    });
                    match feasible {
                        Some(p) => {
                            info!(
                                "INTENT_APPLY {} -> {} path {:?} delay {}",
                                intent.src, intent.dst, p.path, p.delay
                            );
                            Some((p.clone(), IntentDisposition::Satisfied))
                        }
                        // The constrained graph has no acceptable path:
                        // fall back to the default shortest path rather
                        // than leave the destination unreachable.
                        None => base.get(origin).map(|p| {
                            warn!(
                                "INTENT_FALLBACK {} -> {} unsatisfiable, default path {:?}",
                                intent.src, intent.dst, p.path
                            );
                            (p.clone(), IntentDisposition::Unsatisfied)
                        }),
                    }
                }
            };

        let Some((path, disposition)) = picked else {
            continue;
        };
        let Some(iface) = neighbors.iface_for(&path.first_hop) else {
            // The SPF first hop is not (yet) a TWO-WAY neighbor; skip and
            // let the next recomputation catch up.
            continue;
        };
        let Some(ifc) = interfaces.get(iface) else {
            continue;
        };

        for stub in &lsa.stubs {
            if local_stubs.contains(stub) {
                continue;
            }
            routes.insert(
                *stub,
                RouteEntry {
                    prefix: *stub,
                    next_hop: ifc.peer_ip,
                    iface: iface.to_string(),
                    cost: path.delay,
                    intent: disposition,
                },
            );
        }
    }

    SpfOutcome {
        routes,
        nodes: graph.node_count(),
        edges: graph.edge_count(),
    }
}
