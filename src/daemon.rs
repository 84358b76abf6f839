use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant as StdInstant;

use chrono::Utc;
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until, Instant};

use crate::config::RouterConfig;
use crate::error::Error;
use crate::intent::IntentStore;
use crate::lsdb::{Disposition, Lsdb};
use crate::messages::{Hello, IntentKey, IntentSpec, LinkAttr, Lsa, WireMessage, MAX_DATAGRAM};
use crate::neighbor::NeighborTable;
use crate::rib::{Kernel, Rib};
use crate::spf;

/// Event counters surfaced in the logs; the evaluation harness scrapes
/// these to measure convergence and flood cost.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub hello_tx: u64,
    pub hello_rx: u64,
    pub lsa_rx: u64,
    pub lsa_duplicate: u64,
    pub lsa_stale: u64,
    pub lsa_own_ignored: u64,
    pub flood_tx: u64,
    pub spf_runs: u64,
    pub malformed: u64,
}

/// One routing daemon: all protocol state, driven by a single
/// cooperative event loop. Mutation only happens between suspension
/// points, so nothing here needs a lock.
pub struct Daemon<K> {
    cfg: RouterConfig,
    neighbors: NeighborTable,
    lsdb: Lsdb,
    intents: IntentStore,
    rib: Rib<K>,
    seq: u64,
    peer_to_iface: HashMap<Ipv4Addr, String>,
    spf_due: Option<Instant>,
    counters: Counters,
}

impl<K: Kernel> Daemon<K> {
    pub fn new(cfg: RouterConfig, kernel: K) -> Result<Self, Error> {
        cfg.validate()?;

        let mut peer_to_iface = HashMap::new();
        for (name, ifc) in &cfg.interfaces {
            if let Some(prev) = peer_to_iface.insert(ifc.peer_ip, name.clone()) {
                return Err(Error::Config(format!(
                    "peer ip {} shared by interfaces {} and {}",
                    ifc.peer_ip, prev, name
                )));
            }
        }

        Ok(Self {
            cfg,
            neighbors: NeighborTable::new(),
            lsdb: Lsdb::new(),
            intents: IntentStore::new(),
            rib: Rib::new(kernel),
            seq: 0,
            peer_to_iface,
            spf_due: None,
            counters: Counters::default(),
        })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    fn bind_socket(&self) -> Result<UdpSocket, Error> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.cfg.port).into())?;
        sock.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(sock.into())?)
    }

    /// The control-plane loop: UDP receive, hello/dead-sweep timer, LSA
    /// refresh timer, and the coalesced SPF deadline. Runs until ctrl-c.
    pub async fn run(mut self) -> Result<(), Error> {
        let sock = self.bind_socket()?;
        info!(
            "router {} up: {} interface(s), control port {}",
            self.cfg.router_id,
            self.cfg.interfaces.len(),
            self.cfg.port
        );

        // A crashed prior run may have left tagged routes in the kernel.
        self.rib.flush_stale().await;

        let mut hello_timer = interval(self.cfg.timers.hello);
        let mut refresh_timer = interval(self.cfg.timers.lsa_refresh);
        let mut buf = [0u8; 2048];

        loop {
            let spf_due = self.spf_due;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("router {} shutting down", self.cfg.router_id);
                    break;
                }
                _ = hello_timer.tick() => {
                    self.send_hellos(&sock).await;
                    self.sweep(&sock).await;
                }
                _ = refresh_timer.tick() => {
                    // Re-assert liveness even without topology change.
                    self.originate_lsa(&sock).await;
                }
                _ = async {
                    match spf_due {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if spf_due.is_some() => {
                    self.run_spf().await;
                }
                recv = sock.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, addr)) => self.handle_datagram(&sock, &buf[..len], addr).await,
                        Err(e) => debug!("recv error: {}", e),
                    }
                }
            }
        }

        self.rib.shutdown().await;
        Ok(())
    }

    async fn handle_datagram(&mut self, sock: &UdpSocket, data: &[u8], addr: SocketAddr) {
        let msg = match WireMessage::from_bytes(data) {
            Ok(msg) => msg,
            Err(e) => {
                self.counters.malformed += 1;
                debug!("dropping malformed datagram from {}: {}", addr, e);
                return;
            }
        };

        match msg {
            WireMessage::Hello(hello) => self.on_hello(sock, hello, addr).await,
            WireMessage::Lsa(lsa) => self.on_lsa(sock, lsa, addr).await,
            WireMessage::Intent(spec) => self.on_intent(spec),
            WireMessage::IntentDelete(key) => self.on_intent_delete(key),
        }
    }

    /// Map a datagram source to the local interface it arrived on.
    /// Links are point-to-point, so the peer address identifies the
    /// interface. Admin-down interfaces drop traffic and kill their
    /// neighbor on the spot.
    fn rx_iface(&mut self, addr: &SocketAddr) -> Option<String> {
        let IpAddr::V4(ip) = addr.ip() else {
            return None;
        };
        let iface = self.peer_to_iface.get(&ip)?.clone();
        let enabled = self.cfg.interfaces.get(&iface).map_or(false, |i| i.enabled);
        if !enabled {
            self.neighbors.force_down(&iface);
            return None;
        }
        Some(iface)
    }

    async fn on_hello(&mut self, sock: &UdpSocket, hello: Hello, addr: SocketAddr) {
        self.counters.hello_rx += 1;
        let Some(iface) = self.rx_iface(&addr) else {
            debug!("HELLO from unknown peer {} dropped", addr);
            return;
        };
        debug!("HELLO_RX {} on {}", hello.router_id, iface);

        let now = StdInstant::now();
        if self
            .neighbors
            .on_hello(&iface, &hello, &self.cfg.router_id, now)
            .is_some()
        {
            // Adjacency changed: our LSA is stale, re-originate (which
            // also schedules a recomputation).
            self.originate_lsa(sock).await;
        }
    }

    async fn on_lsa(&mut self, sock: &UdpSocket, lsa: Lsa, addr: SocketAddr) {
        self.counters.lsa_rx += 1;
        let Some(iface) = self.rx_iface(&addr) else {
            debug!("LSA from unknown peer {} dropped", addr);
            return;
        };

        if lsa.origin == self.cfg.router_id {
            // Our own LSA came back around. A higher sequence than ours
            // means we restarted; fast-forward so the next origination
            // supersedes the copy still circulating.
            if lsa.seq > self.seq {
                warn!("own LSA with future seq {} (ours {}), fast-forwarding", lsa.seq, self.seq);
                self.seq = lsa.seq;
            }
            self.counters.lsa_own_ignored += 1;
            debug!("LSA_FLOOD_IGNORE own origin on {}", iface);
            return;
        }

        match self.lsdb.accept(lsa.clone()) {
            Disposition::Accepted => {
                info!("LSA_FLOOD_RX {} seq {} on {} (accepted)", lsa.origin, lsa.seq, iface);
                self.flood(sock, &lsa, Some(iface.as_str())).await;
                self.schedule_spf();
            }
            Disposition::Duplicate => {
                self.counters.lsa_duplicate += 1;
                debug!("LSA_FLOOD_IGNORE {} seq {} duplicate", lsa.origin, lsa.seq);
            }
            Disposition::Stale => {
                self.counters.lsa_stale += 1;
                // The sender lags behind: catch it up directly instead
                // of flooding.
                if let Some(stored) = self.lsdb.get(&lsa.origin).cloned() {
                    debug!(
                        "LSA_FLOOD_IGNORE {} seq {} stale, replying seq {}",
                        lsa.origin, lsa.seq, stored.seq
                    );
                    self.send(sock, &WireMessage::Lsa(stored), addr).await;
                }
            }
        }
    }

    fn on_intent(&mut self, spec: IntentSpec) {
        match self.intents.put(spec, Utc::now()) {
            Ok(true) => self.schedule_spf(),
            Ok(false) => {}
            Err(e) => {
                self.counters.malformed += 1;
                debug!("dropping invalid intent: {}", e);
            }
        }
    }

    fn on_intent_delete(&mut self, key: IntentKey) {
        if self.intents.delete(&key.src, &key.dst) {
            info!("intent {} -> {} deleted", key.src, key.dst);
            self.schedule_spf();
        }
    }

    async fn send_hellos(&mut self, sock: &UdpSocket) {
        let seen = self.neighbors.seen_ids();
        let mut ifaces: Vec<(String, Ipv4Addr, f64, f64)> = self
            .cfg
            .interfaces
            .values()
            .filter(|i| i.enabled)
            .map(|i| (i.name.clone(), i.peer_ip, i.bandwidth, i.delay))
            .collect();
        ifaces.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, peer_ip, bw, delay) in ifaces {
            let hello = WireMessage::Hello(Hello {
                router_id: self.cfg.router_id.clone(),
                iface: name.clone(),
                bw,
                delay,
                seen: seen.clone(),
            });
            let target = SocketAddr::from(SocketAddrV4::new(peer_ip, self.cfg.port));
            debug!("HELLO_TX on {} -> {}", name, target);
            self.send(sock, &hello, target).await;
            self.counters.hello_tx += 1;
        }
    }

    async fn sweep(&mut self, sock: &UdpSocket) {
        let lost = self
            .neighbors
            .sweep(self.cfg.timers.dead, StdInstant::now());
        if !lost.is_empty() {
            self.originate_lsa(sock).await;
        }
    }

    async fn originate_lsa(&mut self, sock: &UdpSocket) {
        self.seq += 1;
        let links: Vec<LinkAttr> = self
            .neighbors
            .adjacencies()
            .into_iter()
            .filter_map(|(iface, peer)| {
                self.cfg.interfaces.get(&iface).map(|ifc| LinkAttr {
                    peer,
                    bw: ifc.bandwidth,
                    delay: ifc.delay,
                })
            })
            .collect();

        let lsa = Lsa {
            origin: self.cfg.router_id.clone(),
            seq: self.seq,
            ts: Utc::now().timestamp_millis() as f64 / 1000.0,
            links,
            stubs: self.cfg.stubs.clone(),
        };

        info!("LSA_ORIGINATE seq {} with {} link(s)", lsa.seq, lsa.links.len());
        self.lsdb.accept(lsa.clone());
        self.schedule_spf();
        self.flood(sock, &lsa, None).await;
    }

    /// Forward an LSA to every TWO-WAY neighbor except the one it came
    /// from (split-horizon).
    async fn flood(&mut self, sock: &UdpSocket, lsa: &Lsa, skip_iface: Option<&str>) {
        let targets: Vec<(String, SocketAddr)> = self
            .neighbors
            .two_way_ifaces()
            .into_iter()
            .filter(|iface| Some(iface.as_str()) != skip_iface)
            .filter_map(|iface| {
                self.cfg
                    .interfaces
                    .get(&iface)
                    .map(|ifc| (iface, SocketAddr::from(SocketAddrV4::new(ifc.peer_ip, self.cfg.port))))
            })
            .collect();

        let msg = WireMessage::Lsa(lsa.clone());
        for (iface, target) in targets {
            debug!("LSA_FLOOD_TX {} seq {} on {} -> {}", lsa.origin, lsa.seq, iface, target);
            self.send(sock, &msg, target).await;
            self.counters.flood_tx += 1;
        }
    }

    async fn send(&self, sock: &UdpSocket, msg: &WireMessage, addr: SocketAddr) {
        match msg.to_bytes() {
            Ok(bytes) => {
                if bytes.len() >= MAX_DATAGRAM {
                    warn!("oversized datagram to {}: {} bytes", addr, bytes.len());
                }
                // Transient send failures are dropped; the periodic
                // refresh repairs any loss.
                if let Err(e) = sock.send_to(&bytes, addr).await {
                    debug!("send to {} failed: {}", addr, e);
                }
            }
            Err(e) => error!("message encode failed: {}", e),
        }
    }

    /// Arm the coalescing timer: any burst of triggers inside the hold
    /// window folds into a single recomputation.
    fn schedule_spf(&mut self) {
        if self.spf_due.is_none() {
            self.spf_due = Some(Instant::now() + self.cfg.timers.spf_hold);
        }
    }

    async fn run_spf(&mut self) {
        self.spf_due = None;
        self.counters.spf_runs += 1;

        let started = StdInstant::now();
        let outcome = spf::compute_routes(
            &self.cfg.router_id,
            &self.lsdb,
            &self.neighbors,
            &self.cfg.interfaces,
            &self.intents,
            &self.cfg.hosts,
        );
        info!(
            "SPF_RUN {} vertices {} edges -> {} route(s) in {:?}",
            outcome.nodes,
            outcome.edges,
            outcome.routes.len(),
            started.elapsed()
        );

        self.rib.reconcile(outcome.routes).await;
    }
}
