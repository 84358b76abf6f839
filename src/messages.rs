use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::RouterId;

/// Every wire message must fit in one UDP datagram.
pub const MAX_DATAGRAM: usize = 1200;

/// The control-plane wire format: one JSON object per datagram, closed
/// tagged union. Unknown `type` values fail deserialization and are
/// dropped by the receive path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "HELLO")]
    Hello(Hello),
    #[serde(rename = "LSA")]
    Lsa(Lsa),
    #[serde(rename = "INTENT")]
    Intent(IntentSpec),
    #[serde(rename = "INTENT_DELETE")]
    IntentDelete(IntentKey),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub router_id: RouterId,
    pub iface: String,
    pub bw: f64,
    pub delay: f64,
    /// Router-ids the sender currently has HELLOs from, on any
    /// interface. Receiving our own id here establishes two-way.
    pub seen: Vec<RouterId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lsa {
    pub origin: RouterId,
    pub seq: u64,
    /// Origination wall-time, informational only; ordering uses seq.
    pub ts: f64,
    pub links: Vec<LinkAttr>,
    #[serde(default)]
    pub stubs: Vec<Ipv4Network>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAttr {
    pub peer: RouterId,
    pub bw: f64,
    pub delay: f64,
}

impl Lsa {
    pub fn link_to(&self, peer: &str) -> Option<&LinkAttr> {
        self.links.iter().find(|l| l.peer == peer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub src: String,
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bandwidth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentKey {
    pub src: String,
    pub dst: String,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
