//! Records returned by the native node, decoded from its JSON payloads.

use serde::{Deserialize, Serialize};

/// Description of stored content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Content identifier. Not part of the native payload; filled in from
    /// the identifier the manifest was requested for.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
    /// Root of the merkle tree.
    pub tree_cid: String,
    pub dataset_size: u64,
    pub block_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Erasure coded.
    #[serde(default)]
    pub protected: bool,
}

/// One entry of the local manifest listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct ListedManifest {
    pub cid: String,
    pub manifest: Manifest,
}

/// Storage space accounting of the local repo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub total_blocks: u64,
    pub quota_max_bytes: u64,
    pub quota_used_bytes: u64,
    /// Bytes reserved by storage requests not yet filled.
    pub quota_reserved_bytes: u64,
}

/// Snapshot of the node's identity and routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub id: String,
    #[serde(default)]
    pub addrs: Vec<String>,
    /// Signed peer record.
    pub spr: String,
    #[serde(default)]
    pub announce_addresses: Vec<String>,
    pub table: RoutingTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTable {
    pub local_node: RoutingNode,
    #[serde(default)]
    pub nodes: Vec<RoutingNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingNode {
    pub node_id: String,
    pub peer_id: String,
    pub record: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub seen: bool,
}

/// A peer's published record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: String,
    pub seq_no: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}
