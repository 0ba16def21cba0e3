//! The narrow flow-table surface the monitor consumes.
//!
//! The bridge keeps ingress-from-tunnel flows in table 10, keyed by
//! `tun_src`, and egress-to-tunnel flows in table 100, keyed by the VNID
//! in `reg0` plus the destination node. The monitor only ever reads the
//! `n_packets` counters of those flows; everything else about the bridge
//! stays in the bridge layer.

use std::net::Ipv4Addr;

use crate::error::FlowQueryError;

/// Packet count of a table-10 flow matching `tun_src=<node_ip>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowStat {
    /// Remote tunnel endpoint the packets arrived from.
    pub node_ip: Ipv4Addr,
    /// `n_packets` of the matching flow.
    pub packets: u64,
}

/// Packet count of a table-100 flow sending to `node_ip` under one VNID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EgressFlowStat {
    /// Remote tunnel endpoint the packets are sent to.
    pub node_ip: Ipv4Addr,
    /// Virtual network identifier carried in `reg0`.
    pub vnid: u32,
    /// `n_packets` of the matching flow.
    pub packets: u64,
}

/// Counter dumps from the OpenFlow bridge.
pub trait FlowQuery {
    /// Dumps per-remote-node received-packet counters from table 10.
    ///
    /// # Errors
    ///
    /// Returns an error when the bridge cannot be queried; the monitor
    /// treats a failed dump as carrying no new data.
    fn dump_tunnel_ingress(&self) -> Result<Vec<FlowStat>, FlowQueryError>;

    /// Dumps per-remote-node, per-VNID sent-packet counters from
    /// table 100.
    ///
    /// # Errors
    ///
    /// Returns an error when the bridge cannot be queried.
    fn dump_tunnel_egress(&self) -> Result<Vec<EgressFlowStat>, FlowQueryError>;
}

/// Maps a remote node's tunnel IP to its cluster node identity.
pub trait NodeLookup {
    /// Returns the node name for `node_ip`, if known.
    fn node_name(&self, node_ip: Ipv4Addr) -> Option<String>;
}
