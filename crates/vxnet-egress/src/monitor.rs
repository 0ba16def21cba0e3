//! Egress VXLAN liveness monitoring.
//!
//! Watches per-remote-node packet counters on the tunnel bridge and
//! classifies nodes as online or offline. A node that keeps being sent
//! traffic without anything coming back is suspected, re-checked a
//! bounded number of times, and then declared offline; an offline node is
//! declared back online as soon as ingress traffic from it is seen again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FlowQueryError;
use crate::flow::{FlowQuery, NodeLookup};

/// Tuning knobs for the monitor.
///
/// The intervals are advice to the embedding controller, which drives
/// polling by calling [`EgressVxlanMonitor::check`]; the monitor itself
/// keeps no timers.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Suggested interval between full checks.
    pub poll_interval: Duration,
    /// Suggested interval between retry-only checks while any node is
    /// under suspicion.
    pub retry_interval: Duration,
    /// Number of retry passes a suspect node is granted before it is
    /// classified offline.
    pub max_retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            max_retries: 2,
        }
    }
}

/// A classification change for one monitored node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressUpdate {
    /// Tunnel endpoint of the remote node.
    pub node_ip: Ipv4Addr,
    /// Cluster node name, when a lookup was provided.
    pub node_name: Option<String>,
    /// The new classification.
    pub offline: bool,
}

/// Monitoring state for one remote node.
#[derive(Debug)]
struct MonitoredNode {
    egress_ips: HashSet<Ipv4Addr>,
    in_packets: u64,
    out_packets: u64,
    /// Ingress snapshot captured when egress last moved without a
    /// matching ingress increase; the node has recovered once ingress
    /// passes this mark.
    in_at_last_out: u64,
    offline: bool,
    retries: u32,
}

/// Detects remote nodes that stopped responding over the VXLAN tunnel.
///
/// Monitoring is per node IP: a node hosting several egress IPs is
/// watched once, and a tx-without-rx episode on any of its VNIDs is
/// enough to put it under suspicion. Classification changes are queued
/// for [`EgressVxlanMonitor::get_updates`] and announced with a
/// nonblocking signal on the bounded channel handed to the constructor.
pub struct EgressVxlanMonitor {
    flows: Arc<dyn FlowQuery + Send + Sync>,
    node_lookup: Option<Arc<dyn NodeLookup + Send + Sync>>,
    config: MonitorConfig,
    nodes: HashMap<Ipv4Addr, MonitoredNode>,
    pending: HashMap<Ipv4Addr, bool>,
    updates: mpsc::Sender<()>,
}

impl EgressVxlanMonitor {
    /// Creates a monitor over the given bridge with default settings.
    ///
    /// `updates` should have capacity 1: it is a wake-up signal, not a
    /// queue, and sends to it never block.
    pub fn new(
        flows: Arc<dyn FlowQuery + Send + Sync>,
        node_lookup: Option<Arc<dyn NodeLookup + Send + Sync>>,
        updates: mpsc::Sender<()>,
    ) -> Self {
        Self::with_config(flows, node_lookup, updates, MonitorConfig::default())
    }

    /// Creates a monitor with custom settings.
    pub fn with_config(
        flows: Arc<dyn FlowQuery + Send + Sync>,
        node_lookup: Option<Arc<dyn NodeLookup + Send + Sync>>,
        updates: mpsc::Sender<()>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            flows,
            node_lookup,
            config,
            nodes: HashMap::new(),
            pending: HashMap::new(),
            updates,
        }
    }

    /// Returns the monitor's configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Returns the number of nodes currently monitored.
    #[must_use]
    pub fn monitored_count(&self) -> usize {
        self.nodes.len()
    }

    /// Starts monitoring `egress_ip` on `node_ip`.
    ///
    /// A node seen for the first time is seeded from the current
    /// counters without emitting an update; adding further egress IPs to
    /// a known node leaves its state untouched.
    pub fn add_egress_ip(&mut self, node_ip: Ipv4Addr, egress_ip: Ipv4Addr) {
        if let Some(node) = self.nodes.get_mut(&node_ip) {
            node.egress_ips.insert(egress_ip);
            return;
        }

        let (in_packets, out_packets) = match self.poll() {
            Ok((ingress, egress)) => (
                ingress.get(&node_ip).copied().unwrap_or(0),
                egress.get(&node_ip).copied().unwrap_or(0),
            ),
            Err(err) => {
                warn!(node = %node_ip, error = %err, "failed to seed counters");
                (0, 0)
            }
        };

        debug!(node = %node_ip, egress_ip = %egress_ip, "monitoring egress node");
        self.nodes.insert(
            node_ip,
            MonitoredNode {
                egress_ips: HashSet::from([egress_ip]),
                in_packets,
                out_packets,
                in_at_last_out: 0,
                offline: false,
                retries: 0,
            },
        );
    }

    /// Stops monitoring `egress_ip` on `node_ip`.
    ///
    /// Removing the last egress IP drops the node entirely; no update is
    /// emitted, but a classification change already queued stays queued.
    pub fn remove_egress_ip(&mut self, node_ip: Ipv4Addr, egress_ip: Ipv4Addr) {
        let Some(node) = self.nodes.get_mut(&node_ip) else {
            warn!(node = %node_ip, egress_ip = %egress_ip, "remove for unmonitored node");
            return;
        };
        node.egress_ips.remove(&egress_ip);
        if node.egress_ips.is_empty() {
            debug!(node = %node_ip, "no egress IPs left, dropping node");
            self.nodes.remove(&node_ip);
        }
    }

    /// Polls current counters and advances every monitored node's state.
    ///
    /// With `retry_only` set, nodes that are not under suspicion are
    /// skipped entirely; their snapshots are left for the next full
    /// check. A failed dump carries no new data: nothing changes and the
    /// current retry status is returned.
    ///
    /// Returns whether any monitored node ended the pass with retries
    /// outstanding, in which case the caller should schedule another
    /// check after [`MonitorConfig::retry_interval`] rather than waiting
    /// out the full poll interval.
    pub fn check(&mut self, retry_only: bool) -> bool {
        let (ingress, egress) = match self.poll() {
            Ok(dumps) => dumps,
            Err(err) => {
                warn!(error = %err, "flow dump failed, keeping previous counters");
                return self.retry_needed();
            }
        };

        let mut changed = Vec::new();
        for (&node_ip, node) in &mut self.nodes {
            if retry_only && node.retries == 0 {
                continue;
            }

            // A node missing from a dump contributes no delta.
            let in_now = ingress.get(&node_ip).copied().unwrap_or(node.in_packets);
            let out_now = egress.get(&node_ip).copied().unwrap_or(node.out_packets);

            if node.offline {
                // Only ingress can bring an offline node back.
                if in_now > node.in_packets {
                    info!(node = %node_ip, "egress node back online");
                    node.offline = false;
                    changed.push((node_ip, false));
                }
            } else if node.retries == 0 {
                if out_now > node.out_packets && in_now == node.in_packets {
                    debug!(node = %node_ip, "egress node not responding, will retry");
                    node.in_at_last_out = node.in_packets;
                    node.retries = 1;
                }
            } else if in_now > node.in_at_last_out {
                // Ingress caught up before retries ran out; the
                // classification never changed, so nothing is emitted.
                debug!(node = %node_ip, "egress node caught up");
                node.retries = 0;
            } else if retry_only {
                node.retries += 1;
                if node.retries > self.config.max_retries {
                    info!(
                        node = %node_ip,
                        retries = self.config.max_retries,
                        "egress node offline"
                    );
                    node.offline = true;
                    node.retries = 0;
                    changed.push((node_ip, true));
                }
            }
            // A full check while suspect keeps the retry count as is.

            node.in_packets = in_now;
            node.out_packets = out_now;
        }

        for (node_ip, offline) in changed {
            self.pending.insert(node_ip, offline);
            // A full buffer means a wake-up is already pending; the
            // update itself stays queued either way.
            let _ = self.updates.try_send(());
        }

        self.retry_needed()
    }

    /// Drains and returns all queued classification changes.
    ///
    /// Order is unspecified. Must not be called concurrently with
    /// [`EgressVxlanMonitor::check`]; `&mut self` on both makes the
    /// compiler enforce that.
    pub fn get_updates(&mut self) -> Vec<EgressUpdate> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(node_ip, offline)| EgressUpdate {
                node_ip,
                node_name: self
                    .node_lookup
                    .as_ref()
                    .and_then(|lookup| lookup.node_name(node_ip)),
                offline,
            })
            .collect()
    }

    /// Dumps both flow tables, summing egress counters per node across
    /// VNIDs.
    fn poll(
        &self,
    ) -> Result<(HashMap<Ipv4Addr, u64>, HashMap<Ipv4Addr, u64>), FlowQueryError> {
        let mut ingress = HashMap::new();
        for stat in self.flows.dump_tunnel_ingress()? {
            *ingress.entry(stat.node_ip).or_insert(0) += stat.packets;
        }
        let mut egress = HashMap::new();
        for stat in self.flows.dump_tunnel_egress()? {
            *egress.entry(stat.node_ip).or_insert(0) += stat.packets;
        }
        Ok((ingress, egress))
    }

    fn retry_needed(&self) -> bool {
        self.nodes.values().any(|node| node.retries > 0)
    }
}

impl fmt::Debug for EgressVxlanMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressVxlanMonitor")
            .field("config", &self.config)
            .field("monitored", &self.nodes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
