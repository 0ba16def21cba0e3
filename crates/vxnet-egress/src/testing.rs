//! In-memory flow table for exercising the monitor without a bridge.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use parking_lot::Mutex;

use crate::error::FlowQueryError;
use crate::flow::{EgressFlowStat, FlowQuery, FlowStat};

/// Fake [`FlowQuery`] backed by plain counter maps.
///
/// Tests bump counters with [`FakeFlowTable::packets_in`] and
/// [`FakeFlowTable::packets_out`] while the monitor holds the table
/// behind an `Arc`, and flip [`FakeFlowTable::set_failing`] to exercise
/// the failed-dump path.
#[derive(Debug, Default)]
pub struct FakeFlowTable {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ingress: HashMap<Ipv4Addr, u64>,
    egress: HashMap<(Ipv4Addr, u32), u64>,
    failing: bool,
}

impl FakeFlowTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one packet received from `node_ip` (table 10).
    pub fn packets_in(&self, node_ip: Ipv4Addr) {
        *self.inner.lock().ingress.entry(node_ip).or_insert(0) += 1;
    }

    /// Records one packet sent to `node_ip` under `vnid` (table 100).
    pub fn packets_out(&self, node_ip: Ipv4Addr, vnid: u32) {
        *self.inner.lock().egress.entry((node_ip, vnid)).or_insert(0) += 1;
    }

    /// Makes subsequent dumps fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }
}

impl FlowQuery for FakeFlowTable {
    fn dump_tunnel_ingress(&self) -> Result<Vec<FlowStat>, FlowQueryError> {
        let inner = self.inner.lock();
        if inner.failing {
            return Err(FlowQueryError::DumpFailed("bridge unavailable".to_string()));
        }
        Ok(inner
            .ingress
            .iter()
            .map(|(&node_ip, &packets)| FlowStat { node_ip, packets })
            .collect())
    }

    fn dump_tunnel_egress(&self) -> Result<Vec<EgressFlowStat>, FlowQueryError> {
        let inner = self.inner.lock();
        if inner.failing {
            return Err(FlowQueryError::DumpFailed("bridge unavailable".to_string()));
        }
        Ok(inner
            .egress
            .iter()
            .map(|(&(node_ip, vnid), &packets)| EgressFlowStat {
                node_ip,
                vnid,
                packets,
            })
            .collect())
    }
}
