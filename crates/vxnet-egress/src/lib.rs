//! Egress VXLAN liveness monitoring for the overlay control plane.
//!
//! Infers remote-node reachability from asymmetric packet counters on the
//! tunnel bridge: a node that is being sent traffic but returns none is
//! retried a bounded number of times and then reported offline through a
//! bounded update channel. Recovery is reported as soon as ingress
//! traffic from the node reappears.

#![forbid(unsafe_code)]

pub mod error;
mod flow;
mod monitor;
pub mod testing;

pub use error::FlowQueryError;
pub use flow::{EgressFlowStat, FlowQuery, FlowStat, NodeLookup};
pub use monitor::{EgressUpdate, EgressVxlanMonitor, MonitorConfig};
