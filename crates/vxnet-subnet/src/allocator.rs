//! Multi-range subnet allocator.

use ipnet::Ipv4Net;
use tracing::{debug, info};

use crate::error::{AllocatorError, Result};
use crate::range::NetworkRange;

/// Hands out non-overlapping host subnets from one or more cluster CIDRs.
///
/// Ranges are tried in insertion order; a range added later is only
/// consulted once every earlier range is exhausted. Callers are expected
/// to serialize access (the embedding controller owns the allocator), and
/// to keep the configured ranges disjoint. State is rebuilt at startup by
/// replaying [`SubnetAllocator::mark_allocated_network`] for each known
/// assignment.
#[derive(Debug, Default)]
pub struct SubnetAllocator {
    pub(crate) ranges: Vec<NetworkRange>,
}

impl SubnetAllocator {
    /// Creates an empty allocator with no ranges.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cluster CIDR to allocate `32 - host_bits` prefix
    /// subnets from.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCidr` if `cidr` is malformed or not aligned to its
    /// prefix, and `InvalidHostBits` if `host_bits` is zero or does not
    /// fit below the prefix.
    pub fn add_network_range(&mut self, cidr: &str, host_bits: u32) -> Result<()> {
        let range = NetworkRange::new(cidr, host_bits)?;
        info!(
            network = %range.network(),
            host_bits,
            capacity = range.capacity(),
            "added network range"
        );
        self.ranges.push(range);
        Ok(())
    }

    /// Allocates the next free subnet.
    ///
    /// # Errors
    ///
    /// Returns `Full` when every configured range is exhausted.
    pub fn allocate_network(&mut self) -> Result<Ipv4Net> {
        for range in &mut self.ranges {
            if let Some(subnet) = range.allocate() {
                debug!(subnet = %subnet, "allocated subnet");
                return Ok(subnet);
            }
        }
        Err(AllocatorError::Full)
    }

    /// Records `cidr` as allocated without moving any range's cursor.
    /// Marking an already-allocated subnet is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCidr` if `cidr` is malformed and `OutOfRange` if
    /// no configured range owns the subnet.
    pub fn mark_allocated_network(&mut self, cidr: &str) -> Result<()> {
        let subnet = parse_subnet(cidr)?;
        for range in &mut self.ranges {
            if range.mark(subnet) {
                return Ok(());
            }
        }
        Err(AllocatorError::OutOfRange {
            subnet: subnet.to_string(),
        })
    }

    /// Returns `cidr` to the free pool. Releasing an unallocated subnet
    /// is a no-op. The released subnet is re-issued only once its range's
    /// cursor wraps back around to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCidr` if `cidr` is malformed and `OutOfRange` if
    /// no configured range owns the subnet.
    pub fn release_network(&mut self, cidr: &str) -> Result<()> {
        let subnet = parse_subnet(cidr)?;
        for range in &mut self.ranges {
            if range.release(subnet) {
                debug!(subnet = %subnet, "released subnet");
                return Ok(());
            }
        }
        Err(AllocatorError::OutOfRange {
            subnet: subnet.to_string(),
        })
    }

    /// Returns per-range allocation counts.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            ranges: self
                .ranges
                .iter()
                .map(|range| RangeStats {
                    network: range.network(),
                    capacity: range.capacity(),
                    allocated: range.allocated_count(),
                })
                .collect(),
        }
    }
}

/// Parses a subnet in `A.B.C.D/len` form, normalized to its network
/// address.
fn parse_subnet(cidr: &str) -> Result<Ipv4Net> {
    let subnet: Ipv4Net = cidr.parse().map_err(|err: ipnet::AddrParseError| {
        AllocatorError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: err.to_string(),
        }
    })?;
    Ok(subnet.trunc())
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Clone)]
pub struct AllocatorStats {
    /// Per-range statistics, in range insertion order.
    pub ranges: Vec<RangeStats>,
}

/// Occupancy of a single range.
#[derive(Debug, Clone)]
pub struct RangeStats {
    /// The range's cluster CIDR.
    pub network: Ipv4Net,
    /// Total number of subnets in the range.
    pub capacity: u32,
    /// Number of subnets currently allocated.
    pub allocated: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_allocator(cidr: &str, host_bits: u32) -> SubnetAllocator {
        let mut sna = SubnetAllocator::new();
        sna.add_network_range(cidr, host_bits)
            .expect("valid network range");
        sna
    }

    fn assert_allocates(sna: &mut SubnetAllocator, expected: &str) {
        let subnet = sna.allocate_network().expect("allocation should succeed");
        assert_eq!(subnet.to_string(), expected);
    }

    fn assert_full(sna: &mut SubnetAllocator) {
        assert_eq!(
            sna.allocate_network().expect_err("allocator should be full"),
            AllocatorError::Full
        );
    }

    // ==================== ALLOCATION ORDER TESTS ====================

    // 10.1.SSSSSSSS.HHHHHHHH
    #[test]
    fn test_allocate_subnet() {
        let mut sna = new_allocator("10.1.0.0/16", 8);

        for n in 0..256 {
            assert_allocates(&mut sna, &format!("10.1.{n}.0/24"));
        }
        assert_full(&mut sna);
    }

    // 10.1.SSSSSSHH.HHHHHHHH
    #[test]
    fn test_allocate_subnet_large_host_bits() {
        let mut sna = new_allocator("10.1.0.0/16", 10);

        for n in 0..64 {
            assert_allocates(&mut sna, &format!("10.1.{}.0/22", n * 4));
        }
        assert_full(&mut sna);
    }

    // 10.1.SSSSSSSS.SSHHHHHH — all of the ".0" networks are handed out
    // before any non-".0" network.
    #[test]
    fn test_allocate_subnet_large_subnet_bits() {
        let mut sna = new_allocator("10.1.0.0/16", 6);

        for n in 0..256 {
            assert_allocates(&mut sna, &format!("10.1.{n}.0/26"));
        }
        for n in 0..256 {
            assert_allocates(&mut sna, &format!("10.1.{n}.64/26"));
        }
        assert_allocates(&mut sna, "10.1.0.128/26");

        sna.ranges[0].next = 1023;
        assert_allocates(&mut sna, "10.1.255.192/26");
        // Wraps around to the first unallocated index (513).
        assert_allocates(&mut sna, "10.1.1.128/26");
    }

    // 10.000000SS.SSSSSSHH.HHHHHHHH
    #[test]
    fn test_allocate_subnet_overlapping_byte() {
        let mut sna = new_allocator("10.0.0.0/14", 10);

        for n in 0..4 {
            assert_allocates(&mut sna, &format!("10.{n}.0.0/22"));
        }
        for n in 0..4 {
            assert_allocates(&mut sna, &format!("10.{n}.4.0/22"));
        }
        assert_allocates(&mut sna, "10.0.8.0/22");

        sna.ranges[0].next = 255;
        assert_allocates(&mut sna, "10.3.252.0/22");
        assert_allocates(&mut sna, "10.1.8.0/22");
    }

    // 10.1.HHHHHHHH.HHHHHHHH
    #[test]
    fn test_allocate_subnet_no_subnet_bits() {
        let mut sna = new_allocator("10.1.0.0/16", 16);

        assert_allocates(&mut sna, "10.1.0.0/16");
        assert_full(&mut sna);
    }

    // ==================== VALIDATION TESTS ====================

    #[test]
    fn test_invalid_host_bits_or_cidr() {
        let mut sna = SubnetAllocator::new();
        assert!(sna.add_network_range("10.1.0.0/16", 18).is_err());
        assert!(sna.add_network_range("10.1.0.0/16", 0).is_err());
        assert!(sna.add_network_range("10.1.0.0/33", 16).is_err());
    }

    #[test]
    fn test_error_categories() {
        let mut sna = SubnetAllocator::new();
        assert!(matches!(
            sna.add_network_range("10.1.0.0/33", 16),
            Err(AllocatorError::InvalidCidr { .. })
        ));
        assert!(matches!(
            sna.add_network_range("10.1.0.0/16", 0),
            Err(AllocatorError::InvalidHostBits { .. })
        ));
    }

    // ==================== MARK / RELEASE TESTS ====================

    #[test]
    fn test_mark_allocated_network() {
        let mut sna = new_allocator("10.1.0.0/16", 14);

        let mut subnets = Vec::new();
        for _ in 0..4 {
            subnets.push(
                sna.allocate_network()
                    .expect("allocation should succeed")
                    .to_string(),
            );
        }
        assert_full(&mut sna);

        sna.release_network(&subnets[2]).expect("release");
        // Marking is idempotent.
        for _ in 0..2 {
            sna.mark_allocated_network(&subnets[2]).expect("mark");
        }
        assert_full(&mut sna);

        // A subnet that belongs to no range is rejected.
        assert!(matches!(
            sna.mark_allocated_network("10.2.3.4/24"),
            Err(AllocatorError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_allocate_release_subnet() {
        let mut sna = new_allocator("10.1.0.0/16", 14);

        let mut released = String::new();
        for i in 0..4 {
            let subnet = sna
                .allocate_network()
                .expect("allocation should succeed")
                .to_string();
            assert_eq!(subnet, format!("10.1.{}.0/18", i * 64));
            if i == 2 {
                released = subnet;
            }
        }
        assert_full(&mut sna);

        sna.release_network(&released).expect("release");

        let subnet = sna.allocate_network().expect("after release");
        assert_eq!(subnet.to_string(), released);
        assert_full(&mut sna);
    }

    #[test]
    fn test_release_unallocated_is_noop() {
        let mut sna = new_allocator("10.1.0.0/16", 14);
        sna.release_network("10.1.64.0/18").expect("release");
        assert_allocates(&mut sna, "10.1.0.0/18");
        assert_allocates(&mut sna, "10.1.64.0/18");
    }

    #[test]
    fn test_release_out_of_range() {
        let mut sna = new_allocator("10.1.0.0/16", 14);
        assert!(matches!(
            sna.release_network("10.9.0.0/18"),
            Err(AllocatorError::OutOfRange { .. })
        ));
    }

    // ==================== MULTI-RANGE TESTS ====================

    #[test]
    fn test_multiple_ranges() {
        let mut sna = new_allocator("10.1.0.0/16", 14);
        sna.add_network_range("10.2.0.0/16", 14)
            .expect("second range");

        for i in 0..4 {
            assert_allocates(&mut sna, &format!("10.1.{}.0/18", i * 64));
        }
        for i in 0..4 {
            assert_allocates(&mut sna, &format!("10.2.{}.0/18", i * 64));
        }
        assert_full(&mut sna);

        sna.release_network("10.1.128.0/18").expect("release");
        sna.release_network("10.2.128.0/18").expect("release");

        assert_allocates(&mut sna, "10.1.128.0/18");
        assert_allocates(&mut sna, "10.2.128.0/18");
        assert_full(&mut sna);
    }

    #[test]
    fn test_no_overlap_under_mixed_operations() {
        let mut sna = new_allocator("10.1.0.0/16", 6);

        let mut live = std::collections::HashSet::new();
        for _ in 0..300 {
            let subnet = sna.allocate_network().expect("allocation");
            assert!(live.insert(subnet), "duplicate allocation {subnet}");
        }
        for subnet in live.iter().take(10).copied().collect::<Vec<_>>() {
            sna.release_network(&subnet.to_string()).expect("release");
            live.remove(&subnet);
        }
        for _ in 0..700 {
            let subnet = sna.allocate_network().expect("allocation");
            assert!(live.insert(subnet), "duplicate allocation {subnet}");
        }
    }

    // ==================== STATS TESTS ====================

    #[test]
    fn test_stats_track_occupancy() {
        let mut sna = new_allocator("10.1.0.0/16", 14);
        sna.add_network_range("10.2.0.0/16", 8).expect("second range");

        sna.allocate_network().expect("allocation");
        sna.allocate_network().expect("allocation");
        sna.mark_allocated_network("10.2.7.0/24").expect("mark");

        let stats = sna.stats();
        assert_eq!(stats.ranges.len(), 2);
        assert_eq!(stats.ranges[0].network.to_string(), "10.1.0.0/16");
        assert_eq!(stats.ranges[0].capacity, 4);
        assert_eq!(stats.ranges[0].allocated, 2);
        assert_eq!(stats.ranges[1].capacity, 256);
        assert_eq!(stats.ranges[1].allocated, 1);
    }
}
