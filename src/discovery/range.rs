//! Inclusive IPv4 range with its port list

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
    pub ports: Vec<u16>,
    pub timeout: Duration,
}

impl ScanRange {
    /// Build a range; fails when `start > end` or `ports` is empty
    pub fn new(start_ip: Ipv4Addr, end_ip: Ipv4Addr, ports: Vec<u16>, timeout: Duration) -> crate::Result<Self> {
        let range = Self {
            start_ip,
            end_ip,
            ports,
            timeout,
        };
        range.check()?;
        Ok(range)
    }

    /// Parse both ends from dotted-quad strings
    pub fn parse(start: &str, end: &str, ports: Vec<u16>, timeout: Duration) -> crate::Result<Self> {
        let start_ip: Ipv4Addr = start
            .trim()
            .parse()
            .map_err(|_| ScanError::InvalidTarget(format!("not an IPv4 address: {}", start)))?;
        let end_ip: Ipv4Addr = end
            .trim()
            .parse()
            .map_err(|_| ScanError::InvalidTarget(format!("not an IPv4 address: {}", end)))?;
        Self::new(start_ip, end_ip, ports, timeout)
    }

    /// Single-host range
    pub fn single(ip: Ipv4Addr, ports: Vec<u16>, timeout: Duration) -> crate::Result<Self> {
        Self::new(ip, ip, ports, timeout)
    }

    fn check(&self) -> crate::Result<()> {
        if u32::from(self.start_ip) > u32::from(self.end_ip) {
            return Err(ScanError::InvalidRange(format!(
                "start {} is after end {}",
                self.start_ip, self.end_ip
            )));
        }
        if self.ports.is_empty() {
            return Err(ScanError::PortRangeError("port list is empty".to_string()));
        }
        if self.ports.contains(&0) {
            return Err(ScanError::PortRangeError("port 0 is not scannable".to_string()));
        }
        Ok(())
    }

    /// Structural validation against a host limit
    pub fn validate(&self, max_hosts: u64) -> crate::Result<()> {
        self.check()?;
        if self.ip_count() > max_hosts {
            return Err(ScanError::InvalidRange(format!(
                "{} hosts exceeds the limit of {}",
                self.ip_count(),
                max_hosts
            )));
        }
        Ok(())
    }

    pub fn ip_count(&self) -> u64 {
        u64::from(u32::from(self.end_ip)) - u64::from(u32::from(self.start_ip)) + 1
    }

    pub fn total_combinations(&self) -> u64 {
        self.ip_count() * self.ports.len() as u64
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let value = u32::from(ip);
        value >= u32::from(self.start_ip) && value <= u32::from(self.end_ip)
    }

    /// Every address in the range, ascending
    pub fn hosts(&self) -> impl Iterator<Item = IpAddr> {
        (u32::from(self.start_ip)..=u32::from(self.end_ip)).map(|value| IpAddr::V4(Ipv4Addr::from(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_host_range() {
        let range = ScanRange::parse("192.168.1.1", "192.168.1.1", vec![80], Duration::from_secs(1)).unwrap();
        assert_eq!(range.ip_count(), 1);
        assert_eq!(range.total_combinations(), 1);
        assert_eq!(range.hosts().collect::<Vec<_>>(), vec!["192.168.1.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_reversed_range_rejected() {
        let err = ScanRange::parse("10.0.0.9", "10.0.0.1", vec![80], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidRange(_)));
        let err = ScanRange::parse("10.0.0.1", "10.0.0.9", vec![], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ScanError::PortRangeError(_)));
    }

    #[test]
    fn test_host_limit() {
        let range = ScanRange::parse("10.0.0.0", "10.0.255.255", vec![80], Duration::from_secs(1)).unwrap();
        assert_eq!(range.ip_count(), 65_536);
        assert!(range.validate(65_536).is_ok());
        assert!(range.validate(1024).is_err());
    }

    #[test]
    fn test_full_space_does_not_overflow() {
        let range = ScanRange::new(Ipv4Addr::new(0, 0, 0, 0), Ipv4Addr::BROADCAST, vec![80, 554], Duration::ZERO).unwrap();
        assert_eq!(range.ip_count(), 1u64 << 32);
        assert_eq!(range.total_combinations(), 2u64 << 32);
    }

    proptest! {
        #[test]
        fn prop_counts_match_iteration(start in any::<u32>(), span in 0u32..512, ports in proptest::collection::vec(1u16.., 1..8)) {
            let end = start.saturating_add(span);
            let range = ScanRange::new(Ipv4Addr::from(start), Ipv4Addr::from(end), ports.clone(), Duration::ZERO).unwrap();
            prop_assert_eq!(range.ip_count(), u64::from(end - start) + 1);
            prop_assert_eq!(range.hosts().count() as u64, range.ip_count());
            prop_assert_eq!(range.total_combinations(), range.ip_count() * ports.len() as u64);
            prop_assert!(range.contains(Ipv4Addr::from(start)) && range.contains(Ipv4Addr::from(end)));
        }
    }
}
