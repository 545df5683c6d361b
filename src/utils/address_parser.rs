//! Target and port list parsing
//!
//! Targets: `a.b.c.d`, `a.b.c.d-e.f.g.h`, `a.b.c.d-h` (last octet) and CIDR.
//! Ports: `80,554,8000-8010`.

use crate::error::ScanError;
use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Parse a target into an inclusive `(start, end)` IPv4 pair
pub fn parse_target(input: &str) -> crate::Result<(Ipv4Addr, Ipv4Addr)> {
    let target = input.trim();
    if target.is_empty() {
        return Err(ScanError::InvalidTarget("empty target".to_string()));
    }

    if target.contains('/') {
        let network = Ipv4Network::from_str(target)
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", target, e)))?;
        log::debug!("CIDR {} is a /{} network", target, network.prefix());
        return Ok((network.network(), network.broadcast()));
    }

    if let Some((start, end)) = target.split_once('-') {
        let start = parse_ipv4(start)?;
        let end = match end.trim().parse::<u8>() {
            Ok(last_octet) => {
                let [a, b, c, _] = start.octets();
                Ipv4Addr::new(a, b, c, last_octet)
            }
            Err(_) => parse_ipv4(end)?,
        };
        if u32::from(start) > u32::from(end) {
            return Err(ScanError::InvalidRange(format!("start {} is after end {}", start, end)));
        }
        return Ok((start, end));
    }

    let ip = parse_ipv4(target)?;
    Ok((ip, ip))
}

fn parse_ipv4(value: &str) -> crate::Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| ScanError::InvalidTarget(format!("not an IPv4 address: {}", value.trim())))
}

/// Parse a comma separated port list with ranges; sorted and deduplicated
pub fn parse_ports(spec: &str) -> crate::Result<Vec<u16>> {
    let mut ports = BTreeSet::new();

    for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(ScanError::PortRangeError(format!(
                    "start port {} cannot be greater than end port {}",
                    start, end
                )));
            }
            ports.extend(start..=end);
        } else {
            ports.insert(parse_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(ScanError::PortRangeError(format!("no ports in '{}'", spec)));
    }
    Ok(ports.into_iter().collect())
}

fn parse_port(value: &str) -> crate::Result<u16> {
    let port: u16 = value
        .trim()
        .parse()
        .map_err(|e| ScanError::PortRangeError(format!("invalid port '{}': {}", value.trim(), e)))?;
    if port == 0 {
        return Err(ScanError::PortRangeError("port 0 is not valid".to_string()));
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_target_forms() {
        let single = Ipv4Addr::new(192, 168, 1, 10);
        assert_eq!(parse_target("192.168.1.10").unwrap(), (single, single));
        assert_eq!(
            parse_target("192.168.1.10-20").unwrap(),
            (single, Ipv4Addr::new(192, 168, 1, 20))
        );
        assert_eq!(
            parse_target("192.168.1.10 - 192.168.2.1").unwrap(),
            (single, Ipv4Addr::new(192, 168, 2, 1))
        );
        assert_eq!(
            parse_target("10.0.0.0/30").unwrap(),
            (Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 3))
        );
    }

    #[test]
    fn test_bad_targets() {
        assert!(matches!(parse_target(""), Err(ScanError::InvalidTarget(_))));
        assert!(matches!(parse_target("camera.local"), Err(ScanError::InvalidTarget(_))));
        assert!(matches!(parse_target("10.0.0.0/33"), Err(ScanError::InvalidTarget(_))));
        assert!(matches!(parse_target("10.0.0.20-10"), Err(ScanError::InvalidRange(_))));
    }

    #[test]
    fn test_port_list() {
        assert_eq!(parse_ports("554, 80,8000-8002,80").unwrap(), vec![80, 554, 8000, 8001, 8002]);
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("90-80").is_err());
        assert!(parse_ports("http").is_err());
        assert!(parse_ports(" , ").is_err());
    }

    proptest! {
        #[test]
        fn prop_port_ranges_expand_exactly(start in 1u16..=65_000, span in 0u16..500) {
            let end = start.saturating_add(span);
            let ports = parse_ports(&format!("{}-{}", start, end)).unwrap();
            prop_assert_eq!(ports.len(), usize::from(end - start) + 1);
            prop_assert_eq!(ports.first().copied(), Some(start));
            prop_assert_eq!(ports.last().copied(), Some(end));
        }

        #[test]
        fn prop_port_lists_are_sorted_and_unique(list in proptest::collection::vec(1u16.., 1..32)) {
            let spec = list.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
            let ports = parse_ports(&spec).unwrap();
            prop_assert!(ports.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(list.iter().all(|p| ports.contains(p)));
        }
    }
}
