use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Reserved ranges that should never show up in public DNS answers
const BOGONS_V4: &[(Ipv4Addr, u32)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

const BOGONS_V6: &[(Ipv6Addr, u32)] = &[
    (Ipv6Addr::UNSPECIFIED, 128),
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0), 96),
    (Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0), 64),
    (Ipv6Addr::new(0x2001, 0x10, 0, 0, 0, 0, 0, 0), 28),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

fn in_prefix_v4(ip: Ipv4Addr, net: Ipv4Addr, len: u32) -> bool {
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

fn in_prefix_v6(ip: Ipv6Addr, net: Ipv6Addr, len: u32) -> bool {
    let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
    (u128::from(ip) & mask) == (u128::from(net) & mask)
}

pub fn is_bogon_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => BOGONS_V4.iter().any(|(net, len)| in_prefix_v4(v4, *net, *len)),
        IpAddr::V6(v6) => BOGONS_V6.iter().any(|(net, len)| in_prefix_v6(v6, *net, *len)),
    }
}

/// Unparseable input is not considered a bogon
pub fn is_bogon(addr: &str) -> bool {
    addr.parse::<IpAddr>().map(is_bogon_ip).unwrap_or(false)
}

/// 127.0.0.0/8 and ::1
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => in_prefix_v4(v4, Ipv4Addr::new(127, 0, 0, 0), 8),
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bogons_v4() {
        assert!(is_bogon("10.0.0.1"));
        assert!(is_bogon("127.0.0.1"));
        assert!(is_bogon("172.31.255.255"));
        assert!(is_bogon("192.168.1.1"));
        assert!(is_bogon("100.64.0.1"));
        assert!(is_bogon("255.255.255.255"));
        assert!(!is_bogon("172.32.0.1"));
        assert!(!is_bogon("8.8.8.8"));
        assert!(!is_bogon("93.184.216.34"));
    }

    #[test]
    fn test_bogons_v6() {
        assert!(is_bogon("::1"));
        assert!(is_bogon("::"));
        assert!(is_bogon("fe80::1"));
        assert!(is_bogon("fd00::1"));
        assert!(is_bogon("2001:db8::1"));
        assert!(!is_bogon("2001:4860:4860::8888"));
    }

    #[test]
    fn test_not_an_address() {
        assert!(!is_bogon("example.com"));
        assert!(!is_bogon(""));
    }

    #[test]
    fn test_loopback() {
        assert!(is_loopback("127.1.2.3".parse().unwrap()));
        assert!(is_loopback("::1".parse().unwrap()));
        assert!(!is_loopback("10.0.0.1".parse().unwrap()));
    }
}
