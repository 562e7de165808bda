use tracing::warn;

use super::container::{WebObservation, WebObservationsContainer};
use super::FLAG_DNS_BLOCKING;
use crate::failure::DNS_NO_ANSWER;
use crate::testkeys::TestKeys;

pub const DNS_FLAG_BOGON: i64 = 1;
pub const DNS_FLAG_UNEXPECTED_FAILURE: i64 = 2;
pub const DNS_FLAG_UNEXPECTED_ADDRS: i64 = 4;

/// AAAA queries failing with no answer are expected for IPv4-only domains.
fn is_expected_aaaa_failure(query_type: Option<&str>, failure: Option<&str>) -> bool {
    query_type == Some("AAAA") && failure == Some(DNS_NO_ANSWER)
}

pub fn analyze(tk: &mut TestKeys, container: &WebObservationsContainer) {
    experiment_failure(tk, container);
    bogons(tk, container);
    unexpected_failures(tk, container);
    unexpected_addrs(tk, container);

    if tk.x_dns_flags != 0 {
        tk.dns_consistency = Some("inconsistent".to_string());
        tk.x_blocking_flags |= FLAG_DNS_BLOCKING;
    } else {
        tk.dns_consistency = Some("consistent".to_string());
    }
}

/// The getaddrinfo failure becomes the experiment-wide DNS failure.
fn experiment_failure(tk: &mut TestKeys, container: &WebObservationsContainer) {
    for obs in &container.dns_lookup_failures {
        if obs.dns_engine.as_deref() != Some("getaddrinfo") {
            continue;
        }
        let failure = obs.dns_lookup_failure.failure();
        if is_expected_aaaa_failure(obs.dns_query_type.as_deref(), failure) {
            continue;
        }
        if let Some(failure) = failure {
            tk.dns_experiment_failure = Some(failure.to_string());
        }
    }
}

/// Every answer counts, including the ones no flow was allowed to dial.
fn bogons(tk: &mut TestKeys, container: &WebObservationsContainer) {
    for obs in container.known_ip_addresses.values() {
        if obs.dns_domain.is_none() || obs.ip_address_bogon != Some(true) {
            continue;
        }
        warn!(
            "BOGON: {} in #{:?}",
            obs.ip_address.as_deref().unwrap_or_default(),
            obs.dns_transaction_ids
        );
        tk.x_dns_flags |= DNS_FLAG_BOGON;
    }
}

/// Lookups that failed although the test helper resolved the domain.
fn unexpected_failures(tk: &mut TestKeys, container: &WebObservationsContainer) {
    for obs in &container.dns_lookup_failures {
        if !obs.control_dns_lookup_failure.is_success() {
            continue;
        }
        // opportunistic DoH fails too often to mean anything
        if obs.dns_engine.as_deref() == Some("doh") {
            continue;
        }
        let Some(failure) = obs.dns_lookup_failure.failure() else {
            continue;
        };
        if is_expected_aaaa_failure(obs.dns_query_type.as_deref(), Some(failure)) {
            continue;
        }
        warn!("DNS: unexpected failure {} in #{:?}", failure, obs.dns_transaction_ids);
        tk.x_dns_flags |= DNS_FLAG_UNEXPECTED_FAILURE;
    }
}

/// Nothing ties the address to the domain: not the control, not a TLS handshake.
fn is_unexpected_addr(obs: &WebObservation) -> bool {
    let Some(domain) = obs.dns_domain.as_deref() else {
        return false;
    };
    if obs.match_with_control_ip_address == Some(true) {
        return false;
    }
    if obs.tls_handshake_failure.is_success() && obs.tls_server_name.as_deref() == Some(domain) {
        return false;
    }
    if obs.ip_address_valid_for_domain == Some(true) {
        return false;
    }
    obs.match_with_control_ip_address_asn == Some(false)
}

fn unexpected_addrs(tk: &mut TestKeys, container: &WebObservationsContainer) {
    let candidates = container
        .known_tcp_endpoints
        .values()
        .chain(container.undialed_ip_addresses());
    for obs in candidates.filter(|obs| is_unexpected_addr(obs)) {
        warn!(
            "DNS: unexpected addr {} (asn {:?}) in #{:?}",
            obs.ip_address.as_deref().unwrap_or_default(),
            obs.ip_address_asn,
            obs.dns_transaction_ids
        );
        tk.x_dns_flags |= DNS_FLAG_UNEXPECTED_ADDRS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testdata::*;
    use crate::control::{ThIpInfo, ThResponse};

    fn run(tk: &mut TestKeys) {
        let mut c = WebObservationsContainer::new();
        c.create_dns_lookup_failures(&tk.queries);
        c.create_known_ip_addresses(&tk.queries);
        c.create_known_tcp_endpoints(&tk.tcp_connect);
        c.note_tls_handshake_results(&tk.tls_handshakes);
        if let (Some(req), Some(resp)) = (&tk.control_request, &tk.control) {
            c.note_control_results(req, resp).unwrap();
        }
        analyze(tk, &c);
    }

    fn keys(queries: Vec<crate::archival::DnsLookupResult>, control: Option<ThResponse>) -> TestKeys {
        let tcp_connect = queries
            .iter()
            .flat_map(|q| q.addresses().map(str::to_string).collect::<Vec<_>>())
            .enumerate()
            .map(|(i, addr)| tcp(50001 + i as i64, &addr, 443, None))
            .collect();
        TestKeys {
            queries,
            tcp_connect,
            control_request: control.as_ref().map(|_| control_request("https://www.example.com/")),
            control,
            ..Default::default()
        }
    }

    #[test]
    fn test_consistent() {
        let mut tk = keys(
            vec![query(10001, "getaddrinfo", "ANY", &["93.184.216.34"], None)],
            Some(control_ok(&["93.184.216.34"])),
        );
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, 0);
        assert_eq!(tk.dns_consistency.as_deref(), Some("consistent"));
        assert_eq!(tk.x_blocking_flags, 0);
        assert!(tk.dns_experiment_failure.is_none());
    }

    #[test]
    fn test_bogon_is_inconsistent() {
        let mut tk = keys(vec![query(10001, "getaddrinfo", "ANY", &["10.10.34.35"], None)], None);
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, DNS_FLAG_BOGON);
        assert_eq!(tk.dns_consistency.as_deref(), Some("inconsistent"));
        assert_eq!(tk.x_blocking_flags, FLAG_DNS_BLOCKING);
    }

    #[test]
    fn test_undialed_bogon_is_inconsistent() {
        let mut tk = keys(vec![query(20001, "udp", "A", &["93.184.216.34"], None)], Some(control_ok(&["93.184.216.34"])));
        // loopback answers never turn into endpoints
        tk.queries.push(query(10001, "getaddrinfo", "ANY", &["127.0.0.1"], None));
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, DNS_FLAG_BOGON);
        assert_eq!(tk.x_blocking_flags, FLAG_DNS_BLOCKING);
    }

    #[test]
    fn test_undialed_unexpected_addr() {
        let mut control = control_ok(&["93.184.216.34"]);
        control.ip_info.insert("93.184.216.34".into(), ThIpInfo { asn: 15133, flags: 2 });
        control.ip_info.insert("5.6.7.8".into(), ThIpInfo { asn: 3269, flags: 1 });
        let mut tk = keys(vec![query(20001, "udp", "A", &["93.184.216.34"], None)], Some(control));
        tk.queries.push(query(10001, "getaddrinfo", "ANY", &["5.6.7.8"], None));
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, DNS_FLAG_UNEXPECTED_ADDRS);
    }

    #[test]
    fn test_unexpected_failure() {
        let mut tk = keys(
            vec![
                query(10001, "getaddrinfo", "ANY", &[], Some("dns_nxdomain_error")),
                query(20001, "udp", "AAAA", &[], Some("dns_no_answer")),
                query(30001, "doh", "A", &[], Some("generic_timeout_error")),
            ],
            Some(control_ok(&["93.184.216.34"])),
        );
        run(&mut tk);
        assert_eq!(tk.dns_experiment_failure.as_deref(), Some("dns_nxdomain_error"));
        assert_eq!(tk.x_dns_flags, DNS_FLAG_UNEXPECTED_FAILURE);
    }

    #[test]
    fn test_failure_expected_when_control_also_fails() {
        let mut control = control_ok(&[]);
        control.dns.failure = Some("dns_name_error".to_string());
        let mut tk = keys(
            vec![query(10001, "getaddrinfo", "ANY", &[], Some("dns_nxdomain_error"))],
            Some(control),
        );
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, 0);
        assert_eq!(tk.dns_experiment_failure.as_deref(), Some("dns_nxdomain_error"));
    }

    #[test]
    fn test_unexpected_addrs_by_asn() {
        let mut control = control_ok(&["93.184.216.34"]);
        control.ip_info.insert("93.184.216.34".into(), ThIpInfo { asn: 15133, flags: 2 });
        control.ip_info.insert("5.6.7.8".into(), ThIpInfo { asn: 3269, flags: 1 });
        let mut tk = keys(vec![query(20001, "udp", "A", &["5.6.7.8"], None)], Some(control));
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, DNS_FLAG_UNEXPECTED_ADDRS);
    }

    #[test]
    fn test_same_asn_is_fine() {
        let mut control = control_ok(&["93.184.216.34"]);
        control.ip_info.insert("93.184.216.34".into(), ThIpInfo { asn: 15133, flags: 2 });
        control.ip_info.insert("93.184.216.35".into(), ThIpInfo { asn: 15133, flags: 1 });
        let mut tk = keys(vec![query(20001, "udp", "A", &["93.184.216.35"], None)], Some(control));
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, 0);
    }

    #[test]
    fn test_tls_success_confirms_addr() {
        let mut control = control_ok(&["93.184.216.34"]);
        control.ip_info.insert("93.184.216.34".into(), ThIpInfo { asn: 15133, flags: 2 });
        let mut tk = keys(vec![query(20001, "udp", "A", &["5.6.7.8"], None)], Some(control.clone()));
        tk.tls_handshakes = vec![tls(50001, "5.6.7.8:443", "www.example.com", None)];
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, 0);

        // so does the test helper's own handshake
        control.ip_info.insert("5.6.7.8".into(), ThIpInfo { asn: 3269, flags: 9 });
        let mut tk = keys(vec![query(20001, "udp", "A", &["5.6.7.8"], None)], Some(control));
        run(&mut tk);
        assert_eq!(tk.x_dns_flags, 0);
    }
}
