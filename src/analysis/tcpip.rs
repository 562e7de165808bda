use tracing::warn;

use super::container::WebObservationsContainer;
use super::FLAG_TCPIP_BLOCKING;
use crate::testkeys::TestKeys;

/// Connects that failed for us but not for the test helper.
pub fn analyze(tk: &mut TestKeys, container: &WebObservationsContainer) {
    for obs in container.known_tcp_endpoints.values() {
        let Some(failure) = obs.tcp_connect_failure.failure() else {
            continue;
        };
        if !obs.control_tcp_connect_failure.is_success() {
            continue;
        }
        warn!(
            "TCP/IP: unexpected failure {} for {} (see #{})",
            failure,
            obs.endpoint_address.as_deref().unwrap_or_default(),
            obs.endpoint_transaction_id.unwrap_or_default()
        );
        tk.x_blocking_flags |= FLAG_TCPIP_BLOCKING;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testdata::*;
    use crate::control::ThTcpConnectResult;

    fn run(tk: &mut TestKeys) {
        let mut c = WebObservationsContainer::new();
        c.create_known_ip_addresses(&tk.queries);
        c.create_known_tcp_endpoints(&tk.tcp_connect);
        if let (Some(req), Some(resp)) = (&tk.control_request, &tk.control) {
            c.note_control_results(req, resp).unwrap();
        }
        analyze(tk, &c);
    }

    #[test]
    fn test_unexpected_connect_failure() {
        let mut tk = TestKeys {
            queries: vec![query(10001, "getaddrinfo", "ANY", &["93.184.216.34"], None)],
            tcp_connect: vec![
                tcp(40001, "93.184.216.34", 80, None),
                tcp(50001, "93.184.216.34", 443, Some("connection_reset")),
            ],
            control_request: Some(control_request("http://www.example.com/")),
            control: Some(control_ok(&["93.184.216.34"])),
            ..Default::default()
        };
        run(&mut tk);
        assert_eq!(tk.x_blocking_flags, FLAG_TCPIP_BLOCKING);
    }

    #[test]
    fn test_failure_seen_by_control_too() {
        let mut control = control_ok(&["93.184.216.34"]);
        control.tcp_connect.insert(
            "93.184.216.34:443".into(),
            ThTcpConnectResult { status: false, failure: Some("generic_timeout_error".into()) },
        );
        let mut tk = TestKeys {
            queries: vec![query(10001, "getaddrinfo", "ANY", &["93.184.216.34"], None)],
            tcp_connect: vec![tcp(50001, "93.184.216.34", 443, Some("generic_timeout_error"))],
            control_request: Some(control_request("http://www.example.com/")),
            control: Some(control),
            ..Default::default()
        };
        run(&mut tk);
        assert_eq!(tk.x_blocking_flags, 0);
    }

    #[test]
    fn test_no_control_no_verdict() {
        let mut tk = TestKeys {
            tcp_connect: vec![tcp(50001, "93.184.216.34", 443, Some("connection_refused"))],
            ..Default::default()
        };
        run(&mut tk);
        assert_eq!(tk.x_blocking_flags, 0);
    }
}
