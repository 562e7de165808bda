//! Classifies a finished measurement.
//!
//! Observations are joined with the control in a [`WebObservationsContainer`],
//! each protocol sets its own blocking flags and the flags are then mapped onto
//! the legacy `blocking`/`accessible` pair. Runs once, after every flow is done.

pub mod container;
pub mod dns;
pub mod http;
pub mod httpdiff;
pub mod nullnull;
pub mod tcpip;
#[cfg(test)]
pub(crate) mod testdata;
pub mod title;
pub mod tls;

use tracing::{info, warn};

use crate::testkeys::{BlockingVerdict, TestKeys};
pub use container::WebObservationsContainer;

pub const FLAG_DNS_BLOCKING: i64 = 1;
pub const FLAG_TCPIP_BLOCKING: i64 = 2;
pub const FLAG_TLS_BLOCKING: i64 = 4;
pub const FLAG_HTTP_BLOCKING: i64 = 8;
pub const FLAG_HTTP_DIFF: i64 = 16;
pub const FLAG_SUCCESS: i64 = 32;

pub fn analyze(tk: &mut TestKeys) {
    let mut container = WebObservationsContainer::new();
    container.create_dns_lookup_failures(&tk.queries);
    container.create_known_ip_addresses(&tk.queries);
    container.create_known_tcp_endpoints(&tk.tcp_connect);
    container.note_tls_handshake_results(&tk.tls_handshakes);
    container.note_http_round_trip_results(&tk.requests);
    if let (Some(request), Some(response)) = (&tk.control_request, &tk.control) {
        if let Err(err) = container.note_control_results(request, response) {
            warn!("cannot use the control: {}", err);
        }
    }

    dns::analyze(tk, &container);
    tcpip::analyze(tk, &container);
    tls::analyze(tk, &container);
    http::analyze(tk, &container);
    resolve_verdict(tk);

    info!(
        "📊 x_dns_flags={:#x} x_blocking_flags={:#x} x_null_null_flags={:#x} blocking={:?} accessible={:?}",
        tk.x_dns_flags, tk.x_blocking_flags, tk.x_null_null_flags, tk.blocking, tk.accessible
    );
}

fn resolve_verdict(tk: &mut TestKeys) {
    let flags = tk.x_blocking_flags;
    let (blocking, accessible) = if flags & FLAG_DNS_BLOCKING != 0 {
        (BlockingVerdict::Dns, Some(false))
    } else if flags & FLAG_TCPIP_BLOCKING != 0 {
        (BlockingVerdict::TcpIp, Some(false))
    } else if flags & (FLAG_TLS_BLOCKING | FLAG_HTTP_BLOCKING) != 0 {
        (BlockingVerdict::HttpFailure, Some(false))
    } else if flags & FLAG_HTTP_DIFF != 0 {
        (BlockingVerdict::HttpDiff, Some(false))
    } else if flags & FLAG_SUCCESS != 0 {
        (BlockingVerdict::Accessible, Some(true))
    } else {
        if !nullnull::remediate(tk) {
            tk.blocking = BlockingVerdict::Unknown;
            tk.accessible = None;
        }
        return;
    };
    tk.blocking = blocking;
    tk.accessible = accessible;
}
