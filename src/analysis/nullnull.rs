//! Heuristics for measurements where no sub-analysis set any flag.

use tracing::{info, warn};
use url::Url;

use crate::failure::{DNS_NAME_ERROR, DNS_NO_ANSWER, DNS_NXDOMAIN_ERROR};
use crate::testkeys::{BlockingVerdict, TestKeys};

pub const NULL_NULL_EXPECTED_DNS_LOOKUP_FAILURE: i64 = 1;
pub const NULL_NULL_EXPECTED_TCP_CONNECT_FAILURE: i64 = 2;
pub const NULL_NULL_EXPECTED_TLS_HANDSHAKE_FAILURE: i64 = 4;
pub const NULL_NULL_SUCCESSFUL_HTTPS: i64 = 8;
pub const NULL_NULL_NXDOMAIN_WITH_CENSORSHIP: i64 = 16;

const REDIRECT_OR_OK: [i64; 5] = [200, 301, 302, 307, 308];

/// Returns whether one of the heuristics matched and set the verdict.
pub fn remediate(tk: &mut TestKeys) -> bool {
    if nxdomain_with_censorship(tk) {
        warn!("NULL-NULL: the test helper got NXDOMAIN but we resolved the domain");
        set(tk, NULL_NULL_NXDOMAIN_WITH_CENSORSHIP, BlockingVerdict::Dns, Some(false));
        return true;
    }
    if no_addrs(tk) {
        info!("NULL-NULL: nobody could resolve the domain, website down");
        set(tk, NULL_NULL_EXPECTED_DNS_LOOKUP_FAILURE, BlockingVerdict::Down, Some(false));
        return true;
    }
    if all_connects_failed(tk) {
        info!("NULL-NULL: nobody could connect, website down");
        set(tk, NULL_NULL_EXPECTED_TCP_CONNECT_FAILURE, BlockingVerdict::Down, Some(false));
        return true;
    }
    if tls_misconfigured(tk) {
        info!("NULL-NULL: TLS fails the same way for everyone, website down");
        set(tk, NULL_NULL_EXPECTED_TLS_HANDSHAKE_FAILURE, BlockingVerdict::Down, Some(false));
        return true;
    }
    if successful_https(tk) {
        info!("NULL-NULL: every request used HTTPS and succeeded");
        set(tk, NULL_NULL_SUCCESSFUL_HTTPS, BlockingVerdict::Accessible, Some(true));
        return true;
    }
    false
}

fn set(tk: &mut TestKeys, flag: i64, blocking: BlockingVerdict, accessible: Option<bool>) {
    tk.x_null_null_flags |= flag;
    tk.blocking = blocking;
    tk.accessible = accessible;
}

/// The test helper says the domain does not exist, yet our cleartext lookups worked.
fn nxdomain_with_censorship(tk: &TestKeys) -> bool {
    let Some(control) = &tk.control else {
        return false;
    };
    let nxdomain = [DNS_NAME_ERROR, DNS_NXDOMAIN_ERROR];
    if !control.dns.failure.as_deref().is_some_and(|f| nxdomain.contains(&f)) {
        return false;
    }
    let mut cleartext = tk
        .queries
        .iter()
        .filter(|q| q.engine != "doh" && q.failure.as_deref() != Some(DNS_NO_ANSWER))
        .peekable();
    cleartext.peek().is_some() && cleartext.all(|q| q.failure.is_none())
}

fn no_addrs(tk: &TestKeys) -> bool {
    let Some(control) = &tk.control else {
        return false;
    };
    let probe_addrs = tk.queries.iter().flat_map(|q| q.addresses()).count();
    probe_addrs == 0
        && control.dns.addrs.is_empty()
        && tk.tcp_connect.is_empty()
        && control.tcp_connect.is_empty()
}

/// Every endpoint we tried failed, and so did the test helper's attempt at it.
fn all_connects_failed(tk: &TestKeys) -> bool {
    let Some(control) = &tk.control else {
        return false;
    };
    !tk.tcp_connect.is_empty()
        && tk.tcp_connect.iter().all(|tcp| {
            tcp.status.failure.is_some()
                && control
                    .tcp_connect
                    .get(&tcp.endpoint())
                    .is_some_and(|c| c.failure.is_some())
        })
}

/// Every handshake failed with the same error the test helper got.
fn tls_misconfigured(tk: &TestKeys) -> bool {
    let Some(control) = &tk.control else {
        return false;
    };
    !tk.tls_handshakes.is_empty()
        && tk.tls_handshakes.iter().all(|hs| {
            hs.failure.is_some()
                && control
                    .tls_handshake
                    .get(&hs.address)
                    .is_some_and(|c| c.failure.is_some() && c.failure == hs.failure)
        })
}

fn successful_https(tk: &TestKeys) -> bool {
    !tk.requests.is_empty()
        && tk.requests.iter().all(|req| {
            let https = Url::parse(&req.request.url).is_ok_and(|u| u.scheme() == "https");
            https && req.failure.is_none() && REDIRECT_OR_OK.contains(&req.response.code)
        })
}
