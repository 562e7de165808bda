use std::collections::BTreeMap;
use url::Url;

use crate::archival::{DnsLookupResult, HttpRequestResult, TcpConnectResult, TlsHandshakeResult};
use crate::bogon;
use crate::control::{ThRequest, ThResponse, IP_FLAG_VALID_FOR_DOMAIN};

/// Result of one step, as far as we know it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Outcome {
    /// Never observed
    #[default]
    Unknown,
    Success,
    Failure(String),
}

impl Outcome {
    pub fn from_failure(failure: &Option<String>) -> Self {
        match failure {
            Some(f) => Outcome::Failure(f.clone()),
            None => Outcome::Success,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Outcome::Failure(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Outcome::Success
    }
}

/// Everything known about one DNS failure, IP address or TCP endpoint,
/// joined with what the control saw for the same thing.
#[derive(Debug, Clone, Default)]
pub struct WebObservation {
    pub dns_transaction_ids: Vec<i64>,
    pub dns_domain: Option<String>,
    pub dns_lookup_failure: Outcome,
    pub dns_query_type: Option<String>,
    pub dns_engine: Option<String>,

    pub ip_address: Option<String>,
    pub ip_address_asn: Option<i64>,
    pub ip_address_bogon: Option<bool>,
    pub ip_address_valid_for_domain: Option<bool>,

    pub endpoint_transaction_id: Option<i64>,
    pub endpoint_port: Option<u16>,
    pub endpoint_address: Option<String>,

    pub tcp_connect_failure: Outcome,
    pub tls_handshake_failure: Outcome,
    pub tls_server_name: Option<String>,
    pub http_request_url: Option<String>,
    pub http_failure: Outcome,
    pub http_response_status_code: Option<i64>,

    pub match_with_control_ip_address: Option<bool>,
    pub match_with_control_ip_address_asn: Option<bool>,
    pub control_dns_lookup_failure: Outcome,
    pub control_tcp_connect_failure: Outcome,
    pub control_tls_handshake_failure: Outcome,
    pub control_http_failure: Outcome,
}

/// Joins the probe observations by IP address and transaction ID.
#[derive(Debug, Default)]
pub struct WebObservationsContainer {
    pub dns_lookup_failures: Vec<WebObservation>,
    /// Keyed by TCP connect transaction ID
    pub known_tcp_endpoints: BTreeMap<i64, WebObservation>,
    /// Every address some lookup returned, dialed or not
    pub known_ip_addresses: BTreeMap<String, WebObservation>,
}

impl WebObservationsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_dns_lookup_failures(&mut self, queries: &[DnsLookupResult]) {
        for query in queries.iter().filter(|q| q.failure.is_some()) {
            self.dns_lookup_failures.push(WebObservation {
                dns_transaction_ids: vec![query.transaction_id],
                dns_domain: Some(query.hostname.clone()),
                dns_lookup_failure: Outcome::from_failure(&query.failure),
                dns_query_type: Some(query.query_type.clone()),
                dns_engine: Some(query.engine.clone()),
                ..Default::default()
            });
        }
    }

    /// The first successful lookup of an address describes it; later ones add their IDs.
    pub fn create_known_ip_addresses(&mut self, queries: &[DnsLookupResult]) {
        for query in queries {
            for addr in query.addresses() {
                match self.known_ip_addresses.get_mut(addr) {
                    Some(obs) => obs.dns_transaction_ids.push(query.transaction_id),
                    None => {
                        let obs = WebObservation {
                            dns_transaction_ids: vec![query.transaction_id],
                            dns_domain: Some(query.hostname.clone()),
                            dns_lookup_failure: Outcome::Success,
                            dns_query_type: Some(query.query_type.clone()),
                            dns_engine: Some(query.engine.clone()),
                            ip_address: Some(addr.to_string()),
                            ip_address_bogon: Some(bogon::is_bogon(addr)),
                            ..Default::default()
                        };
                        self.known_ip_addresses.insert(addr.to_string(), obs);
                    }
                }
            }
        }
    }

    /// Endpoints whose address no lookup returned (IP literals, test helper
    /// addresses) get an observation without DNS information.
    pub fn create_known_tcp_endpoints(&mut self, connects: &[TcpConnectResult]) {
        for connect in connects {
            let mut obs = self.known_ip_addresses.get(&connect.ip).cloned().unwrap_or_else(|| WebObservation {
                ip_address: Some(connect.ip.clone()),
                ip_address_bogon: Some(bogon::is_bogon(&connect.ip)),
                ..Default::default()
            });
            obs.endpoint_transaction_id = Some(connect.transaction_id);
            obs.endpoint_port = Some(connect.port);
            obs.endpoint_address = Some(connect.endpoint());
            obs.tcp_connect_failure = Outcome::from_failure(&connect.status.failure);
            self.known_tcp_endpoints.insert(connect.transaction_id, obs);
        }
    }

    pub fn note_tls_handshake_results(&mut self, handshakes: &[TlsHandshakeResult]) {
        for hs in handshakes {
            if let Some(obs) = self.known_tcp_endpoints.get_mut(&hs.transaction_id) {
                obs.tls_handshake_failure = Outcome::from_failure(&hs.failure);
                obs.tls_server_name = Some(hs.server_name.clone());
            }
        }
    }

    pub fn note_http_round_trip_results(&mut self, requests: &[HttpRequestResult]) {
        for req in requests {
            if let Some(obs) = self.known_tcp_endpoints.get_mut(&req.transaction_id) {
                obs.http_request_url = Some(req.request.url.clone());
                obs.http_failure = Outcome::from_failure(&req.failure);
                if req.response.code > 0 {
                    obs.http_response_status_code = Some(req.response.code);
                }
            }
        }
    }

    /// Fails only when the control request URL does not parse.
    pub fn note_control_results(&mut self, request: &ThRequest, response: &ThResponse) -> Result<(), url::ParseError> {
        let url = Url::parse(&request.http_request)?;
        let domain = url
            .host_str()
            .unwrap_or_default()
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let control_dns = Outcome::from_failure(&response.dns.failure);

        for obs in &mut self.dns_lookup_failures {
            if obs.dns_domain.as_deref() == Some(domain.as_str()) {
                obs.control_dns_lookup_failure = control_dns.clone();
            }
        }

        let control_asns: Vec<i64> = response.dns.addrs.iter().map(|a| response.asn_of(a)).collect();
        let control_http = Outcome::from_failure(&response.http_request.failure);

        for obs in self.known_ip_addresses.values_mut() {
            if obs.dns_domain.as_deref() == Some(domain.as_str()) {
                obs.control_dns_lookup_failure = control_dns.clone();
            }
            note_control_address(obs, response, &control_asns);
        }

        for obs in self.known_tcp_endpoints.values_mut() {
            if obs.dns_domain.as_deref() == Some(domain.as_str()) {
                obs.control_dns_lookup_failure = control_dns.clone();
            }
            note_control_address(obs, response, &control_asns);

            if let Some(endpoint) = &obs.endpoint_address {
                if let Some(tcp) = response.tcp_connect.get(endpoint) {
                    obs.control_tcp_connect_failure = Outcome::from_failure(&tcp.failure);
                }
                if let Some(tls) = response.tls_handshake.get(endpoint) {
                    if obs.tls_server_name.as_deref() == Some(tls.server_name.as_str()) {
                        obs.control_tls_handshake_failure = Outcome::from_failure(&tls.failure);
                    }
                }
            }

            obs.control_http_failure = control_http.clone();
        }
        Ok(())
    }

    /// Resolved addresses no flow ever connected to (loopback answers, for one)
    pub fn undialed_ip_addresses(&self) -> impl Iterator<Item = &WebObservation> {
        self.known_ip_addresses.iter().filter_map(|(addr, obs)| {
            let dialed = self
                .known_tcp_endpoints
                .values()
                .any(|ep| ep.ip_address.as_deref() == Some(addr.as_str()));
            (!dialed).then_some(obs)
        })
    }
}

fn note_control_address(obs: &mut WebObservation, response: &ThResponse, control_asns: &[i64]) {
    let Some(addr) = obs.ip_address.clone() else {
        return;
    };
    let asn = response.asn_of(&addr);
    obs.ip_address_asn = Some(asn);
    if let Some(info) = response.ip_info.get(&addr) {
        obs.ip_address_valid_for_domain = Some(info.flags & IP_FLAG_VALID_FOR_DOMAIN != 0);
    }
    if !response.dns.addrs.is_empty() {
        obs.match_with_control_ip_address = Some(response.dns.addrs.contains(&addr));
        obs.match_with_control_ip_address_asn = Some(control_asns.contains(&asn));
    }
}
