use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::archival::join_host_port;
use crate::context::MeasurementContext;
use crate::dnscache::DnsEntry;
use crate::failure::NetError;
use crate::priority::PrioritySelector;
use crate::resolvers::DnsResolvers;

// ip_info flags: 1 resolved by the probe, 2 resolved by the test helper, 4 bogon,
// 8 the test helper completed a TLS handshake for the domain using this address.
pub const IP_FLAG_VALID_FOR_DOMAIN: i64 = 8;

/// Request sent to the test helper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThRequest {
    pub http_request: String,
    pub http_request_headers: BTreeMap<String, Vec<String>>,
    pub tcp_connect: Vec<String>,
    pub x_quic_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThTcpConnectResult {
    pub status: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThTlsHandshakeResult {
    pub server_name: String,
    pub status: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThHttpRequestResult {
    pub body_length: i64,
    pub discovered_h3_endpoint: String,
    pub failure: Option<String>,
    pub title: String,
    pub headers: BTreeMap<String, String>,
    pub status_code: i64,
}

impl Default for ThHttpRequestResult {
    fn default() -> Self {
        Self {
            body_length: -1,
            discovered_h3_endpoint: String::new(),
            failure: None,
            title: String::new(),
            headers: BTreeMap::new(),
            status_code: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThDnsResult {
    pub failure: Option<String>,
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThIpInfo {
    pub asn: i64,
    pub flags: i64,
}

/// What the test helper observed from its own vantage point.
///
/// Endpoint maps are keyed by `ip:port`, `ip_info` by bare address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThResponse {
    pub tcp_connect: BTreeMap<String, ThTcpConnectResult>,
    pub tls_handshake: BTreeMap<String, ThTlsHandshakeResult>,
    pub quic_handshake: BTreeMap<String, ThTlsHandshakeResult>,
    pub http_request: ThHttpRequestResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http3_request: Option<ThHttpRequestResult>,
    pub dns: ThDnsResult,
    pub ip_info: BTreeMap<String, ThIpInfo>,
}

impl ThResponse {
    /// ASN the test helper attributed to `addr`, zero when unknown
    pub fn asn_of(&self, addr: &str) -> i64 {
        self.ip_info.get(addr).map(|info| info.asn).unwrap_or(0)
    }
}

/// Control task: asks the test helper to measure the same URL and then
/// measures any address only the test helper knew about.
pub struct Control {
    pub addresses: Vec<DnsEntry>,
    pub url: Url,
    pub round: Arc<DnsResolvers>,
    pub selector: Option<PrioritySelector>,
}

impl Control {
    pub fn start(self, ctx: &Arc<MeasurementContext>) {
        let ctx = ctx.clone();
        ctx.tracker.clone().spawn(async move { self.run(ctx).await });
    }

    pub fn request(&self, ctx: &MeasurementContext) -> ThRequest {
        let http = &ctx.config.http;
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), vec![http.accept.clone()]);
        headers.insert("Accept-Language".to_string(), vec![http.accept_language.clone()]);
        headers.insert("User-Agent".to_string(), vec![http.user_agent.clone()]);

        let mut tcp_connect = Vec::new();
        for entry in &self.addresses {
            match self.url.port() {
                Some(port) => tcp_connect.push(join_host_port(&entry.addr, port)),
                None => {
                    tcp_connect.push(join_host_port(&entry.addr, 443));
                    tcp_connect.push(join_host_port(&entry.addr, 80));
                }
            }
        }

        ThRequest {
            http_request: self.url.to_string(),
            http_request_headers: headers,
            tcp_connect,
            x_quic_enabled: false,
        }
    }

    async fn run(self, ctx: Arc<MeasurementContext>) {
        let request = self.request(&ctx);
        ctx.test_keys.set_control_request(request.clone());

        let mut last_err = NetError::Unknown("no test helper available".to_string());
        let mut response = None;
        for th_url in &ctx.config.control.urls {
            info!("🛰️ control for {} using {}", self.url, th_url);
            let limit = ctx.config.timeouts.test_helper();
            match ctx.with_timeout(limit, ctx.netx.call_test_helper(th_url, &request)).await {
                Ok(resp) => {
                    response = Some(resp);
                    break;
                }
                Err(err) => {
                    warn!("control with {} failed: {}", th_url, err);
                    last_err = err;
                }
            }
        }

        let Some(response) = response else {
            ctx.test_keys.set_control_failure(last_err.failure());
            return;
        };
        info!("control for {} ok: {} addrs", self.url, response.dns.addrs.len());
        let extra = th_only_addresses(&self.addresses, &response.dns.addrs);
        ctx.test_keys.set_control(response);

        if !extra.is_empty() {
            info!("measuring addrs only known to the test helper: {:?}", extra);
            self.round.start_cleartext_flows(&ctx, self.selector.clone(), &extra);
            self.round.start_secure_flows(&ctx, self.selector.clone(), &extra);
        }
    }
}

/// Addresses the test helper resolved that the probe did not; they carry no resolver flag.
fn th_only_addresses(known: &[DnsEntry], th_addrs: &[String]) -> Vec<DnsEntry> {
    let known: HashSet<&str> = known.iter().map(|e| e.addr.as_str()).collect();
    let mut seen = HashSet::new();
    th_addrs
        .iter()
        .filter(|addr| !known.contains(addr.as_str()) && seen.insert(addr.as_str()))
        .map(|addr| DnsEntry { addr: addr.clone(), flags: 0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnscache::FLAG_SYSTEM_RESOLVER;

    #[test]
    fn test_response_defaults() {
        let resp: ThResponse = serde_json::from_str(r#"{"dns": {"failure": "dns_name_error", "addrs": []}}"#).unwrap();
        assert_eq!(resp.dns.failure.as_deref(), Some("dns_name_error"));
        assert_eq!(resp.http_request.status_code, -1);
        assert_eq!(resp.http_request.body_length, -1);
        assert!(resp.tcp_connect.is_empty());
        assert!(resp.http3_request.is_none());
    }

    #[test]
    fn test_response_parsing() {
        let resp: ThResponse = serde_json::from_str(
            r#"{
                "tcp_connect": {"93.184.216.34:443": {"status": true, "failure": null}},
                "tls_handshake": {"93.184.216.34:443": {"server_name": "www.example.com", "status": true, "failure": null}},
                "http_request": {"body_length": 1256, "failure": null, "title": "Example Domain",
                                 "headers": {"Content-Type": "text/html"}, "status_code": 200},
                "dns": {"failure": null, "addrs": ["93.184.216.34"]},
                "ip_info": {"93.184.216.34": {"asn": 15133, "flags": 11}}
            }"#,
        )
        .unwrap();
        assert!(resp.tcp_connect["93.184.216.34:443"].status);
        assert_eq!(resp.tls_handshake["93.184.216.34:443"].server_name, "www.example.com");
        assert_eq!(resp.http_request.status_code, 200);
        assert_eq!(resp.asn_of("93.184.216.34"), 15133);
        assert_eq!(resp.asn_of("10.0.0.1"), 0);
        let flags = resp.ip_info["93.184.216.34"].flags;
        assert_ne!(flags & IP_FLAG_VALID_FOR_DOMAIN, 0);
    }

    #[test]
    fn test_th_only_addresses() {
        let known = vec![DnsEntry { addr: "1.1.1.1".into(), flags: FLAG_SYSTEM_RESOLVER }];
        let th = vec!["1.1.1.1".to_string(), "2.2.2.2".to_string(), "2.2.2.2".to_string()];
        let extra = th_only_addresses(&known, &th);
        assert_eq!(extra, vec![DnsEntry { addr: "2.2.2.2".into(), flags: 0 }]);
    }
}
