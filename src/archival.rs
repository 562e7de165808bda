use base64::Engine as _;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Archival data format records.
///
/// Field names are a fixed wire contract consumed by the ingestion pipeline;
/// `failure` is `None` on success and an OONI failure string otherwise.

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DnsAnswer {
    pub answer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub ttl: Option<u32>,
}

impl DnsAnswer {
    pub fn from_ip(ip: IpAddr, ttl: Option<u32>) -> Self {
        match ip {
            IpAddr::V4(v4) => Self {
                answer_type: "A".to_string(),
                ipv4: Some(v4.to_string()),
                ipv6: None,
                hostname: None,
                ttl,
            },
            IpAddr::V6(v6) => Self {
                answer_type: "AAAA".to_string(),
                ipv4: None,
                ipv6: Some(v6.to_string()),
                hostname: None,
                ttl,
            },
        }
    }

    pub fn cname(target: &str, ttl: Option<u32>) -> Self {
        Self {
            answer_type: "CNAME".to_string(),
            ipv4: None,
            ipv6: None,
            hostname: Some(target.to_string()),
            ttl,
        }
    }

    /// The resolved address for A and AAAA answers
    pub fn address(&self) -> Option<&str> {
        match self.answer_type.as_str() {
            "A" => self.ipv4.as_deref(),
            "AAAA" => self.ipv6.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsLookupResult {
    pub answers: Vec<DnsAnswer>,
    pub engine: String,
    pub failure: Option<String>,
    pub hostname: String,
    pub query_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<BinaryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rcode: Option<i64>,
    pub resolver_address: String,
    pub t0: f64,
    pub t: f64,
    pub tags: Vec<String>,
    pub transaction_id: i64,
}

impl DnsLookupResult {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.answers.iter().filter_map(|a| a.address())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpConnectStatus {
    pub blocked: Option<bool>,
    pub failure: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpConnectResult {
    pub ip: String,
    pub port: u16,
    pub status: TcpConnectStatus,
    pub t0: f64,
    pub t: f64,
    pub tags: Vec<String>,
    pub transaction_id: i64,
}

impl TcpConnectResult {
    /// `ip:port` with brackets around IPv6 addresses
    pub fn endpoint(&self) -> String {
        join_host_port(&self.ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsHandshakeResult {
    pub network: String,
    pub address: String,
    pub cipher_suite: String,
    pub failure: Option<String>,
    pub negotiated_protocol: String,
    pub no_tls_verify: bool,
    pub peer_certificates: Vec<BinaryData>,
    pub server_name: String,
    pub t0: f64,
    pub t: f64,
    pub tags: Vec<String>,
    pub tls_version: String,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpTor {
    pub exit_ip: Option<String>,
    pub exit_name: Option<String>,
    pub is_tor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpRequest {
    pub body: HttpBody,
    pub body_is_truncated: bool,
    pub headers_list: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub tor: HttpTor,
    pub x_transport: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    pub body: HttpBody,
    pub body_is_truncated: bool,
    pub code: i64,
    pub headers_list: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers_list
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpRequestResult {
    pub network: String,
    pub address: String,
    pub alpn: String,
    pub failure: Option<String>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub t0: f64,
    pub t: f64,
    pub tags: Vec<String>,
    pub transaction_id: i64,
}

/// Raw bytes serialized as `{"format":"base64","data":...}`
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryData(pub Vec<u8>);

impl Serialize for BinaryData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("format", "base64")?;
        map.serialize_entry("data", &base64::engine::general_purpose::STANDARD.encode(&self.0))?;
        map.end()
    }
}

/// HTTP body: a plain string when it is valid UTF-8, base64 otherwise
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpBody(pub Vec<u8>);

impl HttpBody {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl Serialize for HttpBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => BinaryData(self.0.clone()).serialize(serializer),
        }
    }
}

/// Builds both header representations; the map keeps the first value seen per key.
pub fn headers_from_pairs(pairs: Vec<(String, String)>) -> (Vec<(String, String)>, BTreeMap<String, String>) {
    let mut map = BTreeMap::new();
    for (key, value) in &pairs {
        map.entry(key.clone()).or_insert_with(|| value.clone());
    }
    (pairs, map)
}

pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Connection priority decision, appended to `x_conn_priority_log`
#[derive(Debug, Clone, Serialize)]
pub struct ConnPriorityLogEntry {
    pub msg: String,
    pub t: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_serialization() {
        let answer = DnsAnswer::from_ip("93.184.216.34".parse().unwrap(), Some(300));
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({"answer_type": "A", "ipv4": "93.184.216.34", "ttl": 300})
        );
        let answer = DnsAnswer::from_ip("2001:db8::1".parse().unwrap(), None);
        assert_eq!(answer.address(), Some("2001:db8::1"));
        assert_eq!(DnsAnswer::cname("example.org", None).address(), None);
    }

    #[test]
    fn test_body_serialization() {
        let text = HttpBody(b"<html></html>".to_vec());
        assert_eq!(serde_json::to_value(&text).unwrap(), json!("<html></html>"));
        let binary = HttpBody(vec![0xff, 0xfe]);
        assert_eq!(
            serde_json::to_value(&binary).unwrap(),
            json!({"format": "base64", "data": "//4="})
        );
    }

    #[test]
    fn test_headers_keep_first_value() {
        let (list, map) = headers_from_pairs(vec![
            ("Set-Cookie".into(), "a=1".into()),
            ("Set-Cookie".into(), "b=2".into()),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(map.get("Set-Cookie").map(String::as_str), Some("a=1"));
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!([["Set-Cookie", "a=1"], ["Set-Cookie", "b=2"]])
        );
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("8.8.8.8", 443), "8.8.8.8:443");
        assert_eq!(join_host_port("2001:4860:4860::8888", 443), "[2001:4860:4860::8888]:443");
    }
}
