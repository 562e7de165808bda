//! Builders for hand-written observations used across the analysis tests.

use std::collections::BTreeMap;

use crate::archival::{
    DnsAnswer, DnsLookupResult, HttpBody, HttpRequest, HttpRequestResult, HttpResponse, HttpTor,
    TcpConnectResult, TcpConnectStatus, TlsHandshakeResult,
};
use crate::control::{ThDnsResult, ThHttpRequestResult, ThRequest, ThResponse, ThTcpConnectResult};

pub fn query(id: i64, engine: &str, qtype: &str, addrs: &[&str], failure: Option<&str>) -> DnsLookupResult {
    DnsLookupResult {
        answers: addrs.iter().map(|a| DnsAnswer::from_ip(a.parse().unwrap(), None)).collect(),
        engine: engine.to_string(),
        failure: failure.map(str::to_string),
        hostname: "www.example.com".to_string(),
        query_type: qtype.to_string(),
        raw_response: None,
        rcode: None,
        resolver_address: String::new(),
        t0: 0.0,
        t: 0.1,
        tags: Vec::new(),
        transaction_id: id,
    }
}

pub fn tcp(id: i64, ip: &str, port: u16, failure: Option<&str>) -> TcpConnectResult {
    TcpConnectResult {
        ip: ip.to_string(),
        port,
        status: TcpConnectStatus {
            blocked: None,
            failure: failure.map(str::to_string),
            success: failure.is_none(),
        },
        t0: 0.1,
        t: 0.2,
        tags: Vec::new(),
        transaction_id: id,
    }
}

pub fn tls(id: i64, address: &str, sni: &str, failure: Option<&str>) -> TlsHandshakeResult {
    TlsHandshakeResult {
        network: "tcp".to_string(),
        address: address.to_string(),
        cipher_suite: String::new(),
        failure: failure.map(str::to_string),
        negotiated_protocol: String::new(),
        no_tls_verify: false,
        peer_certificates: Vec::new(),
        server_name: sni.to_string(),
        t0: 0.2,
        t: 0.3,
        tags: Vec::new(),
        tls_version: String::new(),
        transaction_id: id,
    }
}

pub fn request(
    id: i64,
    url: &str,
    status: i64,
    headers: &[(&str, &str)],
    body: &str,
    failure: Option<&str>,
) -> HttpRequestResult {
    let headers_list: Vec<(String, String)> =
        headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    HttpRequestResult {
        network: "tcp".to_string(),
        address: String::new(),
        alpn: String::new(),
        failure: failure.map(str::to_string),
        request: HttpRequest {
            body: HttpBody::default(),
            body_is_truncated: false,
            headers_list: Vec::new(),
            headers: BTreeMap::new(),
            method: "GET".to_string(),
            tor: HttpTor { exit_ip: None, exit_name: None, is_tor: false },
            x_transport: "tcp".to_string(),
            url: url.to_string(),
        },
        response: HttpResponse {
            body: HttpBody(body.as_bytes().to_vec()),
            body_is_truncated: false,
            code: status,
            headers: headers_list.iter().cloned().collect(),
            headers_list,
        },
        t0: 0.3,
        t: 0.4,
        tags: Vec::new(),
        transaction_id: id,
    }
}

pub fn control_request(url: &str) -> ThRequest {
    ThRequest {
        http_request: url.to_string(),
        ..Default::default()
    }
}

/// A test helper that resolved `addrs` and could connect to them on 80 and 443.
pub fn control_ok(addrs: &[&str]) -> ThResponse {
    let mut tcp_connect = BTreeMap::new();
    for addr in addrs {
        for port in [80, 443] {
            tcp_connect.insert(
                crate::archival::join_host_port(addr, port),
                ThTcpConnectResult { status: true, failure: None },
            );
        }
    }
    ThResponse {
        tcp_connect,
        http_request: ThHttpRequestResult {
            body_length: 1256,
            title: "Example Domain".to_string(),
            headers: [("Content-Type", "text/html"), ("Date", "Mon, 19 Oct 2026 10:00:00 GMT")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            status_code: 200,
            ..Default::default()
        },
        dns: ThDnsResult {
            failure: None,
            addrs: addrs.iter().map(|a| a.to_string()).collect(),
        },
        ..Default::default()
    }
}
