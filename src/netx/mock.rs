//! Scripted network used by the unit and end-to-end tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{BoxStream, HttpExchange, HttpFetched, Netx, TlsConnectionState};
use crate::control::{ThRequest, ThResponse};
use crate::dns::packet::{build_response, parse_packet};
use crate::dns::types::{RecordType, ResponseCode};
use crate::failure::NetError;

type Lookup = Result<Vec<IpAddr>, NetError>;

#[derive(Default)]
pub struct MockNetx {
    pub system: HashMap<String, Lookup>,
    pub udp: HashMap<String, Lookup>,
    pub doh: HashMap<String, Lookup>,
    pub tcp_failures: HashMap<SocketAddr, NetError>,
    pub tcp_delays: HashMap<SocketAddr, Duration>,
    pub tls_failures: HashMap<SocketAddr, NetError>,
    pub http: HashMap<String, Result<HttpFetched, NetError>>,
    pub th: Option<Result<ThResponse, NetError>>,
    /// Every dial, in order
    pub connects: Mutex<Vec<SocketAddr>>,
    /// Each exchange with the endpoint its stream was dialed to
    pub fetches: Mutex<Vec<(String, HttpExchange)>>,
    pub th_requests: Mutex<Vec<ThRequest>>,
}

impl MockNetx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same answer from every resolver
    pub fn with_host(mut self, domain: &str, addrs: &[&str]) -> Self {
        let parsed: Vec<IpAddr> = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.system.insert(domain.to_string(), Ok(parsed.clone()));
        self.udp.insert(domain.to_string(), Ok(parsed.clone()));
        self.doh.insert(domain.to_string(), Ok(parsed));
        self
    }

    pub fn with_page(mut self, url: &str, status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let fetched = HttpFetched {
            status,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: body.as_bytes().to_vec(),
        };
        self.http.insert(url.to_string(), Ok(fetched));
        self
    }

    pub fn with_th(mut self, response: ThResponse) -> Self {
        self.th = Some(Ok(response));
        self
    }

    fn answer(table: &HashMap<String, Lookup>, query: &[u8]) -> Result<Vec<u8>, NetError> {
        let packet = parse_packet(query).map_err(|e| NetError::Unknown(e.to_string()))?;
        let question = packet
            .questions
            .first()
            .ok_or_else(|| NetError::Unknown("empty question".to_string()))?;
        let (rcode, addrs) = match table.get(&question.name) {
            Some(Ok(addrs)) => (ResponseCode::NoError, addrs.clone()),
            Some(Err(NetError::DnsNxdomain)) | None => (ResponseCode::NxDomain, Vec::new()),
            Some(Err(other)) => return Err(other.clone()),
        };
        let matching: Vec<IpAddr> = addrs
            .into_iter()
            .filter(|ip| match question.qtype {
                RecordType::A => ip.is_ipv4(),
                RecordType::AAAA => ip.is_ipv6(),
                _ => false,
            })
            .collect();
        Ok(build_response(query, rcode, &matching, 300))
    }
}

#[async_trait]
impl Netx for MockNetx {
    async fn lookup_host(&self, domain: &str) -> Result<Vec<IpAddr>, NetError> {
        self.system.get(domain).cloned().unwrap_or(Err(NetError::DnsNxdomain))
    }

    async fn exchange_udp(&self, _server: &str, query: &[u8]) -> Result<Vec<u8>, NetError> {
        Self::answer(&self.udp, query)
    }

    async fn exchange_https(&self, _url: &str, query: &[u8]) -> Result<Vec<u8>, NetError> {
        Self::answer(&self.doh, query)
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> Result<BoxStream, NetError> {
        if let Some(delay) = self.tcp_delays.get(&addr) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.tcp_failures.get(&addr) {
            return Err(err.clone());
        }
        self.connects.lock().push(addr);
        // the stream reads back the endpoint it was dialed to
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(addr.to_string().as_bytes()).await?;
        Ok(Box::new(client))
    }

    async fn handshake_tls(
        &self,
        stream: BoxStream,
        addr: SocketAddr,
        _sni: &str,
        alpn: &[String],
    ) -> Result<(BoxStream, TlsConnectionState), NetError> {
        if let Some(err) = self.tls_failures.get(&addr) {
            return Err(err.clone());
        }
        let state = TlsConnectionState {
            tls_version: "TLSv1.3".to_string(),
            cipher_suite: "TLS13_AES_128_GCM_SHA256".to_string(),
            negotiated_protocol: alpn.first().cloned().unwrap_or_default(),
            peer_certificates: vec![vec![0x30, 0x82]],
        };
        Ok((stream, state))
    }

    async fn round_trip(&self, mut conn: BoxStream, exchange: &HttpExchange) -> Result<HttpFetched, NetError> {
        let mut dialed = String::new();
        conn.read_to_string(&mut dialed).await?;
        self.fetches.lock().push((dialed, exchange.clone()));
        let mut fetched = self
            .http
            .get(exchange.url.as_str())
            .cloned()
            .unwrap_or(Err(NetError::ConnectionReset))?;
        fetched.body.truncate(exchange.max_body + 1);
        Ok(fetched)
    }

    async fn call_test_helper(&self, _url: &str, request: &ThRequest) -> Result<ThResponse, NetError> {
        self.th_requests.lock().push(request.clone());
        self.th.clone().unwrap_or(Err(NetError::ConnectionRefused))
    }
}
