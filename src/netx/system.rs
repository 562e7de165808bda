use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use reqwest::header::CONTENT_TYPE;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::{BoxStream, HttpExchange, HttpFetched, Netx, TlsConnectionState};
use crate::control::{ThRequest, ThResponse};
use crate::failure::{self, NetError};

/// Real network access: tokio sockets, rustls handshakes, hyper over the
/// measured connections, reqwest for DoH and the test helpers
pub struct SystemNetx {
    roots: Arc<RootCertStore>,
    client: reqwest::Client,
}

impl SystemNetx {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(user_agent)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            roots: Arc::new(roots),
            client,
        })
    }

    fn tls_config(&self, alpn: &[String]) -> Result<ClientConfig, NetError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| failure::classify_rustls_error(&e))?
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth();
        config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(config)
    }
}

/// Origin-form target for HTTP/1.1, absolute URI for HTTP/2 (which takes the
/// authority from it instead of the Host header)
fn build_request(exchange: &HttpExchange, h2: bool) -> Result<hyper::Request<Empty<Bytes>>, NetError> {
    let url = &exchange.url;
    let (target, version) = if h2 {
        (&url[..url::Position::AfterQuery], hyper::Version::HTTP_2)
    } else {
        (&url[url::Position::BeforePath..url::Position::AfterQuery], hyper::Version::HTTP_11)
    };
    let mut builder = hyper::Request::get(target).version(version);
    for (key, value) in &exchange.headers {
        if h2 && key.eq_ignore_ascii_case("host") {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
        .body(Empty::new())
        .map_err(|e| NetError::Unknown(format!("http: invalid request: {}", e)))
}

/// getaddrinfo errors only come back as text
fn classify_getaddrinfo_error(err: &io::Error) -> NetError {
    let text = err.to_string();
    if text.contains("Name or service not known")
        || text.contains("nodename nor servname")
        || text.contains("No such host")
    {
        NetError::DnsNxdomain
    } else if text.contains("No address associated") {
        NetError::DnsNoAnswer
    } else if text.contains("Temporary failure in name resolution") {
        NetError::Timeout
    } else {
        failure::classify_io_error(err)
    }
}

fn tls_version_name(version: Option<rustls::ProtocolVersion>) -> String {
    match version {
        Some(rustls::ProtocolVersion::TLSv1_3) => "TLSv1.3".to_string(),
        Some(rustls::ProtocolVersion::TLSv1_2) => "TLSv1.2".to_string(),
        Some(other) => format!("{:?}", other),
        None => String::new(),
    }
}

#[async_trait]
impl Netx for SystemNetx {
    async fn lookup_host(&self, domain: &str) -> Result<Vec<IpAddr>, NetError> {
        let resolved = tokio::net::lookup_host((domain, 0))
            .await
            .map_err(|e| classify_getaddrinfo_error(&e))?;
        let mut addrs: Vec<IpAddr> = Vec::new();
        for addr in resolved {
            if !addrs.contains(&addr.ip()) {
                addrs.push(addr.ip());
            }
        }
        if addrs.is_empty() {
            return Err(NetError::DnsNoAnswer);
        }
        Ok(addrs)
    }

    async fn exchange_udp(&self, server: &str, query: &[u8]) -> Result<Vec<u8>, NetError> {
        let server: SocketAddr = server
            .parse()
            .map_err(|e| NetError::Unknown(format!("invalid resolver address {}: {}", server, e)))?;
        let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        socket.send(query).await?;

        let mut buf = vec![0u8; 4096];
        let len = socket.recv(&mut buf).await?;
        Ok(buf[..len].to_vec())
    }

    async fn exchange_https(&self, url: &str, query: &[u8]) -> Result<Vec<u8>, NetError> {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/dns-message")
            .header("Accept", "application/dns-message")
            .body(query.to_vec())
            .send()
            .await
            .map_err(|e| failure::classify_reqwest_error(&e))?;
        if !resp.status().is_success() {
            return Err(NetError::HttpRequestFailed);
        }
        let body = resp.bytes().await.map_err(|e| failure::classify_reqwest_error(&e))?;
        Ok(body.to_vec())
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> Result<BoxStream, NetError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(stream))
    }

    async fn handshake_tls(
        &self,
        stream: BoxStream,
        addr: SocketAddr,
        sni: &str,
        alpn: &[String],
    ) -> Result<(BoxStream, TlsConnectionState), NetError> {
        let config = self.tls_config(alpn)?;
        let server_name = ServerName::try_from(sni.to_string())
            .map_err(|e| NetError::Unknown(format!("invalid SNI {}: {}", sni, e)))?;
        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| failure::classify_tls_error(&e))?;

        let (_, conn) = tls.get_ref();
        let state = TlsConnectionState {
            tls_version: tls_version_name(conn.protocol_version()),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite()))
                .unwrap_or_default(),
            negotiated_protocol: conn
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).to_string())
                .unwrap_or_default(),
            peer_certificates: conn
                .peer_certificates()
                .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
                .unwrap_or_default(),
        };
        debug!("TLS handshake with {} ({}) done: {}", addr, sni, state.tls_version);
        Ok((Box::new(tls), state))
    }

    async fn round_trip(&self, conn: BoxStream, exchange: &HttpExchange) -> Result<HttpFetched, NetError> {
        let h2 = exchange.alpn == "h2";
        let request = build_request(exchange, h2)?;
        let io = TokioIo::new(conn);
        let endpoint = exchange.endpoint;

        let resp = if h2 {
            let (mut sender, connection) = http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(|e| failure::classify_hyper_error(&e))?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    debug!("HTTP/2 connection with {} closed: {}", endpoint, err);
                }
            });
            sender.send_request(request).await
        } else {
            let (mut sender, connection) = http1::handshake(io)
                .await
                .map_err(|e| failure::classify_hyper_error(&e))?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    debug!("HTTP/1.1 connection with {} closed: {}", endpoint, err);
                }
            });
            sender.send_request(request).await
        }
        .map_err(|e| failure::classify_hyper_error(&e))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (canonical_header_name(k.as_str()), String::from_utf8_lossy(v.as_bytes()).to_string()))
            .collect();

        let mut incoming = resp.into_body();
        let mut body = Vec::new();
        while body.len() <= exchange.max_body {
            let Some(frame) = incoming.frame().await else {
                break;
            };
            let frame = frame.map_err(|e| failure::classify_hyper_error(&e))?;
            if let Ok(chunk) = frame.into_data() {
                body.extend_from_slice(&chunk);
            }
        }
        body.truncate(exchange.max_body + 1);

        Ok(HttpFetched { status, headers, body })
    }

    async fn call_test_helper(&self, url: &str, request: &ThRequest) -> Result<ThResponse, NetError> {
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| failure::classify_reqwest_error(&e))?;
        if !resp.status().is_success() {
            return Err(NetError::HttpRequestFailed);
        }
        resp.json::<ThResponse>()
            .await
            .map_err(|e| if e.is_decode() { NetError::JsonParse } else { failure::classify_reqwest_error(&e) })
    }
}

/// `content-type` -> `Content-Type`, the way headers are archived
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-xss-protection"), "X-Xss-Protection");
        assert_eq!(canonical_header_name("server"), "Server");
    }

    #[test]
    fn test_getaddrinfo_classification() {
        let err = io::Error::new(io::ErrorKind::Other, "failed to lookup address information: Name or service not known");
        assert_eq!(classify_getaddrinfo_error(&err), NetError::DnsNxdomain);
        let err = io::Error::new(io::ErrorKind::Other, "failed to lookup address information: No address associated with hostname");
        assert_eq!(classify_getaddrinfo_error(&err), NetError::DnsNoAnswer);
    }

    fn exchange(url: &str, alpn: &str) -> HttpExchange {
        HttpExchange {
            url: url::Url::parse(url).unwrap(),
            endpoint: "93.184.216.34:443".parse().unwrap(),
            alpn: alpn.to_string(),
            headers: vec![
                ("Host".to_string(), "www.example.com".to_string()),
                ("User-Agent".to_string(), "Mozilla/5.0".to_string()),
            ],
            max_body: 1 << 19,
        }
    }

    #[test]
    fn test_request_target() {
        let req = build_request(&exchange("http://www.example.com/a/b?x=1#frag", ""), false).unwrap();
        assert_eq!(req.uri(), "/a/b?x=1");
        assert_eq!(req.version(), hyper::Version::HTTP_11);
        assert_eq!(req.headers()["host"], "www.example.com");

        let req = build_request(&exchange("https://www.example.com/a?x=1#frag", "h2"), true).unwrap();
        assert_eq!(req.uri(), "https://www.example.com/a?x=1");
        assert_eq!(req.version(), hyper::Version::HTTP_2);
        assert!(req.headers().get("host").is_none());
        assert_eq!(req.headers()["user-agent"], "Mozilla/5.0");
    }

    #[tokio::test]
    async fn test_round_trip_over_given_stream() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut server) = tokio::io::duplex(4096);
        let page = tokio::spawn(async move {
            let mut head = String::new();
            let mut buf = [0u8; 256];
            while !head.contains("\r\n\r\n") {
                let n = server.read(&mut buf).await.unwrap();
                assert!(n > 0);
                head.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            server
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: 10\r\n\r\n0123456789")
                .await
                .unwrap();
            head
        });

        let netx = SystemNetx::new("Mozilla/5.0").unwrap();
        let mut ex = exchange("http://www.example.com/", "");
        ex.max_body = 4;
        let fetched = netx.round_trip(Box::new(client), &ex).await.unwrap();
        assert_eq!(fetched.status, 200);
        assert!(fetched.headers.contains(&("Content-Type".to_string(), "text/html".to_string())));
        // one byte past the cap marks the body as truncated
        assert_eq!(fetched.body, b"01234");

        let head = page.await.unwrap();
        assert!(head.starts_with("GET / HTTP/1.1\r\n"));
        assert!(head.to_ascii_lowercase().contains("host: www.example.com"));
    }

    #[test]
    fn test_tls_version_name() {
        assert_eq!(tls_version_name(Some(rustls::ProtocolVersion::TLSv1_3)), "TLSv1.3");
        assert_eq!(tls_version_name(None), "");
    }
}
