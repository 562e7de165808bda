//! Network seam used by the measurement flows.
//!
//! Everything that touches the network goes through [`Netx`], so that flows,
//! resolvers and the control task can run against a scripted network in tests.

pub mod system;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::control::{ThRequest, ThResponse};
use crate::failure::NetError;

pub use system::SystemNetx;

pub trait NetStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> NetStream for T {}

pub type BoxStream = Box<dyn NetStream>;

/// What a completed TLS handshake looked like
#[derive(Debug, Clone, Default)]
pub struct TlsConnectionState {
    pub tls_version: String,
    pub cipher_suite: String,
    pub negotiated_protocol: String,
    pub peer_certificates: Vec<Vec<u8>>,
}

/// A GET request sent over the connection measured with `endpoint`
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub url: Url,
    pub endpoint: SocketAddr,
    /// Negotiated ALPN; `h2` selects HTTP/2, anything else HTTP/1.1
    pub alpn: String,
    pub headers: Vec<(String, String)>,
    pub max_body: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetched {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Netx: Send + Sync {
    /// getaddrinfo-style lookup through the system resolver
    async fn lookup_host(&self, domain: &str) -> Result<Vec<IpAddr>, NetError>;

    /// One raw DNS message exchange over UDP
    async fn exchange_udp(&self, server: &str, query: &[u8]) -> Result<Vec<u8>, NetError>;

    /// One raw DNS message exchange over HTTPS (RFC 8484 POST)
    async fn exchange_https(&self, url: &str, query: &[u8]) -> Result<Vec<u8>, NetError>;

    async fn connect_tcp(&self, addr: SocketAddr) -> Result<BoxStream, NetError>;

    /// Returns the TLS stream so that the fetch can reuse it.
    async fn handshake_tls(
        &self,
        stream: BoxStream,
        addr: SocketAddr,
        sni: &str,
        alpn: &[String],
    ) -> Result<(BoxStream, TlsConnectionState), NetError>;

    /// One request over `conn`, never dialing again. The body is read up to
    /// `max_body + 1` bytes so that the caller can tell a truncated body from
    /// one of exactly `max_body` bytes; redirects are never followed here.
    async fn round_trip(&self, conn: BoxStream, exchange: &HttpExchange) -> Result<HttpFetched, NetError>;

    async fn call_test_helper(&self, url: &str, request: &ThRequest) -> Result<ThResponse, NetError>;
}
