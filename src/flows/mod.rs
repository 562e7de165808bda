//! Per-endpoint measurement flows.
//!
//! A flow connects to one `ip:port`, optionally performs a TLS handshake,
//! asks the round's priority selector whether it may fetch the webpage and,
//! if so, performs the HTTP round trip and follows a redirect by starting a
//! new round. Every step is recorded into the test keys.

pub mod cleartext;
pub mod secure;

use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::archival::{
    headers_from_pairs, HttpBody, HttpRequest, HttpRequestResult, HttpResponse, HttpTor,
    TcpConnectResult, TcpConnectStatus,
};
use crate::context::MeasurementContext;
use crate::failure::NetError;
use crate::netx::{BoxStream, HttpExchange, HttpFetched};
use crate::resolvers::DnsResolvers;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("webconnectivity: not allowed to connect")]
    NotAllowedToConnect,
    #[error("webconnectivity: not permitted to fetch")]
    NotPermittedToFetch,
    #[error("{0}")]
    Net(#[from] NetError),
}

/// Only `ip:port` endpoints, and never loopback.
///
/// Bogons are allowed: connecting to them may reveal a block page.
pub fn allowed_to_connect(address: &str) -> Result<SocketAddr, FlowError> {
    let endpoint: SocketAddr = address.parse().map_err(|_| FlowError::NotAllowedToConnect)?;
    if crate::bogon::is_loopback(endpoint.ip()) {
        return Err(FlowError::NotAllowedToConnect);
    }
    Ok(endpoint)
}

pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 307 | 308)
}

/// Resolves the Location of a redirect against the URL that produced it.
pub fn http_validate_redirect(base: &Url, location: Option<&str>) -> Result<Url, NetError> {
    let location =
        location.ok_or_else(|| NetError::Unknown("http: no Location header in response".to_string()))?;
    let target = base.join(location).map_err(|err| match err {
        url::ParseError::EmptyHost => NetError::HttpInvalidRedirectLocationHost,
        other => NetError::Unknown(format!("http: invalid Location header: {}", other)),
    })?;
    if target.host_str().map_or(true, str::is_empty) {
        return Err(NetError::HttpInvalidRedirectLocationHost);
    }
    Ok(target)
}

pub(crate) async fn tcp_connect(
    ctx: &MeasurementContext,
    id: i64,
    endpoint: SocketAddr,
) -> Result<BoxStream, NetError> {
    let t0 = ctx.elapsed();
    let res = ctx
        .with_timeout(ctx.config.timeouts.tcp_connect(), ctx.netx.connect_tcp(endpoint))
        .await;
    let t = ctx.elapsed();
    let failure = res.as_ref().err().map(NetError::failure);
    match &failure {
        None => info!("[#{}] TCP connect {} ok", id, endpoint),
        Some(f) => info!("[#{}] TCP connect {} failed: {}", id, endpoint, f),
    }
    ctx.test_keys.append_tcp_connect(TcpConnectResult {
        ip: endpoint.ip().to_string(),
        port: endpoint.port(),
        status: TcpConnectStatus {
            blocked: None,
            success: failure.is_none(),
            failure,
        },
        t0,
        t,
        tags: Vec::new(),
        transaction_id: id,
    });
    res
}

/// The HTTP step shared by cleartext and secure flows
pub(crate) struct Fetch<'a> {
    pub id: i64,
    pub address: &'a str,
    pub endpoint: SocketAddr,
    pub url: &'a Url,
    pub referer: &'a str,
    pub alpn: &'a str,
}

impl Fetch<'_> {
    fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Request headers in the order they are sent
    fn request_headers(&self, ctx: &MeasurementContext) -> Result<Vec<(String, String)>, NetError> {
        let http = &ctx.config.http;
        let mut headers = vec![
            ("Host".to_string(), self.host_header()),
            ("Accept".to_string(), http.accept.clone()),
            ("Accept-Language".to_string(), http.accept_language.clone()),
        ];
        if !self.referer.is_empty() {
            headers.push(("Referer".to_string(), self.referer.to_string()));
        }
        headers.push(("User-Agent".to_string(), http.user_agent.clone()));
        if let Some(cookie) = ctx.cookies.cookies(self.url) {
            let cookie = cookie
                .to_str()
                .map_err(|e| NetError::Unknown(format!("http: invalid cookie: {}", e)))?;
            headers.push(("Cookie".to_string(), cookie.to_string()));
        }
        for (key, value) in &headers {
            HeaderValue::from_str(value)
                .map_err(|_| NetError::Unknown(format!("http: invalid value for header {}", key)))?;
        }
        Ok(headers)
    }

    /// Runs the round trip over the measured `conn`, records it and returns
    /// where the response redirects to.
    pub async fn run(&self, ctx: &MeasurementContext, conn: BoxStream) -> Result<Option<Url>, FlowError> {
        let headers = match self.request_headers(ctx) {
            Ok(headers) => headers,
            Err(err) => {
                if self.referer.is_empty() {
                    // the URL comes from the user, not from a website
                    ctx.test_keys.set_fundamental_failure(err.failure());
                }
                return Err(err.into());
            }
        };
        let max_body = ctx.config.measurement.max_body_bytes;
        let exchange = HttpExchange {
            url: self.url.clone(),
            endpoint: self.endpoint,
            alpn: self.alpn.to_string(),
            headers: headers.clone(),
            max_body,
        };

        let t0 = ctx.elapsed();
        let res = ctx
            .with_timeout(ctx.config.timeouts.http_round_trip(), ctx.netx.round_trip(conn, &exchange))
            .await;
        let t = ctx.elapsed();

        let (fetched, failure, location) = match res {
            Ok(fetched) => {
                self.store_cookies(ctx, &fetched);
                let mut failure = None;
                let mut location = None;
                if is_redirect(fetched.status) {
                    match http_validate_redirect(self.url, header(&fetched, "Location")) {
                        Ok(target) => location = Some(target),
                        Err(err) => failure = Some(err),
                    }
                }
                (fetched, failure, location)
            }
            Err(err) => (HttpFetched::default(), Some(err), None),
        };

        let (req_list, req_map) = headers_from_pairs(headers);
        let (resp_list, resp_map) = headers_from_pairs(fetched.headers);
        let mut body = fetched.body;
        let body_is_truncated = body.len() > max_body;
        body.truncate(max_body);
        ctx.test_keys.prepend_request(HttpRequestResult {
            network: "tcp".to_string(),
            address: self.address.to_string(),
            alpn: self.alpn.to_string(),
            failure: failure.as_ref().map(NetError::failure),
            request: HttpRequest {
                body: HttpBody::default(),
                body_is_truncated: false,
                headers_list: req_list,
                headers: req_map,
                method: "GET".to_string(),
                tor: HttpTor { exit_ip: None, exit_name: None, is_tor: false },
                x_transport: "tcp".to_string(),
                url: self.url.to_string(),
            },
            response: HttpResponse {
                body: HttpBody(body),
                body_is_truncated,
                code: fetched.status as i64,
                headers_list: resp_list,
                headers: resp_map,
            },
            t0,
            t,
            tags: Vec::new(),
            transaction_id: self.id,
        });

        match failure {
            Some(err) => Err(err.into()),
            None => {
                info!("[#{}] GET {} using {}: {}", self.id, self.url, self.address, fetched.status);
                Ok(location)
            }
        }
    }

    fn store_cookies(&self, ctx: &MeasurementContext, fetched: &HttpFetched) {
        let values: Vec<HeaderValue> = fetched
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("Set-Cookie"))
            .filter_map(|(_, v)| HeaderValue::from_str(v).ok())
            .collect();
        if !values.is_empty() {
            ctx.cookies.set_cookies(&mut values.iter(), self.url);
        }
    }
}

fn header<'a>(fetched: &'a HttpFetched, name: &str) -> Option<&'a str> {
    fetched
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Starts the next round of the redirect chain if the budget allows it.
pub(crate) fn follow_redirect(ctx: &Arc<MeasurementContext>, location: Url, from: &Url, depth: u32) {
    if !ctx.num_redirects.can_follow_one_more_redirect() {
        warn!("not following redirect to {}: too many redirects", location);
        return;
    }
    info!("↪️ redirect to: {}", location);
    match DnsResolvers::new(location, from.to_string(), depth + 1, false) {
        Some(round) => round.start(ctx),
        None => warn!("redirect location without a host"),
    }
}
