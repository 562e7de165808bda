use std::sync::Arc;
use tracing::info;
use url::Url;

use super::{allowed_to_connect, follow_redirect, tcp_connect, Fetch, FlowError};
use crate::archival::{BinaryData, TlsHandshakeResult};
use crate::context::MeasurementContext;
use crate::failure::NetError;
use crate::netx::TlsConnectionState;
use crate::priority::PrioritySelector;

/// TCP connect and TLS handshake with one endpoint, then maybe fetch `url`.
///
/// Without a selector the flow only gathers TCP/TLS data.
pub struct SecureFlow {
    /// `ip:port`
    pub address: String,
    pub url: Url,
    pub sni: String,
    pub alpn: Vec<String>,
    pub selector: Option<PrioritySelector>,
    pub referer: String,
    pub follow_redirects: bool,
    pub depth: u32,
}

impl SecureFlow {
    pub fn start(self, ctx: &Arc<MeasurementContext>) {
        let id = ctx.idgen.new_id_for_endpoint_secure();
        let ctx = ctx.clone();
        ctx.tracker.clone().spawn(async move {
            match self.run(&ctx, id).await {
                Ok(()) => info!("[#{}] GET https://{} using {}: done", id, self.sni, self.address),
                Err(err) => info!("[#{}] GET https://{} using {}: {}", id, self.sni, self.address, err),
            }
        });
    }

    pub async fn run(&self, ctx: &Arc<MeasurementContext>, id: i64) -> Result<(), FlowError> {
        let endpoint = allowed_to_connect(&self.address)?;
        let conn = tcp_connect(ctx, id, endpoint).await?;

        let t0 = ctx.elapsed();
        let res = ctx
            .with_timeout(
                ctx.config.timeouts.tls_handshake(),
                ctx.netx.handshake_tls(conn, endpoint, &self.sni, &self.alpn),
            )
            .await;
        let t = ctx.elapsed();
        let outcome = res.as_ref().map(|(_, state)| state.clone()).map_err(Clone::clone);
        self.record_handshake(ctx, id, &outcome, t0, t);
        let (tls, state) = res?;

        let Some(selector) = &self.selector else {
            return Err(FlowError::NotPermittedToFetch);
        };
        if !selector.permission_to_fetch(&self.address).await {
            return Err(FlowError::NotPermittedToFetch);
        }

        let fetch = Fetch {
            id,
            address: &self.address,
            endpoint,
            url: &self.url,
            referer: &self.referer,
            alpn: &state.negotiated_protocol,
        };
        let location = fetch.run(ctx, tls).await?;
        if let (true, Some(location)) = (self.follow_redirects, location) {
            follow_redirect(ctx, location, &self.url, self.depth);
        }
        Ok(())
    }

    fn record_handshake(
        &self,
        ctx: &MeasurementContext,
        id: i64,
        res: &Result<TlsConnectionState, NetError>,
        t0: f64,
        t: f64,
    ) {
        let state = res.as_ref().ok().cloned().unwrap_or_default();
        let failure = res.as_ref().err().map(NetError::failure);
        match &failure {
            None => info!("[#{}] TLS handshake {} ({}) ok: {}", id, self.address, self.sni, state.tls_version),
            Some(f) => info!("[#{}] TLS handshake {} ({}) failed: {}", id, self.address, self.sni, f),
        }
        ctx.test_keys.append_tls_handshake(TlsHandshakeResult {
            network: "tcp".to_string(),
            address: self.address.clone(),
            cipher_suite: state.cipher_suite,
            failure,
            negotiated_protocol: state.negotiated_protocol,
            no_tls_verify: false,
            peer_certificates: state.peer_certificates.into_iter().map(BinaryData).collect(),
            server_name: self.sni.clone(),
            t0,
            t,
            tags: Vec::new(),
            tls_version: state.tls_version,
            transaction_id: id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dnscache::{DnsEntry, FLAG_UDP};
    use crate::netx::mock::MockNetx;
    use crate::resolvers::OpportunisticDoh;

    fn context(netx: MockNetx) -> Arc<MeasurementContext> {
        let config = Arc::new(Config::default());
        let doh = Arc::new(OpportunisticDoh::new(&config.resolvers));
        Arc::new(MeasurementContext::new(config, Arc::new(netx), doh))
    }

    fn flow(selector: Option<PrioritySelector>) -> SecureFlow {
        SecureFlow {
            address: "93.184.216.34:443".to_string(),
            url: Url::parse("https://www.example.com/").unwrap(),
            sni: "www.example.com".to_string(),
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            selector,
            referer: String::new(),
            follow_redirects: true,
            depth: 0,
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_stops_before_fetch() {
        let mut netx = MockNetx::new().with_page("https://www.example.com/", 200, &[], "ok");
        netx.tls_failures.insert("93.184.216.34:443".parse().unwrap(), NetError::ConnectionReset);
        let ctx = context(netx);
        let selector = PrioritySelector::new(&ctx, &[DnsEntry { addr: "93.184.216.34".into(), flags: FLAG_UDP }]);
        let res = flow(Some(selector)).run(&ctx, 50001).await;
        assert_eq!(res, Err(FlowError::Net(NetError::ConnectionReset)));

        let tk = ctx.test_keys.take();
        assert_eq!(tk.tls_handshakes.len(), 1);
        assert_eq!(tk.tls_handshakes[0].failure.as_deref(), Some("connection_reset"));
        assert_eq!(tk.tls_handshakes[0].server_name, "www.example.com");
        assert!(tk.requests.is_empty());
        assert!(tk.x_conn_priority_log.iter().all(|e| !e.msg.contains("granted")));
    }

    #[tokio::test]
    async fn test_without_selector_only_handshakes() {
        let netx = MockNetx::new().with_page("https://www.example.com/", 200, &[], "ok");
        let ctx = context(netx);
        assert_eq!(flow(None).run(&ctx, 50001).await, Err(FlowError::NotPermittedToFetch));
        let tk = ctx.test_keys.take();
        assert_eq!(tk.tls_handshakes[0].negotiated_protocol, "h2");
        assert_eq!(tk.tls_handshakes[0].peer_certificates.len(), 1);
        assert!(tk.requests.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_carries_alpn() {
        let netx = MockNetx::new().with_page("https://www.example.com/", 200, &[], "ok");
        let ctx = context(netx);
        let selector = PrioritySelector::new(&ctx, &[DnsEntry { addr: "93.184.216.34".into(), flags: FLAG_UDP }]);
        flow(Some(selector)).run(&ctx, 50001).await.unwrap();
        let tk = ctx.test_keys.take();
        assert_eq!(tk.requests[0].alpn, "h2");
        assert_eq!(tk.requests[0].transaction_id, 50001);
        assert_eq!(tk.requests[0].request.url, "https://www.example.com/");
    }

    #[tokio::test]
    async fn test_fetch_runs_over_the_handshaked_stream() {
        let netx = Arc::new(MockNetx::new().with_page("https://www.example.com/", 200, &[], "ok"));
        let config = Arc::new(Config::default());
        let doh = Arc::new(OpportunisticDoh::new(&config.resolvers));
        let ctx = Arc::new(MeasurementContext::new(config, netx.clone(), doh));
        let selector = PrioritySelector::new(&ctx, &[DnsEntry { addr: "93.184.216.34".into(), flags: FLAG_UDP }]);
        flow(Some(selector)).run(&ctx, 50001).await.unwrap();

        assert_eq!(netx.connects.lock().len(), 1);
        let fetches = netx.fetches.lock();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].0, "93.184.216.34:443");
        assert_eq!(fetches[0].1.alpn, "h2");
    }
}
