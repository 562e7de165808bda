use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::archival::{join_host_port, BinaryData, DnsAnswer, DnsLookupResult};
use crate::config::ResolverConfig;
use crate::context::MeasurementContext;
use crate::control::Control;
use crate::dns::packet::{build_query, lookup_answers, parse_response};
use crate::dns::types::RecordType;
use crate::dnscache::{DnsEntry, FLAG_HTTPS, FLAG_SYSTEM_RESOLVER, FLAG_UDP};
use crate::failure::NetError;
use crate::flows::cleartext::CleartextFlow;
use crate::flows::secure::SecureFlow;
use crate::priority::PrioritySelector;

/// Picks, now and then, one DoH service to query alongside the other resolvers.
///
/// Shared by every measurement run by the same measurer, so DoH traffic stays
/// occasional: after a use, the next one is allowed only once a randomised
/// interval has elapsed.
pub struct OpportunisticDoh {
    state: Mutex<DohState>,
    min_interval: u64,
    jitter: u64,
}

struct DohState {
    last: Option<Instant>,
    interval: Duration,
    urls: Vec<String>,
}

impl OpportunisticDoh {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            state: Mutex::new(DohState {
                last: None,
                interval: Duration::ZERO,
                urls: config.doh_urls.clone(),
            }),
            min_interval: config.doh_min_interval_secs,
            jitter: config.doh_jitter_secs,
        }
    }

    pub fn maybe_next_url(&self) -> Option<String> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.urls.is_empty() {
            return None;
        }
        let due = match state.last {
            None => true,
            Some(last) => now.duration_since(last) > state.interval,
        };
        if !due {
            return None;
        }
        let mut rng = rand::thread_rng();
        state.urls.shuffle(&mut rng);
        let jitter = if self.jitter > 0 { rng.gen_range(0..self.jitter) } else { 0 };
        state.last = Some(now);
        state.interval = Duration::from_secs(self.min_interval + jitter);
        state.urls.first().cloned()
    }
}

enum Transport {
    Udp(String),
    Https(String),
}

impl Transport {
    fn engine(&self) -> &'static str {
        match self {
            Transport::Udp(_) => "udp",
            Transport::Https(_) => "doh",
        }
    }

    fn address(&self) -> &str {
        match self {
            Transport::Udp(addr) | Transport::Https(addr) => addr,
        }
    }
}

/// One fetch round: resolve the domain of `url`, then start one flow per
/// address and scheme. The first round also runs the control.
pub struct DnsResolvers {
    pub domain: String,
    pub url: Url,
    pub referer: String,
    pub depth: u32,
    pub with_control: bool,
}

impl DnsResolvers {
    /// `None` when the URL has no host to resolve
    pub fn new(url: Url, referer: String, depth: u32, with_control: bool) -> Option<Self> {
        let domain = match url.host()? {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        if domain.is_empty() {
            return None;
        }
        Some(Self { domain, url, referer, depth, with_control })
    }

    pub fn start(self, ctx: &Arc<MeasurementContext>) {
        let ctx = ctx.clone();
        let round = Arc::new(self);
        ctx.tracker.clone().spawn(async move { round.run(ctx).await });
    }

    async fn run(self: Arc<Self>, ctx: Arc<MeasurementContext>) {
        let addresses = match ctx.dns_cache.get(&self.domain) {
            Some(cached) => {
                info!("📦 using previously-cached addrs for {}: {:?}", self.domain, cached);
                cached
            }
            None => {
                let resolved = self.lookup(&ctx).await;
                ctx.dns_cache.set(&self.domain, resolved.clone());
                info!("🔍 using resolved addrs for {}: {:?}", self.domain, resolved);
                resolved
            }
        };

        let selector = PrioritySelector::new(&ctx, &addresses);
        self.start_cleartext_flows(&ctx, Some(selector.clone()), &addresses);
        self.start_secure_flows(&ctx, Some(selector.clone()), &addresses);

        if self.with_control {
            Control {
                addresses,
                url: self.url.clone(),
                round: self.clone(),
                selector: Some(selector),
            }
            .start(&ctx);
        }
    }

    async fn lookup(&self, ctx: &MeasurementContext) -> Vec<DnsEntry> {
        if self.domain.parse::<IpAddr>().is_ok() {
            return vec![DnsEntry { addr: self.domain.clone(), flags: 0 }];
        }

        let (system, udp, https) = tokio::join!(
            self.lookup_system(ctx),
            self.lookup_udp(ctx),
            self.lookup_doh(ctx),
        );

        // bogons are kept: connecting to them may reveal a block page
        let mut merged: Vec<DnsEntry> = Vec::new();
        for (addrs, flag) in [(system, FLAG_SYSTEM_RESOLVER), (udp, FLAG_UDP), (https, FLAG_HTTPS)] {
            for addr in addrs {
                match merged.iter_mut().find(|e| e.addr == addr) {
                    Some(entry) => entry.flags |= flag,
                    None => merged.push(DnsEntry { addr, flags: flag }),
                }
            }
        }
        merged
    }

    async fn lookup_system(&self, ctx: &MeasurementContext) -> Vec<String> {
        let id = ctx.idgen.new_id_for_getaddrinfo();
        info!("[#{}] lookup {} using system", id, self.domain);
        let limit = Duration::from_millis(ctx.config.resolvers.system_timeout_ms);
        let t0 = ctx.elapsed();
        let res = ctx.with_timeout(limit, ctx.netx.lookup_host(&self.domain)).await;
        let t = ctx.elapsed();

        let (answers, failure, addrs) = match res {
            Ok(ips) => (
                ips.iter().map(|ip| DnsAnswer::from_ip(*ip, None)).collect(),
                None,
                ips.iter().map(|ip| ip.to_string()).collect(),
            ),
            Err(err) => {
                warn!("[#{}] lookup {} using system failed: {}", id, self.domain, err);
                (Vec::new(), Some(err.failure()), Vec::new())
            }
        };
        ctx.test_keys.append_queries(vec![DnsLookupResult {
            answers,
            engine: "getaddrinfo".to_string(),
            failure,
            hostname: self.domain.clone(),
            query_type: "ANY".to_string(),
            raw_response: None,
            rcode: None,
            resolver_address: String::new(),
            t0,
            t,
            tags: Vec::new(),
            transaction_id: id,
        }]);
        addrs
    }

    async fn lookup_udp(&self, ctx: &MeasurementContext) -> Vec<String> {
        let id = ctx.idgen.new_id_for_dns_over_udp();
        let transport = Transport::Udp(ctx.config.resolvers.udp_address.clone());
        let limit = Duration::from_millis(ctx.config.resolvers.udp_timeout_ms);
        self.lookup_parallel(ctx, id, &transport, limit).await
    }

    async fn lookup_doh(&self, ctx: &MeasurementContext) -> Vec<String> {
        let Some(url) = ctx.doh.maybe_next_url() else {
            return Vec::new();
        };
        let id = ctx.idgen.new_id_for_dns_over_https();
        let limit = Duration::from_millis(ctx.config.resolvers.doh_timeout_ms);
        self.lookup_parallel(ctx, id, &Transport::Https(url), limit).await
    }

    /// A and AAAA in parallel under one transaction ID
    async fn lookup_parallel(
        &self,
        ctx: &MeasurementContext,
        id: i64,
        transport: &Transport,
        limit: Duration,
    ) -> Vec<String> {
        info!("[#{}] lookup {} using {}", id, self.domain, transport.address());
        let (a, aaaa) = tokio::join!(
            self.query(ctx, id, transport, RecordType::A, limit),
            self.query(ctx, id, transport, RecordType::AAAA, limit),
        );
        let addrs: Vec<String> = a
            .addresses()
            .chain(aaaa.addresses())
            .map(str::to_string)
            .collect();
        if addrs.is_empty() {
            warn!(
                "[#{}] lookup {} using {} failed: {:?}",
                id,
                self.domain,
                transport.address(),
                a.failure.as_deref().or(aaaa.failure.as_deref())
            );
        }
        ctx.test_keys.append_queries(vec![a, aaaa]);
        addrs
    }

    async fn query(
        &self,
        ctx: &MeasurementContext,
        id: i64,
        transport: &Transport,
        qtype: RecordType,
        limit: Duration,
    ) -> DnsLookupResult {
        let query_id: u16 = rand::random();
        let t0 = ctx.elapsed();
        let exchange = async {
            let query = build_query(query_id, &self.domain, qtype)?;
            let raw = match transport {
                Transport::Udp(server) => ctx.netx.exchange_udp(server, &query).await?,
                Transport::Https(url) => ctx.netx.exchange_https(url, &query).await?,
            };
            let packet = parse_response(&raw, query_id)?;
            debug!("[#{}] {} response {}", id, transport.engine(), packet);
            let answers = lookup_answers(&packet, qtype);
            Ok::<_, NetError>((raw, packet.header.rcode, answers))
        };
        let res = ctx.with_timeout(limit, exchange).await;
        let t = ctx.elapsed();

        let mut result = DnsLookupResult {
            answers: Vec::new(),
            engine: transport.engine().to_string(),
            failure: None,
            hostname: self.domain.clone(),
            query_type: qtype.name(),
            raw_response: None,
            rcode: None,
            resolver_address: transport.address().to_string(),
            t0,
            t,
            tags: Vec::new(),
            transaction_id: id,
        };
        match res {
            Ok((raw, rcode, answers)) => {
                result.raw_response = Some(BinaryData(raw));
                result.rcode = Some(rcode.to_u8() as i64);
                match answers {
                    Ok(answers) => result.answers = answers,
                    Err(err) => result.failure = Some(err.failure()),
                }
            }
            Err(err) => result.failure = Some(err.failure()),
        }
        result
    }

    pub fn start_cleartext_flows(
        &self,
        ctx: &Arc<MeasurementContext>,
        selector: Option<PrioritySelector>,
        addresses: &[DnsEntry],
    ) {
        if self.url.scheme() != "http" {
            // an https URL is fetched by the secure flows only
            return;
        }
        let port = self.url.port().unwrap_or(80);
        for entry in addresses {
            CleartextFlow {
                address: join_host_port(&entry.addr, port),
                url: self.url.clone(),
                selector: selector.clone(),
                referer: self.referer.clone(),
                follow_redirects: ctx.config.measurement.follow_redirects,
                depth: self.depth,
            }
            .start(ctx);
        }
    }

    pub fn start_secure_flows(
        &self,
        ctx: &Arc<MeasurementContext>,
        selector: Option<PrioritySelector>,
        addresses: &[DnsEntry],
    ) {
        let https = self.url.scheme() == "https";
        // an http URL is fetched in cleartext; secure flows only gather TLS data
        let selector = if https { selector } else { None };
        let port = match self.url.port() {
            // no way to guess the https port of http://example.com:8080/
            Some(_) if !https => return,
            Some(port) => port,
            None => 443,
        };
        let sni = self.url.host_str().unwrap_or_default().trim_matches(|c| c == '[' || c == ']');
        for entry in addresses {
            SecureFlow {
                address: join_host_port(&entry.addr, port),
                url: self.url.clone(),
                sni: sni.to_string(),
                alpn: vec!["h2".to_string(), "http/1.1".to_string()],
                selector: selector.clone(),
                referer: self.referer.clone(),
                follow_redirects: https && ctx.config.measurement.follow_redirects,
                depth: self.depth,
            }
            .start(ctx);
        }
    }
}
