use std::sync::atomic::{AtomicI64, Ordering};

/// Transaction ID generator.
///
/// Each operation category owns a counter biased by its own offset, so a bare
/// ID tells which kind of operation produced it.
#[derive(Debug, Default)]
pub struct IdGenerator {
    getaddrinfo: AtomicI64,
    dns_over_udp: AtomicI64,
    dns_over_https: AtomicI64,
    endpoint_cleartext: AtomicI64,
    endpoint_secure: AtomicI64,
}

const OFFSET_GETADDRINFO: i64 = 10_000;
const OFFSET_DNS_OVER_UDP: i64 = 20_000;
const OFFSET_DNS_OVER_HTTPS: i64 = 30_000;
const OFFSET_ENDPOINT_CLEARTEXT: i64 = 40_000;
const OFFSET_ENDPOINT_SECURE: i64 = 50_000;

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_id_for_getaddrinfo(&self) -> i64 {
        self.getaddrinfo.fetch_add(1, Ordering::SeqCst) + 1 + OFFSET_GETADDRINFO
    }

    pub fn new_id_for_dns_over_udp(&self) -> i64 {
        self.dns_over_udp.fetch_add(1, Ordering::SeqCst) + 1 + OFFSET_DNS_OVER_UDP
    }

    pub fn new_id_for_dns_over_https(&self) -> i64 {
        self.dns_over_https.fetch_add(1, Ordering::SeqCst) + 1 + OFFSET_DNS_OVER_HTTPS
    }

    pub fn new_id_for_endpoint_cleartext(&self) -> i64 {
        self.endpoint_cleartext.fetch_add(1, Ordering::SeqCst) + 1 + OFFSET_ENDPOINT_CLEARTEXT
    }

    pub fn new_id_for_endpoint_secure(&self) -> i64 {
        self.endpoint_secure.fetch_add(1, Ordering::SeqCst) + 1 + OFFSET_ENDPOINT_SECURE
    }
}
