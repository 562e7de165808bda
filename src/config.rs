use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub resolvers: ResolverConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeasurementConfig {
    /// Total redirects allowed across every flow of one measurement
    #[serde(default = "default_max_redirects")]
    pub max_redirects: i64,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// Overall deadline for a single URL, redirects included
    #[serde(default = "default_max_runtime")]
    pub max_runtime_secs: u64,
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    #[serde(default = "default_udp_address")]
    pub udp_address: String,
    #[serde(default = "default_dns_timeout_ms")]
    pub system_timeout_ms: u64,
    #[serde(default = "default_dns_timeout_ms")]
    pub udp_timeout_ms: u64,
    #[serde(default = "default_dns_timeout_ms")]
    pub doh_timeout_ms: u64,
    #[serde(default = "default_doh_urls")]
    pub doh_urls: Vec<String>,
    /// DoH is used again only after min + rand(jitter) seconds
    #[serde(default = "default_doh_min_interval")]
    pub doh_min_interval_secs: u64,
    #[serde(default = "default_doh_jitter")]
    pub doh_jitter_secs: u64,
}

/// Connection priority arbitration knobs.
///
/// 経験的に決められた値なので設定で変えられるようにしておく。
#[derive(Debug, Deserialize, Clone)]
pub struct PriorityConfig {
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_extra_wait_ms")]
    pub extra_wait_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub tcp_connect_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub tls_handshake_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub http_round_trip_ms: u64,
    #[serde(default = "default_test_helper_timeout_ms")]
    pub test_helper_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept")]
    pub accept: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Test helpers, tried in order until one answers
    #[serde(default = "default_test_helpers")]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            follow_redirects: true,
            max_runtime_secs: default_max_runtime(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            udp_address: default_udp_address(),
            system_timeout_ms: default_dns_timeout_ms(),
            udp_timeout_ms: default_dns_timeout_ms(),
            doh_timeout_ms: default_dns_timeout_ms(),
            doh_urls: default_doh_urls(),
            doh_min_interval_secs: default_doh_min_interval(),
            doh_jitter_secs: default_doh_jitter(),
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            extra_wait_ms: default_extra_wait_ms(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tcp_connect_ms: default_step_timeout_ms(),
            tls_handshake_ms: default_step_timeout_ms(),
            http_round_trip_ms: default_step_timeout_ms(),
            test_helper_ms: default_test_helper_timeout_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept: default_accept(),
            accept_language: default_accept_language(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { urls: default_test_helpers() }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: default_log_filter(), json: false }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_redirects() -> i64 { 20 }
fn default_max_runtime() -> u64 { 60 }
fn default_max_body() -> usize { 1 << 19 }
fn default_udp_address() -> String { "8.8.4.4:53".to_string() }
fn default_dns_timeout_ms() -> u64 { 4000 }
fn default_doh_min_interval() -> u64 { 20 }
fn default_doh_jitter() -> u64 { 20 }
fn default_enqueue_timeout_ms() -> u64 { 10 }
fn default_response_timeout_ms() -> u64 { 1000 }
fn default_extra_wait_ms() -> u64 { 500 }
fn default_step_timeout_ms() -> u64 { 10_000 }
fn default_test_helper_timeout_ms() -> u64 { 30_000 }
fn default_log_filter() -> String { "ooni_webconn=info".to_string() }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36".to_string()
}
fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string()
}
fn default_accept_language() -> String { "en-US,en;q=0.9".to_string() }
fn default_doh_urls() -> Vec<String> {
    vec![
        "https://mozilla.cloudflare-dns.com/dns-query".to_string(),
        "https://dns.nextdns.io/dns-query".to_string(),
        "https://dns.google/dns-query".to_string(),
        "https://dns.quad9.net/dns-query".to_string(),
    ]
}
fn default_test_helpers() -> Vec<String> {
    vec![
        "https://0.th.ooni.org/".to_string(),
        "https://1.th.ooni.org/".to_string(),
        "https://2.th.ooni.org/".to_string(),
        "https://3.th.ooni.org/".to_string(),
        "https://d33d1gs9kpq1c5.cloudfront.net/".to_string(),
    ]
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?;
        Ok(config)
    }
}

impl PriorityConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn extra_wait(&self) -> Duration {
        Duration::from_millis(self.extra_wait_ms)
    }
}

impl TimeoutConfig {
    pub fn tcp_connect(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_ms)
    }

    pub fn tls_handshake(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_ms)
    }

    pub fn http_round_trip(&self) -> Duration {
        Duration::from_millis(self.http_round_trip_ms)
    }

    pub fn test_helper(&self) -> Duration {
        Duration::from_millis(self.test_helper_ms)
    }
}
