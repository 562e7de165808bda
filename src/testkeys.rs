use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::archival::{
    ConnPriorityLogEntry, DnsLookupResult, HttpRequestResult, TcpConnectResult, TlsHandshakeResult,
};
use crate::control::{ThRequest, ThResponse};

/// Top-level blocking verdict.
///
/// Serialized the way existing consumers expect it: a string naming the
/// blocking method, `false` when the website is not blocked, `null` when
/// the measurement is inconclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingVerdict {
    Dns,
    TcpIp,
    HttpFailure,
    HttpDiff,
    /// Not blocked, website down
    Down,
    /// Not blocked, website reachable
    Accessible,
    #[default]
    Unknown,
}

impl BlockingVerdict {
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            BlockingVerdict::Dns => Some("dns"),
            BlockingVerdict::TcpIp => Some("tcp_ip"),
            BlockingVerdict::HttpFailure => Some("http-failure"),
            BlockingVerdict::HttpDiff => Some("http-diff"),
            _ => None,
        }
    }
}

impl Serialize for BlockingVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockingVerdict::Down | BlockingVerdict::Accessible => serializer.serialize_bool(false),
            BlockingVerdict::Unknown => serializer.serialize_none(),
            other => serializer.serialize_str(other.as_str().unwrap_or_default()),
        }
    }
}

/// Every observation of one measurement plus what the analysis derived from them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestKeys {
    pub queries: Vec<DnsLookupResult>,
    pub tcp_connect: Vec<TcpConnectResult>,
    pub tls_handshakes: Vec<TlsHandshakeResult>,
    pub requests: Vec<HttpRequestResult>,
    pub x_conn_priority_log: Vec<ConnPriorityLogEntry>,

    pub control_failure: Option<String>,
    pub control_request: Option<ThRequest>,
    pub control: Option<ThResponse>,

    pub dns_experiment_failure: Option<String>,
    pub dns_consistency: Option<String>,
    pub http_experiment_failure: Option<String>,

    pub body_length_match: Option<bool>,
    pub body_proportion: Option<f64>,
    pub status_code_match: Option<bool>,
    pub headers_match: Option<bool>,
    pub title_match: Option<bool>,

    pub x_dns_flags: i64,
    pub x_blocking_flags: i64,
    pub x_null_null_flags: i64,

    pub blocking: BlockingVerdict,
    pub accessible: Option<bool>,

    #[serde(skip)]
    pub fundamental_failure: Option<String>,
}

/// Test keys shared by every task of a running measurement
#[derive(Debug, Default)]
pub struct SharedTestKeys {
    inner: Mutex<TestKeys>,
}

impl SharedTestKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_queries(&self, queries: Vec<DnsLookupResult>) {
        self.inner.lock().queries.extend(queries);
    }

    pub fn append_tcp_connect(&self, result: TcpConnectResult) {
        self.inner.lock().tcp_connect.push(result);
    }

    pub fn append_tls_handshake(&self, result: TlsHandshakeResult) {
        self.inner.lock().tls_handshakes.push(result);
    }

    /// Newest first, so that `requests[0]` is the end of the redirect chain
    pub fn prepend_request(&self, result: HttpRequestResult) {
        self.inner.lock().requests.insert(0, result);
    }

    pub fn append_conn_priority_log(&self, entry: ConnPriorityLogEntry) {
        self.inner.lock().x_conn_priority_log.push(entry);
    }

    pub fn set_control_request(&self, request: ThRequest) {
        self.inner.lock().control_request = Some(request);
    }

    pub fn set_control(&self, response: ThResponse) {
        self.inner.lock().control = Some(response);
    }

    pub fn set_control_failure(&self, failure: String) {
        self.inner.lock().control_failure = Some(failure);
    }

    pub fn set_fundamental_failure(&self, failure: String) {
        self.inner.lock().fundamental_failure = Some(failure);
    }

    /// Moves the collected observations out; only called once all tasks are done.
    pub fn take(&self) -> TestKeys {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Keys surfaced to the user interface
#[derive(Debug, Clone, Serialize)]
pub struct SummaryKeys {
    pub accessible: Option<bool>,
    pub blocking: BlockingVerdict,
    pub is_anomaly: bool,
}

impl SummaryKeys {
    pub fn from_test_keys(tk: &TestKeys) -> Self {
        Self {
            accessible: tk.accessible,
            blocking: tk.blocking,
            is_anomaly: tk.blocking.as_str().is_some(),
        }
    }
}
