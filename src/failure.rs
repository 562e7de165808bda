use std::error::Error as StdError;
use std::io;
use thiserror::Error;
use tokio_rustls::rustls;

/// OONI failure strings compared by the analysis engine.
pub const CONNECTION_RESET: &str = "connection_reset";
pub const DNS_NXDOMAIN_ERROR: &str = "dns_nxdomain_error";
pub const DNS_NAME_ERROR: &str = "dns_name_error";
pub const DNS_NO_ANSWER: &str = "dns_no_answer";
pub const EOF_ERROR: &str = "eof_error";
pub const GENERIC_TIMEOUT_ERROR: &str = "generic_timeout_error";

/// A network failure, already mapped onto the OONI vocabulary.
///
/// `Display` yields exactly the failure string stored in archival records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("connection_refused")]
    ConnectionRefused,
    #[error("connection_reset")]
    ConnectionReset,
    #[error("host_unreachable")]
    HostUnreachable,
    #[error("generic_timeout_error")]
    Timeout,
    #[error("eof_error")]
    Eof,
    #[error("interrupted")]
    Interrupted,
    #[error("dns_nxdomain_error")]
    DnsNxdomain,
    #[error("dns_no_answer")]
    DnsNoAnswer,
    #[error("dns_refused_error")]
    DnsRefused,
    #[error("dns_servfail_error")]
    DnsServfail,
    #[error("ssl_failed_handshake")]
    SslFailedHandshake,
    #[error("ssl_invalid_hostname")]
    SslInvalidHostname,
    #[error("ssl_unknown_authority")]
    SslUnknownAuthority,
    #[error("ssl_invalid_certificate")]
    SslInvalidCertificate,
    #[error("json_parse_error")]
    JsonParse,
    #[error("http_invalid_redirect_location_host")]
    HttpInvalidRedirectLocationHost,
    #[error("http_request_failed")]
    HttpRequestFailed,
    #[error("unknown_failure: {0}")]
    Unknown(String),
}

impl NetError {
    /// The string stored in `failure` fields
    pub fn failure(&self) -> String {
        self.to_string()
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        classify_io_error(&err)
    }
}

pub fn classify_io_error(err: &io::Error) -> NetError {
    use io::ErrorKind::*;
    match err.kind() {
        ConnectionRefused => NetError::ConnectionRefused,
        ConnectionReset | ConnectionAborted | BrokenPipe => NetError::ConnectionReset,
        HostUnreachable | NetworkUnreachable => NetError::HostUnreachable,
        TimedOut => NetError::Timeout,
        UnexpectedEof => NetError::Eof,
        Interrupted => NetError::Interrupted,
        _ => match err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
            Some(tls) => classify_rustls_error(tls),
            None => NetError::Unknown(err.to_string()),
        },
    }
}

/// Errors returned by a TLS handshake are wrapped in io::Error by tokio-rustls.
pub fn classify_tls_error(err: &io::Error) -> NetError {
    if let Some(tls) = err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        return classify_rustls_error(tls);
    }
    match classify_io_error(err) {
        NetError::Unknown(_) => NetError::SslFailedHandshake,
        other => other,
    }
}

pub fn classify_rustls_error(err: &rustls::Error) -> NetError {
    use rustls::CertificateError;
    match err {
        rustls::Error::InvalidCertificate(CertificateError::NotValidForName) => {
            NetError::SslInvalidHostname
        }
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => {
            NetError::SslUnknownAuthority
        }
        rustls::Error::InvalidCertificate(_) => NetError::SslInvalidCertificate,
        _ => NetError::SslFailedHandshake,
    }
}

/// Walks a source chain looking for something we know.
fn classify_source_chain(mut source: Option<&(dyn StdError + 'static)>) -> Option<NetError> {
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(classify_io_error(io_err));
        }
        if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
            return Some(classify_rustls_error(tls));
        }
        if inner.to_string().contains("connection closed before message completed") {
            return Some(NetError::Eof);
        }
        source = inner.source();
    }
    None
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> NetError {
    if err.is_timeout() {
        return NetError::Timeout;
    }
    if let Some(known) = classify_source_chain(err.source()) {
        return known;
    }
    if err.is_decode() {
        return NetError::JsonParse;
    }
    NetError::Unknown(err.to_string())
}

/// Errors of an HTTP exchange running over an already measured connection
pub fn classify_hyper_error(err: &hyper::Error) -> NetError {
    if err.is_timeout() {
        return NetError::Timeout;
    }
    if let Some(known) = classify_source_chain(err.source()) {
        return known;
    }
    if err.is_incomplete_message() {
        return NetError::Eof;
    }
    NetError::Unknown(err.to_string())
}
