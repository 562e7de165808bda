use tracing::warn;

use super::container::WebObservationsContainer;
use super::FLAG_TLS_BLOCKING;
use crate::testkeys::TestKeys;

/// Handshakes that failed for us while the test helper completed them with the same SNI.
pub fn analyze(tk: &mut TestKeys, container: &WebObservationsContainer) {
    for obs in container.known_tcp_endpoints.values() {
        let Some(failure) = obs.tls_handshake_failure.failure() else {
            continue;
        };
        if !obs.control_tls_handshake_failure.is_success() {
            continue;
        }
        warn!(
            "TLS: unexpected failure {} for {} (see #{})",
            failure,
            obs.endpoint_address.as_deref().unwrap_or_default(),
            obs.endpoint_transaction_id.unwrap_or_default()
        );
        tk.x_blocking_flags |= FLAG_TLS_BLOCKING;
    }
}
