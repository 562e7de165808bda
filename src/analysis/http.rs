use tracing::{info, warn};

use super::container::{Outcome, WebObservationsContainer};
use super::{httpdiff, FLAG_HTTP_BLOCKING};
use crate::failure::{CONNECTION_RESET, EOF_ERROR, GENERIC_TIMEOUT_ERROR};
use crate::testkeys::TestKeys;

/// Failures that are typical of interference with the request itself
const BLOCKING_FAILURES: [&str; 3] = [CONNECTION_RESET, GENERIC_TIMEOUT_ERROR, EOF_ERROR];

/// Looks at the final request of the redirect chain only.
pub fn analyze(tk: &mut TestKeys, container: &WebObservationsContainer) {
    if tk.control_request.is_none() {
        return;
    }
    let Some(control) = tk.control.as_ref().map(|c| c.http_request.clone()) else {
        return;
    };
    let Some(probe) = tk.requests.first().cloned() else {
        return;
    };
    tk.http_experiment_failure = probe.failure.clone();

    let Some(obs) = container.known_tcp_endpoints.get(&probe.transaction_id) else {
        return;
    };
    if !obs.control_http_failure.is_success() {
        info!("HTTP: the control request failed as well");
        return;
    }

    match &obs.http_failure {
        Outcome::Failure(failure) if BLOCKING_FAILURES.contains(&failure.as_str()) => {
            warn!("HTTP: unexpected failure {} for #{}", failure, probe.transaction_id);
            tk.x_blocking_flags |= FLAG_HTTP_BLOCKING;
        }
        Outcome::Failure(failure) => {
            info!("HTTP: failure {} for #{} is not conclusive", failure, probe.transaction_id);
        }
        Outcome::Success => httpdiff::analyze(tk, &probe, &control),
        Outcome::Unknown => {}
    }
}
