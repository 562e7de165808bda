use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::analysis;
use crate::config::Config;
use crate::context::MeasurementContext;
use crate::netx::Netx;
use crate::resolvers::{DnsResolvers, OpportunisticDoh};
use crate::testkeys::{SummaryKeys, TestKeys};

pub const TEST_NAME: &str = "web_connectivity";
pub const TEST_VERSION: &str = "0.5.28";

/// Problems that make a measurement worthless; nothing is submitted.
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("webconnectivity: input is not an URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("webconnectivity: input is not an URL with http or https scheme: {0}")]
    UnsupportedScheme(String),
    #[error("webconnectivity: input URL has no host")]
    MissingHost,
    #[error("webconnectivity: no configured test helpers")]
    NoTestHelpers,
    #[error("webconnectivity: fundamental failure: {0}")]
    Fundamental(String),
}

#[derive(Debug, Serialize)]
pub struct Measurement {
    pub input: String,
    pub measurement_start_time: String,
    pub test_name: &'static str,
    pub test_runtime: f64,
    pub test_version: &'static str,
    pub test_keys: TestKeys,
}

/// Measures URLs one at a time.
///
/// The DoH pacing state lives here so that it spans measurements.
pub struct Measurer {
    config: Arc<Config>,
    netx: Arc<dyn Netx>,
    doh: Arc<OpportunisticDoh>,
}

impl Measurer {
    pub fn new(config: Arc<Config>, netx: Arc<dyn Netx>) -> Self {
        let doh = Arc::new(OpportunisticDoh::new(&config.resolvers));
        Self { config, netx, doh }
    }

    pub async fn run(&self, input: &str) -> Result<(Measurement, SummaryKeys), MeasurementError> {
        let url = Url::parse(input)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MeasurementError::UnsupportedScheme(url.scheme().to_string()));
        }
        if self.config.control.urls.is_empty() {
            return Err(MeasurementError::NoTestHelpers);
        }
        let round = DnsResolvers::new(url, String::new(), 0, true).ok_or(MeasurementError::MissingHost)?;

        let start_time = Utc::now();
        let ctx = Arc::new(MeasurementContext::new(
            self.config.clone(),
            self.netx.clone(),
            self.doh.clone(),
        ));
        info!("🌐 measuring {}", input);
        round.start(&ctx);

        ctx.tracker.close();
        let deadline = Duration::from_secs(self.config.measurement.max_runtime_secs);
        if tokio::time::timeout(deadline, ctx.tracker.wait()).await.is_err() {
            warn!("⏰ measurement of {} hit the {:?} deadline", input, deadline);
            ctx.cancel.cancel();
            ctx.tracker.wait().await;
        }
        // stops the priority arbiters still waiting for requests
        ctx.cancel.cancel();
        let test_runtime = ctx.elapsed();

        let mut test_keys = ctx.test_keys.take();
        if let Some(failure) = test_keys.fundamental_failure.take() {
            return Err(MeasurementError::Fundamental(failure));
        }
        analysis::analyze(&mut test_keys);
        let summary = SummaryKeys::from_test_keys(&test_keys);

        let measurement = Measurement {
            input: input.to_string(),
            measurement_start_time: start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            test_name: TEST_NAME,
            test_runtime,
            test_version: TEST_VERSION,
            test_keys,
        };
        Ok((measurement, summary))
    }
}
