use reqwest::cookie::Jar;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dnscache::DnsCache;
use crate::failure::NetError;
use crate::idgen::IdGenerator;
use crate::netx::Netx;
use crate::redirects::NumRedirects;
use crate::resolvers::OpportunisticDoh;
use crate::testkeys::SharedTestKeys;

/// Everything the tasks of one measurement share.
///
/// Every task is spawned on `tracker`, so waiting on the tracker is waiting
/// for the whole measurement. `cancel` fires when the overall deadline expires.
pub struct MeasurementContext {
    pub config: Arc<Config>,
    pub netx: Arc<dyn Netx>,
    pub test_keys: SharedTestKeys,
    pub idgen: IdGenerator,
    pub dns_cache: DnsCache,
    pub num_redirects: NumRedirects,
    pub cookies: Arc<Jar>,
    pub doh: Arc<OpportunisticDoh>,
    pub tracker: TaskTracker,
    pub cancel: CancellationToken,
    zero_time: Instant,
}

impl MeasurementContext {
    pub fn new(config: Arc<Config>, netx: Arc<dyn Netx>, doh: Arc<OpportunisticDoh>) -> Self {
        let num_redirects = NumRedirects::new(config.measurement.max_redirects);
        Self {
            config,
            netx,
            test_keys: SharedTestKeys::new(),
            idgen: IdGenerator::new(),
            dns_cache: DnsCache::new(),
            num_redirects,
            cookies: Arc::new(Jar::default()),
            doh,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            zero_time: Instant::now(),
        }
    }

    /// Seconds since the measurement started
    pub fn elapsed(&self) -> f64 {
        self.zero_time.elapsed().as_secs_f64()
    }

    /// Bounds one network operation by `limit` and by the measurement deadline.
    pub async fn with_timeout<T, F>(&self, limit: Duration, fut: F) -> Result<T, NetError>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(NetError::Timeout),
            res = tokio::time::timeout(limit, fut) => res.unwrap_or(Err(NetError::Timeout)),
        }
    }
}
