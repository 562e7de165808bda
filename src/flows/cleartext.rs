use std::sync::Arc;
use tracing::info;
use url::Url;

use super::{allowed_to_connect, follow_redirect, tcp_connect, Fetch, FlowError};
use crate::context::MeasurementContext;
use crate::priority::PrioritySelector;

/// TCP connect to one endpoint, then maybe fetch `url` over it in cleartext.
pub struct CleartextFlow {
    /// `ip:port`
    pub address: String,
    pub url: Url,
    pub selector: Option<PrioritySelector>,
    pub referer: String,
    pub follow_redirects: bool,
    pub depth: u32,
}

impl CleartextFlow {
    pub fn start(self, ctx: &Arc<MeasurementContext>) {
        let id = ctx.idgen.new_id_for_endpoint_cleartext();
        let ctx = ctx.clone();
        ctx.tracker.clone().spawn(async move {
            match self.run(&ctx, id).await {
                Ok(()) => info!("[#{}] GET {} using {}: done", id, self.url, self.address),
                Err(err) => info!("[#{}] GET {} using {}: {}", id, self.url, self.address, err),
            }
        });
    }

    pub async fn run(&self, ctx: &Arc<MeasurementContext>, id: i64) -> Result<(), FlowError> {
        let endpoint = allowed_to_connect(&self.address)?;
        let conn = tcp_connect(ctx, id, endpoint).await?;

        let granted = match &self.selector {
            Some(selector) => selector.permission_to_fetch(&self.address).await,
            None => false,
        };
        if !granted {
            return Err(FlowError::NotPermittedToFetch);
        }

        let fetch = Fetch {
            id,
            address: &self.address,
            endpoint,
            url: &self.url,
            referer: &self.referer,
            alpn: "",
        };
        let location = fetch.run(ctx, conn).await?;
        if let (true, Some(location)) = (self.follow_redirects, location) {
            follow_redirect(ctx, location, &self.url, self.depth);
        }
        Ok(())
    }
}
