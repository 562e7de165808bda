//! Decides which ready connection fetches the webpage.
//!
//! Only one connection per fetch round (URL + redirect depth) may perform the
//! HTTP round trip. Addresses found by the system resolver win over those found
//! by the UDP resolver, which win over DoH, which win over addresses only the
//! test helper knew about. Every other connection stops after TCP/TLS.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archival::ConnPriorityLogEntry;
use crate::context::MeasurementContext;
use crate::dnscache::{DnsEntry, FLAG_HTTPS, FLAG_SYSTEM_RESOLVER, FLAG_UDP};

struct PriorityRequest {
    addr: String,
    resp: oneshot::Sender<bool>,
}

/// Handle used by the flows of one fetch round
#[derive(Clone)]
pub struct PrioritySelector {
    tx: mpsc::Sender<PriorityRequest>,
    ctx: Arc<MeasurementContext>,
}

/// State owned by the background arbitration task
struct Arbiter {
    rx: mpsc::Receiver<PriorityRequest>,
    flags: HashMap<String, i64>,
    nsystem: usize,
    nudp: usize,
    nhttps: usize,
    extra_wait: Duration,
}

impl PrioritySelector {
    /// Snapshots the known addresses and starts the arbitration task.
    pub fn new(ctx: &Arc<MeasurementContext>, addrs: &[DnsEntry]) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let selector = Self { tx, ctx: ctx.clone() };
        selector.log(format!("create with {:?}", addrs));

        let mut arbiter = Arbiter {
            rx,
            flags: HashMap::new(),
            nsystem: 0,
            nudp: 0,
            nhttps: 0,
            extra_wait: ctx.config.priority.extra_wait(),
        };
        for entry in addrs {
            arbiter.flags.insert(entry.addr.clone(), entry.flags);
            if entry.flags & FLAG_SYSTEM_RESOLVER != 0 {
                arbiter.nsystem += 1;
            }
            if entry.flags & FLAG_UDP != 0 {
                arbiter.nudp += 1;
            }
            if entry.flags & FLAG_HTTPS != 0 {
                arbiter.nhttps += 1;
            }
        }

        // not tracked: the measurement cancels it once every flow is done
        tokio::spawn(arbiter.run(ctx.cancel.clone()));
        selector
    }

    fn log(&self, msg: String) {
        info!("prioritySelector: {}", msg);
        self.ctx.test_keys.append_conn_priority_log(ConnPriorityLogEntry {
            msg,
            t: self.ctx.elapsed(),
        });
    }

    /// Whether the connection using `address` (ip:port) may fetch the webpage.
    ///
    /// Timeouts talking to the arbiter count as a denial.
    pub async fn permission_to_fetch(&self, address: &str) -> bool {
        let ip = match address.parse::<SocketAddr>() {
            Ok(sockaddr) => sockaddr.ip().to_string(),
            Err(_) => {
                self.log(format!("conn {}: denied permission: not an endpoint", address));
                return false;
            }
        };
        let priority = &self.ctx.config.priority;
        let (resp_tx, resp_rx) = oneshot::channel();
        let request = PriorityRequest { addr: ip, resp: resp_tx };

        if self.tx.send_timeout(request, priority.enqueue_timeout()).await.is_err() {
            self.log(format!("conn {}: denied permission: timed out sending", address));
            return false;
        }
        match tokio::time::timeout(priority.response_timeout(), resp_rx).await {
            Ok(Ok(granted)) => {
                self.log(format!("conn {}: granted permission: {}", address, granted));
                granted
            }
            _ => {
                self.log(format!("conn {}: denied permission: timed out receiving", address));
                false
            }
        }
    }
}

impl Arbiter {
    async fn run(mut self, cancel: CancellationToken) {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            req = self.rx.recv() => match req {
                Some(req) => req,
                None => return,
            },
        };

        if self.is_highest_priority(&first) {
            let _ = first.resp.send(true);
            return;
        }

        // give a slower, higher priority connection a chance to show up
        let mut requests = vec![first];
        let expired = tokio::time::sleep(self.extra_wait);
        tokio::pin!(expired);
        loop {
            tokio::select! {
                _ = &mut expired => break,
                _ = cancel.cancelled() => return,
                req = self.rx.recv() => match req {
                    Some(req) => requests.push(req),
                    None => break,
                },
            }
        }

        let winner = self.find_highest_priority(&requests);
        for (idx, req) in requests.into_iter().enumerate() {
            let _ = req.resp.send(idx == winner);
        }
    }

    /// Index of the best request; the earliest arrival wins a tie.
    fn find_highest_priority(&self, requests: &[PriorityRequest]) -> usize {
        let mut best = 0;
        for (idx, req) in requests.iter().enumerate() {
            if self.rank(req) > self.rank(&requests[best]) {
                best = idx;
            }
        }
        best
    }

    fn rank(&self, req: &PriorityRequest) -> u8 {
        let flags = self.flags.get(&req.addr).copied().unwrap_or(0);
        if flags & FLAG_SYSTEM_RESOLVER != 0 {
            3
        } else if flags & FLAG_UDP != 0 {
            2
        } else if flags & FLAG_HTTPS != 0 {
            1
        } else {
            0
        }
    }

    fn is_highest_priority(&self, req: &PriorityRequest) -> bool {
        let flags = self.flags.get(&req.addr).copied().unwrap_or(0);
        if self.nsystem > 0 {
            flags & FLAG_SYSTEM_RESOLVER != 0
        } else if self.nudp > 0 {
            flags & FLAG_UDP != 0
        } else if self.nhttps > 0 {
            flags & FLAG_HTTPS != 0
        } else {
            // only test helper addresses
            true
        }
    }
}
