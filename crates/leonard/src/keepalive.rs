use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use crate::transport::OutboundSender;

/// Whitespace written between stanzas to keep idle connections open.
pub const KEEPALIVE_PAYLOAD: &str = " ";

/// Periodic whitespace writer. Runs on its own task; stops when dropped or when
/// the gateway's write side closes.
#[derive(Debug)]
pub struct Keepalive {
    handle: JoinHandle<()>,
}

impl Keepalive {
    pub fn spawn(outbound: OutboundSender, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if outbound.is_closed() {
                    break;
                }
                trace!("Sending keepalive");
                outbound.send_raw(KEEPALIVE_PAYLOAD);
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
