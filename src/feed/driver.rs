//! Async driver feeding the book session from the two notification feeds.
//!
//! Book events are applied strictly in delivery order. After each change a
//! re-check task re-derives bin ownership twice: once after a short delay to
//! catch the common case, and again after a longer fallback delay. Both
//! passes are idempotent and are dropped if the market changed meanwhile.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{parse_line, MarketEvent};
use super::ownership::{OwnedOrders, UserOrderEvent};
use super::session::{Applied, BookSession};
use crate::book::MarketId;
use crate::config::Config;
use crate::error::{FeedError, ReplicaError};

/// Session shared between the driver and readers.
pub type SharedSession = Arc<RwLock<BookSession>>;

/// Applies feed events to a shared session and schedules ownership re-checks.
#[derive(Debug, Clone)]
pub struct BookDriver {
    session: SharedSession,
    owned: Arc<OwnedOrders>,
    short_delay: Duration,
    long_delay: Duration,
}

impl BookDriver {
    /// Create a driver for `session`.
    pub fn new(session: SharedSession, owned: Arc<OwnedOrders>, config: &Config) -> Self {
        Self {
            session,
            owned,
            short_delay: config.recheck_short(),
            long_delay: config.recheck_long(),
        }
    }

    /// Shared session handle.
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Shared own-order set.
    pub fn owned(&self) -> Arc<OwnedOrders> {
        self.owned.clone()
    }

    /// Apply one book event and schedule re-checks if the book changed.
    pub async fn apply(&self, event: MarketEvent) -> Applied {
        let (applied, generation) = {
            let mut session = self.session.write().await;
            let applied = session.apply(event);
            (applied, session.generation())
        };

        if applied == Applied::Changed {
            self.schedule_recheck(generation);
        }
        applied
    }

    /// Switch the session to another market.
    ///
    /// Re-checks scheduled for the previous market become no-ops.
    pub async fn switch_market(&self, market: MarketId) {
        self.session.write().await.subscribe(market);
    }

    /// Spawn the two-phase ownership re-check for `generation`.
    pub fn schedule_recheck(&self, generation: u64) -> JoinHandle<()> {
        let session = self.session.clone();
        let owned = self.owned.clone();
        let short = self.short_delay;
        let long = self.long_delay;

        tokio::spawn(async move {
            tokio::time::sleep(short).await;
            if !recheck(&session, &owned, generation).await {
                return;
            }
            tokio::time::sleep(long.saturating_sub(short)).await;
            recheck(&session, &owned, generation).await;
        })
    }

    /// Apply book events until the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<MarketEvent>) {
        let mut applied = 0u64;
        while let Some(event) = rx.recv().await {
            self.apply(event).await;
            applied += 1;
        }
        info!(applied, "Book feed closed");
    }

    /// Apply user-order notifications until the channel closes.
    pub async fn run_user_feed(self, mut rx: mpsc::Receiver<UserOrderEvent>) {
        while let Some(event) = rx.recv().await {
            self.owned.apply(event);
        }
        debug!("User order feed closed");
    }
}

/// One ownership pass. Returns false if the session moved to another market.
async fn recheck(session: &RwLock<BookSession>, owned: &OwnedOrders, generation: u64) -> bool {
    let mut session = session.write().await;
    match session.annotate_ownership(generation, |id| owned.contains(id)) {
        Some(changed) => {
            if changed {
                debug!(generation, "Bin ownership updated");
            }
            true
        }
        None => false,
    }
}

/// Decode JSON-lines events from `reader` and forward them to `tx`.
///
/// Malformed lines are logged and skipped. Returns the number of events sent.
pub async fn pump_lines<R>(reader: R, tx: mpsc::Sender<MarketEvent>) -> Result<usize, ReplicaError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0;
    let mut sent = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(line_no, &line) {
            Ok(Some(event)) => {
                tx.send(event).await.map_err(|_| FeedError::ChannelClosed)?;
                sent += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping feed line"),
        }
    }

    Ok(sent)
}
