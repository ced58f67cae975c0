//! One-time upgrade tickets
//!
//! A ticket bridges the authenticated HTTP request and the WebSocket upgrade,
//! which cannot carry an `Authorization` header from browsers. Tickets are
//! single use and expire after the retention window even if never redeemed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct Ticket {
    user_id: String,
    created_at: Instant,
}

pub struct TicketBroker {
    tickets: Mutex<HashMap<String, Ticket>>,
    retention: Duration,
}

impl TicketBroker {
    pub fn new(retention: Duration) -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Mint a ticket for an authenticated user
    pub fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.tickets.lock().insert(
            token.clone(),
            Ticket {
                user_id: user_id.to_string(),
                created_at: Instant::now(),
            },
        );
        debug!(user_id, "ticket issued");
        token
    }

    /// Consume a ticket, returning its user if it was still valid
    ///
    /// The entry is removed whether or not it has expired, so a token can
    /// never be redeemed twice.
    pub fn redeem(&self, token: &str) -> Option<String> {
        let ticket = self.tickets.lock().remove(token)?;
        if ticket.created_at.elapsed() < self.retention {
            Some(ticket.user_id)
        } else {
            debug!(user_id = %ticket.user_id, "expired ticket presented");
            None
        }
    }

    /// Drop expired tickets, returning how many were removed
    pub fn sweep(&self) -> usize {
        let mut tickets = self.tickets.lock();
        let before = tickets.len();
        tickets.retain(|_, ticket| ticket.created_at.elapsed() < self.retention);
        before - tickets.len()
    }

    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.lock().is_empty()
    }

    /// Sweep every `every` until `cancel` fires
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = broker.sweep();
                        if swept > 0 {
                            debug!(swept, "expired tickets swept");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETENTION: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_ticket_redeems_once() {
        let broker = TicketBroker::new(RETENTION);
        let token = broker.issue("alice");

        assert_eq!(broker.redeem(&token).as_deref(), Some("alice"));
        assert_eq!(broker.redeem(&token), None);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_tokens_are_distinct() {
        let broker = TicketBroker::new(RETENTION);
        let a = broker.issue("alice");
        let b = broker.issue("alice");
        assert_ne!(a, b);
        assert_eq!(broker.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_ticket() {
        let broker = TicketBroker::new(RETENTION);
        assert_eq!(broker.redeem("nope"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_ticket_is_rejected() {
        let broker = TicketBroker::new(RETENTION);
        let token = broker.issue("alice");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(broker.redeem(&token), None);
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired() {
        let broker = TicketBroker::new(RETENTION);
        broker.issue("alice");
        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = broker.issue("bob");
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(broker.sweep(), 1);
        assert_eq!(broker.len(), 1);
        assert_eq!(broker.redeem(&fresh).as_deref(), Some("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_sweeps_until_cancelled() {
        let broker = Arc::new(TicketBroker::new(RETENTION));
        let cancel = CancellationToken::new();
        let janitor = broker.spawn_janitor(Duration::from_secs(5), cancel.clone());

        broker.issue("alice");
        tokio::time::sleep(Duration::from_secs(36)).await;
        assert!(broker.is_empty());

        cancel.cancel();
        janitor.await.unwrap();
    }
}
