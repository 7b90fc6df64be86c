use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time traffic counters for one [`Remote`](crate::Remote).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStats {
    pub requests_sent: u64,
    pub notifications_sent: u64,
    pub responses_sent: u64,
    pub bytes_sent: u64,
    pub requests_received: u64,
    pub notifications_received: u64,
    pub responses_received: u64,
    pub bytes_received: u64,
}

/// Message category for counting.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Traffic {
    Request,
    Notification,
    Response,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    requests_sent: AtomicU64,
    notifications_sent: AtomicU64,
    responses_sent: AtomicU64,
    bytes_sent: AtomicU64,
    requests_received: AtomicU64,
    notifications_received: AtomicU64,
    responses_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self, traffic: Traffic, bytes: usize) {
        let counter = match traffic {
            Traffic::Request => &self.requests_sent,
            Traffic::Notification => &self.notifications_sent,
            Traffic::Response => &self.responses_sent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn received(&self, traffic: Traffic) {
        let counter = match traffic {
            Traffic::Request => &self.requests_received,
            Traffic::Notification => &self.notifications_received,
            Traffic::Response => &self.responses_received,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received_bytes(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RemoteStats {
        RemoteStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_category() {
        let counters = Counters::default();
        counters.sent(Traffic::Request, 10);
        counters.sent(Traffic::Response, 5);
        counters.received(Traffic::Notification);
        counters.received_bytes(42);

        let stats = counters.snapshot();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_sent, 1);
        assert_eq!(stats.notifications_sent, 0);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.notifications_received, 1);
        assert_eq!(stats.bytes_received, 42);
    }
}
