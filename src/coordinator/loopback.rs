//! In-process media transport.
//!
//! Fabricates deterministic SDP so two coordinators can negotiate with
//! each other without a real media stack. Used by the `roap simulate`
//! command and by tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::transport::{LocalDescription, MediaTransport, TransportFuture};
use crate::error::RoapError;

/// Loopback media transport
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    /// Origin username written into generated SDP
    label: String,
    /// Offers generated so far
    offers: AtomicU64,
    /// Answers generated so far
    answers: AtomicU64,
    /// Remote answers applied so far
    applied_answers: AtomicU64,
    /// Operations currently running
    in_flight: AtomicUsize,
    /// Highest `in_flight` observed
    max_in_flight: AtomicUsize,
    fail_offers: AtomicBool,
    fail_remote_offers: AtomicBool,
    fail_remote_answers: AtomicBool,
}

impl LoopbackTransport {
    /// Create a transport whose SDP carries the given origin label
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Make every `create_local_offer` call fail
    pub fn with_offer_failure(self) -> Self {
        self.fail_offers.store(true, Ordering::SeqCst);
        self
    }

    /// Make every `apply_remote_offer` call fail
    pub fn with_remote_offer_failure(self) -> Self {
        self.fail_remote_offers.store(true, Ordering::SeqCst);
        self
    }

    /// Make every `apply_remote_answer` call fail
    pub fn with_remote_answer_failure(self) -> Self {
        self.fail_remote_answers.store(true, Ordering::SeqCst);
        self
    }

    /// Offers generated so far
    pub fn offers_created(&self) -> u64 {
        self.offers.load(Ordering::SeqCst)
    }

    /// Answers generated so far
    pub fn answers_created(&self) -> u64 {
        self.answers.load(Ordering::SeqCst)
    }

    /// Remote answers applied so far
    pub fn answers_applied(&self) -> u64 {
        self.applied_answers.load(Ordering::SeqCst)
    }

    /// Highest number of operations observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn sdp(&self, version: u64, direction: &str) -> String {
        format!(
            "v=0\r\no={} {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=x-roap:{}\r\n",
            self.label, version, version, direction
        )
    }

    async fn run<T>(
        &self,
        fail: &AtomicBool,
        what: &str,
        op: impl FnOnce() -> T,
    ) -> crate::Result<T> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        // Let other tasks run so overlapping calls would be observable.
        tokio::task::yield_now().await;

        let result = if fail.load(Ordering::SeqCst) {
            Err(RoapError::Transport(format!("{} failed on {}", what, self.label)))
        } else {
            Ok(op())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MediaTransport for LoopbackTransport {
    fn create_local_offer(&self) -> TransportFuture<'_, LocalDescription> {
        Box::pin(async move {
            self.run(&self.fail_offers, "create offer", || {
                let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
                LocalDescription::new(self.sdp(n, "offer"))
            })
            .await
        })
    }

    fn apply_remote_offer(&self, sdp: String) -> TransportFuture<'_, LocalDescription> {
        Box::pin(async move {
            tracing::trace!("{} applying remote offer ({} bytes)", self.label, sdp.len());
            self.run(&self.fail_remote_offers, "apply remote offer", || {
                let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
                LocalDescription::new(self.sdp(n, "answer"))
            })
            .await
        })
    }

    fn apply_remote_answer(&self, sdp: String) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            tracing::trace!("{} applying remote answer ({} bytes)", self.label, sdp.len());
            self.run(&self.fail_remote_answers, "apply remote answer", || {
                self.applied_answers.fetch_add(1, Ordering::SeqCst);
            })
            .await
        })
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generates_distinct_offers() {
        let transport = LoopbackTransport::new("alice");

        let first = transport.create_local_offer().await.unwrap();
        let second = transport.create_local_offer().await.unwrap();

        assert!(first.sdp.starts_with("v=0\r\no=alice 1 1"));
        assert!(second.sdp.contains("o=alice 2 2"));
        assert_eq!(transport.offers_created(), 2);
    }

    #[tokio::test]
    async fn test_answer_and_apply() {
        let transport = LoopbackTransport::new("bob");

        let answer = transport.apply_remote_offer("v=0".to_string()).await.unwrap();
        assert!(answer.sdp.contains("a=x-roap:answer"));

        transport.apply_remote_answer("v=0".to_string()).await.unwrap();
        assert_eq!(transport.answers_applied(), 1);
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = LoopbackTransport::new("carol").with_offer_failure();

        let err = transport.create_local_offer().await.unwrap_err();
        assert!(matches!(err, RoapError::Transport(_)));
        assert_eq!(transport.offers_created(), 0);
    }
}
