//! Transport worker and retry sweeper.
//!
//! The dispatcher drains the outbound queue and runs every delivery as its
//! own task, bounded by the delivery timeout. A failed attempt is never
//! retried in-line: the entry stays in the pending table and the sweeper
//! re-enqueues it on its next tick.

use crate::config::BroadcastConfig;
use crate::engine::BroadcastEngine;
use crate::relay::{Delivery, Relay};
use async_trait::async_trait;
use murmur_core::NodeId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Why a delivery attempt did not end in an acknowledgment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no acknowledgment before the delivery timeout")]
    TimedOut,

    #[error("peer rejected delivery: {0}")]
    Rejected(String),

    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

/// Carries one relay to one peer and waits for its acknowledgment.
#[async_trait]
pub trait Courier: Send + Sync + 'static {
    /// Deliver `relay` to `to`.
    ///
    /// `Ok` means the peer acknowledged `relay.mid` within `timeout`.
    async fn deliver(&self, to: &NodeId, relay: &Relay, timeout: Duration)
        -> Result<(), DeliveryError>;
}

/// Handles of the background activities of one engine.
#[derive(Debug)]
pub struct Workers {
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Workers {
    /// Stop both activities. Pending deliveries are left in the table.
    pub fn abort(&self) {
        self.dispatcher.abort();
        self.sweeper.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished() && self.sweeper.is_finished()
    }
}

/// Spawn the dispatcher over `queue` and a sweeper for `engine`.
pub fn spawn_workers<C: Courier>(
    engine: Arc<BroadcastEngine>,
    queue: mpsc::Receiver<Delivery>,
    courier: Arc<C>,
    config: &BroadcastConfig,
) -> Workers {
    info!(
        node = %engine.local(),
        retry_interval = ?config.retry_interval,
        delivery_timeout = ?config.delivery_timeout,
        "starting broadcast workers"
    );

    let dispatcher = tokio::spawn(dispatch(
        Arc::clone(&engine),
        queue,
        courier,
        config.delivery_timeout,
    ));
    let sweeper = tokio::spawn(sweep_periodically(engine, config.retry_interval));

    Workers {
        dispatcher,
        sweeper,
    }
}

async fn dispatch<C: Courier>(
    engine: Arc<BroadcastEngine>,
    mut queue: mpsc::Receiver<Delivery>,
    courier: Arc<C>,
    timeout: Duration,
) {
    while let Some(delivery) = queue.recv().await {
        let engine = Arc::clone(&engine);
        let courier = Arc::clone(&courier);
        tokio::spawn(async move {
            attempt(&engine, courier.as_ref(), delivery, timeout).await;
        });
    }
    debug!(node = %engine.local(), "outbound queue closed; dispatcher stopping");
}

async fn attempt<C: Courier>(
    engine: &BroadcastEngine,
    courier: &C,
    delivery: Delivery,
    timeout: Duration,
) {
    let Delivery { to, relay } = delivery;
    match courier.deliver(&to, &relay, timeout).await {
        Ok(()) => {
            engine.acknowledge(&to, &relay.mid);
        }
        Err(err) => {
            engine.counters().record_failure();
            debug!(
                node = %engine.local(),
                %to,
                mid = %relay.mid,
                error = %err,
                "delivery failed; left for the sweeper"
            );
        }
    }
}

async fn sweep_periodically(engine: Arc<BroadcastEngine>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let resent = engine.sweep().await;
        if resent > 0 {
            let stats = engine.stats();
            debug!(
                node = %engine.local(),
                resent,
                pending = stats.pending,
                failed_attempts = stats.failed_attempts,
                "sweep re-enqueued pending deliveries"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::MessageId;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every attempt; acknowledges only while `healthy` is set.
    #[derive(Default)]
    struct RecordingCourier {
        healthy: AtomicBool,
        attempts: AtomicUsize,
        seen: Mutex<Vec<(NodeId, MessageId)>>,
    }

    #[async_trait]
    impl Courier for RecordingCourier {
        async fn deliver(
            &self,
            to: &NodeId,
            relay: &Relay,
            timeout: Duration,
        ) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push((to.clone(), relay.mid));
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                tokio::time::sleep(timeout).await;
                Err(DeliveryError::TimedOut)
            }
        }
    }

    fn config() -> BroadcastConfig {
        BroadcastConfig {
            retry_interval: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn start(courier: &Arc<RecordingCourier>) -> (Arc<BroadcastEngine>, Workers) {
        let (engine, workers) = BroadcastEngine::start("n1".into(), &config(), Arc::clone(courier));
        let mut mapping = HashMap::new();
        mapping.insert(NodeId::from("n1"), vec![NodeId::from("n2"), NodeId::from("n3")]);
        engine.set_topology(&mapping);
        (engine, workers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_deliveries_clear_the_table() {
        let courier = Arc::new(RecordingCourier::default());
        courier.healthy.store(true, Ordering::SeqCst);
        let (engine, workers) = start(&courier);

        engine.accept_client(1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(engine.pending().is_empty());
        assert_eq!(courier.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats().acknowledged, 2);

        // Nothing left for the sweeper.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(courier.attempts.load(Ordering::SeqCst), 2);
        workers.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deliveries_are_retried_by_the_sweeper() {
        let courier = Arc::new(RecordingCourier::default());
        let (engine, workers) = start(&courier);

        let mid = engine.accept_client(1).await.mid();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(courier.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(engine.pending().len(), 2);
        assert_eq!(engine.stats().failed_attempts, 2);

        // One sweep later, both deliveries are attempted again.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(courier.attempts.load(Ordering::SeqCst), 4);

        courier.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(engine.pending().is_empty());
        assert!(courier.seen.lock().iter().all(|(_, m)| *m == mid));
        workers.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_both_workers() {
        let courier = Arc::new(RecordingCourier::default());
        let (_engine, workers) = start(&courier);

        workers.abort();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(workers.is_finished());
    }
}
