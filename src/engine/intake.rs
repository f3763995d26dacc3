//! Subscription intake: a channel between push delivery and the merge path.
//!
//! Subscription callbacks must never run merges on the delivery thread -
//! that would couple relay latency to store lock hold times. Deliveries go
//! through an unbounded channel into a worker thread that batches whatever
//! has queued up and feeds it to the engine's serialized ingest path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::core::event::NetworkEvent;
use crate::engine::ReconciliationEngine;

/// Largest batch the worker hands to one ingest call.
const MAX_BATCH: usize = 256;

/// How often the worker rechecks the stop flag while idle. Keeps shutdown
/// bounded even when a subscription holds its sink open.
const IDLE_TICK: Duration = Duration::from_millis(200);

/// Delivery handle given to the push subscription collaborator.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<NetworkEvent>,
}

impl EventSink {
    /// Deliver one event. Delivery after shutdown is dropped silently -
    /// the subscription outliving the engine is a normal teardown race.
    pub fn deliver(&self, event: NetworkEvent) {
        let _ = self.tx.send(event);
    }
}

/// Worker thread draining deliveries into the engine.
pub struct Intake {
    tx: Option<Sender<NetworkEvent>>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Intake {
    pub fn spawn(engine: Arc<ReconciliationEngine>) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("weft-intake".into())
            .spawn(move || run(engine, rx, worker_stop))
            .expect("spawn intake worker");
        Self {
            tx: Some(tx),
            worker: Some(worker),
            stop,
        }
    }

    /// Sink to hand to `PushSubscription::subscribe`.
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.as_ref().expect("intake already closed").clone(),
        }
    }

    /// Stop accepting deliveries, drain what is already queued, and join
    /// the worker. Bounded even if a sink clone is still held elsewhere.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Intake {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(engine: Arc<ReconciliationEngine>, rx: Receiver<NetworkEvent>, stop: Arc<AtomicBool>) {
    loop {
        let first = match rx.recv_timeout(IDLE_TICK) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = vec![first];
        loop {
            match rx.try_recv() {
                Ok(event) if batch.len() < MAX_BATCH => batch.push(event),
                Ok(event) => {
                    batch.push(event);
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let report = engine.ingest(batch);
        if report.anomalies > 0 {
            tracing::debug!(anomalies = report.anomalies, "intake batch had anomalies");
        }

        if stop.load(Ordering::SeqCst) && rx.is_empty() {
            break;
        }
    }
}
