//! Bounded worker pool that runs subscriber handlers off the polling task.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use storage::NormalizedEvent;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::bus::{EventBus, Source};
use crate::{Error, Result};

/// Fans events out to a fixed set of worker threads.
///
/// Events from one table always go to the same worker, so they are
/// published in local-id order. Events from different tables may run
/// concurrently.
pub struct Dispatcher {
    senders: Vec<mpsc::Sender<NormalizedEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` threads, each with a queue of `capacity` events.
    pub fn spawn(
        bus: Arc<EventBus>,
        source: Arc<Source>,
        workers: usize,
        capacity: usize,
    ) -> Result<Self> {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, mut rx) = mpsc::channel::<NormalizedEvent>(capacity.max(1));
            let bus = Arc::clone(&bus);
            let source = Arc::clone(&source);
            let handle = thread::Builder::new()
                .name(format!("dispatch-{index}"))
                .spawn(move || {
                    while let Some(event) = rx.blocking_recv() {
                        let ran = bus.publish(&source, &event);
                        debug!(table = %event.table, local_id = event.id, handlers = ran, "dispatched");
                    }
                })?;
            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self {
            senders,
            workers: handles,
        })
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    fn route(&self, event: &NormalizedEvent) -> usize {
        let mut hasher = DefaultHasher::new();
        event.table.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue `event` for its table's worker. Waits only for queue space,
    /// never for handlers to finish.
    pub async fn dispatch(&self, event: NormalizedEvent) -> Result<()> {
        let worker = self.route(&event);
        self.senders[worker]
            .send(event)
            .await
            .map_err(|_| Error::Dispatch(format!("worker {worker} has stopped")))
    }

    /// Close the queues, let workers drain them, and wait for the threads.
    pub fn shutdown(self) {
        let Self { senders, workers } = self;
        drop(senders);
        for worker in workers {
            if worker.join().is_err() {
                error!("dispatch worker panicked");
            }
        }
    }
}
