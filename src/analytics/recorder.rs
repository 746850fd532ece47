//! Click recorder.
//!
//! Events go through an mpsc channel to a single actor task so the redirect
//! path never waits on storage. The actor folds each event into the in-memory
//! `ClickIndex` straight away and batches the same deltas for a periodic
//! upsert into `click_buckets`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::analytics::models::{BucketKey, ClickEvent};
use crate::analytics::view::ClickIndex;
use crate::storage::Storage;

enum RecorderMessage {
    Record(ClickEvent),
    /// Drop pending and indexed buckets of a deleted shortcode
    Purge(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct RecorderActor {
    receiver: mpsc::Receiver<RecorderMessage>,
    storage: Arc<dyn Storage>,
    index: Arc<ClickIndex>,
    /// Deltas not yet written to storage
    pending: HashMap<BucketKey, u64>,
    flush_interval: Duration,
}

fn notify(waiters: Vec<oneshot::Sender<()>>) {
    for done in waiters {
        let _ = done.send(());
    }
}

impl RecorderActor {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = self.receiver.recv() => {
                    match msg {
                        Some(RecorderMessage::Record(event)) => self.record(&event),
                        Some(RecorderMessage::Purge(shortcode)) => self.purge(&shortcode),
                        Some(RecorderMessage::Flush(done)) => {
                            let mut waiters = vec![done];
                            let stop = self.drain_queued(&mut waiters);
                            self.persist().await;
                            notify(waiters);
                            if stop {
                                info!("Click recorder stopped");
                                break;
                            }
                        }
                        Some(RecorderMessage::Shutdown(done)) => {
                            info!("Click recorder received shutdown signal, flushing...");
                            let mut waiters = vec![done];
                            self.drain_queued(&mut waiters);
                            self.persist().await;
                            notify(waiters);
                            break;
                        }
                        None => {
                            warn!("Click recorder channel closed, flushing...");
                            self.persist().await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.persist().await;
                }
            }
        }
    }

    fn record(&mut self, event: &ClickEvent) {
        let key = BucketKey::from_event(event);
        self.index.apply(&key, 1);
        *self.pending.entry(key).or_insert(0) += 1;
    }

    fn purge(&mut self, shortcode: &str) {
        self.pending.retain(|key, _| key.shortcode != shortcode);
        self.index.remove_shortcode(shortcode);
    }

    /// Fold in messages queued behind a flush request. Flush and shutdown
    /// requests found on the way join `waiters`, to be answered once everything
    /// is persisted. Stops at a shutdown request and reports it.
    fn drain_queued(&mut self, waiters: &mut Vec<oneshot::Sender<()>>) -> bool {
        while let Ok(msg) = self.receiver.try_recv() {
            match msg {
                RecorderMessage::Record(event) => self.record(&event),
                RecorderMessage::Purge(shortcode) => self.purge(&shortcode),
                RecorderMessage::Flush(done) => waiters.push(done),
                RecorderMessage::Shutdown(done) => {
                    waiters.push(done);
                    return true;
                }
            }
        }
        false
    }

    async fn persist(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch: Vec<(BucketKey, u64)> = self.pending.drain().collect();
        debug!("Flushing {} click buckets", batch.len());

        match self.storage.upsert_click_buckets(&batch).await {
            Ok(skipped) => {
                // Links deleted while their clicks were in flight
                for shortcode in skipped {
                    debug!(short_code = %shortcode, "Dropping clicks of a deleted link");
                    self.index.remove_shortcode(&shortcode);
                }
            }
            Err(e) => {
                error!(error = %e, buckets = batch.len(), "Failed to persist click buckets, will retry");
                for (key, count) in batch {
                    *self.pending.entry(key).or_insert(0) += count;
                }
            }
        }
    }
}

/// Handle to the recorder actor
#[derive(Clone)]
pub struct ClickRecorder {
    sender: mpsc::Sender<RecorderMessage>,
}

impl ClickRecorder {
    pub fn spawn(
        storage: Arc<dyn Storage>,
        index: Arc<ClickIndex>,
        buffer_size: usize,
        flush_interval_ms: u64,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));

        let actor = RecorderActor {
            receiver,
            storage,
            index,
            pending: HashMap::new(),
            flush_interval: Duration::from_millis(flush_interval_ms.max(1)),
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        Self { sender }
    }

    /// Queue a click. Never blocks; drops the event when the buffer is full.
    pub fn record(&self, event: ClickEvent) {
        if let Err(e) = self.sender.try_send(RecorderMessage::Record(event)) {
            warn!(error = %e, "Click event buffer full, dropping event");
        }
    }

    pub async fn purge(&self, shortcode: &str) {
        if self
            .sender
            .send(RecorderMessage::Purge(shortcode.to_string()))
            .await
            .is_err()
        {
            warn!(short_code = %shortcode, "Click recorder is gone, purge skipped");
        }
    }

    /// Apply everything queued so far and write it to storage
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(RecorderMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(RecorderMessage::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}
