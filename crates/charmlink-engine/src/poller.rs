use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use charmlink_types::events::ChatEvent;
use charmlink_types::models::{MessageState, TransactionEntry, TxStatus};
use charmlink_types::now_ms;

use crate::bus::EventBus;
use crate::collaborators::{Confirmation, Ledger};
use crate::error::Result;
use crate::outbound::Courier;
use crate::store::MessageStore;
use crate::tracker::TransactionTracker;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another pass was still in flight; nothing was done.
    pub skipped: bool,
    pub confirmed: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub zombified: usize,
    pub notified: usize,
}

/// Closes the loop on deferred transfers: asks the ledger about every
/// pending entry, applies the outcome to the tracker and the message, and
/// sends the notification envelope that was withheld.
pub struct ReconciliationPoller {
    store: MessageStore,
    tracker: TransactionTracker,
    ledger: Arc<dyn Ledger>,
    courier: Courier,
    bus: EventBus,
    pending_timeout: Duration,
    notify_lease: Duration,
    in_flight: Mutex<()>,
}

impl ReconciliationPoller {
    pub fn new(
        store: MessageStore,
        tracker: TransactionTracker,
        ledger: Arc<dyn Ledger>,
        courier: Courier,
        bus: EventBus,
        pending_timeout: Duration,
        notify_lease: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            ledger,
            courier,
            bus,
            pending_timeout,
            notify_lease,
            in_flight: Mutex::new(()),
        }
    }

    /// One timer-driven pass. Returns a skipped report if a previous pass
    /// (or a conversation cleanup) still holds the guard.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Reconciliation still in flight, skipping tick");
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = CycleReport::default();
        let mut live_queue: Option<HashSet<String>> = None;
        let mut queue_unavailable = false;

        for entry in self.tracker.pending(None).await? {
            let status = match entry.ledger_op_id.as_deref() {
                Some(op) => match self.ledger.confirmation_status(op).await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!(correlation_id = entry.correlation_id, "Ledger status query failed: {}", e);
                        None
                    }
                },
                None => Some(Confirmation::Pending),
            };

            match status {
                Some(Confirmation::Confirmed) => {
                    if self.confirm(&entry).await? {
                        report.confirmed += 1;
                    }
                }
                Some(Confirmation::Rejected) => {
                    if self.reject(&entry, MessageState::Failed).await? {
                        report.rejected += 1;
                    }
                }
                // Still waiting, or the ledger could not say; only the timeout applies
                Some(Confirmation::Pending) | None => {
                    if !self.is_expired(&entry) || queue_unavailable {
                        continue;
                    }
                    if live_queue.is_none() {
                        match self.ledger.list_approval_queue().await {
                            Ok(queue) => live_queue = Some(queue),
                            Err(e) => {
                                warn!("Approval queue unavailable, skipping timeouts: {}", e);
                                queue_unavailable = true;
                                continue;
                            }
                        }
                    }
                    let queued = matches!(
                        (&live_queue, &entry.approval_queue_id),
                        (Some(queue), Some(id)) if queue.contains(id)
                    );
                    if !queued && self.reject(&entry, MessageState::Failed).await? {
                        info!(correlation_id = entry.correlation_id, "Pending transfer timed out");
                        report.timed_out += 1;
                    }
                }
            }
        }

        report.notified = self.deliver_due().await?;
        Ok(report)
    }

    /// Bound staleness for one conversation when it is opened. Entries that
    /// left the approval queue get one status query; those the ledger still
    /// calls pending become zombies, as do pending rows nothing tracks. A
    /// failed query leaves the entry for a later pass.
    pub async fn cleanup_conversation(&self, counterparty: &str) -> Result<CycleReport> {
        let _guard = self.in_flight.lock().await;
        let mut report = CycleReport::default();

        // Read before listing the queue, so every entry seen predates the listing
        let entries = self.tracker.pending(Some(counterparty)).await?;

        match self.ledger.list_approval_queue().await {
            Ok(live_queue) => {
                for entry in entries {
                    let still_queued = entry
                        .approval_queue_id
                        .as_ref()
                        .is_some_and(|id| live_queue.contains(id));
                    if still_queued {
                        continue;
                    }

                    let status = match entry.ledger_op_id.as_deref() {
                        Some(op) => match self.ledger.confirmation_status(op).await {
                            Ok(status) => status,
                            Err(e) => {
                                warn!(
                                    counterparty = %counterparty,
                                    correlation_id = entry.correlation_id,
                                    "Ledger status query failed during cleanup: {}", e
                                );
                                continue;
                            }
                        },
                        None => Confirmation::Pending,
                    };
                    match status {
                        Confirmation::Confirmed => {
                            if self.confirm(&entry).await? {
                                report.confirmed += 1;
                            }
                        }
                        Confirmation::Rejected => {
                            if self.reject(&entry, MessageState::Failed).await? {
                                report.rejected += 1;
                            }
                        }
                        Confirmation::Pending => {
                            if self.reject(&entry, MessageState::Zombie).await? {
                                report.zombified += 1;
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(counterparty = %counterparty, "Approval queue unavailable during cleanup: {}", e),
        }

        let orphans = self.store.zombify_orphaned_pending(counterparty).await?;
        if orphans > 0 {
            info!(counterparty = %counterparty, orphans, "Untracked pending messages marked zombie");
            report.zombified += orphans;
            self.bus.publish(ChatEvent::MessagesUpdated {
                counterparty: counterparty.to_string(),
            });
        }

        report.notified = self.deliver_due().await?;
        Ok(report)
    }

    /// Returns true if this call moved the entry to `confirmed`.
    async fn confirm(&self, entry: &TransactionEntry) -> Result<bool> {
        if !self.mark_terminal(entry, TxStatus::Confirmed).await? {
            return Ok(false);
        }
        self.store
            .transition_by_correlation(entry.correlation_id, &[MessageState::Pending], MessageState::Sent)
            .await?;
        info!(
            counterparty = %entry.counterparty,
            correlation_id = entry.correlation_id,
            "Deferred {} confirmed", entry.kind.as_str()
        );
        self.announce(entry, TxStatus::Confirmed);
        Ok(true)
    }

    async fn reject(&self, entry: &TransactionEntry, message_state: MessageState) -> Result<bool> {
        if !self.mark_terminal(entry, TxStatus::Rejected).await? {
            return Ok(false);
        }
        self.store
            .transition_by_correlation(entry.correlation_id, &[MessageState::Pending], message_state)
            .await?;
        info!(
            counterparty = %entry.counterparty,
            correlation_id = entry.correlation_id,
            "Deferred {} rejected, message {}", entry.kind.as_str(), message_state
        );
        self.announce(entry, TxStatus::Rejected);
        Ok(true)
    }

    async fn mark_terminal(&self, entry: &TransactionEntry, status: TxStatus) -> Result<bool> {
        match entry.ledger_op_id.as_deref() {
            Some(op) => self.tracker.mark_terminal(op, status).await,
            None => self.tracker.mark_terminal_by_correlation(entry.correlation_id, status).await,
        }
    }

    fn announce(&self, entry: &TransactionEntry, status: TxStatus) {
        self.bus.publish(ChatEvent::TransferResolved {
            correlation_id: entry.correlation_id,
            status,
        });
        self.bus.publish(ChatEvent::MessagesUpdated {
            counterparty: entry.counterparty.clone(),
        });
    }

    fn is_expired(&self, entry: &TransactionEntry) -> bool {
        let age_ms = now_ms().saturating_sub(entry.created_at);
        age_ms > 0 && age_ms as u128 > self.pending_timeout.as_millis()
    }

    /// Send every confirmed notification not yet acknowledged by the
    /// transport. Failures go back to `due` for the next pass; a claim left
    /// unfinished past the lease is picked up again.
    async fn deliver_due(&self) -> Result<usize> {
        let mut delivered = 0;

        for entry in self.tracker.due_notifications(self.notify_lease).await? {
            if !self.tracker.claim_notification(entry.id, self.notify_lease).await? {
                continue;
            }

            let sent = match self
                .courier
                .transfer_envelope(entry.kind, &entry.metadata, entry.correlation_id)
            {
                Ok(envelope) => self.courier.send(&envelope, &entry.counterparty).await,
                Err(e) => Err(e),
            };

            match sent {
                Ok(()) => {
                    self.tracker.finish_notification(entry.id, true).await?;
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        counterparty = %entry.counterparty,
                        correlation_id = entry.correlation_id,
                        "Transfer notification failed, will retry: {}", e
                    );
                    self.tracker.finish_notification(entry.id, false).await?;
                }
            }
        }

        Ok(delivered)
    }

    /// Run [`run_cycle`](Self::run_cycle) every `interval` until the handle
    /// is stopped or dropped. A stop request is honoured between cycles.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_cycle().await {
                            Ok(report) if report != CycleReport::default() && !report.skipped => {
                                debug!(?report, "Reconciliation cycle finished");
                            }
                            Ok(_) => {}
                            Err(e) => error!("Reconciliation cycle failed: {}", e),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Reconciliation poller stopped");
        });

        PollerHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

/// Owner of a running poll loop. Dropping it stops the loop.
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
