//! Owns one lifecycle manager per connection id, routes commands to them and
//! keeps wanted connections open by retrying with exponential backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use connectivity_model::{Connection, MappingContext, ModelError};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{CommandReply, ControlCommand};
use crate::error::{ConnectivityError, ConnectivityResult};
use crate::manager::{
    spawn_manager, ConnectionManagerHandle, ManagerDeps, ManagerNotice, NoticeKind,
};
use crate::mapping::MappingProcessor;
use crate::metrics::SUPERVISOR_RESTARTS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub min: Duration,
    pub max: Duration,
    pub random_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(60),
            random_factor: 0.2,
        }
    }
}

/// Doubling delay between `min` and `max`, stretched by up to
/// `random_factor` of itself.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.policy.min.saturating_mul(factor).min(self.policy.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        if self.policy.random_factor > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..=self.policy.random_factor);
            base.mul_f64(1.0 + jitter)
        } else {
            base
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

struct ManagerEntry {
    handle: ConnectionManagerHandle,
    generation: u64,
    /// Create command to replay while the connection is wanted open.
    desired: Option<ControlCommand>,
    backoff: Backoff,
    retry: Option<JoinHandle<()>>,
}

impl ManagerEntry {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

struct Inner {
    deps: ManagerDeps,
    backoff: BackoffPolicy,
    notices: mpsc::UnboundedSender<ManagerNotice>,
    entries: Mutex<HashMap<String, ManagerEntry>>,
    next_generation: AtomicU64,
    notice_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn start(deps: ManagerDeps, backoff: BackoffPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            deps,
            backoff,
            notices: tx,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            notice_task: Mutex::new(None),
        });
        let task = tokio::spawn(process_notices(Arc::downgrade(&inner), rx));
        *inner.notice_task.lock() = Some(task);
        Self { inner }
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.inner.entries.lock().contains_key(connection_id)
    }

    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn manager(&self, connection_id: &str) -> Option<ConnectionManagerHandle> {
        self.inner
            .entries
            .lock()
            .get(connection_id)
            .map(|entry| entry.handle.clone())
    }

    pub async fn dispatch(
        &self,
        connection_id: &str,
        command: ControlCommand,
    ) -> ConnectivityResult<CommandReply> {
        if let Some(command_id) = command.connection_id() {
            if command_id != connection_id {
                return Err(ConnectivityError::IdMismatch {
                    routed_id: connection_id.to_string(),
                    command_id: command_id.to_string(),
                });
            }
        }
        match &command {
            ControlCommand::CreateConnection {
                connection,
                mapping_contexts,
            }
            | ControlCommand::TestConnection {
                connection,
                mapping_contexts,
            } => self.validate(connection, mapping_contexts)?,
            _ => {}
        }
        // The registered manager is never put in test mode.
        if matches!(command, ControlCommand::TestConnection { .. }) {
            return self.test_detached(connection_id, command).await;
        }

        let (handle, generation) = {
            let mut entries = self.inner.entries.lock();
            match &command {
                ControlCommand::CreateConnection { .. } => {
                    let entry = entries
                        .entry(connection_id.to_string())
                        .or_insert_with(|| spawn_entry(&self.inner, connection_id));
                    entry.desired = Some(command.clone());
                    (entry.handle.clone(), entry.generation)
                }
                ControlCommand::CloseConnection | ControlCommand::DeleteConnection => {
                    let entry = entries
                        .get_mut(connection_id)
                        .ok_or_else(|| ConnectivityError::ConnectionNotAccessible(connection_id.to_string()))?;
                    entry.desired = None;
                    entry.cancel_retry();
                    (entry.handle.clone(), entry.generation)
                }
                _ => entries
                    .get(connection_id)
                    .map(|entry| (entry.handle.clone(), entry.generation))
                    .ok_or_else(|| ConnectivityError::ConnectionNotAccessible(connection_id.to_string()))?,
            }
        };

        let is_delete = matches!(command, ControlCommand::DeleteConnection);
        let result = handle.send(command).await;
        if is_delete && result.is_ok() {
            remove_entry(&self.inner, connection_id, generation);
        }
        result
    }

    /// Deletes every connection.
    pub async fn shutdown(&self) {
        let ids = self.connection_ids();
        info!(target = "connectivity.supervisor", connections = ids.len(), "shutting down connections");
        let deletes = ids
            .iter()
            .map(|id| self.dispatch(id, ControlCommand::DeleteConnection));
        for (id, result) in ids.iter().zip(join_all(deletes).await) {
            if let Err(err) = result {
                warn!(target = "connectivity.supervisor", connection_id = %id, error = %err, "delete on shutdown failed");
            }
        }
        if let Some(task) = self.inner.notice_task.lock().take() {
            task.abort();
        }
    }

    fn validate(
        &self,
        connection: &Connection,
        mapping_contexts: &[MappingContext],
    ) -> ConnectivityResult<()> {
        MappingProcessor::build(self.inner.deps.registry.clone(), connection, mapping_contexts)
            .map(|_| ())
            .map_err(|err| ModelError::ConfigurationInvalid(err.to_string()).into())
    }

    /// Runs a test on a throwaway manager that is deleted afterwards.
    async fn test_detached(
        &self,
        connection_id: &str,
        command: ControlCommand,
    ) -> ConnectivityResult<CommandReply> {
        let (handle, join) = spawn_manager(connection_id, self.inner.deps.clone(), None);
        let result = handle.send(command).await;
        if let Err(err) = handle.send(ControlCommand::DeleteConnection).await {
            warn!(target = "connectivity.supervisor", connection_id = %connection_id, error = %err, "test manager cleanup failed");
        }
        let _ = join.await;
        result
    }
}

fn spawn_entry(inner: &Arc<Inner>, connection_id: &str) -> ManagerEntry {
    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);
    let (handle, join) = spawn_manager(connection_id, inner.deps.clone(), Some(inner.notices.clone()));
    tokio::spawn(watch(
        Arc::downgrade(inner),
        connection_id.to_string(),
        generation,
        join,
    ));
    debug!(target = "connectivity.supervisor", connection_id = %connection_id, generation, "manager spawned");
    ManagerEntry {
        handle,
        generation,
        desired: None,
        backoff: Backoff::new(inner.backoff),
        retry: None,
    }
}

fn remove_entry(inner: &Inner, connection_id: &str, generation: u64) {
    let mut entries = inner.entries.lock();
    if entries.get(connection_id).map(|e| e.generation) == Some(generation) {
        if let Some(mut entry) = entries.remove(connection_id) {
            entry.cancel_retry();
        }
        debug!(target = "connectivity.supervisor", connection_id = %connection_id, "manager removed");
    }
}

/// Waits for a manager task to end: a panic respawns it, a regular end
/// removes it.
async fn watch(inner: Weak<Inner>, connection_id: String, generation: u64, join: JoinHandle<()>) {
    let outcome = join.await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    match outcome {
        Err(err) if err.is_panic() => {
            error!(
                target = "connectivity.supervisor",
                connection_id = %connection_id,
                "connection manager panicked"
            );
            SUPERVISOR_RESTARTS.with_label_values(&["panic"]).inc();
            respawn(&inner, &connection_id, generation);
        }
        _ => remove_entry(&inner, &connection_id, generation),
    }
}

fn respawn(inner: &Arc<Inner>, connection_id: &str, generation: u64) {
    let mut entries = inner.entries.lock();
    let Some(entry) = entries.get_mut(connection_id) else {
        return;
    };
    if entry.generation != generation {
        return;
    }
    let fresh = spawn_entry(inner, connection_id);
    entry.handle = fresh.handle;
    entry.generation = fresh.generation;
    entry.cancel_retry();
    if let Some(command) = entry.desired.clone() {
        let delay = entry.backoff.next_delay();
        entry.retry = Some(replay(entry.handle.clone(), command, delay));
    }
}

fn replay(handle: ConnectionManagerHandle, command: ControlCommand, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match handle.send(command).await {
            Ok(reply) => debug!(
                target = "connectivity.supervisor",
                connection_id = %handle.connection_id(),
                ?reply,
                "reconnect attempt answered"
            ),
            Err(err) => debug!(
                target = "connectivity.supervisor",
                connection_id = %handle.connection_id(),
                error = %err,
                "reconnect attempt failed"
            ),
        }
    })
}

fn schedule_retry(inner: &Inner, connection_id: &str, reason: &str) {
    let mut entries = inner.entries.lock();
    let Some(entry) = entries.get_mut(connection_id) else {
        return;
    };
    let Some(command) = entry.desired.clone() else {
        debug!(
            target = "connectivity.supervisor",
            connection_id = %connection_id,
            "connection not wanted open; no retry"
        );
        return;
    };
    let delay = entry.backoff.next_delay();
    SUPERVISOR_RESTARTS.with_label_values(&["reconnect"]).inc();
    info!(
        target = "connectivity.supervisor",
        connection_id = %connection_id,
        delay_ms = delay.as_millis() as u64,
        attempt = entry.backoff.attempts(),
        reason = %reason,
        "scheduling reconnect"
    );
    entry.cancel_retry();
    entry.retry = Some(replay(entry.handle.clone(), command, delay));
}

async fn process_notices(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<ManagerNotice>) {
    while let Some(notice) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match &notice.kind {
            NoticeKind::Connected => {
                if let Some(entry) = inner.entries.lock().get_mut(&notice.connection_id) {
                    entry.backoff.reset();
                }
                info!(target = "connectivity.supervisor", connection_id = %notice.connection_id, "connection open");
            }
            NoticeKind::ConnectFailed(reason) | NoticeKind::ConnectionLost(reason) => {
                schedule_retry(&inner, &notice.connection_id, reason);
            }
            NoticeKind::Closed | NoticeKind::Deleted => {
                debug!(
                    target = "connectivity.supervisor",
                    connection_id = %notice.connection_id,
                    kind = ?notice.kind,
                    "connection closed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(random_factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            min: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            random_factor,
        }
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(policy(0.0));
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_factor() {
        let mut backoff = Backoff::new(policy(0.5));
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn many_attempts_do_not_overflow() {
        let mut backoff = Backoff::new(policy(0.0));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_millis(1_000));
        }
    }
}
