//! WorkerExecutor — cooperative polling loop that turns a generic
//! [`DhtNode`] into a quantum-role worker (spec §4.9).
//!
//! The "acquire role → run handler → release role on every path" pattern
//! (Design Notes §9 "Scoped role acquisition") is implemented as a
//! `Drop`-based guard, the same idiom the teacher workspace uses for lock
//! releases throughout `lib-network` (e.g. its connection-pool permits).

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::dht::{DhtNode, DhtValue};
use crate::types::{Command, RoleKind};

use super::handlers;

/// Default poll interval, spec §4.9.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
/// Conservative role-lease TTL granted for every dispatched command.
const ROLE_TTL_SECS: u64 = 300;
/// Bounded recent-`cmd_id` set capacity, half-trimmed on overflow.
const RECENT_CAPACITY: usize = 1000;

/// Releases the node's role lease on drop — guarantees release on every
/// exit path of the handler dispatch, including panics unwound through it.
/// Idempotent: [`DhtNode::release_role`] is itself idempotent.
struct RoleGuard {
    node: DhtNode,
}

impl Drop for RoleGuard {
    fn drop(&mut self) {
        let node = self.node.clone();
        tokio::spawn(async move { node.release_role().await });
    }
}

struct RecentCommands {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentCommands {
    fn new() -> Self {
        Self { order: VecDeque::new(), seen: HashSet::new() }
    }

    /// Returns `true` if `cmd_id` is new (and records it); `false` if it
    /// was already processed.
    fn record_if_novel(&mut self, cmd_id: &str) -> bool {
        if self.seen.contains(cmd_id) {
            return false;
        }
        if self.order.len() >= RECENT_CAPACITY {
            // Half-trim on overflow, per spec §4.9.
            let drop_count = self.order.len() / 2;
            for _ in 0..drop_count {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        self.order.push_back(cmd_id.to_string());
        self.seen.insert(cmd_id.to_string());
        true
    }
}

/// Drives one node's `cmd:{self}` polling loop: fetch, dedupe, lease,
/// dispatch, release.
pub struct WorkerExecutor {
    node: DhtNode,
    poll_interval: Duration,
    recent: Mutex<RecentCommands>,
    cancel: Notify,
}

impl WorkerExecutor {
    pub fn new(node: DhtNode) -> Self {
        Self {
            node,
            poll_interval: DEFAULT_POLL_INTERVAL,
            recent: Mutex::new(RecentCommands::new()),
            cancel: Notify::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Cancel a running [`Self::run`] loop. The in-flight handler (if any)
    /// still completes and releases its role before the loop returns.
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }

    /// Run the polling loop until cancelled.
    pub async fn run(&self) {
        let cmd_key = Command::key_for_node(&self.node.local_id().to_string());
        loop {
            tokio::select! {
                _ = self.cancel.notified() => return,
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_once(&cmd_key).await;
                }
            }
        }
    }

    /// One iteration of the loop, exposed separately so tests and the
    /// harness can drive it deterministically without sleeping.
    pub async fn poll_once(&self, cmd_key: &str) {
        let Some(value) = self.node.get(cmd_key).await else { return };
        let Ok(command) = value.deserialize::<Command>() else { return };

        let novel = self.recent.lock().record_if_novel(&command.cmd_id);
        if !novel {
            return;
        }

        if !self.node.request_role(command.role, command.session_id.clone(), ROLE_TTL_SECS).await {
            // RoleBusy/RoleDenied are benign for a worker — it simply
            // returns without processing (spec §7 "Role").
            tracing::debug!(
                role = %command.role,
                session_id = %command.session_id,
                "role request denied, skipping command"
            );
            return;
        }
        let _guard = RoleGuard { node: self.node.clone() };

        if let Err(e) = self.dispatch(&command).await {
            self.record_error(&command, &e).await;
        }
    }

    async fn dispatch(&self, command: &Command) -> crate::error::Result<()> {
        match command.role {
            RoleKind::Qsg => handlers::qsg(&self.node, &command.session_id, command.operation_id).await,
            RoleKind::Bg => {
                let owner = command.params.get("owner").map(String::as_str).unwrap_or("alice");
                handlers::bg(&self.node, &command.session_id, command.operation_id, owner).await
            }
            RoleKind::Qpp => handlers::qpp(&self.node, &command.session_id, command.operation_id).await,
            RoleKind::Qpm => handlers::qpm(&self.node, &command.session_id, command.operation_id).await,
            RoleKind::Qpc => {
                let lk: usize = command.params.get("lk").and_then(|s| s.parse().ok()).unwrap_or(0);
                handlers::qpc(&self.node, &command.session_id, lk).await.map(|_| ())
            }
        }
    }

    /// Errors during handler execution are recorded, not retried (spec
    /// §4.9 / §7 "Command").
    async fn record_error(&self, command: &Command, error: &crate::error::CqkdError) {
        let key = format!("{}:error:{}", command.session_id, command.cmd_id);
        let mut message = error.to_string();
        message.truncate(500);
        let payload = serde_json::json!({
            "cmd_id": command.cmd_id,
            "role": command.role.as_str(),
            "operation_id": command.operation_id,
            "message": message,
        });
        if let Ok(value) = DhtValue::json(payload) {
            let _ = self.node.put(key, value).await;
        }
    }
}
