use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::metrics::AgentMetrics;
use crate::timeline::event::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardedOperation {
    Network,
    Database,
    FileSystem,
    SystemService,
    Ipc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

/// One guarded operation observed while the sandbox was active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedOperation {
    pub ts_ms: u64,
    pub operation: GuardedOperation,
    pub access: Access,
    pub description: String,
    /// False for permitted-but-logged reads.
    pub blocked: bool,
}

/// Hermetic replay guard. While active, network, system-service, and IPC
/// operations are blocked outright; database and file-system reads are
/// permitted but logged, writes blocked. Inactive, every check is a no-op.
///
/// One instance per runtime; it is not a process global.
pub struct Sandbox {
    active: AtomicBool,
    log: Mutex<Vec<BlockedOperation>>,
    metrics: Arc<AgentMetrics>,
}

impl Sandbox {
    pub fn new(metrics: Arc<AgentMetrics>) -> Self {
        Self {
            active: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
        tracing::debug!("replay sandbox activated");
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        tracing::debug!("replay sandbox deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the described operation must be refused right now. Always
    /// false while inactive; nothing is logged then.
    pub fn should_block(&self, operation: GuardedOperation, access: Access, desc: &str) -> bool {
        if !self.is_active() {
            return false;
        }

        let blocked = match operation {
            GuardedOperation::Network | GuardedOperation::SystemService | GuardedOperation::Ipc => {
                true
            }
            GuardedOperation::Database | GuardedOperation::FileSystem => access == Access::Write,
        };

        self.log.lock().push(BlockedOperation {
            ts_ms: now_ms(),
            operation,
            access,
            description: desc.to_string(),
            blocked,
        });
        if blocked {
            self.metrics.incr_blocked_operations();
            tracing::warn!(operation = ?operation, "operation blocked during replay");
        } else {
            tracing::debug!(operation = ?operation, "operation observed during replay");
        }
        blocked
    }

    /// Copy of the operation log, blocked and observed alike.
    pub fn operation_log(&self) -> Vec<BlockedOperation> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

macro_rules! guard {
    ($name:ident, $op:expr) => {
        #[derive(Clone)]
        pub struct $name {
            sandbox: Arc<Sandbox>,
        }

        impl $name {
            pub fn new(sandbox: Arc<Sandbox>) -> Self {
                Self { sandbox }
            }

            pub fn check_read(&self, desc: &str) -> bool {
                self.sandbox.should_block($op, Access::Read, desc)
            }

            pub fn check_write(&self, desc: &str) -> bool {
                self.sandbox.should_block($op, Access::Write, desc)
            }
        }
    };
}

guard!(NetworkGuard, GuardedOperation::Network);
guard!(DatabaseGuard, GuardedOperation::Database);
guard!(FileSystemGuard, GuardedOperation::FileSystem);
guard!(SystemServiceGuard, GuardedOperation::SystemService);
guard!(IpcGuard, GuardedOperation::Ipc);

impl NetworkGuard {
    /// True iff the request must be refused, which is exactly "the sandbox
    /// is active".
    pub fn check_request(&self, desc: &str) -> bool {
        self.check_write(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Arc<Sandbox> {
        Arc::new(Sandbox::new(Arc::new(AgentMetrics::new())))
    }

    #[test]
    fn inactive_sandbox_blocks_nothing() {
        let sandbox = sandbox();
        let guard = NetworkGuard::new(sandbox.clone());
        assert!(!guard.check_request("GET /"));
        assert!(!sandbox.should_block(GuardedOperation::Database, Access::Write, "INSERT"));
        assert!(sandbox.operation_log().is_empty());
    }

    #[test]
    fn active_sandbox_blocks_network_always() {
        let sandbox = sandbox();
        sandbox.activate();
        let guard = NetworkGuard::new(sandbox.clone());
        assert!(guard.check_request("GET /"));
        assert!(guard.check_read("DNS lookup"));
        sandbox.deactivate();
        assert!(!guard.check_request("GET /"));
    }

    #[test]
    fn reads_are_logged_but_permitted() {
        let sandbox = sandbox();
        sandbox.activate();
        let db = DatabaseGuard::new(sandbox.clone());
        let fs = FileSystemGuard::new(sandbox.clone());

        assert!(!db.check_read("SELECT * FROM items"));
        assert!(db.check_write("INSERT INTO items"));
        assert!(!fs.check_read("read config"));
        assert!(fs.check_write("write cache"));

        let log = sandbox.operation_log();
        assert_eq!(log.len(), 4);
        assert_eq!(log.iter().filter(|op| op.blocked).count(), 2);
        assert_eq!(log.iter().filter(|op| !op.blocked).count(), 2);
    }

    #[test]
    fn system_service_and_ipc_block_both_accesses() {
        let sandbox = sandbox();
        sandbox.activate();
        let svc = SystemServiceGuard::new(sandbox.clone());
        let ipc = IpcGuard::new(sandbox.clone());
        assert!(svc.check_read("query location"));
        assert!(svc.check_write("schedule alarm"));
        assert!(ipc.check_read("bind channel"));
        assert!(ipc.check_write("send message"));
    }

    #[test]
    fn blocked_operations_count_as_metrics() {
        let metrics = Arc::new(AgentMetrics::new());
        let sandbox = Sandbox::new(metrics.clone());
        sandbox.activate();
        sandbox.should_block(GuardedOperation::Network, Access::Write, "POST /");
        sandbox.should_block(GuardedOperation::Database, Access::Read, "SELECT 1");
        assert_eq!(metrics.snapshot().blocked_operations, 1);
    }
}
