//! 优雅关闭
//!
//! 宿主进程收到 Ctrl+C / SIGTERM 或主动请求退出时，依次执行会话注册的清理任务：
//! 先把非空的登记表归档，再终止引擎子进程（未完成调用随之以 ProcessTerminated 失败）。

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::RpcClient;
use crate::session::InspectionSession;

/// 触发关闭的原因；只记录第一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Requested(String),
}

/// 关闭信号：一个取消 token 加上首次触发的原因
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子任务可持有的 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason.clone()).is_ok() {
            tracing::info!(reason = ?reason, "shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与（unix 下的）SIGTERM
    pub fn listen_for_signals(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.trigger(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    if sigterm.recv().await.is_some() {
                        manager.trigger(ShutdownReason::Terminate);
                    }
                }
            });
        }
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务，每个任务单独限时
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    task_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            task_timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// 执行全部清理，返回失败或超时的任务名
    pub async fn run_cleanup(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for task in &self.tasks {
            let name = task.name();
            match tokio::time::timeout(self.task_timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(task = name, "cleanup done"),
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "cleanup failed");
                    failed.push(name);
                }
                Err(_) => {
                    tracing::warn!(task = name, timeout_secs = self.task_timeout.as_secs(), "cleanup timed out");
                    failed.push(name);
                }
            }
        }
        failed
    }
}

/// 终止引擎子进程
pub struct EngineCleanup {
    client: Arc<RpcClient>,
}

impl EngineCleanup {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for EngineCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.client.stop().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "engine"
    }
}

/// 登记表非空时归档到会话默认位置
pub struct SessionArchiveCleanup {
    session: Arc<InspectionSession>,
}

impl SessionArchiveCleanup {
    pub fn new(session: Arc<InspectionSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SessionArchiveCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if self.session.registry().is_empty().await {
            return Ok(());
        }
        let outcome = self.session.close(true).await?;
        tracing::info!(cleared = outcome.cleared, "session archived on shutdown");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "session_archive"
    }
}

/// 运行 app 直到它结束或关闭被触发，随后执行清理；返回失败的清理任务名
pub async fn run_until_shutdown<F>(
    manager: Arc<ShutdownManager>,
    coordinator: &ShutdownCoordinator,
    app: F,
) -> Vec<&'static str>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = app => tracing::info!("app finished"),
        _ = manager.triggered() => tracing::info!(reason = ?manager.reason(), "shutting down"),
    }
    coordinator.run_cleanup().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for Counting {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("disk full");
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    struct Stuck;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Stuck {
        async fn cleanup(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[test]
    fn test_first_reason_is_kept() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_triggered());
        manager.trigger(ShutdownReason::Requested("tool".into()));
        manager.trigger(ShutdownReason::Interrupt);
        assert!(manager.is_triggered());
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(&ShutdownReason::Requested("tool".into())));
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failures_and_timeouts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.register(Counting { name: "archive", runs: runs.clone(), fail: true });
        coordinator.register(Stuck);
        coordinator.register(Counting { name: "engine", runs: runs.clone(), fail: false });

        let failed = coordinator.run_cleanup().await;
        assert_eq!(failed, vec!["archive", "stuck"]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_trigger_interrupts_app_then_cleans_up() {
        let manager = Arc::new(ShutdownManager::new());
        manager.listen_for_signals();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register(Counting { name: "engine", runs: runs.clone(), fail: false });

        let trigger = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger(ShutdownReason::Terminate);
        });
        let failed = run_until_shutdown(manager.clone(), &coordinator, std::future::pending()).await;
        assert!(failed.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reason(), Some(&ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn test_engine_cleanup_on_idle_client() {
        let client = Arc::new(RpcClient::new(
            crate::engine::SupervisorOptions {
                program: "maestro-not-installed".into(),
                args: vec![],
                ready_marker: "ready".into(),
                startup_timeout: Duration::from_secs(1),
            },
            Duration::from_secs(1),
        ));
        EngineCleanup::new(client.clone()).cleanup().await.unwrap();
        assert_eq!(client.pending_count().await, 0);
    }
}
