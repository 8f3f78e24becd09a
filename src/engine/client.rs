//! RPC 客户端：把并发的工具调用复用到同一个长驻引擎进程
//!
//! 每次调用分配单调递增的 id，在 PendingTable 中登记一个一次性完成句柄（oneshot），写出请求行后等待。
//! 完成路径有三条：匹配的响应、到期计时器、进程退出级联。三者都在表锁内移除条目并在持锁时发送结果，
//! 只有移除成功的一方能完成调用，所以每个调用恰好完成一次。
//! 到期计时器是独立的任务，不依附于调用方的 future：调用方被取消后条目照样在到期时移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::config::EngineSection;
use crate::core::InspectorError;
use crate::engine::channel::{parse_inbound, Ignored};
use crate::engine::protocol::{unwrap_tool_result, RpcRequest, TOOL_CALL_METHOD};
use crate::engine::supervisor::{
    EngineEvents, EngineState, ProcessSupervisor, StreamKind, SupervisorOptions,
};

type Outcome = Result<Value, InspectorError>;

/// 一个未完成的调用
struct PendingCall {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// 未完成调用表：id → 完成句柄
#[derive(Default)]
pub struct PendingTable {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, id: u64, method: &str, timeout: Duration) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().await.insert(
            id,
            PendingCall {
                method: method.to_string(),
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        rx
    }

    /// 用结果完成 id 对应的调用；id 不在表中（已超时、未知）时返回 false
    pub async fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let mut calls = self.calls.lock().await;
        match calls.remove(&id) {
            Some(call) => {
                // 在持锁期间发送：超时路径拿到锁后若发现条目已不在，结果必然已在 channel 中
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// 只移除不完成；返回是否由本次移除
    async fn remove(&self, id: u64) -> bool {
        self.calls.lock().await.remove(&id).is_some()
    }

    /// 以进程终止失败所有未完成调用，返回失败的数量
    pub async fn fail_all(&self, reason: &str) -> usize {
        let mut calls = self.calls.lock().await;
        let count = calls.len();
        for (id, call) in calls.drain() {
            tracing::debug!(id, method = %call.method, "failing pending call");
            let _ = call.tx.send(Err(InspectorError::ProcessTerminated {
                reason: reason.to_string(),
            }));
        }
        count
    }

    /// 到期：条目仍在表中时以 CallTimeout 完成它；已被响应或退出级联完成时返回 false
    pub async fn expire(&self, id: u64, timeout: Duration) -> bool {
        let mut calls = self.calls.lock().await;
        match calls.remove(&id) {
            Some(call) => {
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(id, method = %call.method, timeout_ms, "engine call timed out");
                let _ = call.tx.send(Err(InspectorError::CallTimeout {
                    id,
                    method: call.method,
                    timeout_ms,
                }));
                true
            }
            None => false,
        }
    }

    /// 为 id 挂上独立的到期计时器
    fn arm_deadline(self: &Arc<Self>, id: u64, timeout: Duration) {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(id, timeout).await;
        });
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.calls.lock().await.contains_key(&id)
    }

    /// 已过期但尚未被计时器移除的调用数（诊断用）
    pub async fn overdue(&self) -> usize {
        let now = Instant::now();
        self.calls
            .lock()
            .await
            .values()
            .filter(|c| c.deadline <= now)
            .count()
    }
}

#[async_trait]
impl EngineEvents for PendingTable {
    async fn on_line(&self, stream: StreamKind, line: &str) {
        match parse_inbound(line) {
            Ok(msg) => {
                let id = msg.id;
                let outcome = msg.response.into_outcome(id);
                if !self.resolve(id, outcome).await {
                    tracing::debug!(id, "ignoring response for unknown or expired call");
                }
            }
            Err(Ignored::Diagnostic) => {
                tracing::debug!(stream = ?stream, line = %line, "engine diagnostic");
            }
            Err(Ignored::Blank) | Err(Ignored::NoId) => {}
        }
    }

    async fn on_exit(&self, reason: String) {
        let failed = self.fail_all(&reason).await;
        if failed > 0 {
            tracing::warn!(failed, reason = %reason, "engine exit failed pending calls");
        }
    }
}

/// 引擎 RPC 客户端；独占进程的启停，由会话以 Arc 共享
pub struct RpcClient {
    supervisor: ProcessSupervisor,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn new(options: SupervisorOptions, default_timeout: Duration) -> Self {
        let pending = Arc::new(PendingTable::new());
        let supervisor = ProcessSupervisor::new(options, pending.clone());
        Self {
            supervisor,
            pending,
            next_id: AtomicU64::new(1),
            default_timeout,
        }
    }

    pub fn from_config(engine: &EngineSection) -> Self {
        Self::new(
            SupervisorOptions::from_config(engine),
            Duration::from_millis(engine.call_timeout_ms),
        )
    }

    pub async fn state(&self) -> EngineState {
        self.supervisor.state().await
    }

    /// 最近一次退出的退出码；被信号终止时为 None
    pub async fn exit_code(&self) -> Option<i32> {
        self.supervisor.exit_code().await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    pub async fn is_pending(&self, id: u64) -> bool {
        self.pending.contains(id).await
    }

    /// 下一个将被分配的 id（只读）
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// 发起一次调用；timeout 为 None 时使用默认超时
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, InspectorError> {
        self.call_with_id(method, params, timeout)
            .await
            .map(|(_, value)| value)
    }

    async fn call_with_id(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<(u64, Value), InspectorError> {
        self.supervisor.ensure_started().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let line = RpcRequest::new(id, method, &params).to_line()?;

        // 先登记再写出，避免极快的响应找不到条目
        let rx = self.pending.register(id, method, timeout).await;
        self.pending.arm_deadline(id, timeout);
        if let Err(e) = self.supervisor.send_line(&line).await {
            self.pending.remove(id).await;
            return Err(e);
        }
        tracing::debug!(id, method, "engine call sent");

        match rx.await {
            Ok(outcome) => outcome.map(|v| (id, v)),
            Err(_) => Err(InspectorError::ProcessTerminated {
                reason: "pending call dropped".into(),
            }),
        }
    }

    /// 调用具名工具并解包文本内容：能解析为 JSON 则返回结构化数据，否则返回原文
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, InspectorError> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        let (id, result) = self.call_with_id(TOOL_CALL_METHOD, params, None).await?;
        unwrap_tool_result(id, result)
    }

    /// 终止引擎并让所有未完成调用立即以 ProcessTerminated 失败
    pub async fn stop(&self) {
        self.supervisor.stop().await;
        let failed = self.pending.fail_all("engine stopped").await;
        if failed > 0 {
            tracing::info!(failed, "pending calls failed on stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_response_resolves_exactly_once() {
        let table = PendingTable::new();
        let rx = table.register(1, "ping", Duration::from_secs(1)).await;
        table
            .on_line(StreamKind::Stdout, r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#)
            .await;
        assert!(table.is_empty().await);
        // 重复的响应被忽略
        assert!(!table.resolve(1, Ok(json!("again"))).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_timeout_removal_makes_late_response_noop() {
        let table = PendingTable::new();
        let _rx = table.register(5, "slow", Duration::from_millis(1)).await;
        assert!(table.remove(5).await);
        assert!(!table.resolve(5, Ok(json!(1))).await);
        assert!(!table.remove(5).await);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_by_id() {
        let table = PendingTable::new();
        let rx1 = table.register(1, "a", Duration::from_secs(1)).await;
        let rx2 = table.register(2, "b", Duration::from_secs(1)).await;
        table.on_line(StreamKind::Stdout, r#"{"id":2,"result":"second"}"#).await;
        table.on_line(StreamKind::Stderr, "some log line").await;
        table
            .on_line(StreamKind::Stdout, r#"{"id":1,"error":{"message":"bad"}}"#)
            .await;
        assert_eq!(rx2.await.unwrap().unwrap(), json!("second"));
        assert!(matches!(
            rx1.await.unwrap(),
            Err(InspectorError::Remote { id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_exit_fails_all_pending() {
        let table = PendingTable::new();
        let rx1 = table.register(1, "a", Duration::from_secs(30)).await;
        let rx2 = table.register(2, "b", Duration::from_secs(30)).await;
        table.on_exit("engine exited (exit status: 1)".into()).await;
        assert!(table.is_empty().await);
        for rx in [rx1, rx2] {
            assert!(matches!(
                rx.await.unwrap(),
                Err(InspectorError::ProcessTerminated { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_response_before_deadline_wins() {
        let table = PendingTable::new();
        let rx = table.register(7, "tap_on", Duration::from_millis(10)).await;
        assert!(table.resolve(7, Ok(json!("done"))).await);
        // 计时器随后到期：条目已不在，不会再完成一次
        assert!(!table.expire(7, Duration::from_millis(10)).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_exit_before_deadline_reports_terminated() {
        let table = PendingTable::new();
        let rx = table.register(8, "tap_on", Duration::from_millis(10)).await;
        assert_eq!(table.fail_all("engine exited (exit status: 3)").await, 1);
        assert!(!table.expire(8, Duration::from_millis(10)).await);
        assert!(matches!(
            rx.await.unwrap(),
            Err(InspectorError::ProcessTerminated { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_completes_with_call_timeout() {
        let table = PendingTable::new();
        let rx = table.register(9, "swipe", Duration::from_millis(25)).await;
        assert!(table.expire(9, Duration::from_millis(25)).await);
        assert!(table.is_empty().await);
        assert!(!table.resolve(9, Ok(json!("late"))).await);
        assert!(matches!(
            rx.await.unwrap(),
            Err(InspectorError::CallTimeout { id: 9, timeout_ms: 25, .. })
        ));
    }

    #[tokio::test]
    async fn test_armed_deadline_removes_entry_without_caller() {
        let table = Arc::new(PendingTable::new());
        let rx = table.register(11, "ping", Duration::from_millis(30)).await;
        drop(rx);
        table.arm_deadline(11, Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_overdue_counts_expired_entries() {
        let table = PendingTable::new();
        let _a = table.register(1, "a", Duration::from_millis(0)).await;
        let _b = table.register(2, "b", Duration::from_secs(60)).await;
        assert_eq!(table.overdue().await, 1);
    }

    #[cfg(unix)]
    fn silent_engine(script: &str) -> RpcClient {
        let options = SupervisorOptions {
            program: std::path::PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            ready_marker: "READY".into(),
            startup_timeout: Duration::from_secs(2),
        };
        RpcClient::new(options, Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_timeout_against_silent_engine() {
        let client = silent_engine("echo READY >&2; cat >/dev/null");
        let start = Instant::now();
        let err = client
            .call("ping", json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, InspectorError::CallTimeout { id: 1, timeout_ms: 50, .. }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1500));
        assert!(!client.is_pending(1).await);
        assert_eq!(client.pending_count().await, 0);
        client.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_caller_does_not_leak_pending_entry() {
        let client = silent_engine("echo READY >&2; cat >/dev/null");
        let outer = tokio::time::timeout(
            Duration::from_millis(100),
            client.call("ping", json!({}), Some(Duration::from_millis(200))),
        )
        .await;
        assert!(outer.is_err());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.pending_count().await, 0);
        assert_eq!(client.pending.overdue().await, 0);
        client.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_fails_call_promptly() {
        let client = silent_engine("echo READY >&2; read line; exit 1");
        let start = Instant::now();
        let err = client.call("ping", json!({}), None).await.unwrap_err();
        assert!(matches!(err, InspectorError::ProcessTerminated { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(client.state().await, EngineState::Exited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_fails_in_flight_calls() {
        let client = Arc::new(silent_engine("echo READY >&2; cat >/dev/null"));
        let c = client.clone();
        let handle = tokio::spawn(async move { c.call("ping", json!({}), None).await });
        while client.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client.stop().await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(InspectorError::ProcessTerminated { .. })));
    }
}
