//! 引擎进程监管
//!
//! 负责外部自动化引擎的整个生命周期：启动、等待 stderr 中的就绪标记、监听意外退出、stop 时终止。
//! 每个 supervisor 同时最多只有一个活动进程；读到的每一行通过 [`EngineEvents`] 交给上层，
//! 进程退出时同样通知上层，由上层把所有未完成调用立即判为失败。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::config::EngineSection;
use crate::core::InspectorError;
use crate::engine::channel::LineChannel;

/// 引擎进程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Ready,
    Exited,
}

/// 行来自哪个输出流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// 进程事件的接收方（RpcClient 实现）
#[async_trait]
pub trait EngineEvents: Send + Sync {
    /// 任一输出流上出现了一整行
    async fn on_line(&self, stream: StreamKind, line: &str);

    /// 当前进程意外退出
    async fn on_exit(&self, reason: String);
}

/// 启动参数
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub ready_marker: String,
    pub startup_timeout: Duration,
}

impl SupervisorOptions {
    pub fn from_config(engine: &EngineSection) -> Self {
        Self {
            program: engine.resolve_program(),
            args: engine.args.clone(),
            ready_marker: engine.ready_marker.clone(),
            startup_timeout: Duration::from_secs(engine.startup_timeout_secs),
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: EngineState,
    /// 每次 spawn 或 stop 递增；旧进程的退出监听据此判断自己是否已过期
    generation: u64,
    exit_code: Option<i32>,
}

/// 引擎进程监管者
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    events: Arc<dyn EngineEvents>,
    /// 串行化 ensure_started，保证同一时刻只有一次启动
    start_lock: Mutex<()>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions, events: Arc<dyn EngineEvents>) -> Self {
        Self {
            options,
            events,
            start_lock: Mutex::new(()),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: EngineState::NotStarted,
                generation: 0,
                exit_code: None,
            })),
            stdin: Arc::new(Mutex::new(None)),
            kill_tx: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> EngineState {
        self.lifecycle.lock().await.state
    }

    /// 最近一次退出的退出码（被信号终止时为 None）
    pub async fn exit_code(&self) -> Option<i32> {
        self.lifecycle.lock().await.exit_code
    }

    /// 确保引擎已启动且就绪；已就绪时立即返回，启动中时等待那次启动的结果
    pub async fn ensure_started(&self) -> Result<(), InspectorError> {
        if self.state().await == EngineState::Ready {
            return Ok(());
        }
        let _guard = self.start_lock.lock().await;
        if self.state().await == EngineState::Ready {
            return Ok(());
        }
        self.spawn_and_wait_ready().await
    }

    async fn spawn_and_wait_ready(&self) -> Result<(), InspectorError> {
        let program = self.options.program.display().to_string();
        tracing::info!(program = %program, args = ?self.options.args, "spawning engine");

        let mut child = Command::new(&self.options.program)
            .args(&self.options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InspectorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(InspectorError::Transport("engine stdio not captured".into()));
            }
        };

        let generation = {
            let mut lc = self.lifecycle.lock().await;
            lc.generation += 1;
            lc.state = EngineState::Starting;
            lc.exit_code = None;
            lc.generation
        };
        *self.stdin.lock().await = Some(stdin);

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(pump_lines(stdout, StreamKind::Stdout, self.events.clone(), None));
        tokio::spawn(pump_lines(
            stderr,
            StreamKind::Stderr,
            self.events.clone(),
            Some((self.options.ready_marker.clone(), ready_tx)),
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill_tx.lock().await = Some(kill_tx);
        tokio::spawn(watch_exit(
            child,
            kill_rx,
            self.lifecycle.clone(),
            self.stdin.clone(),
            self.events.clone(),
            generation,
        ));

        let timeout_ms = self.options.startup_timeout.as_millis() as u64;
        match tokio::time::timeout(self.options.startup_timeout, ready_rx).await {
            Ok(Ok(())) => {
                let mut lc = self.lifecycle.lock().await;
                if lc.generation == generation && lc.state == EngineState::Starting {
                    lc.state = EngineState::Ready;
                    tracing::info!(program = %program, "engine ready");
                    Ok(())
                } else {
                    Err(InspectorError::ProcessTerminated {
                        reason: "engine exited during startup".into(),
                    })
                }
            }
            Ok(Err(_)) => {
                self.abandon(generation).await;
                Err(InspectorError::ProcessTerminated {
                    reason: "engine exited before signalling readiness".into(),
                })
            }
            Err(_) => {
                tracing::warn!(timeout_ms, "engine did not signal readiness in time");
                self.abandon(generation).await;
                Err(InspectorError::StartupTimeout { timeout_ms })
            }
        }
    }

    /// 放弃一次失败的启动：杀掉进程并标记为 Exited
    async fn abandon(&self, generation: u64) {
        if let Some(tx) = self.kill_tx.lock().await.take() {
            let _ = tx.send(());
        }
        let mut lc = self.lifecycle.lock().await;
        if lc.generation == generation {
            lc.state = EngineState::Exited;
        }
        drop(lc);
        self.stdin.lock().await.take();
    }

    /// 写入一帧请求
    pub async fn send_line(&self, line: &str) -> Result<(), InspectorError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| InspectorError::ProcessTerminated {
            reason: "engine is not running".into(),
        })?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| InspectorError::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| InspectorError::Transport(e.to_string()))
    }

    /// 请求终止引擎；未运行时为空操作，不等待退出确认
    pub async fn stop(&self) {
        let kill = self.kill_tx.lock().await.take();
        let was_running = {
            let mut lc = self.lifecycle.lock().await;
            let running = matches!(lc.state, EngineState::Starting | EngineState::Ready);
            // 让仍在运行的退出监听过期，stop 之后它不再通知上层
            lc.generation += 1;
            if running {
                lc.state = EngineState::Exited;
            }
            running
        };
        self.stdin.lock().await.take();
        if let Some(tx) = kill {
            let _ = tx.send(());
        }
        if was_running {
            tracing::info!("engine stop requested");
        }
    }
}

/// 持续读取一个输出流，按行交给 events；stderr 上额外检测就绪标记
async fn pump_lines<R>(
    mut reader: R,
    stream: StreamKind,
    events: Arc<dyn EngineEvents>,
    mut ready: Option<(String, oneshot::Sender<()>)>,
) where
    R: AsyncRead + Unpin,
{
    let mut channel = LineChannel::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(stream = stream.as_str(), error = %e, "engine stream read failed");
                break;
            }
        };
        for line in channel.push(&buf[..n]) {
            signal_ready(&mut ready, &line);
            events.on_line(stream, &line).await;
        }
    }
    if let Some(line) = channel.finish() {
        signal_ready(&mut ready, &line);
        events.on_line(stream, &line).await;
    }
}

fn signal_ready(ready: &mut Option<(String, oneshot::Sender<()>)>, line: &str) {
    let matched = matches!(ready, Some((marker, _)) if line.contains(marker.as_str()));
    if matched {
        if let Some((_, tx)) = ready.take() {
            let _ = tx.send(());
        }
    }
}

/// 等待进程退出（或收到 kill 请求）；仍是当前代际时标记 Exited 并通知上层
async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: Arc<dyn EngineEvents>,
    generation: u64,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let code = status.as_ref().ok().and_then(|s| s.code());
    let reason = match &status {
        Ok(s) => format!("engine exited ({})", s),
        Err(e) => format!("engine wait failed: {}", e),
    };

    let current = {
        let mut lc = lifecycle.lock().await;
        lc.exit_code = code;
        if lc.generation == generation {
            lc.state = EngineState::Exited;
            true
        } else {
            false
        }
    };
    if current {
        tracing::warn!(code = ?code, "engine process exited");
        stdin.lock().await.take();
        events.on_exit(reason).await;
    } else {
        tracing::debug!(code = ?code, "stopped engine process reaped");
    }
}
