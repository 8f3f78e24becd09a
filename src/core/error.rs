//! 桥接层与巡检状态服务的错误类型
//!
//! 所有失败都以带结构化细节的类型化错误返回给直接调用方；本层不做任何自动重试，
//! 是否重试由上层编排决定（可参考 [`InspectorError::is_retryable`]）。

use std::path::PathBuf;

use thiserror::Error;

/// 引擎桥接、屏幕登记与约束存储可能出现的错误
#[derive(Error, Debug)]
pub enum InspectorError {
    /// 引擎在限定时间内没有输出就绪标记
    #[error("Engine startup timed out after {timeout_ms}ms")]
    StartupTimeout { timeout_ms: u64 },

    /// 引擎进程在调用未完成时退出（崩溃或被 stop）
    #[error("Engine process terminated: {reason}")]
    ProcessTerminated { reason: String },

    #[error("Call #{id} ({method}) timed out after {timeout_ms}ms")]
    CallTimeout {
        id: u64,
        method: String,
        timeout_ms: u64,
    },

    /// 可执行文件不存在、无权限等；不会自动重试
    #[error("Failed to spawn engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine transport error: {0}")]
    Transport(String),

    /// 引擎返回了 error 对象
    #[error("Engine error for call #{id}: {message}")]
    Remote {
        id: u64,
        code: Option<i64>,
        message: String,
    },

    #[error("Invalid engine response: {0}")]
    InvalidResponse(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid constraint path: '{path}'")]
    InvalidPath { path: String },

    #[error("Invalid constraint operation: '{operation}' (expected set or append)")]
    InvalidOperation { operation: String },

    #[error("Cannot descend into '{segment}' of '{path}': existing value is not an object")]
    NotAnObject { path: String, segment: String },

    #[error("Cannot append to '{path}': existing value is not an array")]
    NotAnArray { path: String },

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool {tool} timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },
}

impl InspectorError {
    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// 调用方可以原样重试的错误：启动超时、进程退出、单次调用超时、写入失败
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StartupTimeout { .. }
                | Self::ProcessTerminated { .. }
                | Self::CallTimeout { .. }
                | Self::Transport(_)
        )
    }

    /// 错误种类的稳定名称，用于审计日志与工具返回
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartupTimeout { .. } => "startup_timeout",
            Self::ProcessTerminated { .. } => "process_terminated",
            Self::CallTimeout { .. } => "call_timeout",
            Self::Spawn { .. } => "spawn_failed",
            Self::Transport(_) => "transport",
            Self::Remote { .. } => "remote",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NotFound { .. } => "not_found",
            Self::InvalidPath { .. } => "invalid_path",
            Self::InvalidOperation { .. } => "invalid_operation",
            Self::NotAnObject { .. } => "not_an_object",
            Self::NotAnArray { .. } => "not_an_array",
            Self::CaptureFailed(_) => "capture_failed",
            Self::Storage { .. } => "storage",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ToolTimeout { .. } => "tool_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(InspectorError::StartupTimeout { timeout_ms: 10 }.is_retryable());
        assert!(InspectorError::CallTimeout {
            id: 1,
            method: "ping".into(),
            timeout_ms: 50
        }
        .is_retryable());
        assert!(!InspectorError::InvalidPath { path: "".into() }.is_retryable());
        assert!(!InspectorError::CaptureFailed("no device".into()).is_retryable());
    }

    #[test]
    fn test_error_messages_carry_detail() {
        let err = InspectorError::CallTimeout {
            id: 7,
            method: "tools/call".into(),
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "Call #7 (tools/call) timed out after 50ms");
        assert_eq!(err.kind(), "call_timeout");

        let err = InspectorError::NotFound {
            kind: "screen",
            id: "screen_004".into(),
        };
        assert_eq!(err.to_string(), "screen not found: screen_004");
    }
}
