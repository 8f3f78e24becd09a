//! Maestro Inspector - 移动端界面巡检的引擎桥接与状态服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭
//! - **engine**: Maestro 引擎子进程监管与 JSON-RPC 行协议客户端
//! - **inspector**: 屏幕去重登记表、发现、设计约束存储、汇总报告
//! - **observability**: tracing 初始化
//! - **session**: 巡检会话，组装上述组件
//! - **tools**: 面向编排方的工具与执行器

pub mod config;
pub mod core;
pub mod engine;
pub mod inspector;
pub mod observability;
pub mod session;
pub mod tools;

pub use crate::core::InspectorError;
pub use session::InspectionSession;
