//! 核心层：错误类型与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::InspectorError;
pub use shutdown::{
    run_until_shutdown, EngineCleanup, SessionArchiveCleanup, ShutdownCleanup,
    ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
