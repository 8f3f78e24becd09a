//! 面向编排方的工具箱：每个工具是一次会话操作的薄包装

pub mod constraints;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod screens;

pub use constraints::{GetConstraintsTool, UpdateConstraintTool};
pub use engine::EngineTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::{args_schema, parse_args};
pub use screens::{
    AttachFindingTool, CaptureScreenTool, ClearSessionTool, CompareScreensTool,
    InspectionReportTool, ListScreensTool,
};
