//! 引擎桥接层：进程监管、行分帧通道、JSON-RPC 客户端

pub mod channel;
pub mod client;
pub mod protocol;
pub mod supervisor;

pub use channel::{parse_inbound, Ignored, InboundMessage, LineChannel};
pub use client::{PendingTable, RpcClient};
pub use protocol::{unwrap_tool_result, RpcRequest, RpcResponse, TOOL_CALL_METHOD};
pub use supervisor::{EngineEvents, EngineState, ProcessSupervisor, StreamKind, SupervisorOptions};
