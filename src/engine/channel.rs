//! 行分帧通道
//!
//! 引擎的 stdout/stderr 以任意大小的字节块到达；LineChannel 累积缓冲，按换行切出完整行，
//! 末尾不完整的部分留到下一块。切出的行再经 [`parse_inbound`] 分类：协议消息或被忽略的诊断文本。

use crate::engine::protocol::RpcResponse;

/// 字节块 → 完整行
#[derive(Debug, Default)]
pub struct LineChannel {
    buffer: Vec<u8>,
}

impl LineChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块字节，返回本次凑齐的所有完整行（去掉行尾 \r\n）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// 流结束时取出残留的不完整行
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
        Some(line)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// 一行未被当作协议消息的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    Blank,
    /// 非 JSON 或非对象：诊断文本
    Diagnostic,
    /// 合法 JSON 但不是对本端请求的响应：没有可用的数字 id，或带 method（对端请求、通知、回显）
    NoId,
}

/// 一行入站协议消息
#[derive(Debug)]
pub struct InboundMessage {
    pub id: u64,
    pub response: RpcResponse,
}

/// 对单行做容错分类；解析失败不是错误，只是忽略
pub fn parse_inbound(line: &str) -> Result<InboundMessage, Ignored> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Ignored::Blank);
    }
    if !trimmed.starts_with('{') {
        return Err(Ignored::Diagnostic);
    }
    let response: RpcResponse = serde_json::from_str(trimmed).map_err(|_| Ignored::Diagnostic)?;
    if response.method.is_some() {
        return Err(Ignored::NoId);
    }
    let id = response.numeric_id().ok_or(Ignored::NoId)?;
    Ok(InboundMessage { id, response })
}
