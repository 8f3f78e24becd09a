//! 模拟自动化引擎（用于测试，无需真机）
//!
//! 行为与真实引擎的 stdio 服务端一致：stderr 打印就绪标记，stdout 逐行输出 JSON-RPC 响应。
//! 参数：
//! - `--no-ready`：从不打印就绪标记
//! - `--ready-delay-ms N`：延迟 N 毫秒后再打印就绪标记
//!
//! 方法：ping / echo / sleep / silent / fail / crash / tools/call。

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const READY_LINE: &str = "MCP server ready on stdio";

struct Options {
    ready: bool,
    ready_delay: Duration,
}

fn parse_options() -> Options {
    let mut options = Options {
        ready: true,
        ready_delay: Duration::ZERO,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--no-ready" => options.ready = false,
            "--ready-delay-ms" => {
                let ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                options.ready_delay = Duration::from_millis(ms);
            }
            _ => {}
        }
    }
    options
}

fn text_content(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "isError": is_error,
    })
}

/// tools/call 的模拟工具
fn call_tool(params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name {
        "echo_text" => {
            let text = arguments.get("text").and_then(Value::as_str).unwrap_or_default();
            text_content(text, false)
        }
        "json_tool" => text_content(json!({ "tool": "json_tool", "arguments": arguments }).to_string(), false),
        "fail_tool" => text_content("element not found", true),
        "inspect_view_hierarchy" => text_content(
            "<hierarchy><node text=\"Login\" resource-id=\"login_button\"/></hierarchy>",
            false,
        ),
        other => text_content(format!("unknown tool: {}", other), true),
    }
}

/// 处理一条请求；返回 None 表示不回复
async fn handle(request: Value) -> Option<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "ping" => json!("pong"),
        "echo" => params,
        "sleep" => {
            let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(100);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            json!({ "slept_ms": ms })
        }
        "silent" => return None,
        "fail" => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32000, "message": "requested failure" },
            }))
        }
        "tools/call" => call_tool(&params),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {}", other) },
            }))
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = parse_options();

    if options.ready {
        tokio::time::sleep(options.ready_delay).await;
        eprintln!("{}", READY_LINE);
    }

    // 所有输出经单一写者串行化，响应按完成顺序写出（可乱序）
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            // 故意拆成两次写入，调用方需要自行拼接半行
            let bytes = line.as_bytes();
            let mid = bytes.len() / 2;
            if stdout.write_all(&bytes[..mid]).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
            if stdout.write_all(&bytes[mid..]).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let _ = out_tx.send("mock engine diagnostics: stdout attached\n".to_string());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                eprintln!("mock engine: ignoring malformed line");
                continue;
            }
        };
        if request.get("method").and_then(Value::as_str) == Some("crash") {
            eprintln!("mock engine: crash requested");
            std::process::exit(3);
        }
        let tx = out_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle(request).await {
                let _ = tx.send(format!("{}\n", response));
            }
        });
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
