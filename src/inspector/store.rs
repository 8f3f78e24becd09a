//! 整文档 JSON 持久化：读全部 / 覆盖写全部

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::InspectorError;

/// 读取 JSON 文档；文件不存在时返回 Ok(None)
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InspectorError> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(InspectorError::storage(path, e)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| InspectorError::storage(path, e))
}

/// 覆盖写入 JSON 文档；父目录不存在时自动创建。先写临时文件再 rename，读方不会看到半个文档
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InspectorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| InspectorError::storage(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|e| InspectorError::storage(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| InspectorError::storage(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| InspectorError::storage(path, e))
}
