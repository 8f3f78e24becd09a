//! 工具参数的 JSON Schema 生成与解析（schemars 自动从参数结构体生成）

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::InspectorError;

/// 参数结构体的 JSON Schema，用作 Tool::parameters_schema
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 把调用方传入的 JSON 解析为参数结构体；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, InspectorError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| InspectorError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Args {
        /// 屏幕 id
        screen_id: String,
        #[serde(default)]
        include_findings: bool,
    }

    #[test]
    fn test_schema_lists_properties() {
        let schema = args_schema::<Args>();
        assert!(schema["properties"]["screen_id"].is_object());
        assert_eq!(schema["required"], serde_json::json!(["screen_id"]));
    }

    #[test]
    fn test_parse_args_errors_are_typed() {
        assert!(matches!(
            parse_args::<Args>(serde_json::json!({"include_findings": true})),
            Err(InspectorError::InvalidArguments(_))
        ));
        let args: Args = parse_args(serde_json::json!({"screen_id": "screen_001"})).unwrap();
        assert_eq!(args.screen_id, "screen_001");
    }
}
