#![forbid(unsafe_code)]

use crate::json_rpc_error;
use serde_json::Value;

// Command params are positional arrays: ["text"], ["TASK-000001", true], ...

pub(crate) fn positional_str(
    id: &Option<Value>,
    params: &Option<Value>,
    index: usize,
    name: &str,
) -> Result<String, Value> {
    match positional(id, params, index, name)? {
        Value::String(value) => Ok(value.clone()),
        _ => Err(json_rpc_error(
            id.clone(),
            -32602,
            &format!("{name} must be a string (params[{index}])"),
        )),
    }
}

pub(crate) fn positional_bool(
    id: &Option<Value>,
    params: &Option<Value>,
    index: usize,
    name: &str,
) -> Result<bool, Value> {
    match positional(id, params, index, name)? {
        Value::Bool(value) => Ok(*value),
        _ => Err(json_rpc_error(
            id.clone(),
            -32602,
            &format!("{name} must be a boolean (params[{index}])"),
        )),
    }
}

fn positional<'a>(
    id: &Option<Value>,
    params: &'a Option<Value>,
    index: usize,
    name: &str,
) -> Result<&'a Value, Value> {
    let Some(Value::Array(items)) = params else {
        return Err(json_rpc_error(
            id.clone(),
            -32602,
            "params must be an array",
        ));
    };
    match items.get(index) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(json_rpc_error(
            id.clone(),
            -32602,
            &format!("{name} is required (params[{index}])"),
        )),
    }
}
