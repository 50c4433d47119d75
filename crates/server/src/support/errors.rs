#![forbid(unsafe_code)]

use crate::json_rpc_error;
use serde_json::Value;
use tl_core::ids::UsernameError;
use tl_core::text::{MAX_TASK_TEXT_BYTES, TaskTextError};
use tl_storage::StoreError;

pub(crate) fn store_error_response(id: Option<Value>, err: &StoreError) -> Value {
    json_rpc_error(id, -32000, &format!("store error: {err}"))
}

pub(crate) fn describe_username_error(err: &UsernameError) -> String {
    match err {
        UsernameError::Empty => "username must not be empty".to_string(),
        UsernameError::TooLong => "username is too long (max 32 bytes)".to_string(),
        UsernameError::InvalidFirstChar => {
            "username must start with an ascii letter or digit".to_string()
        }
        UsernameError::InvalidChar { ch, index } => {
            format!("username has an invalid character {ch:?} at index {index}")
        }
    }
}

pub(crate) fn describe_text_error(err: &TaskTextError) -> String {
    match err {
        TaskTextError::Empty => "text must not be empty".to_string(),
        TaskTextError::TooLong => {
            format!("text is too long (max {MAX_TASK_TEXT_BYTES} bytes)")
        }
    }
}
