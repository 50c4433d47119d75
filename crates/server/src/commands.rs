#![forbid(unsafe_code)]

use crate::{TaskServer, auth, json_rpc_error, json_rpc_response};
use serde_json::{Value, json};

pub(crate) fn add_task(server: &mut TaskServer, id: Option<Value>, params: &Option<Value>) -> Value {
    let Some((owner, username)) = auth::require_add(&server.caller) else {
        return json_rpc_error(id, -32001, "not-authorized");
    };

    let text = match crate::positional_str(&id, params, 0, "text") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    let text = match tl_core::text::normalize_task_text(&text) {
        Ok(value) => value,
        Err(err) => return json_rpc_error(id, -32602, &crate::describe_text_error(&err)),
    };

    match server.store.task_insert(&owner, &username, &text) {
        Ok((task, _event)) => json_rpc_response(id, json!({ "task": crate::server::task_json(&task) })),
        Err(err) => crate::store_error_response(id, &err),
    }
}

pub(crate) fn delete_task(
    server: &mut TaskServer,
    id: Option<Value>,
    params: &Option<Value>,
) -> Value {
    let task_id = match crate::positional_str(&id, params, 0, "taskId") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    if !auth::allow_remove(&server.caller) {
        return json_rpc_error(id, -32001, "not-authorized");
    }

    // A missing id deletes nothing and reports removed: 0.
    match server.store.task_remove(&task_id) {
        Ok((removed, _event)) => json_rpc_response(id, json!({ "removed": removed })),
        Err(err) => crate::store_error_response(id, &err),
    }
}

pub(crate) fn complete_task(
    server: &mut TaskServer,
    id: Option<Value>,
    params: &Option<Value>,
) -> Value {
    let task_id = match crate::positional_str(&id, params, 0, "taskId") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    let set_checked = match crate::positional_bool(&id, params, 1, "setChecked") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    if !auth::allow_set_checked(&server.caller) {
        return json_rpc_error(id, -32001, "not-authorized");
    }

    match server.store.task_set_checked(&task_id, set_checked) {
        Ok((updated, _event)) => json_rpc_response(id, json!({ "updated": updated })),
        Err(err) => crate::store_error_response(id, &err),
    }
}
