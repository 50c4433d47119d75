#![forbid(unsafe_code)]

use crate::auth::Caller;
use crate::{
    JsonRpcRequest, TaskServer, accounts, commands, json_rpc_error, json_rpc_response, subscribe,
};
use serde_json::{Value, json};
use tl_core::model::Task;
use tl_storage::SqliteStore;

impl TaskServer {
    pub(crate) fn new(store: SqliteStore) -> Self {
        Self {
            store,
            caller: Caller::Anonymous,
            session_token_hash: None,
            subscription: None,
        }
    }

    // Every request gets an answer value; the transport decides whether to
    // write it (notifications are executed but never answered).
    pub(crate) fn handle(&mut self, request: JsonRpcRequest) -> Value {
        let JsonRpcRequest {
            method, id, params, ..
        } = request;

        match method.as_str() {
            "hello" => json_rpc_response(
                id,
                json!({
                    "name": crate::SERVER_NAME,
                    "version": crate::SERVER_VERSION,
                    "protocol": crate::PROTOCOL_NAME,
                    "time": crate::now_rfc3339(),
                }),
            ),
            "ping" => json_rpc_response(id, json!({})),
            "register" => accounts::register(self, id, &params),
            "login" => accounts::login(self, id, &params),
            "resume" => accounts::resume(self, id, &params),
            "logout" => accounts::logout(self, id),
            "whoami" => accounts::whoami(self, id),
            "addTask" => commands::add_task(self, id, &params),
            "deleteTask" => commands::delete_task(self, id, &params),
            "completeTask" => commands::complete_task(self, id, &params),
            "subscribe" => subscribe::subscribe(self, id),
            "unsubscribe" => subscribe::unsubscribe(self, id),
            _ => json_rpc_error(id, -32601, &format!("Method not found: {method}")),
        }
    }
}

pub(crate) fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "text": task.text,
        "createdAt": crate::ts_ms_to_rfc3339(task.created_at_ms),
        "createdAtMs": task.created_at_ms,
        "checked": task.checked,
        "owner": task.owner,
        "username": task.username,
    })
}
