#![forbid(unsafe_code)]

use crate::{TaskServer, auth, json_rpc_notification, json_rpc_response};
use serde_json::{Value, json};
use tl_storage::{EVENT_TASK_ADDED, EVENT_TASK_CHECKED, EVENT_TASK_REMOVED, EventRow, StoreError};

const EVENT_BATCH_LIMIT: usize = 256;

// One live feed per connection. Owner None means the subscriber was anonymous
// at subscribe time: an empty snapshot and no deltas until they re-subscribe
// with an identity.
pub(crate) struct Subscription {
    owner: Option<String>,
    cursor: i64,
}

// Replaces any previous feed on this connection. The snapshot and the delta
// cursor come from one storage transaction, so nothing falls between them.
pub(crate) fn subscribe(server: &mut TaskServer, id: Option<Value>) -> Value {
    match server.caller.user_id().map(str::to_string) {
        Some(owner) => {
            let (tasks, last_seq) = match server.store.snapshot_for_owner(&owner) {
                Ok(snapshot) => snapshot,
                Err(err) => return crate::store_error_response(id, &err),
            };
            server.subscription = Some(Subscription {
                owner: Some(owner),
                cursor: last_seq,
            });
            let incomplete = tl_core::view::incomplete_count(&tasks);
            let tasks: Vec<Value> = tasks.iter().map(crate::server::task_json).collect();
            json_rpc_response(
                id,
                json!({
                    "subscribed": true,
                    "tasks": tasks,
                    "incompleteCount": incomplete,
                    "last_event_seq": last_seq,
                }),
            )
        }
        None => {
            let last_seq = match server.store.last_event_seq() {
                Ok(value) => value,
                Err(err) => return crate::store_error_response(id, &err),
            };
            server.subscription = Some(Subscription {
                owner: None,
                cursor: last_seq,
            });
            json_rpc_response(
                id,
                json!({
                    "subscribed": false,
                    "tasks": [],
                    "incompleteCount": 0,
                    "last_event_seq": last_seq,
                }),
            )
        }
    }
}

pub(crate) fn unsubscribe(server: &mut TaskServer, id: Option<Value>) -> Value {
    server.subscription = None;
    json_rpc_response(id, json!({}))
}

// Drains events past the cursor into tasks/delta notifications. The cursor
// advances over events that fail the read gate too; a caller whose identity
// changed re-subscribes to resync from a fresh snapshot.
pub(crate) fn pump(server: &mut TaskServer) -> Result<Vec<Value>, StoreError> {
    let Some(subscription) = server.subscription.as_ref() else {
        return Ok(Vec::new());
    };
    let Some(owner) = subscription.owner.clone() else {
        return Ok(Vec::new());
    };
    let mut cursor = subscription.cursor;

    let events = server
        .store
        .events_for_owner(&owner, cursor, EVENT_BATCH_LIMIT)?;
    let mut notifications = Vec::new();
    for event in &events {
        cursor = event.seq;
        // Every pushed delta passes the read gate.
        if !auth::can_read(&server.caller, &event.owner) {
            continue;
        }
        if let Some(notification) = delta_notification(event) {
            notifications.push(notification);
        }
    }

    if let Some(subscription) = server.subscription.as_mut() {
        subscription.cursor = cursor;
    }
    Ok(notifications)
}

fn delta_notification(event: &EventRow) -> Option<Value> {
    let kind = match event.event_type.as_str() {
        EVENT_TASK_ADDED => "added",
        EVENT_TASK_CHECKED => "changed",
        EVENT_TASK_REMOVED => "removed",
        _ => return None,
    };

    let mut params = json!({
        "seq": event.seq,
        "kind": kind,
        "taskId": event.task_id,
    });
    let payload: Value = serde_json::from_str(&event.payload_json).unwrap_or(Value::Null);
    if kind == "added" {
        params["task"] = added_task_json(&payload);
    }
    if kind == "changed" {
        params["checked"] = payload.get("checked").cloned().unwrap_or(Value::Null);
    }
    Some(json_rpc_notification("tasks/delta", params))
}

// Stored payloads carry the storage field names; the wire uses the
// client-facing ones.
fn added_task_json(payload: &Value) -> Value {
    let created_at_ms = payload
        .get("created_at_ms")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    json!({
        "id": payload.get("id").cloned().unwrap_or(Value::Null),
        "text": payload.get("text").cloned().unwrap_or(Value::Null),
        "createdAt": crate::ts_ms_to_rfc3339(created_at_ms),
        "createdAtMs": created_at_ms,
        "checked": payload.get("checked").cloned().unwrap_or(Value::Null),
        "owner": payload.get("owner").cloned().unwrap_or(Value::Null),
        "username": payload.get("username").cloned().unwrap_or(Value::Null),
    })
}
