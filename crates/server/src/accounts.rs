#![forbid(unsafe_code)]

use crate::auth::Caller;
use crate::{TaskServer, json_rpc_error, json_rpc_response};
use serde_json::{Value, json};
use tl_storage::{StoreError, UserRow};

pub(crate) fn register(
    server: &mut TaskServer,
    id: Option<Value>,
    params: &Option<Value>,
) -> Value {
    let username = match crate::positional_str(&id, params, 0, "username") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    let password = match crate::positional_str(&id, params, 1, "password") {
        Ok(value) => value,
        Err(resp) => return resp,
    };

    let username = match tl_core::ids::Username::try_new(username) {
        Ok(value) => value,
        Err(err) => return json_rpc_error(id, -32602, &crate::describe_username_error(&err)),
    };
    if password.is_empty() {
        return json_rpc_error(id, -32602, "password must not be empty");
    }

    let salt = crate::random_hex32();
    let password_hash = crate::password_hash(&salt, &password);
    let user = match server
        .store
        .user_create(username.as_str(), &password_hash, &salt)
    {
        Ok(user) => user,
        Err(StoreError::UsernameTaken) => {
            return json_rpc_error(id, -32602, "username already taken");
        }
        Err(err) => return crate::store_error_response(id, &err),
    };

    // Registration also signs the new user in on this connection.
    bind_session(server, id, user)
}

pub(crate) fn login(server: &mut TaskServer, id: Option<Value>, params: &Option<Value>) -> Value {
    let username = match crate::positional_str(&id, params, 0, "username") {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    let password = match crate::positional_str(&id, params, 1, "password") {
        Ok(value) => value,
        Err(resp) => return resp,
    };

    // Unknown username and wrong password answer identically.
    let user = match server.store.user_by_username(username.trim()) {
        Ok(Some(user)) => user,
        Ok(None) => return json_rpc_error(id, -32002, "invalid credentials"),
        Err(err) => return crate::store_error_response(id, &err),
    };
    if crate::password_hash(&user.salt, &password) != user.password_hash {
        return json_rpc_error(id, -32002, "invalid credentials");
    }

    bind_session(server, id, user)
}

pub(crate) fn resume(server: &mut TaskServer, id: Option<Value>, params: &Option<Value>) -> Value {
    let token = match crate::positional_str(&id, params, 0, "session_token") {
        Ok(value) => value,
        Err(resp) => return resp,
    };

    let token_hash = crate::sha256_hex(&token);
    let user = match server.store.session_user(&token_hash) {
        Ok(Some(user)) => user,
        Ok(None) => return json_rpc_error(id, -32003, "invalid session"),
        Err(err) => return crate::store_error_response(id, &err),
    };

    server.caller = Caller::User {
        id: user.id.clone(),
        username: user.username.clone(),
    };
    server.session_token_hash = Some(token_hash);
    json_rpc_response(
        id,
        json!({ "user_id": user.id, "username": user.username }),
    )
}

pub(crate) fn logout(server: &mut TaskServer, id: Option<Value>) -> Value {
    if let Some(token_hash) = server.session_token_hash.take()
        && let Err(err) = server.store.session_delete(&token_hash)
    {
        return crate::store_error_response(id, &err);
    }
    // Logging out twice is a no-op, not an error.
    server.caller = Caller::Anonymous;
    json_rpc_response(id, json!({}))
}

pub(crate) fn whoami(server: &TaskServer, id: Option<Value>) -> Value {
    match &server.caller {
        Caller::Anonymous => json_rpc_response(id, json!({ "authenticated": false })),
        Caller::User { id: user_id, username } => json_rpc_response(
            id,
            json!({ "authenticated": true, "user_id": user_id, "username": username }),
        ),
    }
}

// Mints a fresh session token, persists its hash and binds the connection to
// the user. The raw token crosses the wire exactly once, in this response.
fn bind_session(server: &mut TaskServer, id: Option<Value>, user: UserRow) -> Value {
    let token = crate::random_hex32();
    let token_hash = crate::sha256_hex(&token);
    if let Err(err) = server.store.session_create(&token_hash, &user.id) {
        return crate::store_error_response(id, &err);
    }

    server.caller = Caller::User {
        id: user.id.clone(),
        username: user.username.clone(),
    };
    server.session_token_hash = Some(token_hash);

    json_rpc_response(
        id,
        json!({
            "user_id": user.id,
            "username": user.username,
            "session_token": token,
        }),
    )
}
