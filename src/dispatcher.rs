//! Dispatcher (C8): the per-frame handler table. One `dispatch` call per
//! received line; each handler resolves the acting user from
//! [`crate::session::SessionRegistry`], calls into [`crate::messaging::MessagingCore`]
//! or [`crate::repo`], and writes its reply (and any fan-out pushes) back
//! through the registry rather than returning a value — a frame can need
//! to notify more than one connection (recall, friend requests, chat
//! delivery), which a single return value can't express.
//!
//! Field names and response shapes are grounded line-by-line on
//! `examples/original_source/src/server/ChatServer.cpp` and
//! `ChatServer.chat.cpp`/`ChatServer.message.cpp`. Two deliberate
//! deviations are documented in DESIGN.md: the status convention on
//! `RECALL_MESSAGE_RESPONSE`/`MARK_MESSAGE_READ_RESPONSE` is normalized to
//! the spec's numeric `0`/`1` instead of the original's stray
//! `status=success` string, and `ACCEPT_FRIEND_REQUEST`/`REJECT_FRIEND_REQUEST`/
//! `GET_FRIEND_REQUESTS` use the supplemental wire codes added in
//! `protocol::message_type` since the original's own header never assigned
//! them any.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::message::{Message, MessageKind};
use crate::protocol::{self, message_type, Frame};
use crate::repo;
use crate::repo::users::RegisterOutcome;
use crate::session::ConnectionId;
use crate::state::AppState;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

async fn reply(state: &AppState, conn_id: ConnectionId, frame: Frame) {
    state.sessions.send_to(conn_id, protocol::encode(&frame)).await;
}

/// Sends to `user_id`'s live connection, if any. Returns whether it was
/// delivered — callers that need to fall back to the offline queue decide
/// that in [`crate::messaging::MessagingCore`], not here.
async fn push(state: &AppState, user_id: i64, frame: Frame) -> bool {
    state.sessions.send_to_user(user_id, protocol::encode(&frame)).await
}

async fn error_reply(state: &AppState, conn_id: ConnectionId, message: impl Into<String>) {
    reply(state, conn_id, Frame::new(message_type::ERROR).with("message", message.into())).await;
}

/// Rejects values that would break the wire format's lack of escaping
/// (spec §6.1/§9: `;`, `=`, and newlines in user-supplied content must be
/// rejected, not silently mis-parsed on the next round trip).
async fn reject_unsafe(state: &AppState, conn_id: ConnectionId, field: &str, value: &str) -> bool {
    if protocol::contains_unsafe_char(value) {
        error_reply(state, conn_id, format!("{field} may not contain ';', '=', or a newline")).await;
        true
    } else {
        false
    }
}

async fn require_login(state: &AppState, conn_id: ConnectionId, action: &str) -> Option<i64> {
    match state.sessions.current_user(conn_id).await {
        Some(uid) => Some(uid),
        None => {
            error_reply(state, conn_id, format!("You must be logged in to {action}")).await;
            None
        }
    }
}

/// Resolves a friend/target identifier that may be a numeric user id or a
/// username, matching every handler in the original that accepts either.
async fn resolve_user(state: &AppState, identifier: &str) -> Option<repo::users::UserRow> {
    if let Ok(id) = identifier.parse::<i64>() {
        if let Ok(user) = repo::users::find_by_id(&state.pool, id).await {
            return user;
        }
    }
    repo::users::find_by_username(&state.pool, identifier).await.ok().flatten()
}

fn user_summary_json(id: i64, username: &str, online: bool) -> serde_json::Value {
    json!({ "id": id, "username": username, "online": online })
}

pub async fn dispatch(state: &AppState, conn_id: ConnectionId, frame: Frame) {
    state.sessions.touch(conn_id).await;
    debug!(conn_id, msg_type = frame.msg_type, "dispatching frame");

    match frame.msg_type {
        message_type::LOGIN_REQUEST => handle_login(state, conn_id, &frame).await,
        message_type::LOGOUT_REQUEST => handle_logout(state, conn_id, &frame).await,
        message_type::HEARTBEAT_REQUEST => handle_heartbeat(state, conn_id).await,
        message_type::VERIFY_CODE_REQUEST => handle_verify_code_request(state, conn_id, &frame).await,
        message_type::REGISTER_REQUEST => handle_register(state, conn_id, &frame).await,
        message_type::PRIVATE_CHAT => handle_private_chat(state, conn_id, &frame).await,
        message_type::GROUP_CHAT => handle_group_chat(state, conn_id, &frame).await,
        message_type::CREATE_GROUP => handle_create_group(state, conn_id, &frame).await,
        message_type::JOIN_GROUP => handle_join_group(state, conn_id, &frame).await,
        message_type::LEAVE_GROUP => handle_leave_group(state, conn_id, &frame).await,
        message_type::GET_USER_LIST => handle_get_user_list(state, conn_id).await,
        message_type::GET_GROUP_LIST => handle_get_group_list(state, conn_id).await,
        message_type::GET_GROUP_MEMBERS => handle_get_group_members(state, conn_id, &frame).await,
        message_type::GET_USER_FRIENDS => handle_get_user_friends(state, conn_id).await,
        message_type::ADD_FRIEND_REQUEST => handle_add_friend_request(state, conn_id, &frame).await,
        message_type::ACCEPT_FRIEND_REQUEST => handle_accept_friend_request(state, conn_id, &frame).await,
        message_type::REJECT_FRIEND_REQUEST => handle_reject_friend_request(state, conn_id, &frame).await,
        message_type::GET_FRIEND_REQUESTS => handle_get_friend_requests(state, conn_id).await,
        message_type::GET_CHAT_HISTORY => handle_get_chat_history(state, conn_id, &frame).await,
        message_type::RECALL_MESSAGE => handle_recall_message(state, conn_id, &frame).await,
        message_type::MARK_MESSAGE_READ => handle_mark_message_read(state, conn_id, &frame).await,
        other => {
            warn!(conn_id, msg_type = other, "unrecognized message type");
            error_reply(state, conn_id, "Unrecognized message type").await;
        }
    }
}

// --- session lifecycle ----------------------------------------------

async fn handle_login(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let (Some(username), Some(password)) = (frame.get("username"), frame.get("password")) else {
        reply(
            state,
            conn_id,
            Frame::new(message_type::LOGIN_RESPONSE)
                .with("status", "1")
                .with("errorMsg", "Missing username or password"),
        )
        .await;
        return;
    };

    let user_id = match repo::users::verify_credentials(&state.pool, username, password).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::LOGIN_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", "Invalid username or password"),
            )
            .await;
            return;
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::LOGIN_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", "System error, please try again later"),
            )
            .await;
            return;
        }
    };

    let Ok(Some(user)) = repo::users::find_by_id(&state.pool, user_id).await else {
        reply(
            state,
            conn_id,
            Frame::new(message_type::LOGIN_RESPONSE)
                .with("status", "1")
                .with("errorMsg", "System error, please try again later"),
        )
        .await;
        return;
    };

    if let Some(evicted) = state.sessions.bind(user_id, conn_id).await {
        reply(
            state,
            evicted,
            Frame::new(message_type::ERROR).with("errorMsg", "Your account logged in elsewhere"),
        )
        .await;
        state.sessions.remove_connection(evicted).await;
    }
    let _ = state.messaging.mark_online(user_id).await;

    let offline_count = state.messaging.offline_message_count(user_id).await.unwrap_or(0);

    let mut response = Frame::new(message_type::LOGIN_RESPONSE)
        .with("status", "0")
        .with("userId", user_id.to_string())
        .with("username", user.username.clone())
        .with("email", user.email.clone());
    if !user.avatar.is_empty() {
        response = response.with("avatar", user.avatar.clone());
    }
    if offline_count > 0 {
        response = response.with("offlineMsgCount", offline_count.to_string());
    }
    reply(state, conn_id, response).await;

    if offline_count > 0 {
        flush_offline_messages(state, conn_id, user_id).await;
    }
}

async fn flush_offline_messages(state: &AppState, conn_id: ConnectionId, user_id: i64) {
    let Ok(messages) = state.messaging.take_offline_messages(user_id).await else {
        return;
    };
    for msg in messages {
        let Ok(Some(sender)) = repo::users::find_by_id(&state.pool, msg.from).await else {
            continue;
        };
        let msg_type = match msg.kind {
            MessageKind::Private => message_type::PRIVATE_CHAT,
            MessageKind::Group => message_type::GROUP_CHAT,
        };
        let mut out = Frame::new(msg_type)
            .with("fromUserId", msg.from.to_string())
            .with("fromUsername", sender.username)
            .with("content", msg.content.clone())
            .with("timestamp", msg.timestamp.to_string())
            .with("offline", "true");
        if matches!(msg.kind, MessageKind::Group) {
            out = out.with("groupId", msg.to.to_string());
        }
        reply(state, conn_id, out).await;
    }
}

async fn handle_logout(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(user_id) = frame.get("userId").and_then(|v| v.parse::<i64>().ok()) else {
        reply(
            state,
            conn_id,
            Frame::new(message_type::LOGOUT_RESPONSE)
                .with("status", "1")
                .with("errorMsg", "Missing userId"),
        )
        .await;
        return;
    };

    let _ = repo::users::set_online(&state.pool, user_id, false).await;
    let _ = state.messaging.mark_offline(user_id).await;
    state.sessions.unbind(user_id).await;

    reply(state, conn_id, Frame::new(message_type::LOGOUT_RESPONSE).with("status", "0")).await;
}

async fn handle_heartbeat(state: &AppState, conn_id: ConnectionId) {
    reply(
        state,
        conn_id,
        Frame::new(message_type::HEARTBEAT_RESPONSE).with("timestamp", now_ms().to_string()),
    )
    .await;
}

async fn handle_verify_code_request(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(email) = frame.get("email") else {
        reply(
            state,
            conn_id,
            Frame::new(message_type::ERROR).with("errorMsg", "Missing email address"),
        )
        .await;
        return;
    };

    if !email.contains('@') {
        reply(
            state,
            conn_id,
            Frame::new(message_type::ERROR).with("errorMsg", "Invalid email format"),
        )
        .await;
        return;
    }

    match repo::users::email_exists(&state.pool, email).await {
        Ok(true) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ERROR).with("errorMsg", "Email already registered"),
            )
            .await;
            return;
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ERROR).with("errorMsg", "System error, please try again later"),
            )
            .await;
            return;
        }
        Ok(false) => {}
    }

    let code = state.verification.generate(email).await;
    state.email.send_verification_code(email, &code);

    reply(
        state,
        conn_id,
        Frame::new(message_type::VERIFY_CODE_RESPONSE)
            .with("status", "0")
            .with("message", "Verification code has been sent to your email"),
    )
    .await;
}

async fn handle_register(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let (Some(username), Some(password), Some(email), Some(code)) = (
        frame.get("username"),
        frame.get("password"),
        frame.get("email"),
        frame.get("code"),
    ) else {
        reply(
            state,
            conn_id,
            Frame::new(message_type::REGISTER_RESPONSE)
                .with("status", "1")
                .with("errorMsg", "Missing required parameters"),
        )
        .await;
        return;
    };

    let avatar = frame.get("avatar");
    for (field, value) in [("username", username), ("email", email)]
        .into_iter()
        .chain(avatar.map(|a| ("avatar", a)))
    {
        if protocol::contains_unsafe_char(value) {
            reply(
                state,
                conn_id,
                Frame::new(message_type::REGISTER_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", format!("{field} may not contain ';', '=', or a newline")),
            )
            .await;
            return;
        }
    }

    if !state.verification.verify(email, code).await {
        reply(
            state,
            conn_id,
            Frame::new(message_type::REGISTER_RESPONSE)
                .with("status", "1")
                .with("errorMsg", "Invalid or expired verification code"),
        )
        .await;
        return;
    }

    let outcome = match repo::users::register(&state.pool, username, password, email, avatar).await {
        Ok(outcome) => outcome,
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::REGISTER_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", "Registration failed, please try again later"),
            )
            .await;
            return;
        }
    };

    match outcome {
        RegisterOutcome::UsernameExists => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::REGISTER_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", "Username already exists"),
            )
            .await;
        }
        RegisterOutcome::EmailExists => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::REGISTER_RESPONSE)
                    .with("status", "1")
                    .with("errorMsg", "Email already exists"),
            )
            .await;
        }
        RegisterOutcome::Created(user_id) => {
            state.email.send_welcome(email, username);
            reply(
                state,
                conn_id,
                Frame::new(message_type::REGISTER_RESPONSE)
                    .with("status", "0")
                    .with("username", username.to_owned())
                    .with("email", email.to_owned()),
            )
            .await;

            if let Some(evicted) = state.sessions.bind(user_id, conn_id).await {
                state.sessions.remove_connection(evicted).await;
            }
            let _ = state.messaging.mark_online(user_id).await;

            let mut login_response = Frame::new(message_type::LOGIN_RESPONSE)
                .with("status", "0")
                .with("userId", user_id.to_string())
                .with("username", username.to_owned())
                .with("email", email.to_owned());
            if let Some(avatar) = avatar.filter(|a| !a.is_empty()) {
                login_response = login_response.with("avatar", avatar.to_owned());
            }
            reply(state, conn_id, login_response).await;
        }
    }
}

// --- direct messaging -------------------------------------------------

async fn handle_private_chat(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "send messages").await else {
        return;
    };

    let (Some(to_identifier), Some(content)) = (frame.get("toUserId"), frame.get("content")) else {
        error_reply(state, conn_id, "Invalid message format").await;
        return;
    };

    if reject_unsafe(state, conn_id, "content", content).await {
        return;
    }

    let Some(target) = resolve_user(state, to_identifier).await else {
        error_reply(state, conn_id, "User not found").await;
        return;
    };

    match state.messaging.is_friend(from, target.id).await {
        Ok(true) => {}
        Ok(false) => {
            error_reply(state, conn_id, "You can only send messages to your friends").await;
            return;
        }
        Err(_) => {
            error_reply(state, conn_id, "Failed to send message").await;
            return;
        }
    }

    let msg = match state.messaging.send_private(from, target.id, content, now_ms()).await {
        Ok(msg) => msg,
        Err(_) => {
            error_reply(state, conn_id, "Failed to send message").await;
            return;
        }
    };

    let Ok(Some(sender)) = repo::users::find_by_id(&state.pool, from).await else {
        return;
    };
    let out = Frame::new(message_type::PRIVATE_CHAT)
        .with("fromUserId", from.to_string())
        .with("fromUsername", sender.username)
        .with("content", content.to_owned())
        .with("timestamp", msg.timestamp.to_string());

    push(state, target.id, out.clone()).await;
    reply(state, conn_id, out).await;
}

async fn handle_group_chat(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "send messages").await else {
        return;
    };

    let (Some(group_id_str), Some(content)) = (frame.get("groupId"), frame.get("content")) else {
        error_reply(state, conn_id, "Invalid message format").await;
        return;
    };
    let Ok(group_id) = group_id_str.parse::<i64>() else {
        error_reply(state, conn_id, "Invalid group ID format").await;
        return;
    };

    if reject_unsafe(state, conn_id, "content", content).await {
        return;
    }

    let (msg, _offline) = match state.messaging.send_group(from, group_id, content, now_ms()).await {
        Ok(result) => result,
        Err(ChatError::NotFound(m)) | Err(ChatError::Forbidden(m)) => {
            error_reply(state, conn_id, m).await;
            return;
        }
        Err(_) => {
            error_reply(state, conn_id, "Failed to send message").await;
            return;
        }
    };

    let Ok(Some(sender)) = repo::users::find_by_id(&state.pool, from).await else {
        return;
    };
    let out = Frame::new(message_type::GROUP_CHAT)
        .with("groupId", group_id.to_string())
        .with("fromUserId", from.to_string())
        .with("fromUsername", sender.username)
        .with("content", content.to_owned())
        .with("timestamp", msg.timestamp.to_string());

    if let Ok(members) = state.messaging.group_members(group_id).await {
        for member in members {
            if member == from {
                continue;
            }
            push(state, member, out.clone()).await;
        }
    }
    reply(state, conn_id, out).await;
}

// --- groups ------------------------------------------------------------

async fn handle_create_group(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "create a group").await else {
        return;
    };
    let Some(name) = frame.get("groupName") else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };
    if reject_unsafe(state, conn_id, "groupName", name).await {
        return;
    }

    match state.messaging.create_group(from, name).await {
        Ok(group_id) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::CREATE_GROUP_RESPONSE)
                    .with("status", "0")
                    .with("groupId", group_id.to_string())
                    .with("groupName", name.to_owned()),
            )
            .await;
        }
        Err(_) => error_reply(state, conn_id, "Failed to create group").await,
    }
}

async fn handle_join_group(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "join a group").await else {
        return;
    };
    let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
        error_reply(state, conn_id, "Invalid group ID. Please enter a numeric ID").await;
        return;
    };

    let response = match state.messaging.join_group(from, group_id).await {
        Ok(()) => Frame::new(message_type::JOIN_GROUP_RESPONSE)
            .with("status", "0")
            .with("groupId", group_id.to_string()),
        Err(_) => Frame::new(message_type::JOIN_GROUP_RESPONSE)
            .with("status", "1")
            .with("message", "Failed to join group"),
    };
    reply(state, conn_id, response).await;
}

async fn handle_leave_group(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "leave a group").await else {
        return;
    };
    let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
        error_reply(state, conn_id, "Invalid group ID. Please enter a numeric ID").await;
        return;
    };

    let response = match state.messaging.leave_group(from, group_id).await {
        Ok(()) => Frame::new(message_type::LEAVE_GROUP_RESPONSE)
            .with("status", "0")
            .with("groupId", group_id.to_string()),
        Err(_) => Frame::new(message_type::LEAVE_GROUP_RESPONSE)
            .with("status", "1")
            .with("message", "Failed to leave group"),
    };
    reply(state, conn_id, response).await;
}

// --- directory lookups --------------------------------------------------

async fn handle_get_user_list(state: &AppState, conn_id: ConnectionId) {
    let Some(_from) = require_login(state, conn_id, "get user list").await else {
        return;
    };

    let Ok(online_ids) = state.messaging.list_online().await else {
        error_reply(state, conn_id, "Failed to get user list").await;
        return;
    };

    let mut users = Vec::new();
    for id in online_ids {
        if let Ok(Some(user)) = repo::users::find_by_id(&state.pool, id).await {
            users.push(user_summary_json(id, &user.username, true));
        }
    }

    reply(
        state,
        conn_id,
        Frame::new(message_type::USER_LIST_RESPONSE)
            .with("status", "0")
            .with("users", serde_json::to_string(&users).unwrap_or_else(|_| "[]".to_owned())),
    )
    .await;
}

async fn handle_get_group_list(state: &AppState, conn_id: ConnectionId) {
    let Some(from) = require_login(state, conn_id, "get group list").await else {
        return;
    };

    let Ok(group_ids) = state.messaging.list_groups(from).await else {
        error_reply(state, conn_id, "Failed to get group list").await;
        return;
    };

    let mut groups = Vec::new();
    for id in group_ids {
        let name = state
            .messaging
            .group_name(id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("Group-{id}"));
        groups.push(json!({ "id": id, "name": name }));
    }

    reply(
        state,
        conn_id,
        Frame::new(message_type::GROUP_LIST_RESPONSE)
            .with("status", "0")
            .with("groups", serde_json::to_string(&groups).unwrap_or_else(|_| "[]".to_owned())),
    )
    .await;
}

async fn handle_get_group_members(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(_from) = require_login(state, conn_id, "get group members").await else {
        return;
    };
    let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
        error_reply(state, conn_id, "Invalid group ID. Please enter a numeric ID").await;
        return;
    };

    let members = match state.messaging.group_members(group_id).await {
        Ok(m) => m,
        Err(e) => {
            error_reply(state, conn_id, e.client_message()).await;
            return;
        }
    };

    let mut out = Vec::new();
    for id in members {
        if let Ok(Some(user)) = repo::users::find_by_id(&state.pool, id).await {
            let online = state.messaging.is_online(id).await.unwrap_or(false);
            out.push(user_summary_json(id, &user.username, online));
        }
    }

    reply(
        state,
        conn_id,
        Frame::new(message_type::GROUP_MEMBERS_RESPONSE)
            .with("status", "0")
            .with("groupId", group_id.to_string())
            .with("members", serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_owned())),
    )
    .await;
}

async fn handle_get_user_friends(state: &AppState, conn_id: ConnectionId) {
    let Some(from) = require_login(state, conn_id, "get friends list").await else {
        return;
    };

    let Ok(friend_ids) = state.messaging.list_friends(from).await else {
        error_reply(state, conn_id, "Failed to get friends list").await;
        return;
    };

    let mut friends = Vec::new();
    for id in friend_ids {
        if let Ok(Some(user)) = repo::users::find_by_id(&state.pool, id).await {
            let online = state.messaging.is_online(id).await.unwrap_or(false);
            friends.push(user_summary_json(id, &user.username, online));
        }
    }

    reply(
        state,
        conn_id,
        Frame::new(message_type::USER_FRIENDS_RESPONSE)
            .with("status", "0")
            .with("friends", serde_json::to_string(&friends).unwrap_or_else(|_| "[]".to_owned())),
    )
    .await;
}

// --- friend requests ------------------------------------------------------

async fn handle_add_friend_request(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "send a friend request").await else {
        return;
    };
    let Some(identifier) = frame.get("friendId") else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };

    let Some(target) = resolve_user(state, identifier).await else {
        error_reply(state, conn_id, "User does not exist").await;
        return;
    };

    if from == target.id {
        error_reply(state, conn_id, "You cannot send friend request to yourself").await;
        return;
    }
    match state.messaging.is_friend(from, target.id).await {
        Ok(true) => {
            error_reply(state, conn_id, "You are already friends with this user").await;
            return;
        }
        Err(_) => {
            error_reply(state, conn_id, "Failed to send friend request").await;
            return;
        }
        Ok(false) => {}
    }

    match state.messaging.send_friend_request(from, target.id).await {
        Ok(()) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ADD_FRIEND_RESPONSE)
                    .with("status", "0")
                    .with("friendId", target.id.to_string())
                    .with("username", target.username.clone())
                    .with("message", "Friend request sent successfully"),
            )
            .await;

            if let Ok(Some(sender)) = repo::users::find_by_id(&state.pool, from).await {
                push(
                    state,
                    target.id,
                    Frame::new(message_type::ADD_FRIEND_REQUEST)
                        .with("fromUserId", from.to_string())
                        .with("username", sender.username)
                        .with("message", "You have a new friend request"),
                )
                .await;
            }
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ADD_FRIEND_RESPONSE)
                    .with("status", "1")
                    .with("message", "Failed to send friend request"),
            )
            .await;
        }
    }
}

async fn handle_accept_friend_request(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(to_user_id) = require_login(state, conn_id, "accept friend request").await else {
        return;
    };
    let Some(from_user_id) = frame.get("fromUserId").and_then(|v| v.parse::<i64>().ok()) else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };

    let Ok(Some(from_user)) = repo::users::find_by_id(&state.pool, from_user_id).await else {
        error_reply(state, conn_id, "User does not exist").await;
        return;
    };

    match state.messaging.accept_friend_request(from_user_id, to_user_id).await {
        Ok(()) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ACCEPT_FRIEND_RESPONSE)
                    .with("status", "0")
                    .with("fromUserId", from_user_id.to_string())
                    .with("username", from_user.username)
                    .with("message", "Friend request accepted successfully"),
            )
            .await;

            if let Ok(Some(to_user)) = repo::users::find_by_id(&state.pool, to_user_id).await {
                push(
                    state,
                    from_user_id,
                    Frame::new(message_type::ACCEPT_FRIEND_RESPONSE)
                        .with("toUserId", to_user_id.to_string())
                        .with("username", to_user.username)
                        .with("message", "Your friend request has been accepted"),
                )
                .await;
            }
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ACCEPT_FRIEND_RESPONSE)
                    .with("status", "1")
                    .with("message", "Failed to accept friend request"),
            )
            .await;
        }
    }
}

async fn handle_reject_friend_request(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(to_user_id) = require_login(state, conn_id, "reject friend request").await else {
        return;
    };
    let Some(from_user_id) = frame.get("fromUserId").and_then(|v| v.parse::<i64>().ok()) else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };

    let Ok(Some(from_user)) = repo::users::find_by_id(&state.pool, from_user_id).await else {
        error_reply(state, conn_id, "User does not exist").await;
        return;
    };

    let response = match state.messaging.reject_friend_request(from_user_id, to_user_id).await {
        Ok(()) => Frame::new(message_type::REJECT_FRIEND_RESPONSE)
            .with("status", "0")
            .with("fromUserId", from_user_id.to_string())
            .with("username", from_user.username)
            .with("message", "Friend request rejected successfully"),
        Err(_) => Frame::new(message_type::REJECT_FRIEND_RESPONSE)
            .with("status", "1")
            .with("message", "Failed to reject friend request"),
    };
    reply(state, conn_id, response).await;
}

async fn handle_get_friend_requests(state: &AppState, conn_id: ConnectionId) {
    let Some(user_id) = require_login(state, conn_id, "get friend requests").await else {
        return;
    };

    let Ok(requester_ids) = state.messaging.list_pending_requests(user_id).await else {
        error_reply(state, conn_id, "Failed to get friend requests").await;
        return;
    };

    let mut requests = Vec::new();
    for id in requester_ids {
        if let Ok(Some(user)) = repo::users::find_by_id(&state.pool, id).await {
            let online = state.messaging.is_online(id).await.unwrap_or(false);
            requests.push(user_summary_json(id, &user.username, online));
        }
    }

    reply(
        state,
        conn_id,
        Frame::new(message_type::FRIEND_REQUESTS_RESPONSE)
            .with("status", "0")
            .with("requests", serde_json::to_string(&requests).unwrap_or_else(|_| "[]".to_owned())),
    )
    .await;
}

// --- history, recall, read receipts --------------------------------------

async fn handle_get_chat_history(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(from) = require_login(state, conn_id, "get chat history").await else {
        return;
    };

    let Some(kind) = frame.get("type") else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };
    let count = frame.get("count").and_then(|v| v.parse::<i64>().ok()).unwrap_or(20);
    let offset = frame.get("offset").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

    match kind {
        "private" => {
            let Some(target_id) = frame.get("targetUserId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            let Ok(messages) = state.messaging.history_private(from, target_id, count, offset).await else {
                error_reply(state, conn_id, "Failed to get chat history").await;
                return;
            };
            reply(
                state,
                conn_id,
                Frame::new(message_type::CHAT_HISTORY_RESPONSE)
                    .with("status", "0")
                    .with("type", "private")
                    .with("userId", from.to_string())
                    .with("targetId", target_id.to_string())
                    .with("messages", messages_json(&messages)),
            )
            .await;
        }
        "group" => {
            let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            match state.messaging.group_members(group_id).await {
                Ok(members) if members.contains(&from) => {}
                Ok(_) => {
                    error_reply(state, conn_id, "You are not a member of this group").await;
                    return;
                }
                Err(e) => {
                    error_reply(state, conn_id, e.client_message()).await;
                    return;
                }
            }
            let Ok(messages) = state.messaging.history_group(group_id, count, offset).await else {
                error_reply(state, conn_id, "Failed to get chat history").await;
                return;
            };
            reply(
                state,
                conn_id,
                Frame::new(message_type::CHAT_HISTORY_RESPONSE)
                    .with("status", "0")
                    .with("type", "group")
                    .with("groupId", group_id.to_string())
                    .with("messages", messages_json(&messages)),
            )
            .await;
        }
        _ => error_reply(state, conn_id, "Invalid chat type").await,
    }
}

fn messages_json(messages: &[Message]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_owned())
}

async fn handle_recall_message(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(actor) = require_login(state, conn_id, "recall a message").await else {
        return;
    };
    let (Some(message_id), Some(kind)) = (frame.get("messageId"), frame.get("type")) else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };

    let result = match kind {
        "private" => {
            let Some(target_id) = frame.get("targetUserId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            match state.messaging.recall_private(actor, target_id, message_id, now_ms()).await {
                Ok(_) => {
                    push(
                        state,
                        target_id,
                        Frame::new(message_type::RECALL_MESSAGE_RESPONSE)
                            .with("messageId", message_id.to_owned())
                            .with("type", "private")
                            .with("fromUserId", actor.to_string()),
                    )
                    .await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        "group" => {
            let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            match state.messaging.recall_group(actor, group_id, message_id, now_ms()).await {
                Ok(_) => {
                    if let Ok(members) = state.messaging.group_members(group_id).await {
                        for member in members {
                            push(
                                state,
                                member,
                                Frame::new(message_type::RECALL_MESSAGE_RESPONSE)
                                    .with("messageId", message_id.to_owned())
                                    .with("type", "group")
                                    .with("groupId", group_id.to_string())
                                    .with("fromUserId", actor.to_string()),
                            )
                            .await;
                        }
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        _ => {
            error_reply(state, conn_id, "Invalid chat type").await;
            return;
        }
    };

    match result {
        Ok(()) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::RECALL_MESSAGE_RESPONSE)
                    .with("status", "0")
                    .with("messageId", message_id.to_owned()),
            )
            .await;
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ERROR)
                    .with("message", "Failed to recall message")
                    .with("messageId", message_id.to_owned()),
            )
            .await;
        }
    }
}

async fn handle_mark_message_read(state: &AppState, conn_id: ConnectionId, frame: &Frame) {
    let Some(reader) = require_login(state, conn_id, "mark a message read").await else {
        return;
    };
    let (Some(message_id), Some(kind)) = (frame.get("messageId"), frame.get("type")) else {
        error_reply(state, conn_id, "Invalid request format").await;
        return;
    };

    let result: Result<(), ChatError> = match kind {
        "private" => {
            let Some(from_user_id) = frame.get("fromUserId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            match state.messaging.mark_read_private(reader, from_user_id, message_id, now_ms()).await {
                Ok(_) => {
                    push(
                        state,
                        from_user_id,
                        Frame::new(message_type::MARK_MESSAGE_READ_RESPONSE)
                            .with("messageId", message_id.to_owned())
                            .with("type", "private")
                            .with("userId", reader.to_string()),
                    )
                    .await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        "group" => {
            let Some(group_id) = frame.get("groupId").and_then(|v| v.parse::<i64>().ok()) else {
                error_reply(state, conn_id, "Invalid request format").await;
                return;
            };
            state.messaging.mark_read_group(reader, group_id, message_id, now_ms()).await
        }
        _ => {
            error_reply(state, conn_id, "Invalid chat type").await;
            return;
        }
    };

    match result {
        Ok(()) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::MARK_MESSAGE_READ_RESPONSE)
                    .with("status", "0")
                    .with("messageId", message_id.to_owned()),
            )
            .await;
        }
        Err(_) => {
            reply(
                state,
                conn_id,
                Frame::new(message_type::ERROR)
                    .with("message", "Failed to mark message as read")
                    .with("messageId", message_id.to_owned()),
            )
            .await;
        }
    }
}
