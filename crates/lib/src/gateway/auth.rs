//! HTTP routes for login, session checks, block checks and the announcement board.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::announcements::Announcement;
use crate::gateway::server::GatewayState;
use crate::session::NewSession;

const OAUTH_STATE_COOKIE: &str = "oauthState";
const OAUTH_STATE_MAX_AGE_SECS: u64 = 600;

/// Value of a cookie from the request's `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value. `max_age` 0 clears the cookie.
pub fn set_cookie(name: &str, value: &str, path: &str, max_age: u64, secure: bool) -> String {
    let mut c = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, path, max_age
    );
    if secure {
        c.push_str("; Secure");
    }
    c
}

fn error_redirect(reason: &str) -> Response {
    Redirect::to(&format!("/?error={}", reason)).into_response()
}

/// GET /auth/discord returns `{ url }` for the consent page and sets the anti-forgery state cookie.
pub async fn discord_login(State(state): State<GatewayState>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "discord login is not configured" })),
        )
            .into_response();
    };
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    match oauth.authorize_url(&nonce) {
        Ok(url) => {
            let cookie = set_cookie(
                OAUTH_STATE_COOKIE,
                &nonce,
                "/auth",
                OAUTH_STATE_MAX_AGE_SECS,
                state.config.sessions.secure_cookie,
            );
            (
                AppendHeaders([(header::SET_COOKIE, cookie)]),
                Json(json!({ "url": url })),
            )
                .into_response()
        }
        Err(e) => {
            log::warn!("building authorize url failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

/// GET /auth/discord/callback: verify state, exchange the code, create a session, set the session cookie.
pub async fn discord_callback(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return error_redirect("login_unavailable");
    };
    let expected = cookie_value(&headers, OAUTH_STATE_COOKIE);
    if expected.is_none() || params.state != expected {
        log::debug!("oauth callback with mismatched state");
        return error_redirect("invalid_state");
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return error_redirect("no_code");
    };

    let tokens = match oauth.exchange_code(&code).await {
        Ok(t) => t,
        Err(e) => {
            log::warn!("oauth token exchange failed: {}", e);
            return error_redirect("auth_failed");
        }
    };
    let user = match oauth.fetch_user(&tokens.access_token).await {
        Ok(u) => u,
        Err(e) => {
            log::warn!("oauth user lookup failed: {}", e);
            return error_redirect("auth_failed");
        }
    };

    let sessions_cfg = &state.config.sessions;
    let lifetime = tokens
        .expires_in
        .unwrap_or(sessions_cfg.max_age_secs)
        .min(sessions_cfg.max_age_secs);
    let created = state
        .sessions
        .create(NewSession {
            user_id: user.id,
            username: user.username,
            discriminator: user.discriminator.unwrap_or_else(|| "0".to_string()),
            avatar: user.avatar,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime as i64),
        })
        .await;
    let session = match created {
        Ok(s) => s,
        Err(e) => {
            log::warn!("creating session failed: {}", e);
            return error_redirect("auth_failed");
        }
    };
    log::info!("user {} logged in", session.user_id);

    let session_cookie = set_cookie(
        &sessions_cfg.cookie_name,
        &session.id,
        "/",
        lifetime,
        sessions_cfg.secure_cookie,
    );
    let clear_state = set_cookie(OAUTH_STATE_COOKIE, "", "/auth", 0, sessions_cfg.secure_cookie);
    (
        AppendHeaders([
            (header::SET_COOKIE, session_cookie),
            (header::SET_COOKIE, clear_state),
        ]),
        Redirect::to(&state.config.oauth.post_login_redirect),
    )
        .into_response()
}

/// GET /auth/session: `{ authenticated, user? }` for the cookie session. Expired sessions are deleted.
pub async fn session_status(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let unauthenticated = Json(json!({ "authenticated": false }));
    let Some(id) = cookie_value(&headers, &state.config.sessions.cookie_name) else {
        return unauthenticated;
    };
    let session = match state.sessions.get(&id).await {
        Ok(Some(s)) => s,
        Ok(None) => return unauthenticated,
        Err(e) => {
            log::warn!("session lookup failed: {}", e);
            return unauthenticated;
        }
    };
    if session.is_expired(Utc::now()) {
        if let Err(e) = state.sessions.remove(&id).await {
            log::warn!("removing expired session failed: {}", e);
        }
        return unauthenticated;
    }
    let is_agent = state
        .config
        .discord
        .support_agent_ids
        .iter()
        .any(|a| *a == session.user_id);
    Json(json!({
        "authenticated": true,
        "user": session.profile(is_agent),
    }))
}

/// POST /auth/logout: delete the cookie session and clear the cookie.
pub async fn logout(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let cfg = &state.config.sessions;
    if let Some(id) = cookie_value(&headers, &cfg.cookie_name) {
        if let Err(e) = state.sessions.remove(&id).await {
            log::warn!("removing session on logout failed: {}", e);
        }
    }
    let clear = set_cookie(&cfg.cookie_name, "", "/", 0, cfg.secure_cookie);
    (
        AppendHeaders([(header::SET_COOKIE, clear)]),
        Json(json!({ "success": true })),
    )
        .into_response()
}

/// GET /auth/check-block/:user_id: `{ blocked, until?, reason? }`. Expired blocks are lifted.
pub async fn check_block(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    match state.blocks.check(&user_id, Utc::now()).await {
        Ok(Some(entry)) => Json(json!({
            "blocked": true,
            "until": entry.until,
            "reason": entry.reason,
        })),
        Ok(None) => Json(json!({ "blocked": false })),
        Err(e) => {
            log::warn!("block list lookup failed: {}", e);
            Json(json!({ "blocked": false }))
        }
    }
}

/// GET /api/announcements: the board, newest first.
pub async fn announcements(State(state): State<GatewayState>) -> Json<Vec<Announcement>> {
    Json(state.relay.announcements().list().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcements::AnnouncementStore;
    use crate::block::MemoryBlockList;
    use crate::channels::fake::FakePlatform;
    use crate::config::Config;
    use crate::error::StoreError;
    use crate::session::{new_session, MemorySessionStore, Session, SessionStore};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    /// Session store whose deletes always fail.
    struct StickyStore(MemorySessionStore);

    #[async_trait]
    impl SessionStore for StickyStore {
        async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
            self.0.create(new).await
        }
        async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
            self.0.get(id).await
        }
        async fn remove(&self, _id: &str) -> Result<bool, StoreError> {
            Err(StoreError("store offline".to_string()))
        }
        async fn purge_expired(&self, now: chrono::DateTime<Utc>) -> Result<usize, StoreError> {
            self.0.purge_expired(now).await
        }
    }

    fn state_with(sessions: Arc<dyn SessionStore>) -> GatewayState {
        GatewayState::new(
            Config::default(),
            Arc::new(FakePlatform::new()),
            sessions,
            Arc::new(MemoryBlockList::new()),
            Arc::new(AnnouncementStore::in_memory(4)),
        )
    }

    fn cookie(session_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sessionId={}", session_id)).unwrap(),
        );
        headers
    }

    #[test]
    fn reads_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sessionId=sess-1 ; other=x"),
        );
        assert_eq!(cookie_value(&headers, "sessionId").as_deref(), Some("sess-1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sessionId="));
        assert_eq!(cookie_value(&headers, "sessionId"), None);
    }

    #[test]
    fn session_cookie_attributes() {
        let c = set_cookie("sessionId", "sess-1", "/", 60, true);
        assert_eq!(
            c,
            "sessionId=sess-1; Path=/; Max-Age=60; HttpOnly; SameSite=Lax; Secure"
        );
        assert!(!set_cookie("sessionId", "", "/", 0, false).contains("Secure"));
    }

    #[tokio::test]
    async fn expired_session_status_is_unauthenticated_and_deleted() {
        let sessions = Arc::new(MemorySessionStore::new());
        let s = sessions
            .create(new_session("1", "alice", Utc::now() - chrono::Duration::seconds(5)))
            .await
            .unwrap();
        let state = state_with(sessions.clone());

        let Json(body) = session_status(State(state), cookie(&s.id)).await;
        assert_eq!(body, json!({ "authenticated": false }));
        assert!(sessions.get(&s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_status_survives_failed_delete() {
        let store = StickyStore(MemorySessionStore::new());
        let s = store
            .create(new_session("1", "alice", Utc::now() - chrono::Duration::seconds(5)))
            .await
            .unwrap();
        let state = state_with(Arc::new(store));

        let Json(body) = session_status(State(state), cookie(&s.id)).await;
        assert_eq!(body, json!({ "authenticated": false }));
    }
}
