use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use axum::{
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::{
    config::AuthConfig,
    security::{check_permission, generate_csrf_token, verify_password, RateLimiter},
};

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: String,
}

impl CallerIdentity {
    /// True when the caller's role ranks at least as high as one of `required`.
    pub fn can(&self, required: &[&str]) -> bool {
        check_permission(&self.role, required)
    }
}

#[derive(Debug, Clone)]
struct Session {
    identity: CallerIdentity,
    expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginGrant {
    pub token: String,
    pub username: String,
    pub role: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    InvalidCredentials { remaining: u32 },
    RateLimited { retry_after_secs: u64 },
    SessionStoreUnavailable,
}

/// API keys, configured users and live sessions.
pub struct AuthState {
    config: AuthConfig,
    sessions: RwLock<HashMap<String, Session>>,
    limiter: RateLimiter,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            limiter: RateLimiter::default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_minutes.max(1) * 60)
    }

    /// Checks a configured user's password. Attempts are rate limited per
    /// user name; a success clears the counter.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginGrant, LoginError> {
        let key = username.trim().to_lowercase();
        let status = self.limiter.check(&key);
        if !status.allowed {
            let retry_after_secs = status.reset_at.saturating_duration_since(Instant::now()).as_secs();
            tracing::warn!(user = %key, "login rate limited");
            return Err(LoginError::RateLimited { retry_after_secs });
        }

        let user = self
            .config
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username.trim()));
        let user = match user {
            Some(user) if verify_password(&user.password_hash, password) => user,
            _ => {
                tracing::warn!(user = %key, "failed login");
                return Err(LoginError::InvalidCredentials {
                    remaining: status.remaining,
                });
            }
        };

        self.limiter.clear(&key);
        let token = generate_csrf_token();
        let identity = CallerIdentity {
            name: user.username.clone(),
            role: user.role.clone(),
        };
        let ttl = self.session_ttl();
        let mut sessions = self.sessions.write().map_err(|e| {
            tracing::error!(error = %e, "session store poisoned");
            LoginError::SessionStoreUnavailable
        })?;
        sessions.retain(|_, s| s.expires_at > Instant::now());
        sessions.insert(
            token.clone(),
            Session {
                identity,
                expires_at: Instant::now() + ttl,
            },
        );
        drop(sessions);
        tracing::info!(user = %user.username, role = %user.role, "login succeeded");
        Ok(LoginGrant {
            token,
            username: user.username.clone(),
            role: user.role.clone(),
            expires_in_secs: ttl.as_secs(),
        })
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions
            .write()
            .map(|mut sessions| sessions.remove(token).is_some())
            .unwrap_or(false)
    }

    /// Resolves a presented credential: a static API key or a live session token.
    pub fn identify(&self, credential: &str) -> Option<CallerIdentity> {
        if let Some(entry) = self
            .config
            .api_keys
            .iter()
            .find(|entry| entry.key.as_bytes().ct_eq(credential.as_bytes()).into())
        {
            return Some(CallerIdentity {
                name: entry.name.clone(),
                role: entry.role.clone(),
            });
        }
        let sessions = self.sessions.read().ok()?;
        sessions
            .get(credential)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.identity.clone())
    }
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
    code: &'static str,
}

fn unauthorized(error: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            success: false,
            error: error.to_string(),
            code: "UNAUTHORIZED",
        }),
    )
        .into_response()
}

pub async fn auth_middleware<B>(
    Extension(auth): Extension<Arc<AuthState>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !auth.enabled() {
        req.extensions_mut().insert(CallerIdentity {
            name: "anonymous".to_string(),
            role: "admin".to_string(),
        });
        return next.run(req).await;
    }

    let credential = req
        .headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).to_string());

    match credential {
        Some(credential) => match auth.identify(&credential) {
            Some(identity) => {
                tracing::debug!(caller = %identity.name, role = %identity.role, "Authenticated request");
                req.extensions_mut().insert(identity);
                next.run(req).await
            }
            None => {
                tracing::warn!("Invalid credential presented");
                unauthorized("Invalid API key or session token")
            }
        },
        None => unauthorized(
            "Missing credentials. Provide X-API-Key header or Authorization: Bearer <token>",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ApiKeyEntry, UserEntry},
        security::hash_password,
    };

    fn state() -> AuthState {
        AuthState::new(AuthConfig {
            enabled: true,
            api_keys: vec![ApiKeyEntry {
                name: "reporting".to_string(),
                key: "key-123".to_string(),
                role: "manager".to_string(),
            }],
            users: vec![UserEntry {
                username: "Admin".to_string(),
                password_hash: hash_password("correct horse"),
                role: "super_admin".to_string(),
            }],
            session_minutes: 30,
        })
    }

    #[test]
    fn login_issues_a_usable_session() {
        let auth = state();
        let grant = auth.login("admin", "correct horse").unwrap();
        assert_eq!(grant.role, "super_admin");
        assert_eq!(grant.expires_in_secs, 1800);

        let identity = auth.identify(&grant.token).unwrap();
        assert_eq!(identity.name, "Admin");
        assert!(identity.can(&["admin"]));

        assert!(auth.logout(&grant.token));
        assert!(auth.identify(&grant.token).is_none());
    }

    #[test]
    fn api_keys_identify_callers() {
        let auth = state();
        let identity = auth.identify("key-123").unwrap();
        assert_eq!(identity.role, "manager");
        assert!(!identity.can(&["admin"]));
        assert!(auth.identify("key-124").is_none());
    }

    #[test]
    fn poisoned_session_store_refuses_login() {
        let auth = state();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = auth.sessions.write().unwrap();
            panic!("poison");
        }));
        assert!(matches!(
            auth.login("admin", "correct horse"),
            Err(LoginError::SessionStoreUnavailable)
        ));
    }

    #[test]
    fn repeated_failures_are_rate_limited() {
        let auth = state();
        for _ in 0..5 {
            assert!(matches!(
                auth.login("admin", "wrong"),
                Err(LoginError::InvalidCredentials { .. })
            ));
        }
        assert!(matches!(
            auth.login("admin", "correct horse"),
            Err(LoginError::RateLimited { .. })
        ));
    }
}
