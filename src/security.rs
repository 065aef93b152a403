//! Password hashing, login rate limiting, input sanitization and the other
//! small security helpers used by the API layer.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

const PBKDF2_ROUNDS: u32 = 1000;
const HASH_LEN: usize = 64;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?)://[^\s/?#@]+(:\d+)?([/?#]\S*)?$").expect("url pattern"));

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn derive(password: &str, salt: &str) -> String {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS, &mut out);
    hex::encode(out)
}

/// PBKDF2-HMAC-SHA512 with a random salt, stored as `salt:hash` in hex.
pub fn hash_password(password: &str) -> String {
    let salt = random_hex(16);
    let hash = derive(password, &salt);
    format!("{}:{}", salt, hash)
}

pub fn verify_password(stored: &str, attempt: &str) -> bool {
    let Some((salt, expected)) = stored.split_once(':') else {
        return false;
    };
    let actual = derive(attempt, salt);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u32,
    #[serde(skip)]
    pub reset_at: Instant,
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window attempt counter keyed by caller (user name or address).
#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateLimitStatus {
        self.check_at(key, Instant::now())
    }

    /// Counts one attempt at `now`. The attempt that exceeds the limit and
    /// every later one inside the window are refused. Expired windows are
    /// dropped on every call.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitStatus {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, entry| now <= entry.reset_at);

        match entries.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                entry.count += 1;
                if entry.count > self.max_attempts {
                    RateLimitStatus {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                    }
                } else {
                    RateLimitStatus {
                        allowed: true,
                        remaining: self.max_attempts - entry.count,
                        reset_at: entry.reset_at,
                    }
                }
            }
            _ => {
                let reset_at = now + self.window;
                entries.insert(key.to_string(), Window { count: 1, reset_at });
                RateLimitStatus {
                    allowed: true,
                    remaining: self.max_attempts.saturating_sub(1),
                    reset_at,
                }
            }
        }
    }

    pub fn clear(&self, key: &str) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(key);
    }
}

/// Drops angle brackets, quotes, semicolons and NUL bytes, then trims.
pub fn sanitize_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ';' | '\'' | '"' | '\0'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn sanitize_sql_input(input: &str) -> String {
    input.replace('\'', "''").replace('"', "\"\"").trim().to_string()
}

/// Accepts only absolute http and https URLs.
pub fn validate_url(url: &str) -> bool {
    URL_RE.is_match(url.trim())
}

pub fn generate_csrf_token() -> String {
    random_hex(32)
}

pub fn verify_csrf_token(token: &str, stored: &str) -> bool {
    if token.len() != stored.len() {
        return false;
    }
    token.as_bytes().ct_eq(stored.as_bytes()).into()
}

pub fn role_level(role: &str) -> u8 {
    match role {
        "super_admin" => 5,
        "admin" => 4,
        "manager" => 3,
        "user" => 2,
        "demo" => 1,
        _ => 0,
    }
}

/// True when `user_role` ranks at least as high as any of `required`.
pub fn check_permission(user_role: &str, required: &[&str]) -> bool {
    let level = role_level(user_role);
    required.iter().any(|r| level >= role_level(r))
}

const SENSITIVE_FIELDS: [&str; 6] = ["password", "token", "secret", "apiKey", "creditCard", "ssn"];

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
    } else {
        "*".repeat(chars.len())
    }
}

/// Masks well-known secret fields of a JSON object before it is logged.
pub fn mask_sensitive(data: &Value) -> Value {
    let Value::Object(map) = data else {
        return data.clone();
    };
    let mut masked = map.clone();
    for field in SENSITIVE_FIELDS {
        if let Some(value) = masked.get_mut(field) {
            let text = match value {
                Value::String(s) => s.clone(),
                _ => value.to_string(),
            };
            *value = Value::String(mask(&text));
        }
    }
    Value::Object(masked)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub user_id: String,
    pub action: String,
    pub resource: String,
    pub changes: Value,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditLog {
    pub fn new(user_id: &str, action: &str, resource: &str, changes: Value) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            user_id: user_id.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            changes: mask_sensitive(&changes),
            status: AuditStatus::Success,
            error_message: None,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = AuditStatus::Failure;
        self.error_message = Some(error.into());
        self
    }

    /// Emits the entry on the `audit` tracing target.
    pub fn emit(&self) {
        match self.status {
            AuditStatus::Success => tracing::info!(
                target: "audit",
                user = %self.user_id,
                action = %self.action,
                resource = %self.resource,
                changes = %self.changes,
                "audit"
            ),
            AuditStatus::Failure => tracing::warn!(
                target: "audit",
                user = %self.user_id,
                action = %self.action,
                resource = %self.resource,
                error = self.error_message.as_deref().unwrap_or(""),
                "audit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_hash_has_salt_and_verifies() {
        let hash = hash_password("mySecretPassword");
        let (salt, digest) = hash.split_once(':').unwrap();
        assert_eq!(salt.len(), 32);
        assert_eq!(digest.len(), 128);
        assert!(verify_password(&hash, "mySecretPassword"));
        assert!(!verify_password(&hash, "wrongpassword"));
        assert!(!verify_password("garbage", "mySecretPassword"));
    }

    #[test]
    fn two_hashes_of_one_password_differ() {
        assert_ne!(hash_password("password123"), hash_password("password123"));
    }

    #[test]
    fn rate_limiter_counts_down_then_blocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        let first = limiter.check_at("user-1", start);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = limiter.check_at("user-1", start);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        assert!(!limiter.check_at("user-1", start).allowed);
        assert!(limiter.check_at("user-2", start).allowed);
    }

    #[test]
    fn rate_limiter_window_expires_and_clears() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();
        limiter.check_at("k", start);
        assert!(!limiter.check_at("k", start).allowed);
        assert!(limiter.check_at("k", start + Duration::from_secs(2)).allowed);

        limiter.check_at("k", start + Duration::from_secs(2));
        limiter.clear("k");
        assert!(limiter.check_at("k", start + Duration::from_secs(2)).allowed);
    }

    #[test]
    fn expired_windows_are_evicted() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..100 {
            limiter.check_at(&format!("ghost-{}", i), start);
        }
        assert_eq!(limiter.entries.lock().unwrap().len(), 100);

        limiter.check_at("late", start + Duration::from_secs(61));
        let entries = limiter.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("late"));
    }

    #[test]
    fn sanitize_strips_markup_and_quotes() {
        assert_eq!(sanitize_input("<script>alert(\"xss\")</script>"), "scriptalert(xss)/script");
        assert_eq!(sanitize_input("  a;b'c\0 "), "abc");
        assert_eq!(sanitize_sql_input(" O'Brien "), "O''Brien");
    }

    #[test]
    fn only_http_urls_are_valid() {
        assert!(validate_url("https://example.com/path?q=1"));
        assert!(validate_url("http://localhost:8080"));
        assert!(!validate_url("javascript:alert(1)"));
        assert!(!validate_url("ftp://example.com"));
        assert!(!validate_url("not a url"));
    }

    #[test]
    fn csrf_tokens_compare_exactly() {
        let token = generate_csrf_token();
        assert_eq!(token.len(), 64);
        assert!(verify_csrf_token(&token, &token));
        assert!(!verify_csrf_token(&token, &generate_csrf_token()));
        assert!(!verify_csrf_token("abc", "abcd"));
    }

    #[test]
    fn permission_follows_role_hierarchy() {
        assert!(check_permission("admin", &["manager"]));
        assert!(!check_permission("user", &["admin"]));
        assert!(check_permission("user", &["admin", "demo"]));
        assert!(!check_permission("guest", &["demo"]));
    }

    #[test]
    fn sensitive_fields_are_masked() {
        let masked = mask_sensitive(&json!({
            "username": "mona",
            "password": "hunter2secret",
            "token": "abcd",
            "ssn": 123456789,
        }));
        assert_eq!(masked["username"], "mona");
        assert_eq!(masked["password"], "hu*********et");
        assert_eq!(masked["token"], "****");
        assert_eq!(masked["ssn"], "12*****89");
        assert_eq!(mask_sensitive(&json!(42)), json!(42));
    }
}
