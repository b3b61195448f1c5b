// Credential login and token harvesting.
//
// The auth endpoint may hand back session cookies inline, or only a
// bearer token that has to be replayed against web pages before the
// server sets any cookies. Both shapes are handled by an ordered list of
// [`SessionExtraction`] strategies; the first one producing a valid
// session blob wins.

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::api::{HttpRequest, Transport};
use crate::config::{resolve, Endpoints};
use crate::context::AppContext;
use crate::error::{AuthFailure, Error};
use crate::session::{self, CookieJar};

/// Account fields produced by a successful login, ready for `CredentialStore::add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFields {
    pub display_name: String,
    pub remote_user_id: String,
    pub session_blob: String,
    pub derived_token: String,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub success: bool,
    pub message: String,
    pub record: Option<RecordFields>,
}

impl LoginOutcome {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            record: None,
        }
    }
}

/// What the auth call returned, as seen by extraction strategies.
pub struct AuthArtifacts<'a> {
    pub response: &'a Value,
    pub access_token: &'a str,
}

pub trait SessionExtraction {
    fn name(&self) -> &'static str;
    fn extract(&self, artifacts: &AuthArtifacts<'_>, transport: &dyn Transport) -> Option<CookieJar>;
}

/// `session_cookies: [{name, value}, ...]` carried in the auth response.
pub struct InlineSessionCookies;

impl SessionExtraction for InlineSessionCookies {
    fn name(&self) -> &'static str {
        "inline-session-cookies"
    }

    fn extract(&self, artifacts: &AuthArtifacts<'_>, _: &dyn Transport) -> Option<CookieJar> {
        let entries = artifacts.response.get("session_cookies")?.as_array()?;
        let mut jar = CookieJar::new();
        for entry in entries {
            if let (Some(name), Some(value)) = (
                entry.get("name").and_then(Value::as_str),
                entry.get("value").and_then(Value::as_str),
            ) {
                jar.insert(name, value);
            }
        }
        (!jar.is_empty()).then_some(jar)
    }
}

/// Replays the bearer token against each page in turn, carrying and
/// collecting every cookie the server sets along the way.
pub struct WebReplay {
    pages: Vec<String>,
}

impl WebReplay {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }
}

impl SessionExtraction for WebReplay {
    fn name(&self) -> &'static str {
        "web-replay"
    }

    fn extract(&self, artifacts: &AuthArtifacts<'_>, transport: &dyn Transport) -> Option<CookieJar> {
        let mut jar = CookieJar::new();
        for page in &self.pages {
            let url = match url::Url::parse_with_params(page, &[("access_token", artifacts.access_token)]) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!(page = %page, error = %e, "skipping unparsable replay page");
                    continue;
                }
            };
            let mut req = HttpRequest::get(url.as_str())
                .header("authorization", format!("OAuth {}", artifacts.access_token));
            if !jar.is_empty() {
                req = req.cookie(&jar.compose());
            }
            match transport.send(&req) {
                Ok(res) => jar.extend(res.cookies),
                Err(e) => tracing::debug!(page = %page, error = %e, "replay page failed"),
            }
        }
        (!jar.is_empty()).then_some(jar)
    }
}

/// Check identifier and secret shape before anything goes over the wire.
pub fn validate_credentials(identifier: &str, secret: &str) -> Result<(), Error> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(Error::Validation("Email/UID cannot be empty".into()));
    }
    if !identifier.chars().all(|c| c.is_ascii_digit()) {
        let email = Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .map_err(|e| Error::Config(e.to_string()))?;
        if !email.is_match(identifier) {
            return Err(Error::Validation("Invalid email format".into()));
        }
    }
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(Error::Validation("Password cannot be empty".into()));
    }
    if secret.chars().count() < 6 {
        return Err(Error::Validation("Password must be at least 6 characters".into()));
    }
    Ok(())
}

pub struct SessionAcquirer<'a> {
    ctx: &'a AppContext,
    strategies: Vec<Box<dyn SessionExtraction>>,
}

impl<'a> SessionAcquirer<'a> {
    /// Acquirer with the default strategy order: inline cookies, then web replay.
    pub fn new(ctx: &'a AppContext) -> Self {
        let ep = &ctx.config.endpoints;
        let pages = ep
            .session_pages
            .iter()
            .map(|p| resolve(&ep.web_base, p))
            .collect();
        Self::with_strategies(
            ctx,
            vec![Box::new(InlineSessionCookies), Box::new(WebReplay::new(pages))],
        )
    }

    pub fn with_strategies(ctx: &'a AppContext, strategies: Vec<Box<dyn SessionExtraction>>) -> Self {
        Self { ctx, strategies }
    }

    /// Log in with an email or numeric id. Never fails outright: every
    /// error becomes an unsuccessful outcome, and every attempt is logged.
    pub fn login(&self, identifier: &str, secret: &str) -> LoginOutcome {
        let identifier = identifier.trim();
        let outcome = match self.try_login(identifier, secret) {
            Ok(fields) => LoginOutcome {
                success: true,
                message: format!("Successfully logged in as {}", fields.display_name),
                record: Some(fields),
            },
            Err(Error::Auth(failure)) => LoginOutcome::failed(failure.to_string()),
            Err(e) => LoginOutcome::failed(e.to_string()),
        };
        if !outcome.success {
            tracing::warn!(reason = %outcome.message, "login failed");
        }
        self.ctx
            .activity
            .record_login(identifier, outcome.success, &outcome.message);
        outcome
    }

    fn try_login(&self, identifier: &str, secret: &str) -> Result<RecordFields, Error> {
        validate_credentials(identifier, secret)?;
        let ep = &self.ctx.config.endpoints;

        let mut req = HttpRequest::post(resolve(&ep.api_base, &ep.auth_path))
            .field("email", identifier)
            .field("password", secret)
            .field("format", "json")
            .field("device_id", Uuid::new_v4().to_string())
            .field("generate_session_cookies", "1")
            .field("locale", "en_US");
        if let Some(client_token) = &ep.client_token {
            req = req.header("authorization", format!("OAuth {client_token}"));
        }
        let res = self.ctx.transport.send(&req)?;

        let body = match res.json() {
            Ok(body) => body,
            Err(_) if !res.is_success() => return Err(Error::Http(res.status)),
            Err(e) => return Err(e),
        };
        if let Some(raw) = error_message(&body) {
            return Err(Error::Auth(AuthFailure::classify(raw)));
        }
        if !res.is_success() {
            return Err(Error::Http(res.status));
        }

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Parse("Failed to get access token".into()))?;

        let artifacts = AuthArtifacts {
            response: &body,
            access_token,
        };
        let (session_blob, remote_user_id) = self.extract_session(&artifacts)?;
        let profile_name = self.fetch_profile_name(ep, access_token);

        Ok(RecordFields {
            display_name: profile_name
                .or_else(|| session::name_hint(&session_blob))
                .unwrap_or_else(|| format!("User_{remote_user_id}")),
            remote_user_id,
            session_blob,
            derived_token: access_token.to_string(),
        })
    }

    fn extract_session(&self, artifacts: &AuthArtifacts<'_>) -> Result<(String, String), Error> {
        for strategy in &self.strategies {
            let Some(jar) = strategy.extract(artifacts, self.ctx.transport.as_ref()) else {
                tracing::debug!(strategy = strategy.name(), "no session artifacts");
                continue;
            };
            let blob = jar.compose();
            match session::validate(&blob) {
                Ok(user_id) => {
                    tracing::debug!(strategy = strategy.name(), "session extracted");
                    return Ok((blob, user_id));
                }
                Err(e) => tracing::debug!(strategy = strategy.name(), error = %e, "extracted session rejected"),
            }
        }
        Err(Error::Parse("No session cookies received".into()))
    }

    fn fetch_profile_name(&self, ep: &Endpoints, access_token: &str) -> Option<String> {
        let url = url::Url::parse_with_params(
            &resolve(&ep.api_base, &ep.profile_path),
            &[("fields", "id,name"), ("access_token", access_token)],
        )
        .ok()?;
        let res = self.ctx.transport.send(&HttpRequest::get(url.as_str())).ok()?;
        if !res.is_success() {
            return None;
        }
        res.json()
            .ok()?
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Pull an error message out of the shapes the auth endpoint uses.
fn error_message(body: &Value) -> Option<&str> {
    body.get("error_msg")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
}

/// Scrapes a derived token from authenticated pages using a session blob.
pub struct TokenHarvester<'a> {
    ctx: &'a AppContext,
    pattern: Regex,
}

impl<'a> TokenHarvester<'a> {
    pub fn new(ctx: &'a AppContext) -> Result<Self, Error> {
        let pattern = Regex::new(&ctx.config.endpoints.token_pattern)
            .map_err(|e| Error::Config(format!("token_pattern: {e}")))?;
        Ok(Self { ctx, pattern })
    }

    /// First token found across the configured pages, in order.
    pub fn harvest(&self, session_blob: &str) -> Option<String> {
        let ep = &self.ctx.config.endpoints;
        for page in &ep.token_pages {
            let url = resolve(&ep.web_base, page);
            match self.ctx.transport.send(&HttpRequest::get(&url).cookie(session_blob)) {
                Ok(res) if res.is_success() => {
                    if let Some(m) = self.pattern.find(&res.body) {
                        tracing::debug!(page = %url, "derived token found");
                        return Some(m.as_str().to_string());
                    }
                }
                Ok(res) => tracing::debug!(page = %url, status = res.status, "token page refused"),
                Err(e) => tracing::debug!(page = %url, error = %e, "token page failed"),
            }
        }
        None
    }
}
