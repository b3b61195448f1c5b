// HTTP seam: a small blocking client plus the `Transport` trait every
// remote-facing component talks through. Components never touch reqwest
// directly, so tests drive them with canned responses.

use reqwest::blocking::{Client, Response};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::session::CookieJar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Outgoing request. Form fields are only sent with `Post`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Attach a session blob as the `Cookie` header.
    pub fn cookie(self, blob: &str) -> Self {
        self.header("cookie", blob)
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the components: status, body text and whatever
/// cookies the server set.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

pub trait Transport {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse, Error>;
}

/// Redirect hops followed per request before the last response is returned.
const MAX_REDIRECTS: usize = 10;

/// Blocking reqwest-backed transport configured from `Config`.
///
/// Redirects are followed here rather than by reqwest so that cookies set
/// on intermediate hops reach `HttpResponse::cookies` and are sent on the
/// following hops. Nothing is kept between calls, so sessions never mix.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()?;
        Ok(ApiClient { client })
    }

    fn exchange(&self, req: &HttpRequest) -> Result<Response, Error> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
        };
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if req.method == Method::Post && !req.form.is_empty() {
            builder = builder.form(&req.form);
        }
        Ok(builder.send()?)
    }
}

/// The request for the hop a redirect points at, or `None` when `res` is
/// not a followable redirect.
fn follow_up(req: &HttpRequest, res: &Response, jar: &CookieJar) -> Option<HttpRequest> {
    let status = res.status();
    if !status.is_redirection() {
        return None;
    }
    let location = res.headers().get(LOCATION)?.to_str().ok()?;
    let next_url = url::Url::parse(&req.url).ok()?.join(location).ok()?;

    let keep_body = matches!(
        status,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
    );
    let mut next = HttpRequest {
        method: if keep_body { req.method } else { Method::Get },
        url: next_url.to_string(),
        headers: req
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("cookie"))
            .cloned()
            .collect(),
        form: if keep_body { req.form.clone() } else { Vec::new() },
    };
    if !jar.is_empty() {
        next = next.cookie(&jar.compose());
    }
    Some(next)
}

impl Transport for ApiClient {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse, Error> {
        // Cookies the caller sent plus everything set along the chain.
        let mut jar = req.header_value("cookie").map(CookieJar::parse).unwrap_or_default();
        let mut cookies: Vec<(String, String)> = Vec::new();
        let mut current = req.clone();
        let mut hops = 0;

        loop {
            let res = self.exchange(&current)?;
            for c in res.cookies() {
                jar.insert(c.name(), c.value());
                cookies.push((c.name().to_string(), c.value().to_string()));
            }
            let next = if hops < MAX_REDIRECTS {
                follow_up(&current, &res, &jar)
            } else {
                None
            };
            match next {
                Some(next) => {
                    tracing::debug!(from = %current.url, to = %next.url, status = res.status().as_u16(), "following redirect");
                    hops += 1;
                    current = next;
                }
                None => {
                    let status = res.status().as_u16();
                    let body = res.text()?;
                    tracing::debug!(url = %current.url, status, hops, bytes = body.len(), "http exchange");
                    return Ok(HttpResponse {
                        status,
                        body,
                        cookies,
                    });
                }
            }
        }
    }
}
