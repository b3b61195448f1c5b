// Shield-state probing.
//
// There is no authoritative endpoint for the flag, so a battery of
// independent heuristics is run in order. The first one that returns a
// confident answer decides; the rest are never called. A heuristic that
// sees evidence both ways reports unknown rather than picking a side.

use serde_json::Value;
use std::fmt;
use std::rc::Rc;

use crate::api::{HttpRequest, Transport};
use crate::config::{resolve, with_subject};
use crate::context::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldState {
    On,
    Off,
    Unknown,
}

impl From<Option<bool>> for ShieldState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::On,
            Some(false) => Self::Off,
            None => Self::Unknown,
        }
    }
}

impl fmt::Display for ShieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub state: ShieldState,
    /// Strategy that produced the answer, if any did.
    pub strategy: Option<String>,
    pub diagnostic: String,
}

/// What a strategy is asked about.
pub struct ProbeTarget<'a> {
    pub session_blob: &'a str,
    pub subject_id: &'a str,
}

pub trait ProbeStrategy {
    fn name(&self) -> &str;
    /// `Some(state)` when confident, `None` otherwise.
    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool>;
}

/// Adapter turning a closure into a strategy.
pub struct ProbeFn<F> {
    name: String,
    f: F,
}

impl<F> ProbeFn<F>
where
    F: Fn(&ProbeTarget<'_>) -> Option<bool>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ProbeStrategy for ProbeFn<F>
where
    F: Fn(&ProbeTarget<'_>) -> Option<bool>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool> {
        (self.f)(target)
    }
}

/// Decide from two evidence flags; evidence both ways is inconclusive.
fn arbitrate(positive: bool, negative: bool) -> Option<bool> {
    match (positive, negative) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// 1. Read the flag as a structured field.
pub struct FieldFetch {
    transport: Rc<dyn Transport>,
    url: String,
    field: String,
}

impl ProbeStrategy for FieldFetch {
    fn name(&self) -> &str {
        "field-fetch"
    }

    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool> {
        let base = with_subject(&self.url, target.subject_id);
        let url = url::Url::parse_with_params(&base, &[("fields", self.field.as_str())]).ok()?;
        let res = self
            .transport
            .send(&HttpRequest::get(url.as_str()).cookie(target.session_blob))
            .ok()?;
        if !res.is_success() {
            return None;
        }
        res.json().ok()?.get(&self.field).and_then(Value::as_bool)
    }
}

/// 2. Query-style call whose body is scanned for indicator substrings.
pub struct StructuredQuery {
    transport: Rc<dyn Transport>,
    url: String,
    doc: Option<String>,
    positive: Vec<String>,
    negative: Vec<String>,
}

impl ProbeStrategy for StructuredQuery {
    fn name(&self) -> &str {
        "structured-query"
    }

    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool> {
        let variables = serde_json::json!({ "subject_id": target.subject_id }).to_string();
        let mut req = HttpRequest::post(&self.url)
            .cookie(target.session_blob)
            .field("variables", variables);
        if let Some(doc) = &self.doc {
            req = req.field("doc_id", doc.as_str());
        }
        let res = self.transport.send(&req).ok()?;
        if !res.is_success() {
            return None;
        }
        let body: String = res.body.chars().filter(|c| !c.is_whitespace()).collect();
        arbitrate(
            self.positive.iter().any(|p| body.contains(p.as_str())),
            self.negative.iter().any(|n| body.contains(n.as_str())),
        )
    }
}

/// 3. Match on/off phrases in the human-facing page.
pub struct PageText {
    transport: Rc<dyn Transport>,
    url: String,
    on_phrases: Vec<String>,
    off_phrases: Vec<String>,
}

impl ProbeStrategy for PageText {
    fn name(&self) -> &str {
        "page-text"
    }

    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool> {
        let url = with_subject(&self.url, target.subject_id);
        let res = self
            .transport
            .send(&HttpRequest::get(url).cookie(target.session_blob))
            .ok()?;
        if !res.is_success() {
            return None;
        }
        let page = res.body.to_lowercase();
        let matches = |phrases: &[String]| phrases.iter().any(|p| page.contains(&p.to_lowercase()));
        arbitrate(matches(&self.on_phrases), matches(&self.off_phrases))
    }
}

/// 4. Protected sub-resource: refused means shielded, served means not.
pub struct ResourceAccess {
    transport: Rc<dyn Transport>,
    url: String,
}

impl ProbeStrategy for ResourceAccess {
    fn name(&self) -> &str {
        "resource-access"
    }

    fn probe(&self, target: &ProbeTarget<'_>) -> Option<bool> {
        let url = with_subject(&self.url, target.subject_id);
        let res = self
            .transport
            .send(&HttpRequest::get(url).cookie(target.session_blob))
            .ok()?;
        match res.status {
            401 | 403 => Some(true),
            s if (200..300).contains(&s) => Some(false),
            _ => None,
        }
    }
}

pub struct StateProber {
    strategies: Vec<Box<dyn ProbeStrategy>>,
}

impl StateProber {
    /// The default battery, in order: field fetch, structured query, page
    /// text, resource access.
    pub fn new(ctx: &AppContext) -> Self {
        let ep = &ctx.config.endpoints;
        let sh = &ep.shield;
        let transport = &ctx.transport;
        Self::with_strategies(vec![
            Box::new(FieldFetch {
                transport: Rc::clone(transport),
                url: resolve(&ep.api_base, &sh.field_path),
                field: sh.field_name.clone(),
            }),
            Box::new(StructuredQuery {
                transport: Rc::clone(transport),
                url: resolve(&ep.api_base, &sh.query_path),
                doc: sh.query_doc.clone(),
                positive: sh.positive_indicators.clone(),
                negative: sh.negative_indicators.clone(),
            }),
            Box::new(PageText {
                transport: Rc::clone(transport),
                url: resolve(&ep.web_base, &sh.page_path),
                on_phrases: sh.on_phrases.clone(),
                off_phrases: sh.off_phrases.clone(),
            }),
            Box::new(ResourceAccess {
                transport: Rc::clone(transport),
                url: resolve(&ep.web_base, &sh.resource_path),
            }),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ProbeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn probe(&self, session_blob: &str, subject_id: &str) -> ProbeReport {
        let target = ProbeTarget {
            session_blob,
            subject_id,
        };
        let mut tried = Vec::new();
        for strategy in &self.strategies {
            let name = strategy.name();
            if let Some(flag) = strategy.probe(&target) {
                let state = ShieldState::from(Some(flag));
                tracing::debug!(strategy = name, %state, "probe conclusive");
                let mut diagnostic = format!("Shield is {state} (determined by {name})");
                if !tried.is_empty() {
                    diagnostic.push_str(&format!("; inconclusive: {}", tried.join(", ")));
                }
                return ProbeReport {
                    state,
                    strategy: Some(name.to_string()),
                    diagnostic,
                };
            }
            tried.push(name.to_string());
        }
        tracing::debug!(tried = tried.len(), "probe exhausted");
        ProbeReport {
            state: ShieldState::Unknown,
            strategy: None,
            diagnostic: format!("Shield state unknown; tried: {}", tried.join(", ")),
        }
    }
}
