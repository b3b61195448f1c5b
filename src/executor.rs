// Repeat-action loop: perform the same share call N times with a fixed
// delay, stopping early once the remote side keeps refusing.

use regex::Regex;
use serde_json::Value;
use std::rc::Rc;
use std::time::Duration;

use crate::acquirer::TokenHarvester;
use crate::api::HttpRequest;
use crate::config::resolve;
use crate::context::AppContext;
use crate::error::Error;

pub const MAX_REPETITIONS: u32 = 100_000;
pub const MAX_DELAY_SECS: u32 = 60;
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

const BLOCK_KEYWORDS: [&str; 4] = ["spam", "abuse", "abusive", "blocked"];

/// Path shapes accepted for a shareable resource, and whether the query
/// string is what identifies it.
const RESOURCE_SHAPES: [(&str, bool); 9] = [
    (r"^/[^/]+/posts/[^/]+$", false),
    (r"^/share/p/[^/]+$", false),
    (r"^/[^/]+/videos/[^/]+$", false),
    (r"^/reel/[^/]+$", false),
    (r"^/photo$", true),
    (r"^/photo\.php$", true),
    (r"^/permalink\.php$", true),
    (r"^/story\.php$", true),
    (r"^/watch$", true),
];

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    ConsecutiveFailures,
    /// The platform flagged the calls as spam or abuse.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSummary {
    pub successes: u32,
    pub failures: u32,
    pub attempts: u32,
    pub aborted: Option<AbortReason>,
    pub message: String,
}

impl ActionSummary {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            successes: 0,
            failures: 0,
            attempts: 0,
            aborted: None,
            message: message.into(),
        }
    }
}

enum Attempt {
    Success,
    Failure(String),
}

/// Check a resource URL against the accepted hosts and path shapes and
/// return it in canonical form (no fragment, no trailing slash, query
/// kept only where it identifies the resource).
pub fn normalize_resource_url(raw: &str, accepted_hosts: &[String]) -> Result<String, Error> {
    let invalid = || Error::Validation(format!("Invalid resource URL: {}", raw.trim()));
    let mut url = url::Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?.to_lowercase();
    let host_ok = accepted_hosts.iter().any(|h| {
        let h = h.to_lowercase();
        host == h || host.ends_with(&format!(".{h}"))
    });
    if !host_ok {
        return Err(invalid());
    }

    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    let mut keep_query = None;
    for (pattern, needs_query) in RESOURCE_SHAPES {
        let re = Regex::new(pattern).map_err(|e| Error::Config(e.to_string()))?;
        if re.is_match(&path) {
            keep_query = Some(needs_query);
            break;
        }
    }
    match keep_query {
        None => return Err(invalid()),
        Some(true) if url.query().map_or(true, str::is_empty) => return Err(invalid()),
        Some(true) => {}
        Some(false) => url.set_query(None),
    }
    url.set_path(&path);
    Ok(url.to_string())
}

fn is_block_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    BLOCK_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub struct ActionExecutor<'a> {
    ctx: &'a AppContext,
    sleeper: Rc<dyn Sleeper>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self::with_sleeper(ctx, Rc::new(ThreadSleeper))
    }

    pub fn with_sleeper(ctx: &'a AppContext, sleeper: Rc<dyn Sleeper>) -> Self {
        Self { ctx, sleeper }
    }

    /// Hosts a resource URL may live on: the web base host plus any
    /// configured extras.
    pub fn accepted_hosts(&self) -> Vec<String> {
        let ep = &self.ctx.config.endpoints;
        let mut hosts = ep.accepted_hosts.clone();
        if let Some(host) = url::Url::parse(&ep.web_base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            hosts.push(host);
        }
        hosts
    }

    pub fn repeat_action(
        &self,
        session_blob: &str,
        resource_url: &str,
        repetitions: u32,
        delay_seconds: u32,
    ) -> ActionSummary {
        let summary = self.run(session_blob, resource_url, repetitions, delay_seconds);
        self.ctx
            .activity
            .record("Repeat Action", summary.successes > 0, &summary.message.replace('\n', " | "));
        summary
    }

    fn run(&self, session_blob: &str, resource_url: &str, repetitions: u32, delay_seconds: u32) -> ActionSummary {
        if !(1..=MAX_REPETITIONS).contains(&repetitions) {
            return ActionSummary::rejected(format!("Repetitions must be between 1 and {MAX_REPETITIONS}"));
        }
        if !(1..=MAX_DELAY_SECS).contains(&delay_seconds) {
            return ActionSummary::rejected(format!("Delay must be between 1 and {MAX_DELAY_SECS} seconds"));
        }
        let resource = match normalize_resource_url(resource_url, &self.accepted_hosts()) {
            Ok(url) => url,
            Err(e) => return ActionSummary::rejected(e.to_string()),
        };
        let token = match TokenHarvester::new(self.ctx).map(|h| h.harvest(session_blob)) {
            Ok(Some(token)) => token,
            Ok(None) => {
                return ActionSummary::rejected("Could not obtain a token for this session; it may have expired")
            }
            Err(e) => return ActionSummary::rejected(e.to_string()),
        };

        let ep = &self.ctx.config.endpoints;
        let share_url = resolve(&ep.api_base, &ep.share_path);
        let delay = Duration::from_secs(u64::from(delay_seconds));

        let mut successes = 0;
        let mut failures = 0;
        let mut streak = 0;
        let mut attempts = 0;
        let mut aborted = None;
        let mut last_error = None;

        for i in 1..=repetitions {
            attempts += 1;
            let req = HttpRequest::post(&share_url)
                .cookie(session_blob)
                .field("link", resource.as_str())
                .field("published", "0")
                .field("access_token", token.as_str());
            match self.attempt(&req) {
                Attempt::Success => {
                    successes += 1;
                    streak = 0;
                    tracing::info!(attempt = i, successes, "share succeeded");
                }
                Attempt::Failure(msg) => {
                    failures += 1;
                    streak += 1;
                    tracing::warn!(attempt = i, error = %msg, "share failed");
                    let blocked = is_block_message(&msg);
                    last_error = Some(msg);
                    if streak >= MAX_CONSECUTIVE_FAILURES {
                        aborted = Some(if blocked {
                            AbortReason::Blocked
                        } else {
                            AbortReason::ConsecutiveFailures
                        });
                        break;
                    }
                }
            }
            if i < repetitions {
                self.sleeper.sleep(delay);
            }
        }

        let rate = f64::from(successes) * 100.0 / f64::from(repetitions);
        let mut message = format!(
            "Success: {successes}/{repetitions} ({rate:.1}%)\nFailed: {failures}"
        );
        match aborted {
            Some(AbortReason::Blocked) => message.push_str(&format!(
                "\nStopped after {attempts} attempts: the platform flagged the action as spam"
            )),
            Some(AbortReason::ConsecutiveFailures) => message.push_str(&format!(
                "\nStopped after {MAX_CONSECUTIVE_FAILURES} consecutive failures"
            )),
            None => {}
        }
        if let Some(err) = last_error {
            message.push_str(&format!("\nLast error: {err}"));
        }

        ActionSummary {
            successes,
            failures,
            attempts,
            aborted,
            message,
        }
    }

    fn attempt(&self, req: &HttpRequest) -> Attempt {
        let res = match self.ctx.transport.send(req) {
            Ok(res) => res,
            Err(e) => return Attempt::Failure(e.to_string()),
        };
        let body = match res.json() {
            Ok(body) => body,
            Err(_) => return Attempt::Failure(format!("Invalid response (HTTP {})", res.status)),
        };
        if body.get("id").is_some() {
            return Attempt::Success;
        }
        let message = body
            .pointer("/error/message")
            .or_else(|| body.get("error_msg"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unexpected response (HTTP {})", res.status));
        Attempt::Failure(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::{reply, StubTransport};
    use crate::context::test_context;
    use std::cell::{Cell, RefCell};

    const BLOB: &str = "c_user=9; xs=s";
    const POST: &str = "http://web.test/someone/posts/123";
    const SHARE: &str = "http://api.test/me/feed";

    #[derive(Default)]
    struct RecordingSleeper {
        naps: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.naps.borrow_mut().push(duration);
        }
    }

    fn stub_with_share<F>(share: F) -> Rc<StubTransport>
    where
        F: Fn(&HttpRequest) -> Result<crate::api::HttpResponse, Error> + 'static,
    {
        Rc::new(
            StubTransport::new()
                .on("/business_locations", |_| Ok(reply(200, "token=EAAGabcdefghijklmnopqrstu")))
                .on(SHARE, share),
        )
    }

    #[test]
    fn all_successes_sleep_between_but_not_after() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_share(|req| {
            assert_eq!(req.field_value("access_token"), Some("EAAGabcdefghijklmnopqrstu"));
            assert_eq!(req.field_value("link"), Some(POST));
            Ok(reply(200, r#"{"id":"9_1"}"#))
        });
        let ctx = test_context(dir.path(), stub.clone());
        let sleeper = Rc::new(RecordingSleeper::default());
        let summary = ActionExecutor::with_sleeper(&ctx, sleeper.clone()).repeat_action(BLOB, POST, 5, 1);
        assert_eq!(summary.successes, 5);
        assert_eq!(summary.attempts, 5);
        assert_eq!(summary.aborted, None);
        assert_eq!(stub.calls_to(SHARE), 5);
        assert_eq!(*sleeper.naps.borrow(), vec![Duration::from_secs(1); 4]);
    }

    #[test]
    fn spam_errors_abort_after_three() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_share(|_| {
            Ok(reply(400, r#"{"error":{"message":"Your action was blocked as spam"}}"#))
        });
        let ctx = test_context(dir.path(), stub.clone());
        let sleeper = Rc::new(RecordingSleeper::default());
        let summary = ActionExecutor::with_sleeper(&ctx, sleeper.clone()).repeat_action(BLOB, POST, 10, 2);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.aborted, Some(AbortReason::Blocked));
        assert_eq!(stub.calls_to(SHARE), 3);
        assert_eq!(sleeper.naps.borrow().len(), 2);
        assert!(summary.message.contains("spam"));
    }

    #[test]
    fn streak_resets_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let n = Rc::new(Cell::new(0));
        let counter = Rc::clone(&n);
        // fail, fail, ok, fail, fail, fail, ...
        let stub = stub_with_share(move |_| {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                Ok(reply(200, r#"{"id":"x"}"#))
            } else {
                Ok(reply(500, r#"{"error":{"message":"Temporary failure"}}"#))
            }
        });
        let ctx = test_context(dir.path(), stub.clone());
        let summary = ActionExecutor::with_sleeper(&ctx, Rc::new(RecordingSleeper::default()))
            .repeat_action(BLOB, POST, 20, 1);
        assert_eq!(summary.attempts, 6);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.aborted, Some(AbortReason::ConsecutiveFailures));
        assert!(summary.message.contains("Temporary failure"));
    }

    #[test]
    fn never_exceeds_repetitions() {
        let dir = tempfile::tempdir().unwrap();
        let n = Rc::new(Cell::new(0));
        let counter = Rc::clone(&n);
        let stub = stub_with_share(move |_| {
            counter.set(counter.get() + 1);
            if counter.get() % 2 == 0 {
                Ok(reply(200, "not json"))
            } else {
                Ok(reply(200, r#"{"id":"x"}"#))
            }
        });
        let ctx = test_context(dir.path(), stub.clone());
        let sleeper = Rc::new(RecordingSleeper::default());
        let summary = ActionExecutor::with_sleeper(&ctx, sleeper.clone()).repeat_action(BLOB, POST, 7, 3);
        assert_eq!(stub.calls_to(SHARE), 7);
        assert_eq!(summary.successes, 4);
        assert_eq!(summary.failures, 3);
        assert_eq!(sleeper.naps.borrow().len(), 6);
    }

    #[test]
    fn rejects_before_any_share_call() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_share(|_| Ok(reply(200, r#"{"id":"x"}"#)));
        let ctx = test_context(dir.path(), stub.clone());
        let exec = ActionExecutor::with_sleeper(&ctx, Rc::new(RecordingSleeper::default()));
        assert_eq!(exec.repeat_action(BLOB, POST, 0, 1).attempts, 0);
        assert_eq!(exec.repeat_action(BLOB, POST, 1, 61).attempts, 0);
        let bad = exec.repeat_action(BLOB, "http://elsewhere.test/a/posts/1", 1, 1);
        assert!(bad.message.contains("Invalid resource URL"));
        assert_eq!(stub.calls.borrow().len(), 0);

        let dir = tempfile::tempdir().unwrap();
        let no_token = Rc::new(StubTransport::new());
        let ctx = test_context(dir.path(), no_token.clone());
        let summary = ActionExecutor::with_sleeper(&ctx, Rc::new(RecordingSleeper::default()))
            .repeat_action(BLOB, POST, 3, 1);
        assert_eq!(summary.attempts, 0);
        assert!(summary.message.contains("token"));
        assert_eq!(no_token.calls_to(SHARE), 0);
    }

    #[test]
    fn url_shapes() {
        let hosts = vec!["example.com".to_string()];
        assert_eq!(
            normalize_resource_url("https://www.example.com/ana/posts/123/?utm=1#c", &hosts).unwrap(),
            "https://www.example.com/ana/posts/123"
        );
        assert_eq!(
            normalize_resource_url("https://m.example.com/permalink.php?story_fbid=1&id=2", &hosts).unwrap(),
            "https://m.example.com/permalink.php?story_fbid=1&id=2"
        );
        assert!(normalize_resource_url("https://example.com/share/p/AbC", &hosts).is_ok());
        assert!(normalize_resource_url("https://example.com/permalink.php", &hosts).is_err());
        assert!(normalize_resource_url("https://example.com/ana", &hosts).is_err());
        assert!(normalize_resource_url("ftp://example.com/ana/posts/1", &hosts).is_err());
        assert!(normalize_resource_url("https://notexample.com/ana/posts/1", &hosts).is_err());
        assert!(normalize_resource_url("not a url", &hosts).is_err());
    }
}
