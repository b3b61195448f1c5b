// End-to-end flows through the public API, with a scripted transport in
// place of the network.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use monokit_cli::acquirer::SessionAcquirer;
use monokit_cli::api::{HttpRequest, HttpResponse, Transport};
use monokit_cli::config::Config;
use monokit_cli::context::AppContext;
use monokit_cli::executor::{ActionExecutor, Sleeper};
use monokit_cli::prober::{ShieldState, StateProber};
use monokit_cli::store::CredentialStore;
use monokit_cli::Error;

#[derive(Default)]
struct FakeServer {
    seen: RefCell<Vec<String>>,
}

impl Transport for FakeServer {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse, Error> {
        self.seen.borrow_mut().push(req.url.clone());
        let body = if req.url.contains("/auth/login") {
            r#"{"access_token":"EAAintegration00000000",
                "session_cookies":[{"name":"c_user","value":"100200"},{"name":"xs","value":"zz"}]}"#
        } else if req.url.contains("/me?") {
            r#"{"id":"100200","name":"Integration User"}"#
        } else if req.url.contains("/business_locations") {
            r#"<script>var t="EAAharvested0000000000";</script>"#
        } else if req.url.contains("/me/feed") {
            r#"{"id":"post_1"}"#
        } else if req.url.contains("/100200?") {
            r#"{"is_shielded":true}"#
        } else {
            return Ok(HttpResponse {
                status: 404,
                ..Default::default()
            });
        };
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
            cookies: Vec::new(),
        })
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _: Duration) {}
}

fn context(dir: &std::path::Path, server: Rc<FakeServer>) -> AppContext {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.owner_tag = "integration".into();
    config.endpoints.api_base = "http://api.local".into();
    config.endpoints.web_base = "http://web.local".into();
    AppContext::new(config, server)
}

#[test]
fn login_then_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), Rc::new(FakeServer::default()));

    let outcome = SessionAcquirer::new(&ctx).login("user@example.com", "hunter22");
    assert!(outcome.success, "{}", outcome.message);
    let fields = outcome.record.unwrap();
    assert_eq!(fields.remote_user_id, "100200");
    assert_eq!(fields.display_name, "Integration User");

    let mut store = ctx.open_store();
    let record = store
        .add(&fields.session_blob, Some(&fields.display_name), Some(&fields.derived_token))
        .unwrap();
    assert!(store.set_current(&record.local_id));

    let reopened = CredentialStore::open(ctx.config.store_path(), "integration");
    assert_eq!(reopened.list().len(), 1);
    let current = reopened.current().unwrap();
    assert_eq!(current.local_id, record.local_id);
    assert_eq!(current.token(), Some("EAAintegration00000000"));
    assert_eq!(current.owner_tag, "integration");

    let logs: Vec<_> = std::fs::read_dir(ctx.activity.dir())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(logs.iter().any(|name| name.starts_with("login_attempts_")));
}

#[test]
fn repeat_action_and_probe_use_stored_session() {
    let dir = tempfile::tempdir().unwrap();
    let server = Rc::new(FakeServer::default());
    let ctx = context(dir.path(), server.clone());
    let blob = "c_user=100200; xs=zz";

    let summary = ActionExecutor::with_sleeper(&ctx, Rc::new(NoSleep)).repeat_action(
        blob,
        "http://web.local/somebody/posts/12345",
        3,
        1,
    );
    assert_eq!(summary.successes, 3, "{}", summary.message);
    assert_eq!(summary.failures, 0);
    assert!(summary.aborted.is_none());
    let feed_calls = server
        .seen
        .borrow()
        .iter()
        .filter(|u| u.contains("/me/feed"))
        .count();
    assert_eq!(feed_calls, 3);

    let report = StateProber::new(&ctx).probe(blob, "100200");
    assert_eq!(report.state, ShieldState::On);
}
