// Shield toggle. Sends the configured mutation document with the
// account's derived token; the caller probes first so it only toggles
// when the state actually needs to change.

use serde_json::Value;
use uuid::Uuid;

use crate::api::HttpRequest;
use crate::config::resolve;
use crate::context::AppContext;
use crate::error::Error;
use crate::store::AccountRecord;

pub struct ShieldGuard<'a> {
    ctx: &'a AppContext,
}

impl<'a> ShieldGuard<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Turn the shield on or off. Returns `(success, message)`.
    pub fn set_shield(&self, account: &AccountRecord, enable: bool) -> (bool, String) {
        let result = self.try_set(account, enable);
        let (ok, message) = match result {
            Ok(()) => {
                let action = if enable { "turned on" } else { "turned off" };
                (true, format!("You {action} the profile shield"))
            }
            Err(e) => (false, e.to_string()),
        };
        self.ctx.activity.record(
            if enable { "Shield On" } else { "Shield Off" },
            ok,
            &format!("{}: {message}", account.remote_user_id),
        );
        (ok, message)
    }

    fn try_set(&self, account: &AccountRecord, enable: bool) -> Result<(), Error> {
        let token = account
            .token()
            .ok_or_else(|| Error::Validation("No valid token found for this account".into()))?;
        let ep = &self.ctx.config.endpoints;

        let variables = serde_json::json!({
            "input": {
                "actor_id": account.remote_user_id,
                "client_mutation_id": Uuid::new_v4().to_string(),
                "is_enabled": enable,
            }
        });
        let mut req = HttpRequest::post(resolve(&ep.api_base, &ep.shield.mutation_path))
            .header("authorization", format!("OAuth {token}"))
            .field("variables", variables.to_string());
        if let Some(doc) = &ep.shield.mutation_doc {
            req = req.field("doc_id", doc.as_str());
        }

        let res = self.ctx.transport.send(&req)?;
        if !res.is_success() {
            return Err(Error::Http(res.status));
        }
        if let Ok(body) = res.json() {
            if let Some(msg) = body
                .pointer("/errors/0/message")
                .and_then(Value::as_str)
            {
                return Err(Error::Parse(format!("API error: {msg}")));
            }
        }
        tracing::info!(user_id = %account.remote_user_id, enable, "shield toggled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::{reply, StubTransport};
    use crate::context::test_context;
    use std::rc::Rc;

    fn account(token: &str) -> AccountRecord {
        serde_json::from_value(serde_json::json!({
            "id": "abcd1234", "name": "Ana", "user_id": "77",
            "cookie": "c_user=77; xs=s", "token": token
        }))
        .unwrap()
    }

    #[test]
    fn sends_mutation_with_token() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Rc::new(StubTransport::new().on("http://api.test/graphql", |req| {
            assert_eq!(req.header_value("authorization"), Some("OAuth EAAtok"));
            let vars: Value = serde_json::from_str(req.field_value("variables").unwrap()).unwrap();
            assert_eq!(vars["input"]["actor_id"], "77");
            assert_eq!(vars["input"]["is_enabled"], false);
            Ok(reply(200, r#"{"data":{}}"#))
        }));
        let ctx = test_context(dir.path(), stub.clone());
        let (ok, msg) = ShieldGuard::new(&ctx).set_shield(&account("EAAtok"), false);
        assert!(ok, "{msg}");
        assert!(msg.contains("turned off"));
        assert_eq!(stub.calls.borrow().len(), 1);
    }

    #[test]
    fn missing_token_and_api_errors_fail() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Rc::new(StubTransport::new().on("graphql", |_| {
            Ok(reply(200, r#"{"errors":[{"message":"Rate limited"}]}"#))
        }));
        let ctx = test_context(dir.path(), stub.clone());
        let guard = ShieldGuard::new(&ctx);

        let (ok, msg) = guard.set_shield(&account("N/A"), true);
        assert!(!ok);
        assert!(msg.contains("No valid token"));
        assert!(stub.calls.borrow().is_empty());

        let (ok, msg) = guard.set_shield(&account("EAAtok"), true);
        assert!(!ok);
        assert!(msg.contains("Rate limited"));
    }
}
