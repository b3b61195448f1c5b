// Application context: built once in `main`, borrowed by every component.

use std::rc::Rc;

use crate::activity::ActivityLog;
use crate::api::{ApiClient, Transport};
use crate::config::Config;
use crate::error::Error;
use crate::store::CredentialStore;

pub struct AppContext {
    pub config: Config,
    pub transport: Rc<dyn Transport>,
    pub activity: ActivityLog,
}

impl AppContext {
    pub fn new(config: Config, transport: Rc<dyn Transport>) -> Self {
        let activity = ActivityLog::new(config.logs_dir());
        Self {
            config,
            transport,
            activity,
        }
    }

    /// Context backed by the real HTTP client.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        let client = ApiClient::from_config(&config)?;
        Ok(Self::new(config, Rc::new(client)))
    }

    pub fn open_store(&self) -> CredentialStore {
        CredentialStore::open(self.config.store_path(), self.config.owner_tag.clone())
    }
}

#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path, transport: Rc<dyn Transport>) -> AppContext {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.owner_tag = "tester".into();
    config.endpoints.api_base = "http://api.test".into();
    config.endpoints.web_base = "http://web.test".into();
    AppContext::new(config, transport)
}
