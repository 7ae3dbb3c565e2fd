use std::sync::Arc;

use anyhow::{Result, bail};
use skool_core::{
    client::ApiClientBuilder,
    config::Config,
    schedule::ScheduleDataSource,
    session::{HttpAuthBackend, SessionManager},
    token_store::TokenStore,
};

/// Everything a command needs, wired from the loaded config
pub struct Context {
    pub session: Arc<SessionManager<HttpAuthBackend>>,
    pub schedule: ScheduleDataSource<HttpAuthBackend>,
}

impl Context {
    pub fn open() -> Result<Self> {
        Self::new(&Config::load()?)
    }

    pub fn new(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        tracing::debug!(
            endpoint = %config.api_endpoint,
            data_dir = %data_dir.display(),
            "Loaded configuration"
        );

        let api = ApiClientBuilder::from_config(config).build()?;
        let store = TokenStore::open(&data_dir);
        let session = Arc::new(SessionManager::new(
            HttpAuthBackend::new(api.clone()),
            store,
        ));
        let schedule = ScheduleDataSource::new(api, Arc::clone(&session));

        Ok(Self { session, schedule })
    }

    /// Renew the session from the stored login token, failing if that is not possible.
    pub async fn authenticated(&self) -> Result<()> {
        let state = self.session.start().await;
        if !state.authenticated {
            bail!("Not logged in, run `skool login` first");
        }
        Ok(())
    }
}
