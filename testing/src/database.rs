use config::{EnvError, InstanceConfig, InstanceOptions, load_from_env, merge_options, resolve};
use errors::HarnessError;
use fixtures::{FixtureManager, FixtureSet, InsertCounts, MongoStore};
use lifecycle::{
    InstanceLauncher, LifecycleController, LifecycleState, MongodLauncher, ProcessRegistry,
    SystemRegistry,
};
use mongodb::Collection;
use mongodb::bson::Document;

/// One ephemeral database instance plus its fixture data.
///
/// Every operation except `start` fails with
/// [`HarnessError::NotInstantiated`] before a successful `start` and after
/// `stop`. Fixture state belongs to the running instance: a restart begins
/// with no fixture set to refresh.
pub struct TestDatabase<R = SystemRegistry, L = MongodLauncher> {
    controller: LifecycleController<R, L>,
    fixtures: Option<FixtureManager<MongoStore>>
}

impl TestDatabase {
    pub fn new(context_name: &str, options: InstanceOptions) -> Self {
        Self::with_config(resolve(context_name, options))
    }

    pub fn with_config(config: InstanceConfig) -> Self {
        Self::with_controller(LifecycleController::new(config))
    }

    /// Like [`TestDatabase::new`], with `SCRATCHDB_*` environment variables
    /// filling the options the caller left unset.
    pub fn from_env(context_name: &str, options: InstanceOptions) -> Result<Self, EnvError> {
        let options = merge_options(load_from_env()?, options, "explicit");
        Ok(Self::new(context_name, options))
    }
}

impl<R: ProcessRegistry, L: InstanceLauncher> TestDatabase<R, L> {
    pub fn with_controller(controller: LifecycleController<R, L>) -> Self {
        Self {
            controller,
            fixtures: None
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        self.controller.config()
    }

    pub fn database_name(&self) -> &str {
        &self.controller.config().db_name
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Starts the instance, or returns the running instance's URL.
    pub async fn start(&mut self, verbose: bool) -> Result<String, HarnessError> {
        let url = self.controller.start(verbose).await?;
        if self.fixtures.is_none() {
            let db_name = self.controller.config().db_name.clone();
            self.fixtures = self
                .controller
                .connection()
                .map(|connection| FixtureManager::new(MongoStore::new(connection.database(&db_name))));
        }
        Ok(url)
    }

    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.fixtures = None;
        self.controller.stop().await
    }

    pub fn connection_url(&self) -> Result<&str, HarnessError> {
        self.controller.connection_url()
    }

    /// Loads `data`, replacing the named collections unless
    /// `retain_previous` is set.
    pub async fn load(
        &mut self,
        data: FixtureSet,
        retain_previous: bool
    ) -> Result<InsertCounts, HarnessError> {
        Ok(self.fixtures_mut("load")?.load(data, retain_previous).await?)
    }

    pub fn get_collection(&self, name: &str) -> Result<Collection<Document>, HarnessError> {
        let fixtures = self
            .fixtures
            .as_ref()
            .ok_or(HarnessError::not_instantiated("get_collection"))?;
        Ok(fixtures.store().database().collection(name))
    }

    /// Replays the last load; `None` when nothing has been loaded.
    pub async fn refresh(&mut self) -> Result<Option<InsertCounts>, HarnessError> {
        Ok(self.fixtures_mut("refresh")?.refresh().await?)
    }

    pub async fn clean(&mut self, data: &FixtureSet) -> Result<(), HarnessError> {
        Ok(self.fixtures_mut("clean")?.clean(data).await?)
    }

    pub async fn drop(&mut self) -> Result<(), HarnessError> {
        Ok(self.fixtures_mut("drop")?.drop().await?)
    }

    pub async fn drop_all(&mut self) -> Result<(), HarnessError> {
        Ok(self.fixtures_mut("drop_all")?.drop_all().await?)
    }

    fn fixtures_mut(
        &mut self,
        operation: &'static str
    ) -> Result<&mut FixtureManager<MongoStore>, HarnessError> {
        self.fixtures
            .as_mut()
            .ok_or(HarnessError::not_instantiated(operation))
    }
}
