use crate::{
    actions::db::ActionDb,
    auth::{db::AuthDb, Auth},
    billing::BillingClient,
    config::Config,
    document::db::DocumentDb,
    i18n::Languages,
    live::{feed::ChangeFeed, session::LiveRegistry},
    org::db::OrgDb,
    project::db::ProjectDb,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Everything the handlers need, cloned into every request.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Auth,
    pub documents: DocumentDb,
    pub orgs: OrgDb,
    pub projects: ProjectDb,
    pub actions: ActionDb,
    pub live: LiveRegistry,
    pub billing: BillingClient,
    pub languages: Arc<Languages>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, feed: ChangeFeed) -> Self {
        let documents = DocumentDb::new(pool.clone());
        let live = LiveRegistry::new(
            Arc::new(documents.clone()),
            feed,
            config.page_size,
            config.live_idle(),
        );

        Self {
            auth: Auth::new(AuthDb::new(pool.clone())),
            orgs: OrgDb::new(pool.clone()),
            projects: ProjectDb::new(pool.clone()),
            actions: ActionDb::new(pool),
            billing: BillingClient::new(config.functions_url.clone()),
            languages: Arc::new(Languages::from_config(&config)),
            config: Arc::new(config),
            documents,
            live,
        }
    }
}
