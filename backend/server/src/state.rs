use std::{path::Path, sync::Arc};

use catalog::{Snapshot, load_snapshot, remote::fetch_remote_snapshot};
use tracing::{info, warn};

use crate::{
    auth::JwtKeys,
    cache::{Cache, MemoryCache, RedisCache, init_redis},
    config::Config,
    error::AppError,
    hub::Hub,
    search::{LocalSearch, MeiliSearch, ProductSearch, SearchDoc},
    store::Store,
    tasks::{LogMailer, Mailer, MemoryMailer, TaskQueue},
    throttle::Throttle,
};

pub struct State {
    pub config: Config,
    pub store: Store,
    pub cache: Arc<dyn Cache>,
    pub search: Arc<dyn ProductSearch>,
    pub jwt: JwtKeys,
    pub throttle: Throttle,
    pub mailer: Arc<dyn Mailer>,
    pub tasks: TaskQueue,
    pub hub: Hub,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let snapshot = load_catalog(&config).await?;
        let store = Store::from_snapshot(&snapshot);

        let cache: Arc<dyn Cache> = match &config.redis_url {
            Some(url) => match init_redis(url).await {
                Ok(connection) => {
                    info!("Using Redis cache");
                    Arc::new(RedisCache::new(connection))
                }
                Err(e) => {
                    warn!("Redis unavailable, falling back to in-memory cache: {e}");
                    Arc::new(MemoryCache::new())
                }
            },
            None => Arc::new(MemoryCache::new()),
        };

        let search: Arc<dyn ProductSearch> = match &config.meili_url {
            Some(url) => match MeiliSearch::init(url, config.meili_key.as_deref()).await {
                Ok(meili) => {
                    info!("Using Meilisearch");
                    Arc::new(meili)
                }
                Err(e) => {
                    warn!("Meilisearch unavailable, falling back to local search: {e}");
                    Arc::new(LocalSearch::new())
                }
            },
            None => Arc::new(LocalSearch::new()),
        };

        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);

        Ok(Self::assemble(config, store, cache, search, mailer).await)
    }

    /// In-memory everything and a recording mailer.
    pub async fn for_tests(snapshot: &Snapshot) -> (Arc<Self>, Arc<MemoryMailer>) {
        Self::for_tests_with_search(snapshot, Arc::new(LocalSearch::new())).await
    }

    /// Like [`State::for_tests`], with the given search backend.
    pub async fn for_tests_with_search(
        snapshot: &Snapshot,
        search: Arc<dyn ProductSearch>,
    ) -> (Arc<Self>, Arc<MemoryMailer>) {
        let mailer = Arc::new(MemoryMailer::new());

        let state = Self::assemble(
            Config::for_tests(),
            Store::from_snapshot(snapshot),
            Arc::new(MemoryCache::new()),
            search,
            mailer.clone(),
        )
        .await;

        (state, mailer)
    }

    async fn assemble(
        config: Config,
        store: Store,
        cache: Arc<dyn Cache>,
        search: Arc<dyn ProductSearch>,
        mailer: Arc<dyn Mailer>,
    ) -> Arc<Self> {
        let docs = SearchDoc::all(&store.read());
        info!(count = docs.len(), "Indexing products");
        if let Err(e) = search.upsert(docs).await {
            warn!("Initial product indexing failed, search falls back to in-process ranking: {e}");
        }

        Arc::new(Self {
            jwt: JwtKeys::new(
                &config.jwt_secret,
                config.access_token_ttl,
                config.refresh_token_ttl,
            ),
            throttle: Throttle::new(
                config.anon_rate_per_minute,
                config.user_rate_per_minute,
                config.email_confirmation_per_minute,
            ),
            tasks: TaskQueue::spawn(mailer.clone(), config.email_sender.clone()),
            hub: Hub::new(),
            config,
            store,
            cache,
            search,
            mailer,
        })
    }
}

async fn load_catalog(config: &Config) -> Result<Snapshot, AppError> {
    if let Some(url) = &config.catalog_url {
        info!("Fetching catalog from {url}");
        return fetch_remote_snapshot(url)
            .await
            .map_err(|e| AppError::internal(format!("Remote catalog: {e:#}")));
    }

    if !Path::new(&config.catalog_path).exists() {
        warn!("Catalog {} not found, starting with an empty catalog", config.catalog_path);
        return Ok(Snapshot::default());
    }

    load_snapshot(&config.catalog_path)
        .map_err(|e| AppError::internal(format!("Catalog {}: {e:#}", config.catalog_path)))
}
