//! Component wiring shared by the server binary and the integration tests

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::analytics::{
    AnalyticsAggregator, ClickClassifier, ClickIndex, ClickRecorder, GeoIpService,
};
use crate::api::{create_api_router, ApiState};
use crate::auth::AuthService;
use crate::config::Config;
use crate::error::AppError;
use crate::links::{LinkService, ProofIssuer, ReservedPaths};
use crate::redirect::{create_redirect_router, RedirectResolver, RedirectState};
use crate::signing::Signer;
use crate::storage::{CachedStorage, Storage};

/// A fully wired service and the handles needed to shut it down cleanly
pub struct App {
    pub router: Router,
    pub storage: Arc<CachedStorage>,
    pub recorder: ClickRecorder,
    pub index: Arc<ClickIndex>,
}

impl App {
    /// Initialize `base`, rebuild the click view from it and wire every component
    pub async fn build(config: &Config, base: Arc<dyn Storage>) -> Result<Self> {
        base.init().await?;

        let cached = Arc::new(CachedStorage::new(
            base,
            config.cache.max_entries,
            config.cache.ttl_secs,
            config.cache.flush_interval_secs,
        ));
        let storage: Arc<dyn Storage> = cached.clone();

        let index = Arc::new(ClickIndex::new());
        let buckets = storage.load_click_buckets().await?;
        info!("Loaded {} click buckets", buckets.len());
        index.load(buckets);

        let recorder = ClickRecorder::spawn(
            Arc::clone(&storage),
            Arc::clone(&index),
            config.analytics.buffer_size,
            config.analytics.flush_interval_ms,
        );

        let geoip = GeoIpService::new(config.analytics.geoip_city_db_path.as_deref())?;
        if geoip.is_enabled() {
            info!("GeoIP country lookups enabled");
        }

        let signer = Signer::new(config.signing.secret.as_deref());
        let proofs = ProofIssuer::new(signer.clone(), config.signing.password_proof_ttl_secs);
        let reserved = Arc::new(ReservedPaths::new(&config.links.reserved_paths));
        let classifier = Arc::new(ClickClassifier::new(&config.analytics.bot_signatures));

        let links = Arc::new(LinkService::new(
            Arc::clone(&storage),
            recorder.clone(),
            reserved,
            signer,
            proofs.clone(),
            &config.links,
        ));
        let analytics = Arc::new(AnalyticsAggregator::new(
            Arc::clone(&storage),
            Arc::clone(&index),
            &config.analytics,
        ));
        let resolver = Arc::new(RedirectResolver::new(
            Arc::clone(&storage),
            recorder.clone(),
            classifier,
            proofs,
            config.links.short_code_max_length,
        ));

        let auth_service = Arc::new(AuthService::new(&config.auth));

        let api_router = create_api_router(Arc::new(ApiState { links, analytics }), auth_service);
        let redirect_router = create_redirect_router(Arc::new(RedirectState {
            resolver,
            geoip,
            analytics_config: config.analytics.clone(),
        }));

        let router = Router::new()
            .nest("/api", api_router)
            .merge(redirect_router)
            .fallback(|| async { AppError::not_found("route not found") })
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            router,
            storage: cached,
            recorder,
            index,
        })
    }

    /// Write out buffered clicks and click buckets
    pub async fn flush(&self) -> Result<()> {
        self.recorder.flush().await;
        self.storage.flush().await
    }

    pub async fn shutdown(&self) {
        info!("Flushing click recorder...");
        self.recorder.shutdown().await;
        self.storage.shutdown().await;
        info!("Shutdown complete");
    }
}
