use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::handlers::{access_granted, health_check, metrics, AppState};
use crate::identity::{ClientIpResolver, HeaderResolver};
use crate::middleware::{enforce_rate_limit, logging_middleware, require_auth, KnownTokens};
use crate::rate_limit_config::RateLimitConfig;
use crate::rate_limiter::RateLimiter;
use crate::store::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Number of access tokens generated when none are configured.
const GENERATED_TOKENS: usize = 5;

/// Build the router: one public route charged per client address and three
/// private routes, behind token auth, charged per token at different costs.
pub fn create_app(state: AppState) -> Router {
    let public = Router::new().route(
        "/public",
        get(access_granted).layer(middleware::from_fn_with_state(
            state.public_limiter.limit(1),
            enforce_rate_limit,
        )),
    );

    let mut private = Router::new();
    for cost in [1, 2, 5] {
        private = private.route(
            &format!("/private/{}", cost),
            get(access_granted).layer(middleware::from_fn_with_state(
                state.private_limiter.limit(cost),
                enforce_rate_limit,
            )),
        );
    }
    let private =
        private.route_layer(middleware::from_fn_with_state(state.tokens.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(private)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let public_store = open_store(&config, config.public_database).await?;
        let private_store = open_store(&config, config.private_database).await?;

        let mut public_resolver = ClientIpResolver::new();
        if config.trust_forwarded_headers {
            public_resolver = public_resolver.trust_forwarded_headers();
        }

        let public_limiter = RateLimiter::new(RateLimitConfig::new(
            config.public_settings(),
            Arc::new(public_resolver),
            public_store,
        ))?;
        let private_limiter = RateLimiter::new(RateLimitConfig::new(
            config.private_settings(),
            Arc::new(HeaderResolver::authorization()),
            private_store,
        ))?;

        let tokens = if config.private_tokens.is_empty() {
            let tokens = KnownTokens::new(
                (0..GENERATED_TOKENS).map(|_| uuid::Uuid::new_v4().to_string()),
            );
            for token in tokens.iter() {
                tracing::info!(token = %token, "Generated private access token");
            }
            tokens
        } else {
            KnownTokens::new(config.private_tokens.iter().cloned())
        };

        let state = AppState {
            public_limiter,
            private_limiter,
            tokens,
        };

        Ok(Self {
            app: create_app(state.clone()),
            bind_addr: config.bind_addr,
            state,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Throttler server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Metrics available at /metrics");

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.state.public_limiter.shutdown().await;
        self.state.private_limiter.shutdown().await;
        tracing::info!("Window schedulers stopped");

        Ok(())
    }
}

/// Counters start empty: whatever the previous process left behind belongs to
/// a window nobody is tracking anymore.
async fn open_store(config: &Config, database: i64) -> ThrottlerResult<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisCounterStore::connect(url, database).await?),
        None => Arc::new(InMemoryCounterStore::new()),
    };
    store.clear_all().await?;
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
