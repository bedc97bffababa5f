//! Yen Sao Storefront - checkout and order edge service

use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yensao_storefront::api::HttpApi;
use yensao_storefront::payment::{CallbackHandler, InMemoryPendingStore, PaymentDispatcher};
use yensao_storefront::publisher::{EventPublisher, LogPublisher, NatsPublisher};
use yensao_storefront::server::{router, AppState};
use yensao_storefront::services::{spawn_sweeper, DraftStore};
use yensao_storefront::{CheckoutService, Config, OrderService};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let api = Arc::new(HttpApi::new(config.api_base_url.clone(), config.api_token.clone(), config.request_timeout, &config.currency)?);
    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client, "storefront")),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, logging events instead");
                Arc::new(LogPublisher)
            }
        },
        None => Arc::new(LogPublisher),
    };

    let pending = Arc::new(InMemoryPendingStore::new());
    let drafts = Arc::new(DraftStore::new());
    spawn_sweeper(drafts.clone(), pending.clone(), config.retention);
    let dispatcher = PaymentDispatcher::new(api.clone(), pending.clone(), config.public_url.clone());
    let callbacks = CallbackHandler::new(api.clone(), pending);
    let checkout = CheckoutService::new(api.clone(), drafts, dispatcher, callbacks, publisher.clone(), &config.currency);
    let state = AppState {
        checkout: Arc::new(checkout),
        orders: Arc::new(OrderService::new(api, publisher)),
        storefront_url: config.storefront_url.clone(),
    };

    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("Yen Sao storefront listening on 0.0.0.0:{} (backend {})", config.port, config.api_base_url);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
