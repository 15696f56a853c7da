use std::{any::Any, future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, warn};

use crate::{
    config::AppConfig,
    cors::{cors_layer, origin_guard, OriginPolicy},
    error::AppError,
    lifecycle::Lifecycle,
    routes,
    shutdown::{ShutdownListener, ShutdownSignal},
    state::AppState,
    store::MongoStore,
    users::repo::{MongoUserRepository, UserRepository},
};

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub fn build_app(state: AppState, policy: Arc<OriginPolicy>) -> Router {
    Router::new()
        .merge(routes::router())
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors_layer())
        .layer(middleware::from_fn_with_state(policy, origin_guard))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
}

async fn not_found() -> AppError {
    AppError::NotFound
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "handler panicked");
    AppError::internal(anyhow::anyhow!("handler panicked")).into_response()
}

/// Connect, bind, serve, drain. Any `Err` here means exit non-zero.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new();
    let policy = Arc::new(OriginPolicy::from_config(&config.cors));
    let mut shutdown = ShutdownListener::install();

    let store = MongoStore::open(&config.store, lifecycle.store_tracker())
        .await
        .context("configure store client")?;

    match until_shutdown(&mut shutdown, lifecycle.connect(&store)).await {
        Ok(connected) => connected?,
        Err(signal) => {
            lifecycle.shutdown_before_serving(signal, Some(&store)).await?;
            return Ok(());
        }
    }

    let users = MongoUserRepository::new(store.database());
    match until_shutdown(&mut shutdown, users.ensure_indexes()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to ensure user indexes; continuing"),
        Err(signal) => {
            lifecycle.shutdown_before_serving(signal, Some(&store)).await?;
            return Ok(());
        }
    }

    let state = AppState::new(&config.env, lifecycle.store_status(), Arc::new(users));
    let app = build_app(state, policy);

    let listener = match until_shutdown(&mut shutdown, bind(&config)).await {
        Ok(Ok(listener)) => listener,
        Ok(Err(e)) => {
            lifecycle.abort_startup(&store).await;
            return Err(e);
        }
        Err(signal) => {
            lifecycle.shutdown_before_serving(signal, Some(&store)).await?;
            return Ok(());
        }
    };

    lifecycle
        .serve(
            listener,
            app,
            &store,
            async move { shutdown.wait().await },
            config.drain_timeout,
        )
        .await?;
    Ok(())
}

/// Runs one startup step unless a shutdown signal is (or becomes) pending.
async fn until_shutdown<F: Future>(
    shutdown: &mut ShutdownListener,
    step: F,
) -> Result<F::Output, ShutdownSignal> {
    tokio::select! {
        biased;
        signal = shutdown.wait() => Err(signal),
        out = step => Ok(out),
    }
}

async fn bind(config: &AppConfig) -> anyhow::Result<tokio::net::TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(env = %config.env, "listening on {}", addr);
    Ok(listener)
}
