use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use olm_gateway::config::{config_path_from_env, load_config, AppConfig};
use olm_gateway::observability::init_tracing;
use olm_gateway::routing::{dispatch_request, normalize_base_path, ClientAddr};
use olm_gateway::state::AppState;
use tokio::net::{TcpListener, TcpStream};

fn main() -> ExitCode {
    let config_path = config_path_from_env();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cannot load configuration from '{config_path}': {err}");
            eprintln!("copy 'config.example.yaml' to 'config.yaml' and edit it, or set OLM_GATEWAY_CONFIG");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.features.log_level, config.features.log_format);

    let runtime = match build_runtime(&config) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("cannot start tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// `runtime_worker_threads: 1` selects a current-thread runtime.
fn build_runtime(config: &AppConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = match config.server.runtime_worker_threads {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads);
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };
    builder.enable_all().build()
}

async fn serve(config: AppConfig) -> Result<(), String> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let base_path: Arc<str> = Arc::from(normalize_base_path(&config.server.base_path));

    let state = AppState::new(config)
        .map(Arc::new)
        .map_err(|err| format!("cannot initialize backend: {err}"))?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| format!("cannot bind {addr}: {err}"))?;

    tracing::info!(
        %addr,
        base_path = %base_path,
        backend = state.backend.name(),
        concurrent_request_limit = state.config.server.concurrent_request_limit,
        "olm-gateway listening"
    );

    let conn_builder = ConnBuilder::new(TokioExecutor::new());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    spawn_connection(&conn_builder, stream, remote_addr, &state, &base_path);
                }
                Err(err) => tracing::warn!(error = %err, "accept failed"),
            },
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

fn spawn_connection(
    conn_builder: &ConnBuilder<TokioExecutor>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: &Arc<AppState>,
    base_path: &Arc<str>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%remote_addr, error = %err, "TCP_NODELAY not applied");
    }

    let state = Arc::clone(state);
    let base_path = Arc::clone(base_path);
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let mut request = request.map(Body::new);
        request.extensions_mut().insert(ClientAddr(remote_addr));
        dispatch_request(Arc::clone(&state), Arc::clone(&base_path), request)
    });

    let conn_builder = conn_builder.clone();
    tokio::spawn(async move {
        if let Err(err) = conn_builder
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            tracing::debug!(%remote_addr, "connection closed with error: {err:#}");
        }
    });
}
