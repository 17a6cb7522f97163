use crate::{
    routes::{get_routes, AppState},
    settings::Settings,
    store::MemoryDiaryStore,
};
use ai::{ModelRegistry, OnnxVisionProvider, VisionModel};
use diary_pipeline::DiaryPipeline;
use llm::StructuredGenerationClient;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
    let registry = Arc::new(ModelRegistry::<VisionModel>::new(Arc::new(OnnxVisionProvider::new(
        settings.vision.clone(),
    ))));
    let generator = Arc::new(StructuredGenerationClient::from_config(
        settings.generation.clone(),
    )?);
    if !generator.has_credential() {
        tracing::warn!("CHATGPT_API_KEY is not set, diaries will fall back to the failure marker");
    }

    let pipeline = DiaryPipeline::new(registry, generator, settings.pipeline.clone());

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        store: Arc::new(MemoryDiaryStore::new()),
        max_upload_bytes: settings.max_upload_bytes,
    })
}

pub async fn start_server() -> anyhow::Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => println!(".env read successfully from {}", path.display()),
        Err(e) => println!("Could not load .env file: {e}"),
    };

    match std::env::var("LOCAL_LOG_DIR") {
        Ok(log_dir) => analytics_tracing::init_tracing_to_file(log_dir.into()),
        Err(_) => analytics_tracing::init_tracing_to_stdout(),
    }

    let settings = Settings::from_env()?;
    tracing::info!(
        "vision device: {}, mood: {}, llm model: {}",
        settings.vision.device,
        settings.vision.mood.is_some(),
        settings.generation.model
    );

    let state = build_state(&settings)?;

    if settings.preload_models {
        let pipeline = state.pipeline.clone();
        // the server accepts requests while models load; a failure is retried on first use
        tokio::spawn(async move {
            if let Err(e) = pipeline.registry().preload(&pipeline.model_kinds()).await {
                tracing::error!("failed to preload models: {}", e);
            }
        });
    }

    let app: axum::Router = get_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer({
            let cors = CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any);
            cors
        });

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("Listening on http://{}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl-C received, shut down...");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, shut down...");
        },
    }
}
