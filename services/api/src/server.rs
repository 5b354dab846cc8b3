use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState};
use crate::routes::with_learning_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use syllabus::config::AppConfig;
use syllabus::error::AppError;
use syllabus::telemetry;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = build_engine(&config.engine);
    if let Some(path) = args.catalog.take() {
        let summary = crate::catalog::load_catalog_file(&engine, &path)?;
        info!(
            path = %path.display(),
            courses = summary.courses,
            plans = summary.plans,
            items = summary.items,
            tests = summary.tests,
            "catalog loaded"
        );
    }

    let app = with_learning_routes(engine.service.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        completion_threshold = config.engine.completion_threshold,
        video_completion_threshold = config.engine.video_completion_threshold,
        "learning engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
