use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use syllabus::config::EngineConfig;
use syllabus::learning::{InMemoryStore, LearningService, TemplateArtifactStore};

pub(crate) type EngineService = LearningService<InMemoryStore, TemplateArtifactStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Handles onto one engine instance. The store and artifact ledger stay reachable so the
/// binary can seed catalogs and report what was issued.
pub(crate) struct Engine {
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) artifacts: Arc<TemplateArtifactStore>,
    pub(crate) service: Arc<EngineService>,
}

pub(crate) fn build_engine(config: &EngineConfig) -> Engine {
    let store = Arc::new(InMemoryStore::with_settings(config.initial_settings()));
    let artifacts = Arc::new(TemplateArtifactStore::new(
        config.certificate_base_url.clone(),
    ));
    let service = Arc::new(LearningService::new(store.clone(), artifacts.clone()));
    Engine {
        store,
        artifacts,
        service,
    }
}
