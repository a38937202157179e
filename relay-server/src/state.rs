use std::sync::Arc;

use relay_shared::clients::DbPool;

use crate::config::AppConfig;

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub pipeline: Arc<relay_core::AdmissionPipeline>,
    pub settings: Arc<relay_core::SettingsStore>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
