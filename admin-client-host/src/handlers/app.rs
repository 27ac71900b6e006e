use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::metrics;

use super::health::{self, RegistrationStatus};

pub fn app(
    config: &Config,
    registration: RegistrationStatus,
    recorder: Option<PrometheusHandle>,
) -> Router {
    let name = config.client.instance.name.clone();

    Router::new()
        .route(
            &config.index_route(),
            routing::get(move || std::future::ready(name.clone())),
        )
        .route(
            &config.health_route(),
            routing::get(health::health).with_state(registration),
        )
        .route(
            "/metrics",
            routing::get(move || match recorder {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(axum::middleware::from_fn(metrics::track_metrics))
}
