use std::future::Future;
use std::sync::Arc;

use admin_client::application::{DefaultApplicationFactory, SharedServerInfo};
use admin_client::lifecycle::Lifecycle;
use admin_client::registrator::ApplicationRegistrator;
use admin_client::scheduler::RegistrationScheduler;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::{handlers, metrics};

/// Serve on `listener` until `shutdown` resolves, keeping this instance registered with the
/// admin registry meanwhile. Deregistration happens after the server stopped accepting
/// requests and before this returns.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> eyre::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;

    // Everything fallible happens before the scheduler is spawned.
    let recorder = if config.export_prometheus {
        Some(metrics::setup_metrics_recorder()?)
    } else {
        None
    };

    let server_info = SharedServerInfo::new(config.server_info(local_addr));

    let mut lifecycle = Lifecycle::new();
    let registration = if config.client.is_enabled() {
        let factory =
            DefaultApplicationFactory::new(config.client.instance.clone(), Arc::new(server_info));
        let registrator = ApplicationRegistrator::new(&config.client)?;
        info!(
            registries = ?registrator.endpoints().iter().map(|url| url.as_str()).collect::<Vec<_>>(),
            "admin client enabled"
        );

        let scheduler = RegistrationScheduler::spawn(
            config.client.scheduling(),
            Arc::new(factory),
            Arc::new(registrator),
        );
        lifecycle.add_listener(Arc::new(scheduler.clone()));
        Some(scheduler.subscribe())
    } else {
        info!("admin client disabled, not registering with any registry");
        None
    };

    let app = handlers::app(&config, registration, recorder);

    info!("listening on {}", local_addr);
    lifecycle.application_ready();

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(error) = &served {
        error!("server stopped unexpectedly: {}", error);
    }

    lifecycle.application_stopping().await;
    info!("stopped");

    served?;
    Ok(())
}
