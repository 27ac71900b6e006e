use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::scheduler::RegistrationScheduler;

/// Receives the two lifecycle notifications of the hosting application.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// The application finished starting and is serving traffic.
    fn on_application_ready(&self);

    /// The application is shutting down. Implementations should finish their cleanup before
    /// returning, the host waits for them.
    async fn on_application_stopping(&self);
}

#[async_trait]
impl LifecycleListener for RegistrationScheduler {
    fn on_application_ready(&self) {
        RegistrationScheduler::on_application_ready(self)
    }

    async fn on_application_stopping(&self) {
        RegistrationScheduler::on_application_stopping(self).await
    }
}

/// Listeners explicitly added by the host, notified in the order they were added.
#[derive(Default, Clone)]
pub struct Lifecycle {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub fn application_ready(&self) {
        debug!(listeners = self.listeners.len(), "application ready");
        for listener in &self.listeners {
            listener.on_application_ready();
        }
    }

    pub async fn application_stopping(&self) {
        debug!(listeners = self.listeners.len(), "application stopping");
        for listener in &self.listeners {
            listener.on_application_stopping().await;
        }
    }
}
