use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use envconfig::Envconfig;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use admin_client_host::config::Config;
use admin_client_host::server::serve;

/// Host configuration pointing at `registry_url`, with a short registration period.
pub fn config_for_registry(registry_url: &str, extra: &[(&str, &str)]) -> Config {
    let mut env = HashMap::from([
        ("ADMIN_URL".to_owned(), registry_url.to_owned()),
        ("ADMIN_PERIOD_MS".to_owned(), "200".to_owned()),
        ("ADMIN_READ_TIMEOUT_MS".to_owned(), "1000".to_owned()),
        ("EXPORT_PROMETHEUS".to_owned(), "false".to_owned()),
        ("INSTANCE_NAME".to_owned(), "host-under-test".to_owned()),
    ]);
    for (key, value) in extra {
        env.insert(key.to_string(), value.to_string());
    }

    Config::init_from_hashmap(&env).expect("failed to load config")
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    server: JoinHandle<eyre::Result<()>>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        let server = tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle {
            addr,
            shutdown,
            server,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("http://{:?}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    /// Trigger a graceful shutdown and wait until deregistration is done.
    pub async fn stop(self) -> eyre::Result<()> {
        self.shutdown.notify_one();
        self.server.await.expect("server task panicked")
    }
}
