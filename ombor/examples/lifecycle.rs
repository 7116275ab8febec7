//! Composition root that serves, drains and rebuilds when its config file
//! changes.
//!
//! ```text
//! cargo run --example lifecycle
//! RUST_LOG=ombor=debug,lifecycle=debug cargo run --example lifecycle
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ombor::prelude::*;
use ombor::resilience::StoreError;
use ombor::support::logging::init_tracing;
use ombor::watch_file;
use tracing::info;

// === Services ===

#[derive(Debug, Clone)]
struct Settings {
    dsn: String,
    greeting: String,
}

impl Settings {
    fn load(path: &Path) -> std::result::Result<Self, BoxError> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings = Settings {
            dsn: "postgres://localhost/app".to_string(),
            greeting: "hello".to_string(),
        };
        for line in raw.lines() {
            match line.split_once('=') {
                Some(("dsn", value)) => settings.dsn = value.trim().to_string(),
                Some(("greeting", value)) => settings.greeting = value.trim().to_string(),
                _ => {}
            }
        }
        Ok(settings)
    }
}

struct Pool {
    dsn: String,
}

impl Pool {
    async fn query(&self, id: u64) -> std::result::Result<String, StoreError> {
        match id % 5 {
            0 => Err(StoreError::NotFound),
            _ => Ok(format!("user {id} from {}", self.dsn)),
        }
    }
}

struct Greeter {
    settings: Settings,
    pool: Arc<Pool>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<Retry>,
}

impl Greeter {
    async fn greet(&self, id: u64) -> String {
        let lookup = self
            .breaker
            .call(|| self.retry.call(|| self.pool.query(id)))
            .await;
        match lookup {
            Ok(user) => format!("{}, {user}", self.settings.greeting),
            Err(err) => format!("{}, stranger ({err})", self.settings.greeting),
        }
    }
}

// === Identifiers ===

const CONFIG_PATH: Service<PathBuf> = Service::new("config_path");
const SETTINGS: Service<Settings> = Service::new("settings");
const POOL: Service<Arc<Pool>> = Service::new("pool");
const BREAKER: Service<Arc<CircuitBreaker>> = Service::new("breaker");
const RETRY: Service<Arc<Retry>> = Service::new("retry");
const GREETER: Service<Arc<Greeter>> = Service::new("greeter");

// === Providers ===

struct ConfigProvider {
    path: PathBuf,
}

impl Provider for ConfigProvider {
    fn register(&self, registry: &mut dyn ProviderRegistry) {
        registry.value(&CONFIG_PATH, self.path.clone());
        registry.provide(&SETTINGS, |r| {
            let path = r.try_get(&CONFIG_PATH)?;
            let settings = Settings::load(&path)?;
            r.rebuild_on(watch_file(&path)?)?;
            info!(epoch = r.epoch(), ?settings, "Loaded settings");
            Ok(settings)
        });
    }
}

struct StorageProvider;

impl Provider for StorageProvider {
    fn register(&self, registry: &mut dyn ProviderRegistry) {
        registry.provide(&POOL, |r| {
            let settings = r.try_get(&SETTINGS)?;
            let dsn = settings.dsn.clone();
            r.on_shutdown_async(async move {
                info!(%dsn, "Closing pool");
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            });
            Ok(Arc::new(Pool { dsn: settings.dsn }))
        });
        registry.provide_named(&BREAKER, "pool", |_| {
            Ok(Arc::new(CircuitBreaker::new(BreakerConfig::new("pool", ClientKind::SqlStore))))
        });
        registry.provide(&RETRY, |_| Ok(Arc::new(Retry::new(RetryConfig::new(ClientKind::SqlStore)))));
    }
}

struct AppProvider;

impl Provider for AppProvider {
    fn register(&self, registry: &mut dyn ProviderRegistry) {
        registry.provide(&GREETER, |r| {
            Ok(Arc::new(Greeter {
                settings: r.try_get(&SETTINGS)?,
                pool: r.try_get(&POOL)?,
                breaker: r.try_get_named(&BREAKER, "pool")?,
                retry: r.try_get(&RETRY)?,
            }))
        });
    }
}

// === Main ===

#[tokio::main]
async fn main() -> std::result::Result<(), BoxError> {
    init_tracing("ombor=info,lifecycle=info")?;

    let path = std::env::temp_dir().join("ombor-lifecycle.conf");
    std::fs::write(&path, "dsn = postgres://localhost/app\ngreeting = hello\n")?;

    let container = Container::builder()
        .debounce(Duration::from_millis(200))
        .teardown_timeout(Duration::from_secs(5))
        .add_provider(&ConfigProvider { path: path.clone() })
        .add_provider(&StorageProvider)
        .add_provider(&AppProvider)
        .build();

    // Simulated operator editing the config twice.
    let editor = {
        let path = path.clone();
        tokio::spawn(async move {
            for greeting in ["hi", "good evening"] {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let contents = format!("dsn = postgres://replica/app\ngreeting = {greeting}\n");
                if let Err(err) = tokio::fs::write(&path, contents).await {
                    tracing::error!(error = %err, "Failed to edit config");
                }
            }
        })
    };

    let mut request = 0u64;
    let mut rebuilds = 0;
    while rebuilds < 2 {
        let greeter = container.get(&GREETER);
        tokio::select! {
            notice = container.rebuild_requested() => {
                info!(epoch = notice.epoch(), "Draining before rebuild");
                notice.reloaded().await;
                rebuilds += 1;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                request += 1;
                let reply = greeter.greet(request).await;
                info!(request, %reply, "Served");
            }
        }
    }

    let _ = editor.await;
    let reply = container.get(&GREETER).greet(request + 1).await;
    info!(%reply, "Final configuration");

    container.stop_watching().await;
    container.shutdown_resources().await;
    std::fs::remove_file(&path)?;
    Ok(())
}
