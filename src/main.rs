use std::sync::Arc;

use anyhow::Context;
use sea_orm::Database;
use shelfbridge::concurrency::{RateLimiter, RetryManager};
use shelfbridge::config::Config;
use shelfbridge::dump;
use shelfbridge::reconciler::{Reconciler, ReconcilerConfig};
use shelfbridge::remote_client::{HardcoverClient, RemoteBookService as _};
use shelfbridge::source_client::{AbsSourceClient, SourceLibraryClient as _};
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt::SubscriberBuilder, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_filter = format!("{}=info,reqwest=warn,h2=warn", env!("CARGO_PKG_NAME"));
    let env_filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ShelfBridge");

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration invalid, aborting");
            return Err(anyhow::anyhow!(err));
        }
    };

    let db = Database::connect(&config.db_connection_string)
        .await
        .with_context(|| "failed to connect to cache database")?;
    migration::Migrator::up(&db, None)
        .await
        .with_context(|| "failed to run cache migrations")?;
    let cache = Arc::new(shelfbridge::cache::SeaOrmBookCache::new(Arc::new(db)));

    let source = Arc::new(AbsSourceClient::new(&config.abs_base_url, &config.abs_token)?);
    let remote = Arc::new(HardcoverClient::new(&config.hardcover_endpoint, &config.hardcover_token)?);

    tracing::info!(abs_reachable = source.test_connection().await.unwrap_or(false), "checked source connectivity");
    tracing::info!(hardcover_reachable = remote.test_connection().await.unwrap_or(false), "checked remote connectivity");

    let rate_limiter = Arc::new(RateLimiter::new());
    let retry = Arc::new(RetryManager::new(Default::default()));
    let cancel = CancellationToken::new();

    let reconciler_config = ReconcilerConfig {
        worker_concurrency: config.worker_concurrency,
        abs_rate_limit_per_minute: config.abs_rate_limit_per_minute,
        hardcover_rate_limit_per_minute: config.hardcover_rate_limit_per_minute,
        auto_add_books: config.auto_add_books,
        session: config.session,
    };

    let reconciler = Arc::new(Reconciler::new(
        source,
        remote,
        cache,
        rate_limiter,
        retry,
        reconciler_config,
        cancel,
    ));

    for user in &config.users {
        tracing::info!(user_id = %user, "starting reconciliation pass");
        let collector = reconciler.run_for_user(user).await?;
        let summary = collector.summary();
        tracing::info!(
            user_id = %user,
            total = summary.total,
            synced = summary.synced,
            completed = summary.completed,
            auto_added = summary.auto_added,
            skipped = summary.skipped,
            errors = summary.errors,
            "finished reconciliation pass"
        );

        if config.dump_failed_syncs {
            let failures = collector.failures();
            if let Some(path) = dump::write_dump(std::path::Path::new(&config.dump_dir), user, &summary, &failures).await? {
                tracing::warn!(path = %path.display(), "wrote failed-sync dump");
            }
        }
    }

    Ok(())
}
