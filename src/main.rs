use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use realestate_portfolio_server_rs::api::{build_router, AppState};
use realestate_portfolio_server_rs::background_processor::ProcessingContext;
use realestate_portfolio_server_rs::config::AppConfig;
use realestate_portfolio_server_rs::database::Database;
use realestate_portfolio_server_rs::logging::init_tracing;
use realestate_portfolio_server_rs::notifier::{HttpMailSender, LogMailSender, MailSender};
use realestate_portfolio_server_rs::task_queue::{RetryPolicy, TaskQueue};
use realestate_portfolio_server_rs::throttle::RequestThrottle;

const DB_CONNECT_ATTEMPTS: u32 = 30;

// The data volume may be mounted after the process starts
async fn wait_for_database(path: &str) -> Result<Database> {
    let mut attempt = 1;
    loop {
        match Database::new(path) {
            Ok(db) => return Ok(db),
            Err(e) if attempt < DB_CONNECT_ATTEMPTS => {
                warn!("Database unavailable (attempt {}/{}): {:#}", attempt, DB_CONNECT_ATTEMPTS, e);
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    let _log_guards = init_tracing(&config.log_directive, config.log_dir.as_deref())?;

    let db = wait_for_database(&config.database_url).await?;
    info!("Database ready at {}", config.database_url);
    let db = Arc::new(Mutex::new(db));

    tokio::fs::create_dir_all(&config.media_root)
        .await
        .with_context(|| format!("Failed to create media root {}", config.media_root.display()))?;

    let mailer: Arc<dyn MailSender> = match (&config.mail.api_url, &config.mail.api_key) {
        (Some(url), Some(key)) => Arc::new(HttpMailSender::new(url, key)),
        _ => {
            warn!("MAIL_API_URL or MAIL_API_KEY not set, status mails will only be logged");
            Arc::new(LogMailSender)
        }
    };

    let ctx = Arc::new(ProcessingContext {
        db: Arc::clone(&db),
        media_root: config.media_root.clone(),
        mailer,
        mail_sender: config.mail.sender.clone(),
        mail_receiver: config.mail.receiver.clone(),
    });
    let retry = RetryPolicy::new(
        config.max_task_retries,
        Duration::from_millis(config.task_retry_base_ms),
    );
    let queue = TaskQueue::start(ctx, config.task_workers, retry);

    let state = Arc::new(AppState {
        db,
        queue,
        media_root: config.media_root.clone(),
        page_size: config.page_size,
        throttle: Arc::new(RequestThrottle::new(
            config.throttle.anon_per_minute,
            config.throttle.user_per_hour,
        )),
    });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
