use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_port: u16,
    pub media_root: PathBuf,
    pub page_size: usize,
    pub task_workers: usize,
    pub max_task_retries: u32,
    pub task_retry_base_ms: u64,
    pub throttle: ThrottleConfig,
    pub mail: MailConfig,
    pub log_directive: String,
    /// Directory for the per-subsystem log files; `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub anon_per_minute: u32,
    pub user_per_hour: u32,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub sender: String,
    pub receiver: String,
    /// HTTP delivery is used only when both the URL and the key are set.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "/app/data/realestate.db".to_string(),
            server_port: 8000,
            media_root: PathBuf::from("/app/mediafiles"),
            page_size: 2,
            task_workers: 2,
            max_task_retries: 10,
            task_retry_base_ms: 1000,
            throttle: ThrottleConfig { anon_per_minute: 5, user_per_hour: 100 },
            mail: MailConfig {
                sender: "noreply@localhost".to_string(),
                receiver: "admin@localhost".to_string(),
                api_url: None,
                api_key: None,
            },
            log_directive: "info".to_string(),
            log_dir: Some(PathBuf::from("logs")),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("REALESTATE_DATABASE_URL").unwrap_or(defaults.database_url),
            server_port: parsed_var("REALESTATE_SERVER_PORT").unwrap_or(defaults.server_port),
            media_root: std::env::var("REALESTATE_MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            page_size: parsed_var("REALESTATE_PAGE_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.page_size),
            task_workers: parsed_var("REALESTATE_TASK_WORKERS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.task_workers),
            max_task_retries: parsed_var("MAX_TASK_RETRIES").unwrap_or(defaults.max_task_retries),
            task_retry_base_ms: parsed_var("TASK_RETRY_BASE_MS").unwrap_or(defaults.task_retry_base_ms),
            throttle: ThrottleConfig {
                anon_per_minute: parsed_var("THROTTLE_ANON_PER_MINUTE")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.throttle.anon_per_minute),
                user_per_hour: parsed_var("THROTTLE_USER_PER_HOUR")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.throttle.user_per_hour),
            },
            mail: MailConfig {
                sender: std::env::var("MAIL_SENDER").unwrap_or(defaults.mail.sender),
                receiver: std::env::var("MAIL_RECEIVER").unwrap_or(defaults.mail.receiver),
                api_url: non_empty_var("MAIL_API_URL"),
                api_key: non_empty_var("MAIL_API_KEY"),
            },
            log_directive: std::env::var("REALESTATE_LOG").unwrap_or(defaults.log_directive),
            // An empty value turns the log files off
            log_dir: match std::env::var("REALESTATE_LOG_DIR") {
                Ok(dir) if dir.is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => defaults.log_dir,
            },
        }
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
