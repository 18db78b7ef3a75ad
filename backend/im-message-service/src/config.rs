use crate::error::AppError;
use db_pool::env_utils::{parse_env_optional, parse_env_required, parse_env_with_default};
use dotenvy::dotenv;
use std::time::Duration;

/// Connection registry tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per session before it is evicted as too slow
    pub outbound_queue: usize,
    pub reap_interval: Duration,
    /// Sessions idle for longer than this are evicted by the reaper
    pub stale_after: Duration,
    /// Capacity of the hub's command queue
    pub command_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            reap_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
            command_queue: 1024,
        }
    }
}

/// Per-socket transport settings.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub ping_interval: Duration,
    pub client_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            client_timeout: Duration::from_secs(60),
            max_frame_bytes: 512,
        }
    }
}

/// Message pipeline limits.
#[derive(Debug, Clone)]
pub struct MessageConfig {
    pub recall_window: Duration,
    pub max_content_bytes: usize,
    pub push_timeout: Duration,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            recall_window: Duration::from_secs(120),
            max_content_bytes: 5000,
            push_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Absent means the in-memory store (local development only)
    pub database_url: Option<String>,
    pub friend_service_url: String,
    pub user_service_url: String,
    pub jwt_secret: String,
    /// Shared key for `/message/v1/internal/*`; unset blocks those routes
    pub internal_api_key: Option<String>,
    pub message: MessageConfig,
    pub hub: HubConfig,
    pub ws: WsConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenv();

        let jwt_secret = parse_env_required::<String>("JWT_SECRET").map_err(AppError::Config)?;
        if jwt_secret.len() < 16 {
            return Err(AppError::Config(
                "JWT_SECRET must be at least 16 bytes".into(),
            ));
        }

        let message_defaults = MessageConfig::default();
        let hub_defaults = HubConfig::default();
        let ws_defaults = WsConfig::default();

        let cfg = Self {
            port: parse_env_with_default("PORT", 8005),
            database_url: parse_env_optional("DATABASE_URL"),
            friend_service_url: std::env::var("FRIEND_SERVICE_URL")
                .unwrap_or_else(|_| "http://friend-service:8080".to_string()),
            user_service_url: std::env::var("USER_SERVICE_URL")
                .unwrap_or_else(|_| "http://user-service:8080".to_string()),
            jwt_secret,
            internal_api_key: parse_env_optional("INTERNAL_API_KEY"),
            message: MessageConfig {
                recall_window: Duration::from_secs(parse_env_with_default(
                    "MESSAGE_RECALL_WINDOW_SECS",
                    message_defaults.recall_window.as_secs(),
                )),
                max_content_bytes: parse_env_with_default(
                    "MESSAGE_MAX_CONTENT_BYTES",
                    message_defaults.max_content_bytes,
                ),
                push_timeout: Duration::from_millis(parse_env_with_default(
                    "PUSH_TIMEOUT_MS",
                    message_defaults.push_timeout.as_millis() as u64,
                )),
            },
            hub: HubConfig {
                outbound_queue: parse_env_with_default(
                    "HUB_OUTBOUND_QUEUE",
                    hub_defaults.outbound_queue,
                ),
                reap_interval: Duration::from_secs(parse_env_with_default(
                    "HUB_REAP_INTERVAL_SECS",
                    hub_defaults.reap_interval.as_secs(),
                )),
                stale_after: Duration::from_secs(parse_env_with_default(
                    "HUB_STALE_AFTER_SECS",
                    hub_defaults.stale_after.as_secs(),
                )),
                command_queue: hub_defaults.command_queue,
            },
            ws: WsConfig {
                ping_interval: Duration::from_secs(parse_env_with_default(
                    "WS_PING_INTERVAL_SECS",
                    ws_defaults.ping_interval.as_secs(),
                )),
                client_timeout: Duration::from_secs(parse_env_with_default(
                    "WS_CLIENT_TIMEOUT_SECS",
                    ws_defaults.client_timeout.as_secs(),
                )),
                max_frame_bytes: parse_env_with_default(
                    "WS_MAX_FRAME_BYTES",
                    ws_defaults.max_frame_bytes,
                ),
            },
        };

        if cfg.hub.outbound_queue == 0 {
            return Err(AppError::Config("HUB_OUTBOUND_QUEUE must be positive".into()));
        }
        if cfg.ws.ping_interval >= cfg.ws.client_timeout {
            return Err(AppError::Config(
                "WS_PING_INTERVAL_SECS must be shorter than WS_CLIENT_TIMEOUT_SECS".into(),
            ));
        }

        Ok(cfg)
    }
}
