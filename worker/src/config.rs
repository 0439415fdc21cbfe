use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "LOCAL_STORE_ROOT", default = "./data")]
    pub local_store_root: String,

    #[envconfig(from = "REMOTE_ENDPOINT_URL")]
    pub remote_endpoint_url: Option<String>,

    #[envconfig(from = "REMOTE_ACCESS_KEY", default = "")]
    pub remote_access_key: String,

    #[envconfig(from = "REMOTE_SECRET_KEY", default = "")]
    pub remote_secret_key: String,

    #[envconfig(from = "REMOTE_REGION", default = "us-east-1")]
    pub remote_region: String,

    #[envconfig(from = "REMOTE_BUCKET", default = "revelare-vessel-data")]
    pub remote_bucket: String,

    #[envconfig(from = "WORKER_COUNT", default = "3")]
    pub worker_count: u32,

    #[envconfig(from = "PROCESSING_BATCH_SIZE", default = "10")]
    pub processing_batch_size: usize,

    #[envconfig(from = "OPERATION_RETRY_COUNT", default = "3")]
    pub operation_retry_count: u32,

    #[envconfig(from = "OPERATION_RETRY_INTERVAL", default = "5")]
    pub operation_retry_interval: EnvSecsDuration,

    #[envconfig(from = "VALIDATION_QUEUE_NAME", default = "validation-queue")]
    pub validation_queue_name: String,

    #[envconfig(from = "TRANSFER_QUEUE_NAME", default = "transfer-queue")]
    pub transfer_queue_name: String,

    #[envconfig(from = "CLEANUP_QUEUE_NAME", default = "cleanup-queue")]
    pub cleanup_queue_name: String,

    #[envconfig(from = "LOCAL_CONTAINER_NAME", default = "usvdata")]
    pub local_container_name: String,

    #[envconfig(from = "RETENTION_DAYS", default = "7")]
    pub retention_days: i64,

    #[envconfig(from = "FTP_WATCH_ENABLED", default = "false")]
    pub ftp_watch_enabled: bool,

    #[envconfig(from = "FTP_WATCH_DIR", default = "./ftp-watch")]
    pub ftp_watch_dir: String,

    #[envconfig(from = "FTP_HOST", default = "")]
    pub ftp_host: String,

    #[envconfig(from = "FTP_PORT", default = "21")]
    pub ftp_port: u16,

    #[envconfig(from = "FTP_USER", default = "")]
    pub ftp_user: String,

    #[envconfig(from = "FTP_PASSWORD", default = "")]
    pub ftp_password: String,

    #[envconfig(from = "FTP_POLL_INTERVAL", default = "30")]
    pub ftp_poll_interval: EnvSecsDuration,

    #[envconfig(from = "FTP_RETRY_COUNT", default = "3")]
    pub ftp_retry_count: u32,

    #[envconfig(from = "FTP_RETRY_DELAY", default = "5")]
    pub ftp_retry_delay: EnvSecsDuration,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub bind_port: u16,

    #[envconfig(from = "READ_TIMEOUT", default = "30")]
    pub read_timeout: EnvSecsDuration,

    #[envconfig(from = "WRITE_TIMEOUT", default = "30")]
    pub write_timeout: EnvSecsDuration,

    #[envconfig(from = "SHUTDOWN_TIMEOUT", default = "10")]
    pub shutdown_timeout: EnvSecsDuration,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "LOG_JSON", default = "false")]
    pub log_json: bool,

    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "10")]
    pub max_pg_connections: u32,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}

/// An environment value parsed as whole seconds, per the durations named in
/// the configuration surface (poll intervals, retry delays, timeouts).
#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecsDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvSecsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvSecsDurationError)?;
        Ok(EnvSecsDuration(time::Duration::from_secs(secs)))
    }
}
