//! Process configuration, parsed once at startup from the environment
//! (`spec.md` §6 table; `SPEC_FULL.md` §2.1 "Configuration").
//!
//! A typed `Config` instead of ad-hoc `std::env::var` calls scattered
//! through `main`/handlers, the same way the teacher's binary entrypoints
//! parse their startup flags. Invalid configuration is rejected here, up
//! front, translating to exit code 64 before any worker subprocess spawns.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "aria", about = "Chat-driven singing-voice synthesis gateway")]
pub struct Config {
    #[arg(long, env = "BACKEND_HOST", default_value = "0.0.0.0")]
    pub backend_host: String,

    #[arg(long, env = "BACKEND_PORT", default_value_t = 8080)]
    pub backend_port: u16,

    /// Dev-only: bypass identity verification (`AlwaysAllowIdentity`).
    #[arg(long, env = "BACKEND_AUTH_DISABLED", default_value_t = false)]
    pub backend_auth_disabled: bool,

    #[arg(long, env = "SESSION_TTL_SECONDS", default_value_t = 86_400)]
    pub session_ttl_seconds: u64,

    #[arg(long, env = "JOB_DEADLINE_SECONDS", default_value_t = 900)]
    pub job_deadline_seconds: u64,

    #[arg(long, env = "GPU_QUEUE_DEPTH", default_value_t = 16)]
    pub gpu_queue_depth: usize,

    #[arg(long, env = "CPU_CONCURRENCY", default_value_t = 4)]
    pub cpu_concurrency: usize,

    #[arg(long, env = "VOICEBANK_CACHE_DIR", default_value = "./voicebank-cache")]
    pub voicebank_cache_dir: PathBuf,

    /// Command used to spawn the CPU-class MCP worker subprocess.
    #[arg(long, env = "CPU_WORKER_COMMAND")]
    pub cpu_worker_command: Option<String>,
    #[arg(long, env = "CPU_WORKER_ARGS", value_delimiter = ' ')]
    pub cpu_worker_args: Vec<String>,

    /// Command used to spawn the GPU-class MCP worker subprocess.
    #[arg(long, env = "GPU_WORKER_COMMAND")]
    pub gpu_worker_command: Option<String>,
    #[arg(long, env = "GPU_WORKER_ARGS", value_delimiter = ' ')]
    pub gpu_worker_args: Vec<String>,

    /// Upload size cap in bytes (`spec.md` §4.8 "enforce size cap (default
    /// 20 MiB)").
    #[arg(long, env = "UPLOAD_MAX_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub upload_max_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Parse from `std::env`/CLI args, returning a typed validation error
    /// instead of letting `clap` itself decide the process exit code — the
    /// binary maps this to exit code 64 uniformly (`spec.md` §6 "Exit
    /// codes").
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::try_parse().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_port == 0 {
            return Err(ConfigError::Invalid("BACKEND_PORT must be nonzero".into()));
        }
        if self.cpu_concurrency == 0 {
            return Err(ConfigError::Invalid("CPU_CONCURRENCY must be at least 1".into()));
        }
        if self.gpu_queue_depth == 0 {
            return Err(ConfigError::Invalid("GPU_QUEUE_DEPTH must be at least 1".into()));
        }
        if self.upload_max_bytes == 0 {
            return Err(ConfigError::Invalid("UPLOAD_MAX_BYTES must be nonzero".into()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn job_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.job_deadline_seconds)
    }
}
