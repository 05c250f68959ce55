use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3030,
            enable_cors: true,
        }
    }
}

/// Sandbox engine settings. Timeouts and commands are deployment defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SandboxSettings {
    /// Base image for new sandboxes.
    pub image: String,
    /// Tried once when pulling `image` fails.
    pub fallback_image: String,
    /// Every sandbox name starts with this prefix; `list` filters on it.
    pub name_prefix: String,
    /// Fixed working root inside each sandbox.
    pub working_root: String,
    /// Local directory holding one workspace mirror per sandbox.
    pub workdirs_base: PathBuf,
    /// Host interface the dev server port is published on.
    pub bind_host: String,
    /// Port reported when no binding can be resolved.
    pub default_port: u16,
    pub stop_grace_secs: u64,
    pub short_timeout_secs: u64,
    pub long_timeout_secs: u64,
    /// Gzip the sync archive before upload.
    pub compress_archives: bool,
    pub kill_dev_server_command: String,
    pub install_command: String,
    /// `{port}` is replaced with the sandbox's exposed port.
    pub dev_server_command: String,
    /// Optional YAML starter template replacing the built-in one.
    pub template_path: Option<PathBuf>,
}

impl SandboxSettings {
    pub fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.short_timeout_secs)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Settings rooted at a throwaway mirror directory, for tests.
    pub fn with_workdirs_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.workdirs_base = base.into();
        self
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "node:18".into(),
            fallback_image: "node:latest".into(),
            name_prefix: "ai-dev-".into(),
            working_root: "/app".into(),
            workdirs_base: PathBuf::from("workdirs"),
            bind_host: "127.0.0.1".into(),
            default_port: 3000,
            stop_grace_secs: 10,
            short_timeout_secs: 10,
            long_timeout_secs: 30,
            compress_archives: false,
            kill_dev_server_command: "pkill -f \"vite\" || true".into(),
            install_command: "npm install".into(),
            dev_server_command:
                "npm run dev -- --host 0.0.0.0 --port {port} > /proc/1/fd/1 2>&1".into(),
            template_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,devbox=debug".into(),
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load from `./config`, the `DEVBOX_ENV` overlay, and `DEVBOX__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env = std::env::var("DEVBOX_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(&source_name(dir, "default")).required(false))
            .add_source(File::with_name(&source_name(dir, &env)).required(false))
            .add_source(File::with_name(&source_name(dir, "local")).required(false))
            // Map DEVBOX__SANDBOX__IMAGE=node:20 to sandbox.image
            .add_source(
                Environment::with_prefix("DEVBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}

fn source_name(dir: &Path, name: &str) -> String {
    dir.join(name).to_string_lossy().into_owned()
}
