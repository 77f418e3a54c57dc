use std::path::PathBuf;
use std::time::Duration;

/// Execution-layer configuration, loaded once and passed explicitly to the
/// command builder, artifact scanner, and process runner.
///
/// There is deliberately no global settings singleton: every component
/// that needs one of these values receives it at construction time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Program name or path of the wrapped CLI (default: `yolo`).
    pub cli_program: String,
    /// Working directory for child processes and artifact scanning
    /// (uses the current directory if `None`).
    pub working_dir: Option<PathBuf>,
    /// Maximum wall-clock time per run before forced termination.
    pub timeout: Duration,
    /// Grace period between the termination signal and the hard kill.
    pub kill_grace: Duration,
    /// Device selector applied when a request does not name one.
    pub default_device: Option<String>,
    /// How long terminal run handles are retained before eviction.
    pub retention: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `YOLO_BIN`               | `yolo`  |
    /// | `YOLO_WORKDIR`           | (unset) |
    /// | `YOLO_TIMEOUT_SECS`      | `3600`  |
    /// | `YOLO_KILL_GRACE_SECS`   | `5`     |
    /// | `YOLO_DEFAULT_DEVICE`    | (unset) |
    /// | `YOLO_RUN_RETENTION_SECS`| `900`   |
    pub fn from_env() -> Self {
        let cli_program = std::env::var("YOLO_BIN").unwrap_or_else(|_| "yolo".into());

        let working_dir = std::env::var("YOLO_WORKDIR").ok().map(PathBuf::from);

        let timeout_secs: u64 = std::env::var("YOLO_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("YOLO_TIMEOUT_SECS must be a valid u64");

        let kill_grace_secs: u64 = std::env::var("YOLO_KILL_GRACE_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("YOLO_KILL_GRACE_SECS must be a valid u64");

        let default_device = std::env::var("YOLO_DEFAULT_DEVICE").ok();

        let retention_secs: u64 = std::env::var("YOLO_RUN_RETENTION_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("YOLO_RUN_RETENTION_SECS must be a valid u64");

        Self {
            cli_program,
            working_dir,
            timeout: Duration::from_secs(timeout_secs),
            kill_grace: Duration::from_secs(kill_grace_secs),
            default_device,
            retention: Duration::from_secs(retention_secs),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cli_program: "yolo".into(),
            working_dir: None,
            timeout: Duration::from_secs(3600),
            kill_grace: Duration::from_secs(5),
            default_device: None,
            retention: Duration::from_secs(900),
        }
    }
}
