use std::time::Duration;

use gazer_core::env;

/// Default launch command template. `{local_port}` and `{remote_port}`
/// are substituted before spawning.
pub const DEFAULT_LAUNCH_COMMAND: &str =
    "gpu run -p {local_port}:{remote_port} python gaze_server.py";

/// Default best-effort stop command issued on shutdown.
pub const DEFAULT_STOP_COMMAND: &str = "gpu stop";

/// Accelerator provisioning and worker-call configuration.
#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    /// Launch argv template (program first).
    pub launch_command: Vec<String>,
    /// Stop argv; empty disables the remote stop request.
    pub stop_command: Vec<String>,
    /// Host the forwarded worker port is reachable on.
    pub host: String,
    /// Local side of the port forward.
    pub local_port: u16,
    /// Port the worker listens on remotely.
    pub remote_port: u16,
    /// Delay between provisioning health probes.
    pub health_interval: Duration,
    /// Maximum provisioning health probes before giving up.
    pub health_attempts: u32,
    /// Timeout of a single health probe.
    pub health_timeout: Duration,
    /// Upper bound for one `/generate` call.
    pub generation_timeout: Duration,
    /// Upper bound for one `/download` call.
    pub download_timeout: Duration,
    /// Bound on each shutdown step (child kill, stop command).
    pub shutdown_timeout: Duration,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            launch_command: split_command(DEFAULT_LAUNCH_COMMAND),
            stop_command: split_command(DEFAULT_STOP_COMMAND),
            host: "127.0.0.1".into(),
            local_port: 8080,
            remote_port: 8000,
            health_interval: Duration::from_secs(5),
            health_attempts: 120,
            health_timeout: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(20 * 60),
            download_timeout: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl AcceleratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                                                  |
    /// |----------------------------|----------------------------------------------------------|
    /// | `ACCELERATOR_COMMAND`      | `gpu run -p {local_port}:{remote_port} python gaze_server.py` |
    /// | `ACCELERATOR_STOP_COMMAND` | `gpu stop` (set to `none` to disable)                    |
    /// | `ACCELERATOR_HOST`         | `127.0.0.1`                                              |
    /// | `ACCELERATOR_LOCAL_PORT`   | `8080`                                                   |
    /// | `ACCELERATOR_REMOTE_PORT`  | `8000`                                                   |
    /// | `HEALTH_CHECK_INTERVAL_MS` | `5000`                                                   |
    /// | `HEALTH_CHECK_ATTEMPTS`    | `120`                                                    |
    /// | `HEALTH_CHECK_TIMEOUT_MS`  | `5000`                                                   |
    /// | `GENERATION_TIMEOUT_SECS`  | `1200`                                                   |
    /// | `DOWNLOAD_TIMEOUT_SECS`    | `300`                                                    |
    ///
    /// Commands are split on whitespace; quoting is not supported.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stop_command = match env::optional("ACCELERATOR_STOP_COMMAND") {
            Some(raw) if raw.eq_ignore_ascii_case("none") => Vec::new(),
            Some(raw) => split_command(&raw),
            None => defaults.stop_command,
        };

        Self {
            launch_command: split_command(&env::string_or(
                "ACCELERATOR_COMMAND",
                DEFAULT_LAUNCH_COMMAND,
            )),
            stop_command,
            host: env::string_or("ACCELERATOR_HOST", &defaults.host),
            local_port: env::parse_or("ACCELERATOR_LOCAL_PORT", defaults.local_port),
            remote_port: env::parse_or("ACCELERATOR_REMOTE_PORT", defaults.remote_port),
            health_interval: Duration::from_millis(env::parse_or(
                "HEALTH_CHECK_INTERVAL_MS",
                5_000,
            )),
            health_attempts: env::parse_or("HEALTH_CHECK_ATTEMPTS", defaults.health_attempts)
                .max(1),
            health_timeout: Duration::from_millis(env::parse_or("HEALTH_CHECK_TIMEOUT_MS", 5_000)),
            generation_timeout: Duration::from_secs(env::parse_or(
                "GENERATION_TIMEOUT_SECS",
                20 * 60,
            )),
            download_timeout: Duration::from_secs(env::parse_or("DOWNLOAD_TIMEOUT_SECS", 5 * 60)),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }

    /// Launch argv with port placeholders substituted.
    pub fn launch_argv(&self) -> Vec<String> {
        self.launch_command
            .iter()
            .map(|arg| {
                arg.replace("{local_port}", &self.local_port.to_string())
                    .replace("{remote_port}", &self.remote_port.to_string())
            })
            .collect()
    }

    /// Worker endpoint before any port remapping is observed.
    pub fn initial_endpoint(&self) -> String {
        self.endpoint_for_port(self.local_port)
    }

    /// Worker endpoint for a given local port.
    pub fn endpoint_for_port(&self, port: u16) -> String {
        format!("http://{}:{}", self.host, port)
    }
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
