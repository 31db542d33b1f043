//! Startup configuration
//!
//! All state of the daemon is derived from this struct, which is read once
//! from the command line (with environment fallbacks) and never changes
//! afterwards.
//!
//! ```text
//! mixed-cpu-node-plugin --reserved-cpus 0-9 --name mixedcpus --idx 10
//! ```

use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::cgroups::{mode::CGROUP_ROOT, DEFAULT_SCOPE_PREFIX};
use crate::coordinator::DEFAULT_HOUSEKEEPING_CPUS;
use crate::cpuset::CpusetParseError;
use crate::deviceplugin::DEFAULT_DEVICE_PLUGIN_DIR;

/// Error type for invalid startup configuration
#[derive(Debug)]
pub enum ConfigError {
    /// The command line could not be parsed
    Args(clap::Error),
    /// The reserved CPU list is empty
    MissingReservedCpus,
    /// A fixed device count of zero would advertise nothing
    InvalidDeviceCount,
    /// The reserved CPU list is not a valid cpuset
    InvalidCpuset { value: String, source: CpusetParseError },
    /// The reserved pool leaves no CPUs for the mutual pool
    ReservedPoolTooSmall { size: usize, housekeeping: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Args(e) => write!(f, "{}", e),
            ConfigError::MissingReservedCpus => write!(f, "--reserved-cpus must not be empty"),
            ConfigError::InvalidDeviceCount => write!(f, "--device-count must be at least 1"),
            ConfigError::InvalidCpuset { value, source } => {
                write!(f, "failed to parse cpuset {:?}: {}", value, source)
            }
            ConfigError::ReservedPoolTooSmall { size, housekeeping } => write!(
                f,
                "reserved CPUs must be more than {} (got {})",
                housekeeping, size
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Args(e) => Some(e),
            ConfigError::InvalidCpuset { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<clap::Error> for ConfigError {
    fn from(e: clap::Error) -> Self {
        ConfigError::Args(e)
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "mixed-cpu-node-plugin", version, about, long_about = None)]
pub struct Config {
    /// Reserved CPU list in cpuset syntax (e.g. "0-9")
    #[arg(long, env = "RESERVED_CPUS", visible_alias = "mutual-cpus")]
    pub reserved_cpus: String,

    /// How many leading reserved CPUs stay out of the mutual pool
    #[arg(long, env = "HOUSEKEEPING_CPUS", default_value_t = DEFAULT_HOUSEKEEPING_CPUS)]
    pub housekeeping_cpus: usize,

    /// Plugin name announced to the runtime
    #[arg(long = "name", env = "NRI_PLUGIN_NAME", default_value = "mixedcpus")]
    pub plugin_name: String,

    /// Plugin index; orders this plugin among the runtime's plugins
    #[arg(long = "idx", env = "NRI_PLUGIN_IDX", default_value = "10")]
    pub plugin_idx: String,

    /// Socket for the runtime lifecycle service (derived from name/idx if unset)
    #[arg(long, env = "RUNTIME_SOCKET")]
    pub runtime_socket: Option<PathBuf>,

    /// Kubelet device-plugin directory
    #[arg(long, default_value = DEFAULT_DEVICE_PLUGIN_DIR)]
    pub device_plugin_dir: PathBuf,

    /// Fixed number of advertised devices; defaults to the mutual pool size
    #[arg(long)]
    pub device_count: Option<usize>,

    /// Prefix of per-container systemd scopes ("crio" → crio-<id>.scope)
    #[arg(long, default_value = DEFAULT_SCOPE_PREFIX)]
    pub scope_prefix: String,

    /// Where the cgroup filesystem is mounted
    #[arg(long, default_value = CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    /// Address for the Prometheus endpoint; disabled when unset
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// OTLP collector endpoint; span export disabled when unset
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Node name, for log context only
    #[arg(long, env = "NODE_NAME", default_value = "")]
    pub node_name: String,
}

impl Config {
    /// Build the configuration from the process arguments and environment
    ///
    /// Prints usage and exits on `--help` or malformed flags, like any
    /// clap binary.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from explicit arguments
    ///
    /// The first item is the program name. Unset flags still fall back to
    /// their environment variables.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::try_parse_from(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks clap cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reserved_cpus.trim().is_empty() {
            return Err(ConfigError::MissingReservedCpus);
        }
        if self.device_count == Some(0) {
            return Err(ConfigError::InvalidDeviceCount);
        }
        Ok(())
    }

    /// Socket the runtime lifecycle service listens on
    pub fn runtime_socket_path(&self) -> PathBuf {
        self.runtime_socket.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "/var/run/mixedcpus/{}-{}.sock",
                self.plugin_idx, self.plugin_name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        Config::from_args(std::iter::once("mixed-cpu-node-plugin").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        Config::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--reserved-cpus", "0-9"]).unwrap();
        assert_eq!(config.reserved_cpus, "0-9");
        assert_eq!(config.housekeeping_cpus, 4);
        assert_eq!(config.scope_prefix, "crio");
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.device_plugin_dir, PathBuf::from("/var/lib/kubelet/device-plugins"));
        assert!(!config.log_json);
        assert_eq!(
            config.runtime_socket_path(),
            PathBuf::from(format!(
                "/var/run/mixedcpus/{}-{}.sock",
                config.plugin_idx, config.plugin_name
            ))
        );
    }

    #[test]
    fn test_inline_and_separate_values() {
        let config = parse(&[
            "--reserved-cpus=0-15",
            "--name",
            "mixed",
            "--idx=05",
            "--housekeeping-cpus",
            "2",
            "--device-count=99",
            "--metrics-addr",
            "127.0.0.1:9464",
            "--runtime-socket",
            "/run/nri/05-mixed.sock",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(config.reserved_cpus, "0-15");
        assert_eq!(config.plugin_name, "mixed");
        assert_eq!(config.plugin_idx, "05");
        assert_eq!(config.housekeeping_cpus, 2);
        assert_eq!(config.device_count, Some(99));
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9464".parse().unwrap()));
        assert!(config.log_json);
        assert_eq!(config.runtime_socket_path(), PathBuf::from("/run/nri/05-mixed.sock"));
    }

    #[test]
    fn test_mutual_cpus_alias() {
        let config = parse(&["--mutual-cpus", "0-7"]).unwrap();
        assert_eq!(config.reserved_cpus, "0-7");
    }

    #[test]
    fn test_environment_fallbacks() {
        let command = Config::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };
        assert_eq!(env_of("reserved_cpus").as_deref(), Some("RESERVED_CPUS"));
        assert_eq!(env_of("housekeeping_cpus").as_deref(), Some("HOUSEKEEPING_CPUS"));
        assert_eq!(env_of("plugin_name").as_deref(), Some("NRI_PLUGIN_NAME"));
        assert_eq!(env_of("plugin_idx").as_deref(), Some("NRI_PLUGIN_IDX"));
        assert_eq!(env_of("runtime_socket").as_deref(), Some("RUNTIME_SOCKET"));
        assert_eq!(env_of("metrics_addr").as_deref(), Some("METRICS_ADDR"));
        assert_eq!(env_of("otlp_endpoint").as_deref(), Some("OTLP_ENDPOINT"));
        assert_eq!(env_of("node_name").as_deref(), Some("NODE_NAME"));
        assert_eq!(env_of("device_count"), None);
    }

    #[test]
    fn test_semantic_checks() {
        let err = parse(&["--reserved-cpus", " "]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReservedCpus));

        let err = parse(&["--reserved-cpus", "0-9", "--device-count=0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDeviceCount));
    }

    #[test]
    fn test_rejects_bad_flags() {
        let err = parse(&["--reserved-cpus", "0-9", "--bogus", "1"]).unwrap_err();
        assert!(matches!(err, ConfigError::Args(_)));

        let err = parse(&["--reserved-cpus", "0-9", "--housekeeping-cpus", "four"]).unwrap_err();
        assert!(matches!(err, ConfigError::Args(_)));

        let err = parse(&["--reserved-cpus", "0-9", "--metrics-addr", "localhost"]).unwrap_err();
        assert!(matches!(err, ConfigError::Args(_)));
    }
}
