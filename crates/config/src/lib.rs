//! The configuration of the node emulator: command line, process environment and the node
//! configuration file.

use std::{
    ffi::OsString,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Command, CommandFactory, Parser};
use directories::BaseDirs;
use node_emu_faults::FaultProfile;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "node-emulator",
    about = "Emulates the runtime parameters and exit codes of a node daemon"
)]
pub struct Arguments {
    /// The data directory of the node.
    ///
    /// Defaults to `~/.ethereum`.
    #[arg(short = 'd', long = "db-path", value_name = "DATA_DIR")]
    pub db_path: Option<PathBuf>,

    /// Path to the node configuration JSON file.
    #[arg(long = "config", value_name = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// The port to serve JSON-RPC on. Without it the node exits after the work phase.
    #[arg(long = "http-port", value_name = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Start from a remote snapshot. The value itself is ignored.
    #[arg(long = "download-snapshot", value_name = "UNUSED")]
    pub download_snapshot: Option<String>,

    /// Seed for the fault selection. A random seed is used if not specified.
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Pin the fault profile instead of drawing it, e.g. `work-failure=200,db-corruption`.
    #[arg(long = "fault-profile", value_name = "PROFILE")]
    pub fault_profile: Option<FaultProfile>,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json")]
    pub log_json: bool,
}

impl Arguments {
    const DEFAULT_DATA_DIRECTORY: &str = ".ethereum";

    /// Return the data directory with the following precedence:
    /// 1. `self.db_path` if it was provided.
    /// 2. `~/.ethereum`.
    pub fn data_directory(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }

        match BaseDirs::new() {
            Some(base_directories) => base_directories
                .home_dir()
                .join(Self::DEFAULT_DATA_DIRECTORY),
            None => PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
        }
    }

    pub fn download_requested(&self) -> bool {
        self.download_snapshot.is_some()
    }

    /// Parses the arguments, skipping the ones the emulator doesn't know about.
    ///
    /// The real node accepts far more options than the emulator does. Unknown options are dropped
    /// together with any values that follow them before the remaining arguments are parsed.
    pub fn parse_known<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut command = Self::command();
        command.build();

        let mut args = args.into_iter().map(Into::into);
        let mut known_args = Vec::from_iter(args.next());
        let mut value_pending = false;
        for arg in args {
            if std::mem::take(&mut value_pending) {
                known_args.push(arg);
                continue;
            }
            let Some(takes_value) = arg
                .to_str()
                .and_then(|token| Self::option_takes_value(&command, token))
            else {
                continue;
            };
            value_pending = takes_value;
            known_args.push(arg);
        }

        Self::parse_from(known_args)
    }

    /// Returns whether a known option expects its value in the next argument, [`None`] if the
    /// token isn't a known option.
    fn option_takes_value(command: &Command, token: &str) -> Option<bool> {
        let (arg, inline_value) = if let Some(long) = token.strip_prefix("--") {
            let (name, inline_value) = match long.split_once('=') {
                Some((name, _)) => (name, true),
                None => (long, false),
            };
            let arg = command
                .get_arguments()
                .find(|arg| arg.get_long() == Some(name))?;
            (arg, inline_value)
        } else {
            let mut chars = token.strip_prefix('-')?.chars();
            let short = chars.next()?;
            let arg = command
                .get_arguments()
                .find(|arg| arg.get_short() == Some(short))?;
            (arg, !chars.as_str().is_empty())
        };
        Some(arg.get_action().takes_values() && !inline_value)
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::parse_from(["node-emulator"])
    }
}

/// The environment variables the node looks at.
///
/// Both are informational for the node itself; `DATA_DIR` additionally points at the storage
/// directory which must not hold any `*.db` artifacts before a snapshot download.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    pub no_ulimit_check: Option<OsString>,
    pub data_dir: Option<PathBuf>,
}

impl Environment {
    const NO_ULIMIT_CHECK: &str = "NO_ULIMIT_CHECK";
    const DATA_DIR: &str = "DATA_DIR";
    const DEFAULT_STORAGE_DIRECTORY: &str = "/tmp";

    pub fn from_process() -> Self {
        Self {
            no_ulimit_check: std::env::var_os(Self::NO_ULIMIT_CHECK),
            data_dir: std::env::var_os(Self::DATA_DIR).map(PathBuf::from),
        }
    }

    /// The directory probed for storage artifacts, `$DATA_DIR` or `/tmp`.
    pub fn storage_directory(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STORAGE_DIRECTORY))
    }

    pub fn log(&self) {
        let lossy = |value: Option<&std::ffi::OsStr>| {
            value
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        tracing::info!(
            "{}={}",
            Self::NO_ULIMIT_CHECK,
            lossy(self.no_ulimit_check.as_deref())
        );
        tracing::info!(
            "{}={}",
            Self::DATA_DIR,
            lossy(self.data_dir.as_deref().map(Path::as_os_str))
        );
    }
}

/// The node configuration file. Its content is opaque to the emulator, it only has to be JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeConfig(pub serde_json::Value);

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            bail!("cannot read config file: no config file was given");
        };
        let content = read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(Self(value))
    }
}
