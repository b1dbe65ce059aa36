//! The startup lifecycle of the emulated node.
//!
//! A run walks through the phases in order. Every phase either lets the run continue, ends it
//! with an exit code (an injected fault or a replayed corruption) or fails with an error, which
//! stands for a violated precondition. Nothing is retried, that is the job of whatever supervises
//! the node.

use std::{
    fmt::Display,
    fs::read_dir,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail};
use node_emu_config::{Arguments, Environment, NodeConfig};
use node_emu_faults::{DOWNLOAD_FAILURE_EXIT_CODE, FaultProfile};
use node_emu_markers::{Marker, MarkerKind, MarkerStore};
use node_emu_rpc::BlockClock;

use crate::TerminationRequests;

/// The phases of a run, in the order they are entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecyclePhase {
    ValidateDirs,
    /// Only entered when a snapshot download was requested.
    DownloadSnapshot,
    IntegrityCheck,
    LoadConfig,
    SimulateWork,
    InjectCorruption,
    Serve,
    Terminated,
}

impl Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ValidateDirs => "validate-dirs",
            Self::DownloadSnapshot => "download-snapshot",
            Self::IntegrityCheck => "integrity-check",
            Self::LoadConfig => "load-config",
            Self::SimulateWork => "simulate-work",
            Self::InjectCorruption => "inject-corruption",
            Self::Serve => "serve",
            Self::Terminated => "terminated",
        })
    }
}

/// Everything a run needs, decided once at startup.
#[derive(Clone, Debug)]
pub struct Context {
    pub fault_profile: FaultProfile,
    /// Started with the process, drives the synthetic block height once serving.
    pub clock: BlockClock,
    pub data_directory: PathBuf,
    /// Probed for pre-existing `*.db` artifacts before a snapshot download.
    pub storage_directory: PathBuf,
    pub config_path: Option<PathBuf>,
    pub http_port: Option<u16>,
    pub download_snapshot: bool,
}

impl Context {
    pub fn new(
        arguments: &Arguments,
        environment: &Environment,
        fault_profile: FaultProfile,
    ) -> Self {
        Self {
            fault_profile,
            clock: BlockClock::start(),
            data_directory: arguments.data_directory(),
            storage_directory: environment.storage_directory(),
            config_path: arguments.config.clone(),
            http_port: arguments.http_port,
            download_snapshot: arguments.download_requested(),
        }
    }
}

/// How a run of the lifecycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The process has to exit with `code`, decided in `phase`.
    Exit { phase: LifecyclePhase, code: i32 },
    /// The serving phase was reached with a port to listen on.
    Serve { port: u16 },
    /// A termination request arrived before `phase` was entered.
    Terminated { phase: LifecyclePhase },
}

type Step<'a> = fn(&mut Lifecycle<'a>) -> Result<Option<i32>>;

/// Runs the startup phases for one [`Context`].
#[derive(Debug)]
pub struct Lifecycle<'a> {
    context: &'a Context,
    markers: MarkerStore,
    phase: LifecyclePhase,
}

impl<'a> Lifecycle<'a> {
    const STORAGE_ARTIFACT_EXTENSION: &'static str = "db";

    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            markers: MarkerStore::new(&context.data_directory),
            phase: LifecyclePhase::ValidateDirs,
        }
    }

    /// The phase the run is in, or failed in.
    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Runs all startup phases up to, but excluding, the actual serving.
    pub fn run(&mut self) -> Result<Verdict> {
        self.run_phases(|| false)
    }

    /// Like [`Lifecycle::run`], but stops before the next phase once termination was requested.
    pub fn run_interruptible(&mut self, requests: &mut TerminationRequests) -> Result<Verdict> {
        self.run_phases(|| requests.pending())
    }

    fn run_phases(&mut self, mut terminated: impl FnMut() -> bool) -> Result<Verdict> {
        let steps: [(LifecyclePhase, Step<'a>); 6] = [
            (LifecyclePhase::ValidateDirs, Self::validate_directories),
            (LifecyclePhase::DownloadSnapshot, Self::download_snapshot),
            (LifecyclePhase::IntegrityCheck, Self::check_integrity),
            (LifecyclePhase::LoadConfig, Self::load_config),
            (LifecyclePhase::SimulateWork, Self::simulate_work),
            (LifecyclePhase::InjectCorruption, Self::inject_failure),
        ];

        for (phase, step) in steps {
            if phase == LifecyclePhase::DownloadSnapshot && !self.context.download_snapshot {
                continue;
            }
            if terminated() {
                return Ok(Verdict::Terminated { phase });
            }
            self.enter(phase);
            if let Some(code) = step(self)? {
                return Ok(Verdict::Exit { phase, code });
            }
        }

        if terminated() {
            return Ok(Verdict::Terminated {
                phase: LifecyclePhase::Serve,
            });
        }
        self.enter(LifecyclePhase::Serve);
        // Port 0 means no listening, the same as an absent port.
        match self.context.http_port.filter(|port| *port != 0) {
            Some(port) => Ok(Verdict::Serve { port }),
            None => {
                tracing::info!("Exiting normally (no listening)");
                Ok(Verdict::Exit {
                    phase: LifecyclePhase::Serve,
                    code: 0,
                })
            }
        }
    }

    fn enter(&mut self, phase: LifecyclePhase) {
        debug_assert!(phase >= self.phase, "{phase} entered after {}", self.phase);
        self.phase = phase;
        tracing::info!(%phase, "Entering phase");
    }

    fn validate_directories(&mut self) -> Result<Option<i32>> {
        let data_directory = &self.context.data_directory;
        let storage_directory = &self.context.storage_directory;
        log_directory(data_directory);
        log_directory(storage_directory);

        if !self.context.download_snapshot {
            return Ok(None);
        }

        if !data_directory.is_dir() {
            bail!("{} absent", data_directory.display());
        }
        if directory_entries(data_directory)?.next().is_some() {
            tracing::warn!("Unclean data directory {}", data_directory.display());
            self.markers.delete(MarkerKind::SnapshotCorrupted)?;
        }

        let artifacts = self.storage_artifacts()?;
        if let Some(artifact) = artifacts.first() {
            bail!(
                "found {} existing storage artifact(s) in {}, e.g. {}",
                artifacts.len(),
                storage_directory.display(),
                artifact.display()
            );
        }
        Ok(None)
    }

    fn download_snapshot(&mut self) -> Result<Option<i32>> {
        tracing::info!("Emulating snapshot download");

        if self.context.fault_profile.download_failure {
            tracing::warn!("Will emulate corrupted download");
            self.markers.delete(MarkerKind::SnapshotPresent)?;
            self.markers.write(&Marker::SnapshotCorrupted)?;
            return Ok(Some(DOWNLOAD_FAILURE_EXIT_CODE));
        }

        self.markers.delete(MarkerKind::SnapshotCorrupted)?;
        self.markers.write(&Marker::SnapshotPresent)?;
        Ok(None)
    }

    fn check_integrity(&mut self) -> Result<Option<i32>> {
        let data_directory = &self.context.data_directory;
        if !data_directory.is_dir() {
            bail!("data directory {} does not exist", data_directory.display());
        }
        if self.markers.exists(MarkerKind::SnapshotCorrupted) {
            bail!(
                "started with corrupted downloaded snapshot in data directory {}",
                data_directory.display()
            );
        }

        match self.markers.read(MarkerKind::DbCorrupted)? {
            Some(Marker::DbCorrupted { exit_code }) => {
                tracing::warn!(
                    "Started with corrupted data directory {}, exiting {exit_code}",
                    data_directory.display()
                );
                Ok(Some(exit_code))
            }
            _ => Ok(None),
        }
    }

    fn load_config(&mut self) -> Result<Option<i32>> {
        let NodeConfig(config) = NodeConfig::load(self.context.config_path.as_deref())?;
        tracing::debug!(
            keys = config.as_object().map(|object| object.len()).unwrap_or_default(),
            "Loaded node config"
        );
        Ok(None)
    }

    fn simulate_work(&mut self) -> Result<Option<i32>> {
        self.markers.write(&Marker::Working)?;

        let fault_profile = &self.context.fault_profile;
        if fault_profile.db_corruption {
            tracing::warn!("Emulating data directory corruption");
            self.markers.write(&Marker::DbCorrupted {
                exit_code: fault_profile.db_corruption_exit_code(),
            })?;
        }
        Ok(None)
    }

    fn inject_failure(&mut self) -> Result<Option<i32>> {
        match self.context.fault_profile.work_failure_code {
            0 => Ok(None),
            code => {
                tracing::warn!("Emulating failure {code}");
                Ok(Some(code))
            }
        }
    }

    /// Files in the storage directory matching `*.db`. A missing directory holds no artifacts.
    fn storage_artifacts(&self) -> Result<Vec<PathBuf>> {
        let storage_directory = &self.context.storage_directory;
        if !storage_directory.is_dir() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in directory_entries(storage_directory)? {
            let path = entry
                .with_context(|| {
                    format!("Failed to read an entry in {}", storage_directory.display())
                })?
                .path();
            let hidden = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            let is_artifact = path
                .extension()
                .is_some_and(|extension| extension == Self::STORAGE_ARTIFACT_EXTENSION);
            if is_artifact && !hidden {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

fn directory_entries(path: &Path) -> Result<std::fs::ReadDir> {
    read_dir(path).with_context(|| format!("Failed to read directory {}", path.display()))
}

fn log_directory(path: &Path) {
    match read_dir(path) {
        Ok(entries) => tracing::info!(
            path = %path.display(),
            exists = true,
            contains = entries.count(),
            "Checked directory"
        ),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), exists = false, "Checked directory")
        }
        Err(error) => tracing::info!(path = %path.display(), %error, "Checked directory"),
    }
}
