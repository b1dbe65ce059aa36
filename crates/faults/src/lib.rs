//! Selection of the failure class a single run of the emulated node exhibits.
//!
//! The profile is drawn exactly once per process start and never changes afterwards. The
//! probability space is fixed: every outcome is one uniform draw away, so a supervisor under test
//! eventually sees each failure class.

use std::{fmt::Display, str::FromStr};

use anyhow::{Context, bail};

mod source;

pub use source::*;

/// Exit code of a run whose snapshot download produced corrupted data.
pub const DOWNLOAD_FAILURE_EXIT_CODE: i32 = 1;

/// Exit code of a run that fails during work without touching the storage.
pub const WORK_FAILURE_EXIT_CODE: i32 = 1;

/// Exit code of a run that fails during work after corrupting the storage.
pub const CORRUPTING_WORK_FAILURE_EXIT_CODE: i32 = 200;

/// Exit code of a run that hangs when asked to terminate.
pub const TERMINATION_FAILURE_EXIT_CODE: i32 = 14;

/// The failure behaviour of one run of the emulated node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FaultProfile {
    /// The snapshot download leaves a corrupted snapshot behind and fails.
    pub download_failure: bool,
    /// Exit code of the work phase, `0` means the work phase succeeds.
    pub work_failure_code: i32,
    /// The work phase corrupts the storage, which the next start observes.
    pub db_corruption: bool,
    /// Exit code used after hanging on a termination signal, `0` means a clean shutdown.
    pub termination_failure_code: i32,
}

impl FaultProfile {
    /// A profile without any failures.
    pub const NONE: Self = Self {
        download_failure: false,
        work_failure_code: 0,
        db_corruption: false,
        termination_failure_code: 0,
    };

    /// Draws a profile from the random source.
    ///
    /// Two independent draws are made: the first one picks the startup failure class (five
    /// outcomes when a snapshot download was requested, three otherwise) and the second one
    /// decides with a one in three chance whether termination will hang and fail.
    pub fn select(source: &mut impl RandomSource, download_requested: bool) -> Self {
        let mut profile = Self::NONE;

        let outcome = if download_requested {
            source.draw(5)
        } else {
            source.draw(3) + 1
        };
        match outcome {
            0 => profile.download_failure = true,
            1 => profile.work_failure_code = WORK_FAILURE_EXIT_CODE,
            2 => {
                profile.work_failure_code = CORRUPTING_WORK_FAILURE_EXIT_CODE;
                profile.db_corruption = true;
            }
            _ => {}
        }

        if source.draw(3) == 0 {
            profile.termination_failure_code = TERMINATION_FAILURE_EXIT_CODE;
        }

        profile
    }

    /// The exit code persisted for the next run when this run corrupts the storage.
    pub fn db_corruption_exit_code(&self) -> i32 {
        match self.work_failure_code {
            0 => 1,
            code => code,
        }
    }
}

impl Display for FaultProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tokens = Vec::new();
        if self.download_failure {
            tokens.push("download-failure".to_string());
        }
        if self.work_failure_code != 0 {
            tokens.push(format!("work-failure={}", self.work_failure_code));
        }
        if self.db_corruption {
            tokens.push("db-corruption".to_string());
        }
        if self.termination_failure_code != 0 {
            tokens.push(format!("termination-failure={}", self.termination_failure_code));
        }

        if tokens.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&tokens.join(","))
        }
    }
}

/// Parses the format produced by [`Display`], e.g. `work-failure=200,db-corruption`.
impl FromStr for FaultProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut profile = Self::NONE;
        for token in s.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (token, None),
            };
            let exit_code = || -> anyhow::Result<i32> {
                let Some(value) = value else {
                    bail!("Fault '{name}' requires an exit code, e.g. '{name}=1'");
                };
                value
                    .parse()
                    .with_context(|| format!("Invalid exit code '{value}' for fault '{name}'"))
            };

            match name {
                "none" => {}
                "download-failure" => profile.download_failure = true,
                "db-corruption" => profile.db_corruption = true,
                "work-failure" => profile.work_failure_code = exit_code()?,
                "termination-failure" => profile.termination_failure_code = exit_code()?,
                _ => bail!("Unknown fault '{name}'"),
            }
        }
        Ok(profile)
    }
}
