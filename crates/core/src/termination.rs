//! Termination of a serving node.
//!
//! The OS signal handler only forwards the request into a channel. Deciding the exit code, and
//! hanging before a faulty exit, happens on the main execution path once the server loop has been
//! interrupted.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use node_emu_faults::FaultProfile;
use node_emu_rpc::RpcServer;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::constants::TERMINATION_HANG_DELAY;

/// Termination requests delivered by interrupt, terminate or hangup signals.
///
/// Broken pipes never terminate the process: the Rust runtime ignores `SIGPIPE` before `main`
/// runs and nothing here changes that.
#[derive(Debug)]
pub struct TerminationRequests {
    receiver: UnboundedReceiver<()>,
}

impl TerminationRequests {
    /// Installs the process wide signal handler. Can only be done once per process.
    pub fn install() -> Result<Self> {
        let (sender, requests) = Self::channel();
        ctrlc::set_handler(move || {
            let _ = sender.send(());
        })
        .context("Failed to install the termination signal handler")?;
        Ok(requests)
    }

    /// Creates requests that are triggered through the returned sender instead of a signal.
    pub fn channel() -> (UnboundedSender<()>, Self) {
        let (sender, receiver) = unbounded_channel();
        (sender, Self { receiver })
    }

    /// Whether a termination request arrived, without waiting for one.
    pub fn pending(&mut self) -> bool {
        self.receiver.try_recv().is_ok()
    }

    /// Resolves on the first termination request. Never resolves once all senders are gone.
    pub async fn received(mut self) {
        if self.receiver.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Decides the exit code of a node that was asked to terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminationController {
    failure_code: i32,
    hang_delay: Duration,
}

impl TerminationController {
    pub fn new(fault_profile: &FaultProfile) -> Self {
        Self {
            failure_code: fault_profile.termination_failure_code,
            hang_delay: TERMINATION_HANG_DELAY,
        }
    }

    pub fn with_hang_delay(mut self, hang_delay: Duration) -> Self {
        self.hang_delay = hang_delay;
        self
    }

    pub fn failure_code(&self) -> i32 {
        self.failure_code
    }

    /// Returns the exit code, after hanging for the configured delay if termination is faulty.
    pub async fn terminate(&self) -> i32 {
        if self.failure_code == 0 {
            tracing::info!("Finishing successfully");
            return 0;
        }

        tracing::warn!(
            "Hanging for {}ms and exit {}",
            self.hang_delay.as_millis(),
            self.failure_code
        );
        tokio::time::sleep(self.hang_delay).await;
        self.failure_code
    }

    /// Serves JSON-RPC until the first termination request, then returns the exit code.
    pub async fn serve_until_terminated(
        &self,
        server: RpcServer,
        requests: TerminationRequests,
    ) -> Result<i32> {
        tokio::select! {
            result = server.serve() => {
                result?;
                bail!("The JSON-RPC server stopped without a termination request");
            }
            () = requests.received() => {
                tracing::info!("Got termination signal");
            }
        }
        Ok(self.terminate().await)
    }
}
