use crate::core::domain::{error::SyncError, port::Hypervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A VM addressed through its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub node: String,
    pub vmid: u32,
}

impl VmHandle {
    pub fn new(node: impl Into<String>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            vmid,
        }
    }
}

/// Lifecycle of one guest command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestCommandState {
    /// The agent accepted the command and returned a process id.
    Submitted { pid: u64 },
    /// The process has been polled at least once without exiting.
    Polling { pid: u64, polls: u32 },
    /// Exited with code 0.
    Completed { output: String },
    /// Exited non-zero, or a poll failed.
    Failed { exit_code: Option<i64> },
    /// The deadline passed before the process exited.
    TimedOut,
    /// The VM exposes no command-execution capability.
    Unsupported,
}

impl GuestCommandState {
    /// Output of a completed command, `None` for every other state.
    pub fn into_output(self) -> Option<String> {
        match self {
            GuestCommandState::Completed { output } => Some(output),
            _ => None,
        }
    }
}

/// Runs commands inside guests through the hypervisor's agent channel.
///
/// The executor never fails: an unsupported agent, a non-zero exit and an
/// expired deadline all yield `None`. Every agent request is bounded by the
/// command's deadline.
#[derive(Clone)]
pub struct GuestCommandService {
    hypervisor: Arc<dyn Hypervisor>,
    poll_interval: Duration,
}

impl GuestCommandService {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, poll_interval: Duration) -> Self {
        Self {
            hypervisor,
            poll_interval,
        }
    }

    /// Executes `argv` inside the VM, returning its stdout if it exits with
    /// code 0 before `timeout`.
    pub async fn execute(&self, vm: &VmHandle, argv: &[&str], timeout: Duration) -> Option<String> {
        self.run(vm, argv, timeout).await.into_output()
    }

    /// Executes `argv` and returns the terminal state of the command.
    pub async fn run(&self, vm: &VmHandle, argv: &[&str], timeout: Duration) -> GuestCommandState {
        let deadline = Instant::now() + timeout;
        let command = argv.join(" ");

        let submission = self.hypervisor.submit_guest_command(
            &vm.node,
            vm.vmid,
            argv.iter().map(|s| s.to_string()).collect(),
        );
        let mut state = match tokio::time::timeout_at(deadline, submission).await {
            Err(_) => {
                debug!(node = %vm.node, vmid = vm.vmid, %command, "guest command submission timed out");
                return GuestCommandState::TimedOut;
            }
            Ok(Ok(pid)) => GuestCommandState::Submitted { pid },
            Ok(Err(SyncError::GuestAgentUnavailable(reason))) => {
                debug!(node = %vm.node, vmid = vm.vmid, %command, %reason, "guest agent unavailable");
                return GuestCommandState::Unsupported;
            }
            Ok(Err(e)) => {
                warn!(node = %vm.node, vmid = vm.vmid, %command, error = %e, "guest command submission failed");
                return GuestCommandState::Unsupported;
            }
        };

        loop {
            state = match state {
                GuestCommandState::Submitted { pid } => self.poll(vm, pid, 0, deadline).await,
                GuestCommandState::Polling { pid, polls } => {
                    let now = Instant::now();
                    if now >= deadline {
                        GuestCommandState::TimedOut
                    } else {
                        tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
                        if Instant::now() >= deadline {
                            GuestCommandState::TimedOut
                        } else {
                            self.poll(vm, pid, polls, deadline).await
                        }
                    }
                }
                terminal => {
                    debug!(node = %vm.node, vmid = vm.vmid, %command, state = ?terminal, "guest command finished");
                    return terminal;
                }
            };
        }
    }

    async fn poll(&self, vm: &VmHandle, pid: u64, polls: u32, deadline: Instant) -> GuestCommandState {
        let status = self.hypervisor.poll_guest_command(&vm.node, vm.vmid, pid);
        let Ok(status) = tokio::time::timeout_at(deadline, status).await else {
            debug!(node = %vm.node, vmid = vm.vmid, pid, "guest command poll timed out");
            return GuestCommandState::TimedOut;
        };
        match status {
            Ok(status) if status.exited => match status.exitcode {
                Some(0) => GuestCommandState::Completed {
                    output: status.out_data.unwrap_or_default(),
                },
                exit_code => GuestCommandState::Failed { exit_code },
            },
            Ok(_) => GuestCommandState::Polling {
                pid,
                polls: polls + 1,
            },
            Err(e) => {
                debug!(node = %vm.node, vmid = vm.vmid, pid, error = %e, "guest command poll failed");
                GuestCommandState::Failed { exit_code: None }
            }
        }
    }
}
