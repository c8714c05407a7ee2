//! Wire models of the QEMU guest agent `exec` / `exec-status` endpoints.

use crate::core::domain::value_object::serde_helpers::flexible_bool;
use serde::{Deserialize, Serialize};

/// Request body of `POST /nodes/{node}/qemu/{vmid}/agent/exec`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestExecRequest {
    pub command: Vec<String>,
}

/// Response of `agent/exec`: the guest process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GuestExecStarted {
    pub pid: u64,
}

/// Response of `GET agent/exec-status?pid=…`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GuestExecStatus {
    #[serde(with = "flexible_bool")]
    pub exited: bool,
    #[serde(default)]
    pub exitcode: Option<i64>,
    /// Captured standard output.
    #[serde(default, rename = "out-data")]
    pub out_data: Option<String>,
    #[serde(default, rename = "err-data")]
    pub err_data: Option<String>,
}

impl GuestExecStatus {
    /// A status for a process that is still running.
    pub fn running() -> Self {
        Self::default()
    }

    /// A status for a process that exited with `exitcode` and produced `out`.
    pub fn exited(exitcode: i64, out: impl Into<String>) -> Self {
        Self {
            exited: true,
            exitcode: Some(exitcode),
            out_data: Some(out.into()),
            err_data: None,
        }
    }
}
