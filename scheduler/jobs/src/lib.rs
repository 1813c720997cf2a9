// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Job-side tooling: the field editor that builds in-place job updates,
//! the signal-name table, and the controller operations (cancel, signal,
//! requeue, suspend, update) with their bounded retry behavior.

mod control;
mod edit;
mod signals;

pub use control::{JobControl, MAX_CANCEL_RETRY};
pub use edit::{EditError, EditField, JobEditor, NICE_OFFSET};
pub use signals::{signal_names, xlate_signal};

use arbor_proto::ReturnCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Terminal codes reported tersely, without job context.
    #[error("{}", .code.strerror())]
    Terminal { code: ReturnCode },
    #[error("kill job error on job id {job_id}: {}", .code.strerror())]
    JobOp { job_id: u32, code: ReturnCode },
    #[error("unknown signal {0:?}, valid signals are {1}")]
    BadSignal(String, String),
    #[error("unexpected reply of kind {0}")]
    UnexpectedReply(arbor_proto::MessageKind),
    #[error(transparent)]
    Rpc(#[from] arbor_rpc::Error),
}

impl Error {
    /// Whether this failure should stop a whole batch rather than just
    /// this job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Rpc(_))
    }
}
