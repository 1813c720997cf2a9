// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Controller-side job operations.
//!
//! Cancel and signal loop on the transient codes (`transition state`,
//! `job pending`) with growing sleeps; everything else surfaces after one
//! attempt. Batch processing reports per-job failures and keeps going,
//! stopping only on a fatal transport failure.

use crate::Error;
use arbor_proto::{Body, JobUpdate, Message, ReturnCode};
use arbor_rpc::{ControllerClient, RetryPolicy};
use log::{debug, error, info};
use std::thread;
use std::time::Duration;

/// Attempts before a cancel/signal gives up on a transitioning job.
pub const MAX_CANCEL_RETRY: u32 = 10;

/// Signal number a bare cancel delivers.
const SIGKILL: u16 = 9;

pub struct JobControl {
    client: ControllerClient,
}

impl JobControl {
    pub fn new(client: ControllerClient) -> JobControl {
        JobControl { client }
    }

    /// The default cancel/signal schedule: `5 + attempt` seconds.
    pub fn cancel_policy() -> RetryPolicy {
        RetryPolicy::new(
            MAX_CANCEL_RETRY,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    fn op(&self, body: Body) -> Result<ReturnCode, Error> {
        let req = Message::new(body.kind(), body);
        let resp = self.client.send_recv_controller(&req)?;
        let code = resp
            .rc_code()
            .ok_or(Error::UnexpectedReply(resp.kind))?;
        Ok(ReturnCode::from_wire(code).unwrap_or(ReturnCode::Error))
    }

    fn finish(job_id: u32, code: ReturnCode) -> Result<(), Error> {
        match code {
            ReturnCode::Success => Ok(()),
            ReturnCode::AlreadyDone | ReturnCode::InvalidJobId => {
                // terse: the operator only needs the reason
                error!("{}", code.strerror());
                Err(Error::Terminal { code })
            }
            code => {
                error!("kill job error on job id {}: {}", job_id, code.strerror());
                Err(Error::JobOp { job_id, code })
            }
        }
    }

    /// Cancel a job, or deliver `signal` to it. Unset and `KILL` signals
    /// route to the terminating cancel.
    pub fn cancel_job(&self, job_id: u32, signal: Option<u16>) -> Result<(), Error> {
        self.cancel_job_with(job_id, signal, &Self::cancel_policy())
    }

    pub fn cancel_job_with(
        &self,
        job_id: u32,
        signal: Option<u16>,
        policy: &RetryPolicy,
    ) -> Result<(), Error> {
        let mut code = ReturnCode::Error;
        for attempt in 0..policy.max_attempts {
            let body = match signal {
                None | Some(SIGKILL) => Body::CancelJob {
                    job_id,
                    signal: SIGKILL,
                },
                Some(signal) => Body::SignalJob { job_id, signal },
            };
            code = self.op(body)?;
            if !code.is_retryable() {
                break;
            }
            // sleep only between attempts; a decided failure returns now
            if attempt + 1 < policy.max_attempts {
                info!(
                    "sending signal {} to job {}",
                    signal.unwrap_or(SIGKILL),
                    job_id
                );
                thread::sleep(policy.delay(attempt));
            }
        }
        Self::finish(job_id, code)
    }

    /// Cancel a job step, or deliver `signal` to it.
    pub fn cancel_step(
        &self,
        job_id: u32,
        step_id: u32,
        signal: Option<u16>,
    ) -> Result<(), Error> {
        self.cancel_step_with(job_id, step_id, signal, &Self::cancel_policy())
    }

    pub fn cancel_step_with(
        &self,
        job_id: u32,
        step_id: u32,
        signal: Option<u16>,
        policy: &RetryPolicy,
    ) -> Result<(), Error> {
        let mut code = ReturnCode::Error;
        for attempt in 0..policy.max_attempts {
            let body = match signal {
                None | Some(SIGKILL) => Body::TerminateStep { job_id, step_id },
                Some(signal) => Body::SignalStep {
                    job_id,
                    step_id,
                    signal,
                },
            };
            code = self.op(body)?;
            if !code.is_retryable() {
                break;
            }
            if attempt + 1 < policy.max_attempts {
                info!(
                    "sending signal {} to job step {}.{}",
                    signal.unwrap_or(SIGKILL),
                    job_id,
                    step_id
                );
                thread::sleep(policy.delay(attempt));
            }
        }
        Self::finish(job_id, code)
    }

    pub fn signal_job(&self, job_id: u32, signal: u16) -> Result<(), Error> {
        let code = self.op(Body::SignalJob { job_id, signal })?;
        Self::finish(job_id, code)
    }

    pub fn requeue_job(&self, job_id: u32) -> Result<(), Error> {
        let code = self.op(Body::RequeueJob { job_id })?;
        Self::finish(job_id, code)
    }

    pub fn suspend_job(&self, job_id: u32) -> Result<(), Error> {
        let code = self.op(Body::SuspendJob {
            job_id,
            resume: false,
        })?;
        Self::finish(job_id, code)
    }

    pub fn resume_job(&self, job_id: u32) -> Result<(), Error> {
        let code = self.op(Body::SuspendJob {
            job_id,
            resume: true,
        })?;
        Self::finish(job_id, code)
    }

    /// Ship an accumulated edit. An empty update is a no-op success.
    pub fn update_job(&self, update: JobUpdate) -> Result<(), Error> {
        if update.is_empty() {
            debug!("job {} update carries no changes", update.job_id);
            return Ok(());
        }
        let job_id = update.job_id;
        let code = self.op(Body::UpdateJob(update))?;
        match code {
            ReturnCode::NoChangeInData => {
                debug!("job {}: no change in data", job_id);
                Ok(())
            }
            code => Self::finish(job_id, code),
        }
    }

    /// Run one operation across a selection of jobs. Per-job failures are
    /// reported and skipped; the first fatal failure stops the batch and
    /// is returned.
    pub fn run_batch<F>(&self, job_ids: &[u32], mut op: F) -> Result<(), Error>
    where
        F: FnMut(&JobControl, u32) -> Result<(), Error>,
    {
        for job_id in job_ids {
            if let Err(e) = op(self, *job_id) {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("job {}: {}", job_id, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_auth::{AuthProvider, MacAuth};
    use arbor_config::Config;
    use arbor_proto::MessageKind;
    use arbor_rpc::send_rc_response;
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::Arc;

    fn auth() -> Arc<dyn AuthProvider> {
        Arc::new(MacAuth::new(*b"job-control-test", 500, 100))
    }

    fn controller_replying(codes: Vec<ReturnCode>) -> (JobControl, thread::JoinHandle<Vec<MessageKind>>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };
        let server_auth = auth();
        let handle = thread::spawn(move || {
            let mut kinds = Vec::new();
            for code in codes {
                let (mut stream, peer) = arbor_net::accept(&listener).unwrap();
                let mut received =
                    arbor_rpc::recv_msg(&mut stream, &server_auth, 0, 2, Some(peer)).unwrap();
                kinds.push(received.msg.kind);
                send_rc_response(&mut stream, &mut received, code, server_auth.as_ref(), 0)
                    .unwrap();
                let _ = arbor_net::shutdown_conn(&stream);
            }
            kinds
        });

        let mut config = Config::default();
        config.control_addr = *addr.ip();
        config.control_port = addr.port();
        config.tree_width = 2;
        let client = ControllerClient::new(Arc::new(Config::new(config).unwrap()), auth());
        (JobControl::new(client), handle)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(MAX_CANCEL_RETRY, Duration::from_millis(5), Duration::ZERO)
    }

    #[test]
    fn cancel_retries_transient_codes_until_success() {
        let (control, server) = controller_replying(vec![
            ReturnCode::TransitionStateNoUpdate,
            ReturnCode::TransitionStateNoUpdate,
            ReturnCode::Success,
        ]);
        control
            .cancel_job_with(1234, None, &fast_policy())
            .unwrap();
        let kinds = server.join().unwrap();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.iter().all(|k| *k == MessageKind::CancelJob));
    }

    #[test]
    fn named_signal_routes_to_signal_job() {
        let (control, server) = controller_replying(vec![ReturnCode::Success]);
        control
            .cancel_job_with(7, Some(15), &fast_policy())
            .unwrap();
        assert_eq!(server.join().unwrap(), vec![MessageKind::SignalJob]);
    }

    #[test]
    fn already_done_is_terminal_and_terse() {
        let (control, server) = controller_replying(vec![ReturnCode::AlreadyDone]);
        let err = control
            .cancel_job_with(9, None, &fast_policy())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Terminal {
                code: ReturnCode::AlreadyDone
            }
        ));
        server.join().unwrap();
    }

    #[test]
    fn no_sleep_after_the_final_attempt() {
        let (control, server) =
            controller_replying(vec![ReturnCode::JobPending, ReturnCode::JobPending]);
        let policy = RetryPolicy::new(2, Duration::from_millis(200), Duration::ZERO);
        let started = std::time::Instant::now();
        let err = control.cancel_job_with(4, None, &policy).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, Error::JobOp { job_id: 4, .. }));
        // one sleep between the two attempts, none after the verdict
        assert!(elapsed >= Duration::from_millis(200), "got {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "got {elapsed:?}");
        server.join().unwrap();
    }

    #[test]
    fn job_pending_gives_up_after_max_attempts() {
        let codes = vec![ReturnCode::JobPending; MAX_CANCEL_RETRY as usize];
        let (control, server) = controller_replying(codes);
        let err = control
            .cancel_step_with(3, 0, Some(15), &fast_policy())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::JobOp {
                job_id: 3,
                code: ReturnCode::JobPending
            }
        ));
        server.join().unwrap();
    }

    #[test]
    fn suspend_resume_requeue_round_trip() {
        let (control, server) = controller_replying(vec![
            ReturnCode::Success,
            ReturnCode::Success,
            ReturnCode::Success,
        ]);
        control.suspend_job(5).unwrap();
        control.resume_job(5).unwrap();
        control.requeue_job(5).unwrap();
        assert_eq!(
            server.join().unwrap(),
            vec![
                MessageKind::SuspendJob,
                MessageKind::SuspendJob,
                MessageKind::RequeueJob
            ]
        );
    }

    #[test]
    fn empty_update_never_hits_the_wire() {
        let (control, server) = controller_replying(vec![]);
        control.update_job(JobUpdate::new(8)).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn update_ships_the_accumulated_edit() {
        let (control, server) = controller_replying(vec![ReturnCode::Success]);
        let mut update = JobUpdate::new(8);
        update.priority = Some(50);
        control.update_job(update).unwrap();
        assert_eq!(server.join().unwrap(), vec![MessageKind::UpdateJob]);
    }

    #[test]
    fn batch_continues_past_job_errors() {
        let (control, server) = controller_replying(vec![
            ReturnCode::InvalidJobId,
            ReturnCode::Success,
        ]);
        control
            .run_batch(&[1, 2], |control, job_id| control.requeue_job(job_id))
            .unwrap();
        assert_eq!(server.join().unwrap().len(), 2);
    }
}
