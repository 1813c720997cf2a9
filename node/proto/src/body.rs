// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed message bodies. The framing layer treats these as opaque bytes;
//! only the final receiver unpacks them, keyed by the header's kind.

use crate::kinds::{ConnectionType, MessageKind};
use crate::pack::{pack_opt_str, pack_str, unpack_opt_str, unpack_str, PackBuf};
use crate::{Error, NO_VAL, NO_VAL16};
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Ping,
    NodeRegistration { node_name: String, node_id: u16 },
    Rc { code: u32 },
    CancelJob { job_id: u32, signal: u16 },
    SignalJob { job_id: u32, signal: u16 },
    SignalStep { job_id: u32, step_id: u32, signal: u16 },
    TerminateStep { job_id: u32, step_id: u32 },
    RequeueJob { job_id: u32 },
    SuspendJob { job_id: u32, resume: bool },
    UpdateJob(JobUpdate),
}

impl Body {
    /// The header kind this body travels under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::Ping => MessageKind::Ping,
            Body::NodeRegistration { .. } => MessageKind::NodeRegistration,
            Body::Rc { .. } => MessageKind::Rc,
            Body::CancelJob { .. } => MessageKind::CancelJob,
            Body::SignalJob { .. } => MessageKind::SignalJob,
            Body::SignalStep { .. } => MessageKind::SignalStep,
            Body::TerminateStep { .. } => MessageKind::TerminateStep,
            Body::RequeueJob { .. } => MessageKind::RequeueJob,
            Body::SuspendJob { .. } => MessageKind::SuspendJob,
            Body::UpdateJob(_) => MessageKind::UpdateJob,
        }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        match self {
            Body::Ping => {}
            Body::NodeRegistration { node_name, node_id } => {
                pack_str(buf, node_name);
                buf.put_u16(*node_id);
            }
            Body::Rc { code } => buf.put_u32(*code),
            Body::CancelJob { job_id, signal } | Body::SignalJob { job_id, signal } => {
                buf.put_u32(*job_id);
                buf.put_u16(*signal);
            }
            Body::SignalStep {
                job_id,
                step_id,
                signal,
            } => {
                buf.put_u32(*job_id);
                buf.put_u32(*step_id);
                buf.put_u16(*signal);
            }
            Body::TerminateStep { job_id, step_id } => {
                buf.put_u32(*job_id);
                buf.put_u32(*step_id);
            }
            Body::RequeueJob { job_id } => buf.put_u32(*job_id),
            Body::SuspendJob { job_id, resume } => {
                buf.put_u32(*job_id);
                buf.put_u16(*resume as u16);
            }
            Body::UpdateJob(update) => update.pack(buf),
        }
    }

    pub fn unpack(kind: MessageKind, buf: &mut Bytes) -> Result<Body, Error> {
        let body = match kind {
            MessageKind::Ping => Body::Ping,
            MessageKind::NodeRegistration => {
                let node_name = unpack_str(buf)?;
                buf.need(2)?;
                Body::NodeRegistration {
                    node_name,
                    node_id: buf.get_u16(),
                }
            }
            MessageKind::Rc => {
                buf.need(4)?;
                Body::Rc {
                    code: buf.get_u32(),
                }
            }
            MessageKind::CancelJob => {
                buf.need(6)?;
                Body::CancelJob {
                    job_id: buf.get_u32(),
                    signal: buf.get_u16(),
                }
            }
            MessageKind::SignalJob => {
                buf.need(6)?;
                Body::SignalJob {
                    job_id: buf.get_u32(),
                    signal: buf.get_u16(),
                }
            }
            MessageKind::SignalStep => {
                buf.need(10)?;
                Body::SignalStep {
                    job_id: buf.get_u32(),
                    step_id: buf.get_u32(),
                    signal: buf.get_u16(),
                }
            }
            MessageKind::TerminateStep => {
                buf.need(8)?;
                Body::TerminateStep {
                    job_id: buf.get_u32(),
                    step_id: buf.get_u32(),
                }
            }
            MessageKind::RequeueJob => {
                buf.need(4)?;
                Body::RequeueJob {
                    job_id: buf.get_u32(),
                }
            }
            MessageKind::SuspendJob => {
                buf.need(6)?;
                Body::SuspendJob {
                    job_id: buf.get_u32(),
                    resume: buf.get_u16() != 0,
                }
            }
            MessageKind::UpdateJob => Body::UpdateJob(JobUpdate::unpack(buf)?),
        };
        Ok(body)
    }
}

/// An in-place job edit. Unset fields do not touch the job; numeric fields
/// pack the unset sentinel, text fields pack a zero length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub job_id: u32,
    pub time_limit: Option<u32>,
    pub priority: Option<u32>,
    /// Nice value stored biased, `NICE_OFFSET + requested`.
    pub nice: Option<u16>,
    pub pn_min_cpus: Option<u32>,
    pub num_tasks: Option<u32>,
    pub cpus_per_task: Option<u32>,
    pub min_nodes: Option<u32>,
    pub max_nodes: Option<u32>,
    pub pn_min_memory: Option<u32>,
    pub pn_min_tmp_disk: Option<u32>,
    pub partition: Option<String>,
    pub name: Option<String>,
    pub wckey: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    pub features: Option<String>,
    pub gres: Option<String>,
    pub licenses: Option<String>,
    pub dependency: Option<String>,
    pub reservation: Option<String>,
    pub shared: Option<bool>,
    pub contiguous: Option<bool>,
    pub requeue: Option<bool>,
    pub req_nodes: Option<String>,
    pub exc_nodes: Option<String>,
    pub geometry: Option<[u16; 3]>,
    pub rotate: Option<bool>,
    pub conn_type: Option<ConnectionType>,
    pub blrts_image: Option<String>,
    pub linux_image: Option<String>,
    pub mloader_image: Option<String>,
    pub ramdisk_image: Option<String>,
    /// Unix seconds; zero on the wire means unset.
    pub begin_time: Option<i64>,
}

fn put_opt_u32(buf: &mut BytesMut, v: Option<u32>) {
    buf.put_u32(v.unwrap_or(NO_VAL));
}

fn get_opt_u32(buf: &mut Bytes) -> Result<Option<u32>, Error> {
    buf.need(4)?;
    let v = buf.get_u32();
    Ok(if v == NO_VAL { None } else { Some(v) })
}

fn put_opt_u16(buf: &mut BytesMut, v: Option<u16>) {
    buf.put_u16(v.unwrap_or(NO_VAL16));
}

fn get_opt_u16(buf: &mut Bytes) -> Result<Option<u16>, Error> {
    buf.need(2)?;
    let v = buf.get_u16();
    Ok(if v == NO_VAL16 { None } else { Some(v) })
}

fn put_opt_bool(buf: &mut BytesMut, v: Option<bool>) {
    put_opt_u16(buf, v.map(u16::from));
}

fn get_opt_bool(buf: &mut Bytes) -> Result<Option<bool>, Error> {
    Ok(get_opt_u16(buf)?.map(|v| v != 0))
}

impl JobUpdate {
    pub fn new(job_id: u32) -> JobUpdate {
        JobUpdate {
            job_id,
            ..Default::default()
        }
    }

    /// True when no field has been set.
    pub fn is_empty(&self) -> bool {
        *self == JobUpdate::new(self.job_id)
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u32(self.job_id);
        put_opt_u32(buf, self.time_limit);
        put_opt_u32(buf, self.priority);
        put_opt_u16(buf, self.nice);
        put_opt_u32(buf, self.pn_min_cpus);
        put_opt_u32(buf, self.num_tasks);
        put_opt_u32(buf, self.cpus_per_task);
        put_opt_u32(buf, self.min_nodes);
        put_opt_u32(buf, self.max_nodes);
        put_opt_u32(buf, self.pn_min_memory);
        put_opt_u32(buf, self.pn_min_tmp_disk);
        pack_opt_str(buf, self.partition.as_deref());
        pack_opt_str(buf, self.name.as_deref());
        pack_opt_str(buf, self.wckey.as_deref());
        pack_opt_str(buf, self.account.as_deref());
        pack_opt_str(buf, self.qos.as_deref());
        pack_opt_str(buf, self.features.as_deref());
        pack_opt_str(buf, self.gres.as_deref());
        pack_opt_str(buf, self.licenses.as_deref());
        pack_opt_str(buf, self.dependency.as_deref());
        pack_opt_str(buf, self.reservation.as_deref());
        put_opt_bool(buf, self.shared);
        put_opt_bool(buf, self.contiguous);
        put_opt_bool(buf, self.requeue);
        pack_opt_str(buf, self.req_nodes.as_deref());
        pack_opt_str(buf, self.exc_nodes.as_deref());
        let geo = self.geometry.unwrap_or([NO_VAL16; 3]);
        for dim in geo {
            buf.put_u16(dim);
        }
        put_opt_bool(buf, self.rotate);
        put_opt_u16(buf, self.conn_type.map(|c| c as u16));
        pack_opt_str(buf, self.blrts_image.as_deref());
        pack_opt_str(buf, self.linux_image.as_deref());
        pack_opt_str(buf, self.mloader_image.as_deref());
        pack_opt_str(buf, self.ramdisk_image.as_deref());
        buf.put_u64(self.begin_time.unwrap_or(0) as u64);
    }

    pub fn unpack(buf: &mut Bytes) -> Result<JobUpdate, Error> {
        buf.need(4)?;
        let mut update = JobUpdate::new(buf.get_u32());
        update.time_limit = get_opt_u32(buf)?;
        update.priority = get_opt_u32(buf)?;
        update.nice = get_opt_u16(buf)?;
        update.pn_min_cpus = get_opt_u32(buf)?;
        update.num_tasks = get_opt_u32(buf)?;
        update.cpus_per_task = get_opt_u32(buf)?;
        update.min_nodes = get_opt_u32(buf)?;
        update.max_nodes = get_opt_u32(buf)?;
        update.pn_min_memory = get_opt_u32(buf)?;
        update.pn_min_tmp_disk = get_opt_u32(buf)?;
        update.partition = unpack_opt_str(buf)?;
        update.name = unpack_opt_str(buf)?;
        update.wckey = unpack_opt_str(buf)?;
        update.account = unpack_opt_str(buf)?;
        update.qos = unpack_opt_str(buf)?;
        update.features = unpack_opt_str(buf)?;
        update.gres = unpack_opt_str(buf)?;
        update.licenses = unpack_opt_str(buf)?;
        update.dependency = unpack_opt_str(buf)?;
        update.reservation = unpack_opt_str(buf)?;
        update.shared = get_opt_bool(buf)?;
        update.contiguous = get_opt_bool(buf)?;
        update.requeue = get_opt_bool(buf)?;
        update.req_nodes = unpack_opt_str(buf)?;
        update.exc_nodes = unpack_opt_str(buf)?;
        buf.need(6)?;
        let geo = [buf.get_u16(), buf.get_u16(), buf.get_u16()];
        update.geometry = if geo[0] == NO_VAL16 { None } else { Some(geo) };
        update.rotate = get_opt_bool(buf)?;
        update.conn_type = get_opt_u16(buf)?.and_then(ConnectionType::from_wire);
        update.blrts_image = unpack_opt_str(buf)?;
        update.linux_image = unpack_opt_str(buf)?;
        update.mloader_image = unpack_opt_str(buf)?;
        update.ramdisk_image = unpack_opt_str(buf)?;
        buf.need(8)?;
        let begin = buf.get_u64();
        update.begin_time = if begin == 0 { None } else { Some(begin as i64) };
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_round_trips() {
        let bodies = [
            Body::Ping,
            Body::Rc { code: 2005 },
            Body::CancelJob {
                job_id: 1234,
                signal: 9,
            },
            Body::SignalStep {
                job_id: 1234,
                step_id: 2,
                signal: 15,
            },
            Body::SuspendJob {
                job_id: 77,
                resume: true,
            },
        ];
        for body in bodies {
            let mut buf = BytesMut::new();
            body.pack(&mut buf);
            let got = Body::unpack(body.kind(), &mut buf.freeze()).unwrap();
            assert_eq!(got, body);
        }
    }

    #[test]
    fn update_round_trips_with_sparse_fields() {
        let mut update = JobUpdate::new(4242);
        update.priority = Some(100);
        update.nice = Some(10_500);
        update.partition = Some("debug".to_owned());
        update.geometry = Some([2, 2, 4]);
        update.rotate = Some(true);
        update.conn_type = Some(ConnectionType::Mesh);
        update.linux_image = Some("compute-linux".to_owned());
        update.begin_time = Some(1_262_304_000);

        let mut buf = BytesMut::new();
        update.pack(&mut buf);
        let got = JobUpdate::unpack(&mut buf.freeze()).unwrap();
        assert_eq!(got, update);
        assert!(got.time_limit.is_none());
        assert!(got.shared.is_none());
    }

    #[test]
    fn empty_update_is_empty() {
        assert!(JobUpdate::new(1).is_empty());
        let mut update = JobUpdate::new(1);
        update.requeue = Some(false);
        assert!(!update.is_empty());
    }

    #[test]
    fn truncated_body_is_incomplete() {
        let mut buf = BytesMut::new();
        buf.put_u32(1234);
        assert!(matches!(
            Body::unpack(MessageKind::CancelJob, &mut buf.freeze()),
            Err(Error::IncompletePacket)
        ));
    }
}
