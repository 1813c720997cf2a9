// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The job field editor.
//!
//! One editor accumulates one [`JobUpdate`]; a rejected value leaves the
//! update untouched, so a failed edit never half-applies. The editor owns
//! its update and is consumed by [`JobEditor::finish`], which keeps edits
//! single-flight by construction.

use arbor_proto::{ConnectionType, JobUpdate, INFINITE};
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone};
use thiserror::Error;

/// Largest niceness magnitude; stored biased by this offset.
pub const NICE_OFFSET: i32 = 10_000;

/// A rejected edit: which field, and the text that did not parse.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field} value {text:?}")]
pub struct EditError {
    pub field: &'static str,
    pub text: String,
}

/// The editable job fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    TimeLimit,
    Priority,
    Nice,
    MinCpusPerNode,
    Tasks,
    CpusPerTask,
    MinNodes,
    NodeCount,
    MaxNodes,
    MinMemory,
    MinTmpDisk,
    Partition,
    Name,
    Wckey,
    Account,
    Qos,
    Features,
    Gres,
    Licenses,
    Dependency,
    Reservation,
    Shared,
    Contiguous,
    Requeue,
    RequestedNodes,
    ExcludedNodes,
    Geometry,
    Rotate,
    Connection,
    BlrtsImage,
    LinuxImage,
    MloaderImage,
    RamdiskImage,
    StartTime,
    EligibleTime,
}

pub struct JobEditor {
    update: JobUpdate,
    changed: bool,
}

impl JobEditor {
    pub fn new(job_id: u32) -> JobEditor {
        JobEditor {
            update: JobUpdate::new(job_id),
            changed: false,
        }
    }

    /// Apply one field edit. Returns the human label of the field on
    /// success; a parse failure rejects the whole edit.
    pub fn set(&mut self, field: EditField, text: &str) -> Result<&'static str, EditError> {
        let label = self.apply(field, text)?;
        self.changed = true;
        Ok(label)
    }

    /// The accumulated update, or `None` when nothing was changed.
    pub fn finish(self) -> Option<JobUpdate> {
        if self.changed {
            Some(self.update)
        } else {
            None
        }
    }

    fn apply(&mut self, field: EditField, text: &str) -> Result<&'static str, EditError> {
        let fail = |field: &'static str| EditError {
            field,
            text: text.to_owned(),
        };
        match field {
            EditField::TimeLimit => {
                let mins = parse_time_limit(text).ok_or_else(|| fail("timelimit"))?;
                self.update.time_limit = Some(mins);
                Ok("timelimit")
            }
            EditField::Priority => {
                let prio: u32 = text.trim().parse().map_err(|_| fail("priority"))?;
                self.update.priority = Some(prio);
                Ok("priority")
            }
            EditField::Nice => {
                let nice: i32 = text.trim().parse().map_err(|_| fail("nice"))?;
                if nice.abs() > NICE_OFFSET {
                    return Err(fail("nice"));
                }
                self.update.nice = Some((NICE_OFFSET + nice) as u16);
                Ok("nice")
            }
            EditField::MinCpusPerNode => {
                self.update.pn_min_cpus = Some(parse_suffixed(text).ok_or_else(|| fail("min cpus per node"))?);
                Ok("min cpus per node")
            }
            EditField::Tasks => {
                self.update.num_tasks =
                    Some(parse_positive(text).ok_or_else(|| fail("requested tasks"))?);
                Ok("requested tasks")
            }
            EditField::CpusPerTask => {
                self.update.cpus_per_task =
                    Some(parse_positive(text).ok_or_else(|| fail("cpus per task"))?);
                Ok("cpus per task")
            }
            EditField::MinNodes => {
                self.update.min_nodes = Some(parse_suffixed(text).ok_or_else(|| fail("min nodes"))?);
                Ok("min nodes")
            }
            EditField::NodeCount => {
                let count = parse_suffixed(text).ok_or_else(|| fail("node count"))?;
                self.update.min_nodes = Some(count);
                self.update.max_nodes = Some(count);
                Ok("node count")
            }
            EditField::MaxNodes => {
                let max = parse_suffixed(text).ok_or_else(|| fail("max nodes"))?;
                // a lone max implies the floor as well
                if self.update.min_nodes.is_none() {
                    self.update.min_nodes = Some(max);
                }
                self.update.max_nodes = Some(max);
                Ok("max nodes")
            }
            EditField::MinMemory => {
                self.update.pn_min_memory =
                    Some(parse_suffixed(text).ok_or_else(|| fail("min memory per node"))?);
                Ok("min memory per node")
            }
            EditField::MinTmpDisk => {
                self.update.pn_min_tmp_disk =
                    Some(parse_suffixed(text).ok_or_else(|| fail("min tmp disk per node"))?);
                Ok("min tmp disk per node")
            }
            EditField::Partition => {
                self.update.partition = Some(text.to_owned());
                Ok("partition")
            }
            EditField::Name => {
                self.update.name = Some(text.to_owned());
                Ok("name")
            }
            EditField::Wckey => {
                self.update.wckey = Some(text.to_owned());
                Ok("wckey")
            }
            EditField::Account => {
                self.update.account = Some(text.to_owned());
                Ok("account")
            }
            EditField::Qos => {
                self.update.qos = Some(text.to_owned());
                Ok("qos")
            }
            EditField::Features => {
                self.update.features = Some(text.to_owned());
                Ok("features")
            }
            EditField::Gres => {
                self.update.gres = Some(text.to_owned());
                Ok("gres")
            }
            EditField::Licenses => {
                self.update.licenses = Some(text.to_owned());
                Ok("licenses")
            }
            EditField::Dependency => {
                self.update.dependency = Some(text.to_owned());
                Ok("dependency")
            }
            EditField::Reservation => {
                self.update.reservation = Some(text.to_owned());
                Ok("reservation name")
            }
            EditField::Shared => {
                self.update.shared = Some(parse_yes_no(text).ok_or_else(|| fail("shared"))?);
                Ok("shared")
            }
            EditField::Contiguous => {
                self.update.contiguous =
                    Some(parse_yes_no(text).ok_or_else(|| fail("contiguous"))?);
                Ok("contiguous")
            }
            EditField::Requeue => {
                self.update.requeue = Some(parse_yes_no(text).ok_or_else(|| fail("requeue"))?);
                Ok("requeue")
            }
            EditField::RequestedNodes => {
                self.update.req_nodes = Some(text.to_owned());
                Ok("requested nodelist")
            }
            EditField::ExcludedNodes => {
                self.update.exc_nodes = Some(text.to_owned());
                Ok("excluded nodelist")
            }
            EditField::Geometry => {
                self.update.geometry = Some(parse_geometry(text).ok_or_else(|| fail("geometry"))?);
                Ok("geometry")
            }
            EditField::Rotate => {
                self.update.rotate = Some(parse_yes_no(text).ok_or_else(|| fail("rotate"))?);
                Ok("rotate")
            }
            EditField::Connection => {
                self.update.conn_type =
                    Some(parse_connection(text).ok_or_else(|| fail("connection"))?);
                Ok("connection")
            }
            EditField::BlrtsImage => {
                self.update.blrts_image = Some(text.to_owned());
                Ok("BlrtsImage")
            }
            EditField::LinuxImage => {
                self.update.linux_image = Some(text.to_owned());
                Ok("LinuxImage")
            }
            EditField::MloaderImage => {
                self.update.mloader_image = Some(text.to_owned());
                Ok("MloaderImage")
            }
            EditField::RamdiskImage => {
                self.update.ramdisk_image = Some(text.to_owned());
                Ok("RamdiskImage")
            }
            EditField::StartTime | EditField::EligibleTime => {
                let when =
                    parse_begin_time(text, Local::now()).ok_or_else(|| fail("start time"))?;
                self.update.begin_time = Some(when);
                Ok("start time")
            }
        }
    }
}

/// `infinite`, plain minutes, `h:mm`, or `d-h:mm`.
fn parse_time_limit(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("infinite") {
        return Some(INFINITE);
    }
    if let Ok(mins) = text.parse::<u32>() {
        return (mins > 0).then_some(mins);
    }
    let (days, rest) = match text.split_once('-') {
        Some((d, rest)) => (d.parse::<u32>().ok()?, rest),
        None => (0, text),
    };
    let (hours, mins) = rest.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let mins: u32 = mins.parse().ok()?;
    if mins >= 60 {
        return None;
    }
    let total = (days * 24 + hours) * 60 + mins;
    (total > 0).then_some(total)
}

fn parse_positive(text: &str) -> Option<u32> {
    let v: u32 = text.trim().parse().ok()?;
    (v > 0).then_some(v)
}

/// Positive number with an optional `k`/`K` (1024) or `m`/`M` (1048576)
/// suffix.
fn parse_suffixed(text: &str) -> Option<u32> {
    let text = text.trim();
    let (digits, mult) = match text.char_indices().last()? {
        (i, 'k') | (i, 'K') => (&text[..i], 1024u32),
        (i, 'm') | (i, 'M') => (&text[..i], 1_048_576),
        _ => (text, 1),
    };
    let v: u32 = digits.parse().ok()?;
    let v = v.checked_mul(mult)?;
    (v > 0).then_some(v)
}

fn parse_yes_no(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if text.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

/// Three positive values split on `x` or `,`, e.g. `2x2x4` or `2,2,4`.
fn parse_geometry(text: &str) -> Option<[u16; 3]> {
    let mut geo = [0u16; 3];
    let mut parts = text.split(|c| c == 'x' || c == 'X' || c == ',');
    for dim in geo.iter_mut() {
        let part = parts.next()?.trim();
        *dim = part.parse().ok()?;
        if *dim == 0 {
            return None;
        }
    }
    if parts.next().is_some() {
        return None;
    }
    Some(geo)
}

fn parse_connection(text: &str) -> Option<ConnectionType> {
    let text = text.trim();
    let conn = if text.eq_ignore_ascii_case("torus") {
        ConnectionType::Torus
    } else if text.eq_ignore_ascii_case("mesh") {
        ConnectionType::Mesh
    } else if text.eq_ignore_ascii_case("nav") {
        ConnectionType::Nav
    } else if text.eq_ignore_ascii_case("htc smp") {
        ConnectionType::HtcSmp
    } else if text.eq_ignore_ascii_case("htc dual") {
        ConnectionType::HtcDual
    } else if text.eq_ignore_ascii_case("htc virtual") {
        ConnectionType::HtcVirtual
    } else if text.eq_ignore_ascii_case("htc linux") {
        ConnectionType::HtcLinux
    } else {
        return None;
    };
    Some(conn)
}

/// Parse a start time and clamp it to `now` when it is in the past.
/// Returns unix seconds.
fn parse_begin_time(text: &str, now: DateTime<Local>) -> Option<i64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("now") {
        return Some(now.timestamp());
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .or_else(|_| {
            NaiveTime::parse_from_str(text, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .map(|t| now.date_naive().and_time(t))
        })
        .ok()?;
    let when = Local
        .from_local_datetime(&naive)
        .earliest()?
        .timestamp();
    Some(when.max(now.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_limit_forms() {
        assert_eq!(parse_time_limit("90"), Some(90));
        assert_eq!(parse_time_limit("infinite"), Some(INFINITE));
        assert_eq!(parse_time_limit("1:30"), Some(90));
        assert_eq!(parse_time_limit("1-1:30"), Some(24 * 60 + 90));
        assert_eq!(parse_time_limit("0"), None);
        assert_eq!(parse_time_limit("1:75"), None);
    }

    #[test]
    fn suffixes_scale() {
        assert_eq!(parse_suffixed("4"), Some(4));
        assert_eq!(parse_suffixed("4k"), Some(4096));
        assert_eq!(parse_suffixed("4K"), Some(4096));
        assert_eq!(parse_suffixed("2M"), Some(2_097_152));
        assert_eq!(parse_suffixed("0"), None);
        assert_eq!(parse_suffixed("4g"), None);
    }

    #[test]
    fn nice_is_biased_and_bounded() {
        let mut ed = JobEditor::new(1);
        ed.set(EditField::Nice, "-20").unwrap();
        let update = ed.finish().unwrap();
        assert_eq!(update.nice, Some((NICE_OFFSET - 20) as u16));

        let mut ed = JobEditor::new(1);
        let err = ed.set(EditField::Nice, "10001").unwrap_err();
        assert_eq!(err.field, "nice");
    }

    #[test]
    fn geometry_accepts_both_separators() {
        assert_eq!(parse_geometry("2x2x4"), Some([2, 2, 4]));
        assert_eq!(parse_geometry("2,2,4"), Some([2, 2, 4]));
        assert_eq!(parse_geometry("2x2"), None);
        assert_eq!(parse_geometry("2x2x4x1"), None);
        assert_eq!(parse_geometry("2x0x4"), None);
    }

    #[test]
    fn connection_names_match_operator_spelling() {
        assert_eq!(parse_connection("Torus"), Some(ConnectionType::Torus));
        assert_eq!(parse_connection("HTC Dual"), Some(ConnectionType::HtcDual));
        assert_eq!(parse_connection("htc linux"), Some(ConnectionType::HtcLinux));
        assert_eq!(parse_connection("ring"), None);
    }

    #[test]
    fn rejected_edit_leaves_update_untouched() {
        let mut ed = JobEditor::new(9);
        ed.set(EditField::Priority, "100").unwrap();
        let err = ed.set(EditField::Geometry, "banana").unwrap_err();
        assert_eq!(err.field, "geometry");
        let update = ed.finish().unwrap();
        assert_eq!(update.priority, Some(100));
        assert_eq!(update.geometry, None);
    }

    #[test]
    fn untouched_editor_yields_nothing() {
        assert!(JobEditor::new(3).finish().is_none());

        let mut ed = JobEditor::new(3);
        assert!(ed.set(EditField::Shared, "maybe").is_err());
        assert!(ed.finish().is_none());
    }

    #[test]
    fn node_count_sets_floor_and_ceiling() {
        let mut ed = JobEditor::new(5);
        ed.set(EditField::NodeCount, "2k").unwrap();
        let update = ed.finish().unwrap();
        assert_eq!(update.min_nodes, Some(2048));
        assert_eq!(update.max_nodes, Some(2048));
    }

    #[test]
    fn past_start_time_clamps_to_now() {
        let now = Local::now();
        let when = parse_begin_time("2001-01-01 00:00:00", now).unwrap();
        assert_eq!(when, now.timestamp());
        assert_eq!(parse_begin_time("now", now), Some(now.timestamp()));
        assert_eq!(parse_begin_time("whenever", now), None);
    }
}
