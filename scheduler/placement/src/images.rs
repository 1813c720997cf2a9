// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Image admission: may this user boot a block with that image?
//!
//! An entry matches by exact name or the `"*"` wildcard. Default images
//! and entries without groups admit everyone; otherwise the requester's
//! OS group memberships decide. The most recent requester's groups are
//! cached, since the scheduler tends to probe many images for one user
//! in a row.

use crate::Error;
use arbor_config::ImageConf;
use log::{debug, error};
use parking_lot::Mutex;

/// Cap on resolved group memberships per user.
pub const MAX_GROUPS: usize = 128;

/// Resolves the OS group set of a user.
pub trait GroupLookup: Send + Sync {
    fn groups_of(&self, uid: u32, gid: u32) -> Result<Vec<u32>, Error>;
}

/// Group resolution against the running system.
pub struct OsGroupLookup;

impl GroupLookup for OsGroupLookup {
    fn groups_of(&self, uid: u32, gid: u32) -> Result<Vec<u32>, Error> {
        use nix::unistd::{getgrouplist, Gid, Uid, User};
        let user = User::from_uid(Uid::from_raw(uid))
            .map_err(|e| Error::GroupLookup(format!("getpwuid({uid}): {e}")))?
            .ok_or_else(|| Error::GroupLookup(format!("uid {uid} unknown")))?;
        let name = std::ffi::CString::new(user.name.as_str())
            .map_err(|_| Error::GroupLookup(format!("uid {uid} has an unusable name")))?;
        let groups = getgrouplist(&name, Gid::from_raw(gid))
            .map_err(|e| Error::GroupLookup(format!("getgrouplist({}): {e}", user.name)))?;
        Ok(groups
            .into_iter()
            .take(MAX_GROUPS)
            .map(|g| g.as_raw())
            .collect())
    }
}

/// Fixed uid-to-groups table for tests and single-tenant setups.
pub struct StaticGroupLookup(pub Vec<(u32, Vec<u32>)>);

impl GroupLookup for StaticGroupLookup {
    fn groups_of(&self, uid: u32, _gid: u32) -> Result<Vec<u32>, Error> {
        self.0
            .iter()
            .find(|(u, _)| *u == uid)
            .map(|(_, groups)| groups.clone())
            .ok_or_else(|| Error::GroupLookup(format!("uid {uid} unknown")))
    }
}

pub struct ImageAcl {
    lookup: Box<dyn GroupLookup>,
    /// Groups of the most recently checked user.
    cache: Mutex<Option<(u32, Vec<u32>)>>,
}

impl ImageAcl {
    pub fn new(lookup: Box<dyn GroupLookup>) -> ImageAcl {
        ImageAcl {
            lookup,
            cache: Mutex::new(None),
        }
    }

    fn user_groups(&self, uid: u32, gid: u32) -> Result<Vec<u32>, Error> {
        let mut cache = self.cache.lock();
        if let Some((cached_uid, groups)) = cache.as_ref() {
            if *cached_uid == uid {
                return Ok(groups.clone());
            }
        }
        let groups = self.lookup.groups_of(uid, gid)?;
        *cache = Some((uid, groups.clone()));
        Ok(groups)
    }

    /// Whether `uid:gid` may use `image_name` under the given entry list.
    pub fn check(&self, uid: u32, gid: u32, image_name: &str, list: &[ImageConf]) -> bool {
        for entry in list {
            if !entry.name.eq_ignore_ascii_case(image_name) && entry.name != "*" {
                continue;
            }
            if entry.default || entry.groups.is_empty() {
                return true;
            }
            let groups = match self.user_groups(uid, gid) {
                Ok(groups) => groups,
                Err(e) => {
                    error!("{}", e);
                    break;
                }
            };
            if entry.groups.iter().any(|g| groups.contains(g)) {
                return true;
            }
        }
        debug!("image {} not allowed for user {}:{}", image_name, uid, gid);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, default: bool, groups: &[u32]) -> ImageConf {
        ImageConf {
            name: name.to_owned(),
            default,
            groups: groups.to_vec(),
        }
    }

    fn acl() -> ImageAcl {
        ImageAcl::new(Box::new(StaticGroupLookup(vec![
            (500, vec![100, 501]),
            (600, vec![100]),
        ])))
    }

    #[test]
    fn default_entry_admits_everyone() {
        let list = [entry("ramdisk-ga", true, &[7])];
        assert!(acl().check(600, 100, "ramdisk-ga", &list));
    }

    #[test]
    fn groupless_entry_admits_everyone() {
        let list = [entry("compute-linux", false, &[])];
        assert!(acl().check(600, 100, "compute-linux", &list));
    }

    #[test]
    fn wildcard_matches_any_name() {
        let list = [entry("*", false, &[501])];
        assert!(acl().check(500, 100, "anything", &list));
        assert!(!acl().check(600, 100, "anything", &list));
    }

    #[test]
    fn group_gate_holds() {
        let list = [entry("blrts-prod", false, &[501])];
        assert!(acl().check(500, 100, "blrts-prod", &list));
        assert!(!acl().check(600, 100, "blrts-prod", &list));
        assert!(!acl().check(500, 100, "blrts-dev", &list));
    }

    #[test]
    fn later_entry_can_still_allow() {
        let list = [
            entry("img", false, &[999]),
            entry("img", false, &[501]),
        ];
        assert!(acl().check(500, 100, "img", &list));
    }

    #[test]
    fn cache_survives_same_user_lookups() {
        let acl = ImageAcl::new(Box::new(StaticGroupLookup(vec![(500, vec![501])])));
        let list = [entry("img", false, &[501])];
        assert!(acl.check(500, 100, "img", &list));
        // second check hits the cache; a different user misses
        assert!(acl.check(500, 100, "img", &list));
        assert!(!acl.check(777, 100, "img", &list));
    }
}
