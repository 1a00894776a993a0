//! Unit-level conflict resolution.
//!
//! Merges two versions of a keyed collection of merge units (for example a
//! worker's per-day timesheet). Units are replaced wholesale; nothing below
//! unit granularity is ever merged. Every function here is pure.
//!
//! When both sides carry a modification stamp for a key, the later stamp
//! wins. Without stamps the [`TieBreak`] side wins: the incoming side when
//! folding a server snapshot into the cache, the local side when pushing a
//! local edit. That fallback can lose one side of a concurrent offline edit
//! to the same unit; it is an accepted limitation of the model, and each such
//! resolution is reported as an ambiguous conflict so callers can log it.

use std::collections::BTreeMap;

use crate::models::Worker;

/// One side of a merge
#[derive(Debug, Clone, Copy)]
pub struct Side<'a, K, U> {
    pub units: &'a BTreeMap<K, U>,
    /// Per-key modification stamps (unix ms), when the side has them
    pub stamps: Option<&'a BTreeMap<K, i64>>,
}

impl<'a, K: Ord, U> Side<'a, K, U> {
    pub const fn stamped(units: &'a BTreeMap<K, U>, stamps: &'a BTreeMap<K, i64>) -> Self {
        Self {
            units,
            stamps: Some(stamps),
        }
    }

    pub const fn unstamped(units: &'a BTreeMap<K, U>) -> Self {
        Self {
            units,
            stamps: None,
        }
    }

    fn stamp(&self, key: &K) -> Option<i64> {
        self.stamps.and_then(|stamps| stamps.get(key)).copied()
    }
}

/// How a differing unit was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local stamp was later
    LocalNewer,
    /// Incoming stamp was later
    IncomingNewer,
    /// Stamps missing or tied; incoming won by policy
    IncomingByDefault,
    /// Stamps missing or tied; local won by policy
    LocalByDefault,
}

/// Side that keeps a differing unit when stamps cannot decide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    Incoming,
    Local,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalNewer => "local_newer",
            Self::IncomingNewer => "incoming_newer",
            Self::IncomingByDefault => "incoming_by_default",
            Self::LocalByDefault => "local_by_default",
        }
    }
}

/// A key present on both sides with differing units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConflict<K> {
    pub key: K,
    pub resolution: Resolution,
    pub local_modified_at: Option<i64>,
    pub incoming_modified_at: Option<i64>,
}

impl<K> UnitConflict<K> {
    /// Resolved by the no-timestamp fallback rather than by stamps
    pub const fn is_ambiguous(&self) -> bool {
        matches!(
            self.resolution,
            Resolution::IncomingByDefault | Resolution::LocalByDefault
        )
    }
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<K, U> {
    pub units: BTreeMap<K, U>,
    pub stamps: BTreeMap<K, i64>,
    pub conflicts: Vec<UnitConflict<K>>,
}

/// Merge two keyed unit collections using per-key stamps where available.
///
/// Unresolvable differences go to the incoming side.
pub fn merge_units<K, U>(local: Side<'_, K, U>, incoming: Side<'_, K, U>) -> Merged<K, U>
where
    K: Ord + Clone,
    U: PartialEq + Clone,
{
    merge_units_with(local, incoming, TieBreak::Incoming)
}

/// [`merge_units`] with an explicit winner for unresolvable differences.
pub fn merge_units_with<K, U>(
    local: Side<'_, K, U>,
    incoming: Side<'_, K, U>,
    tie: TieBreak,
) -> Merged<K, U>
where
    K: Ord + Clone,
    U: PartialEq + Clone,
{
    let mut merged = Merged {
        units: BTreeMap::new(),
        stamps: BTreeMap::new(),
        conflicts: Vec::new(),
    };

    let keys = local
        .units
        .keys()
        .chain(incoming.units.keys())
        .cloned()
        .collect::<std::collections::BTreeSet<K>>();

    for key in keys {
        let local_stamp = local.stamp(&key);
        let incoming_stamp = incoming.stamp(&key);

        let (unit, stamp) = match (local.units.get(&key), incoming.units.get(&key)) {
            (Some(unit), None) => (unit, local_stamp),
            (None, Some(unit)) => (unit, incoming_stamp),
            (Some(mine), Some(theirs)) if mine == theirs => {
                (theirs, local_stamp.max(incoming_stamp))
            }
            (Some(mine), Some(theirs)) => {
                let resolution = match (local_stamp, incoming_stamp) {
                    (Some(l), Some(i)) if l > i => Resolution::LocalNewer,
                    (Some(l), Some(i)) if i > l => Resolution::IncomingNewer,
                    _ => match tie {
                        TieBreak::Incoming => Resolution::IncomingByDefault,
                        TieBreak::Local => Resolution::LocalByDefault,
                    },
                };
                merged.conflicts.push(UnitConflict {
                    key: key.clone(),
                    resolution,
                    local_modified_at: local_stamp,
                    incoming_modified_at: incoming_stamp,
                });
                if matches!(resolution, Resolution::LocalNewer | Resolution::LocalByDefault) {
                    (mine, local_stamp)
                } else {
                    (theirs, incoming_stamp)
                }
            }
            (None, None) => continue,
        };

        if let Some(stamp) = stamp {
            merged.stamps.insert(key.clone(), stamp);
        }
        merged.units.insert(key, unit.clone());
    }

    merged
}

/// Explicit last-write-wins fallback for callers that have no stamps at all.
pub fn merge_units_incoming_wins<K, U>(
    local: &BTreeMap<K, U>,
    incoming: &BTreeMap<K, U>,
) -> Merged<K, U>
where
    K: Ord + Clone,
    U: PartialEq + Clone,
{
    merge_units(Side::unstamped(local), Side::unstamped(incoming))
}

/// Merge a cached worker with an incoming version.
///
/// Scalar fields come from `incoming`; the timesheet is merged per day.
pub fn merge_worker(local: &Worker, incoming: &Worker) -> (Worker, Vec<UnitConflict<String>>) {
    let merged = merge_units(
        Side::stamped(&local.timesheet, &local.timesheet_modified),
        Side::stamped(&incoming.timesheet, &incoming.timesheet_modified),
    );

    let worker = Worker {
        timesheet: merged.units,
        timesheet_modified: merged.stamps,
        ..incoming.clone()
    };
    (worker, merged.conflicts)
}

/// Merge a local worker edit into the server's current version before pushing.
///
/// Scalar fields come from `local`; days only the server holds are kept, and
/// a day both sides changed without decisive stamps keeps the local entry.
pub fn merge_worker_for_push(
    local: &Worker,
    server: &Worker,
) -> (Worker, Vec<UnitConflict<String>>) {
    let merged = merge_units_with(
        Side::stamped(&local.timesheet, &local.timesheet_modified),
        Side::stamped(&server.timesheet, &server.timesheet_modified),
        TieBreak::Local,
    );

    let worker = Worker {
        timesheet: merged.units,
        timesheet_modified: merged.stamps,
        ..local.clone()
    };
    (worker, merged.conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimesheetEntry;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sheet(entries: &[(&str, f64)]) -> BTreeMap<String, TimesheetEntry> {
        entries
            .iter()
            .map(|(day, hours)| ((*day).to_string(), TimesheetEntry::hours(*hours)))
            .collect()
    }

    fn stamps(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries
            .iter()
            .map(|(day, stamp)| ((*day).to_string(), *stamp))
            .collect()
    }

    #[test]
    fn offline_day_and_server_day_are_both_kept() {
        let mut local = Worker::new("W1");
        local.timesheet = sheet(&[("mon", 8.0), ("tue", 4.0)]);
        let mut server = Worker::new("W1");
        server.timesheet = sheet(&[("mon", 8.0), ("wed", 6.0)]);

        let (merged, conflicts) = merge_worker(&local, &server);

        assert_eq!(
            merged.timesheet,
            sheet(&[("mon", 8.0), ("tue", 4.0), ("wed", 6.0)])
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn later_stamp_wins() {
        let local = sheet(&[("mon", 8.0)]);
        let local_stamps = stamps(&[("mon", 200)]);
        let incoming = sheet(&[("mon", 6.0)]);
        let incoming_stamps = stamps(&[("mon", 100)]);

        let merged = merge_units(
            Side::stamped(&local, &local_stamps),
            Side::stamped(&incoming, &incoming_stamps),
        );

        assert_eq!(merged.units, local);
        assert_eq!(merged.stamps, local_stamps);
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].resolution, Resolution::LocalNewer);
        assert!(!merged.conflicts[0].is_ambiguous());
    }

    #[test]
    fn incoming_wins_without_stamps() {
        let local = sheet(&[("mon", 8.0)]);
        let incoming = sheet(&[("mon", 6.0)]);

        let merged = merge_units_incoming_wins(&local, &incoming);

        assert_eq!(merged.units, incoming);
        assert!(merged.conflicts[0].is_ambiguous());
    }

    #[test]
    fn one_sided_stamp_falls_back_to_incoming() {
        let local = sheet(&[("mon", 8.0)]);
        let local_stamps = stamps(&[("mon", 500)]);
        let incoming = sheet(&[("mon", 6.0)]);

        let merged = merge_units(Side::stamped(&local, &local_stamps), Side::unstamped(&incoming));

        assert_eq!(merged.units, incoming);
        assert_eq!(merged.conflicts[0].resolution, Resolution::IncomingByDefault);
    }

    #[test]
    fn identical_units_are_not_conflicts() {
        let local = sheet(&[("mon", 8.0)]);
        let local_stamps = stamps(&[("mon", 10)]);
        let incoming_stamps = stamps(&[("mon", 30)]);

        let merged = merge_units(
            Side::stamped(&local, &local_stamps),
            Side::stamped(&local, &incoming_stamps),
        );

        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.stamps, incoming_stamps);
    }

    #[test]
    fn merge_worker_takes_incoming_scalars() {
        let mut local = Worker::new("Old name");
        local.set_entry("mon", TimesheetEntry::hours(8.0), 100);
        let mut incoming = Worker::new("New name");
        incoming.hourly_rate_cents = 4_500;

        let (merged, _) = merge_worker(&local, &incoming);

        assert_eq!(merged.name, "New name");
        assert_eq!(merged.hourly_rate_cents, 4_500);
        assert_eq!(merged.timesheet_modified.get("mon"), Some(&100));
    }

    #[test]
    fn push_keeps_server_days_and_local_scalars() {
        let mut local = Worker::new("Renamed");
        local.timesheet = sheet(&[("mon", 8.0)]);
        local.set_entry("tue", TimesheetEntry::hours(4.0), 300);
        let mut server = Worker::new("W1");
        server.timesheet = sheet(&[("mon", 8.0), ("wed", 6.0)]);

        let (merged, conflicts) = merge_worker_for_push(&local, &server);

        assert_eq!(merged.name, "Renamed");
        assert_eq!(
            merged.timesheet,
            sheet(&[("mon", 8.0), ("tue", 4.0), ("wed", 6.0)])
        );
        assert_eq!(merged.timesheet_modified.get("tue"), Some(&300));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn push_keeps_local_day_when_stamps_cannot_decide() {
        let mut local = Worker::new("W1");
        local.set_entry("mon", TimesheetEntry::hours(9.0), 300);
        let mut server = Worker::new("W1");
        server.timesheet = sheet(&[("mon", 8.0)]);

        let (merged, conflicts) = merge_worker_for_push(&local, &server);

        assert_eq!(merged.timesheet["mon"], TimesheetEntry::hours(9.0));
        assert_eq!(conflicts[0].resolution, Resolution::LocalByDefault);
        assert!(conflicts[0].is_ambiguous());
    }

    #[test]
    fn push_yields_to_a_later_server_stamp() {
        let mut local = Worker::new("W1");
        local.set_entry("mon", TimesheetEntry::hours(9.0), 100);
        let mut server = Worker::new("W1");
        server.set_entry("mon", TimesheetEntry::hours(7.0), 200);

        let (merged, conflicts) = merge_worker_for_push(&local, &server);

        assert_eq!(merged.timesheet["mon"], TimesheetEntry::hours(7.0));
        assert_eq!(conflicts[0].resolution, Resolution::IncomingNewer);
    }

    fn disjoint_sheets() -> impl Strategy<Value = (BTreeMap<String, u8>, BTreeMap<String, u8>)> {
        prop::collection::btree_map("[a-m]{1,4}", any::<u8>(), 0..8).prop_flat_map(|left| {
            let right = prop::collection::btree_map("[n-z]{1,4}", any::<u8>(), 0..8);
            (Just(left), right)
        })
    }

    proptest! {
        #[test]
        fn disjoint_merge_is_union_in_either_order((a, b) in disjoint_sheets()) {
            let ab = merge_units_incoming_wins(&a, &b);
            let ba = merge_units_incoming_wins(&b, &a);

            let mut union = a.clone();
            union.extend(b.clone());

            prop_assert_eq!(&ab.units, &union);
            prop_assert_eq!(&ba.units, &union);
            prop_assert!(ab.conflicts.is_empty());
        }

        #[test]
        fn merging_the_same_incoming_twice_is_stable(
            local in prop::collection::btree_map("[a-f]", any::<u8>(), 0..6),
            incoming in prop::collection::btree_map("[a-f]", any::<u8>(), 0..6),
        ) {
            let once = merge_units_incoming_wins(&local, &incoming);
            let twice = merge_units_incoming_wins(&once.units, &incoming);
            prop_assert_eq!(once.units, twice.units);
        }
    }
}
