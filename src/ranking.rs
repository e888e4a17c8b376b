//! Merges raw records into a capped, deterministically ordered top-N list.

use std::collections::BTreeMap;

use crate::models::{HotspotRecord, ObservationRecord, RankedEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// One entry per species (common name)
    Species,
    /// One entry per location (name)
    Location,
}

/// Anything the aggregator can group and score.
pub trait Rankable {
    fn group_key(&self, group_by: GroupBy) -> &str;
    /// Location credited for this record within its group.
    fn support(&self, group_by: GroupBy) -> &str;
    /// Contribution to the group score. Missing counts weigh 0.
    fn weight(&self) -> u64;
}

impl Rankable for ObservationRecord {
    fn group_key(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Species => &self.species_name,
            GroupBy::Location => &self.location_name,
        }
    }

    fn support(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Species => &self.location_name,
            GroupBy::Location => &self.location_id,
        }
    }

    fn weight(&self) -> u64 {
        self.count.map(u64::from).unwrap_or(0)
    }
}

impl Rankable for HotspotRecord {
    fn group_key(&self, _: GroupBy) -> &str {
        &self.location_name
    }

    fn support(&self, _: GroupBy) -> &str {
        &self.location_id
    }

    fn weight(&self) -> u64 {
        u64::from(self.recent_activity_count)
    }
}

impl Rankable for RankedEntry {
    fn group_key(&self, _: GroupBy) -> &str {
        &self.label
    }

    fn support(&self, _: GroupBy) -> &str {
        &self.supporting_location
    }

    fn weight(&self) -> u64 {
        self.score
    }
}

#[derive(Default)]
struct Group {
    score: u64,
    support: BTreeMap<String, u64>,
}

impl Group {
    /// Heaviest contributing location; ties go to the smallest name.
    fn supporting_location(&self) -> String {
        let mut best: Option<(&String, u64)> = None;
        for (location, weight) in &self.support {
            if best.map_or(true, |(_, w)| *weight > w) {
                best = Some((location, *weight));
            }
        }
        best.map(|(location, _)| location.clone()).unwrap_or_default()
    }
}

/// Groups `records`, scores each group by summed weight, sorts by score
/// descending then label ascending, and keeps the first `cap` groups.
pub fn rank<R: Rankable>(records: &[R], group_by: GroupBy, cap: usize) -> Vec<RankedEntry> {
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    for record in records {
        let group = groups.entry(record.group_key(group_by)).or_default();
        let weight = record.weight();
        group.score += weight;
        *group
            .support
            .entry(record.support(group_by).to_string())
            .or_insert(0) += weight;
    }

    let mut scored: Vec<(&str, Group)> = groups.into_iter().collect();
    // stable sort keeps the BTreeMap's label order within equal scores
    scored.sort_by(|a, b| b.1.score.cmp(&a.1.score));

    scored
        .into_iter()
        .take(cap)
        .enumerate()
        .map(|(i, (label, group))| RankedEntry {
            rank: i + 1,
            label: label.to_string(),
            supporting_location: group.supporting_location(),
            score: group.score,
        })
        .collect()
}
