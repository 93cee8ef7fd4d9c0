//! The escaped-particle registry.
//!
//! One registry per species maps global id to the particle record as it
//! was first reported escaped. Records are never replaced or evicted, and
//! the registry remembers which ids each step introduced.

use indexmap::IndexMap;
use middleman_core::{Particle, Species, StepId};

/// Outcome of one [`EscapedRegistry::upsert`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Candidates whose id was new.
    pub inserted: usize,
    /// Candidates whose id was already registered (kept unchanged).
    pub duplicates: usize,
}

/// Append-only store of escaped particles for one species.
///
/// ```
/// use middleman_core::{Particle, Species, StepId, PHASE_WIDTH};
/// use middleman_engine::EscapedRegistry;
///
/// let p = |gid| Particle::from_row(gid, 1, 0, 0.0, &[0.0; PHASE_WIDTH]);
/// let mut reg = EscapedRegistry::new(Species::Ion);
/// let report = reg.upsert(StepId(0), [p(1), p(3)]);
/// assert_eq!(report.inserted, 2);
/// let again = reg.upsert(StepId(1), [p(3)]);
/// assert_eq!(again.duplicates, 1);
/// assert_eq!(reg.len(), 2);
/// assert_eq!(reg.inserted_at(StepId(0)), &[1, 3]);
/// ```
#[derive(Clone, Debug)]
pub struct EscapedRegistry {
    species: Species,
    records: IndexMap<i64, Particle>,
    history: IndexMap<StepId, Vec<i64>>,
    duplicates: u64,
}

impl EscapedRegistry {
    /// An empty registry.
    pub fn new(species: Species) -> Self {
        Self {
            species,
            records: IndexMap::new(),
            history: IndexMap::new(),
            duplicates: 0,
        }
    }

    /// Species this registry tracks.
    pub fn species(&self) -> Species {
        self.species
    }

    /// Insert every candidate whose id is not yet registered.
    ///
    /// The first record seen for an id wins, including within one call.
    /// Ids inserted by this call are appended to the history of `step`.
    pub fn upsert(
        &mut self,
        step: StepId,
        candidates: impl IntoIterator<Item = Particle>,
    ) -> UpsertReport {
        let mut report = UpsertReport::default();
        let mut fresh = Vec::new();
        for p in candidates {
            if self.records.contains_key(&p.gid) {
                report.duplicates += 1;
                continue;
            }
            self.records.insert(p.gid, p);
            fresh.push(p.gid);
            report.inserted += 1;
        }
        if !fresh.is_empty() {
            self.history.entry(step).or_default().extend(fresh);
        }
        self.duplicates += report.duplicates as u64;
        report
    }

    /// The record for `gid`.
    pub fn get(&self, gid: i64) -> Option<&Particle> {
        self.records.get(&gid)
    }

    /// Whether `gid` is registered.
    pub fn contains(&self, gid: i64) -> bool {
        self.records.contains_key(&gid)
    }

    /// Number of registered particles.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.records.values()
    }

    /// Ids first inserted during `step`, in insertion order.
    pub fn inserted_at(&self, step: StepId) -> &[i64] {
        self.history.get(&step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Records first inserted during `step`.
    pub fn records_inserted_at(&self, step: StepId) -> impl Iterator<Item = &Particle> {
        self.inserted_at(step)
            .iter()
            .filter_map(|gid| self.records.get(gid))
    }

    /// Steps that inserted at least one id, oldest first.
    pub fn steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.history.keys().copied()
    }

    /// Total duplicate candidates seen over the registry's lifetime.
    pub fn duplicates_seen(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleman_core::PHASE_WIDTH;
    use proptest::prelude::*;

    fn ptl(gid: i64, r: f32) -> Particle {
        let mut phase = [0.0; PHASE_WIDTH];
        phase[0] = r;
        Particle::from_row(gid, 1, 0, 0.0, &phase)
    }

    #[test]
    fn first_seen_wins() {
        let mut reg = EscapedRegistry::new(Species::Ion);
        reg.upsert(StepId(0), [ptl(5, 1.0)]);
        let report = reg.upsert(StepId(1), [ptl(5, 2.0), ptl(6, 3.0)]);
        assert_eq!(report, UpsertReport { inserted: 1, duplicates: 1 });
        assert_eq!(reg.get(5).unwrap().r, 1.0);
        assert_eq!(reg.inserted_at(StepId(1)), &[6]);
        assert_eq!(reg.duplicates_seen(), 1);
    }

    #[test]
    fn duplicates_within_one_call() {
        let mut reg = EscapedRegistry::new(Species::Electron);
        let report = reg.upsert(StepId(0), [ptl(9, 1.0), ptl(9, 2.0)]);
        assert_eq!(report, UpsertReport { inserted: 1, duplicates: 1 });
        assert_eq!(reg.get(9).unwrap().r, 1.0);
    }

    #[test]
    fn history_skips_steps_without_inserts() {
        let mut reg = EscapedRegistry::new(Species::Ion);
        reg.upsert(StepId(0), [ptl(1, 0.0)]);
        reg.upsert(StepId(1), [ptl(1, 0.0)]);
        reg.upsert(StepId(2), [ptl(2, 0.0)]);
        assert_eq!(reg.steps().collect::<Vec<_>>(), vec![StepId(0), StepId(2)]);
        assert!(reg.inserted_at(StepId(1)).is_empty());
        let fresh: Vec<_> = reg.records_inserted_at(StepId(2)).map(|p| p.gid).collect();
        assert_eq!(fresh, vec![2]);
    }

    proptest! {
        #[test]
        fn upsert_is_idempotent(ids in prop::collection::vec(-50i64..50, 0..40)) {
            let mut reg = EscapedRegistry::new(Species::Ion);
            reg.upsert(StepId(0), ids.iter().map(|&g| ptl(g, g as f32)));
            let snapshot: Vec<Particle> = reg.iter().copied().collect();

            let again = reg.upsert(StepId(1), ids.iter().map(|&g| ptl(g, -1.0)));
            prop_assert_eq!(again.inserted, 0);
            prop_assert_eq!(again.duplicates, ids.len());
            let after: Vec<Particle> = reg.iter().copied().collect();
            prop_assert_eq!(snapshot, after);
            prop_assert!(reg.inserted_at(StepId(1)).is_empty());
        }
    }
}
