//! The global metabolite table.
//!
//! Each live metabolite has one entry holding `fi` (the number of RT clusters across all files
//! pointing at it), `ti` (its RT mean) and `si` (the sum of those RT clusters' values) alongside
//! the [`Metabolite`] itself, so the three can never fall out of step with the metabolite set.
use std::collections::btree_map::{Iter, IterMut};
use std::collections::BTreeMap;

use crate::metabolite::{Metabolite, MetaboliteId};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TopLevelStats {
    /// `fi`
    pub rt_cluster_count: usize,
    /// `ti`
    pub rt: f64,
    /// `si`
    pub rt_cluster_sum: f64,
}

#[derive(Debug)]
pub struct MetaboliteEntry {
    pub stats: TopLevelStats,
    pub metabolite: Metabolite,
}

#[derive(Debug, Default)]
pub struct TopLevelState {
    entries: BTreeMap<MetaboliteId, MetaboliteEntry>,
    next_id: usize,
}

impl TopLevelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty metabolite with RT mean `rt`
    pub fn create_metabolite(&mut self, rt: f64) -> MetaboliteId {
        let id = MetaboliteId(self.next_id);
        self.next_id += 1;
        let entry = MetaboliteEntry {
            stats: TopLevelStats {
                rt_cluster_count: 0,
                rt,
                rt_cluster_sum: 0.0,
            },
            metabolite: Metabolite::new(id),
        };
        self.entries.insert(id, entry);
        tracing::trace!("Created metabolite {id} at RT {rt:0.3}");
        id
    }

    /// Remove a metabolite that no RT cluster points to any longer
    pub fn remove_metabolite(&mut self, id: MetaboliteId) -> Metabolite {
        let entry = self
            .entries
            .remove(&id)
            .unwrap_or_else(|| panic!("Metabolite {id} does not exist"));
        assert_eq!(
            entry.stats.rt_cluster_count, 0,
            "Removed metabolite {id} while RT clusters still point to it"
        );
        tracing::trace!("Removed metabolite {id}");
        entry.metabolite
    }

    /// Record a new RT cluster with value `rt` under `id`
    pub fn attach_rt_cluster(&mut self, id: MetaboliteId, rt: f64) {
        let stats = &mut self.entry_mut(id).stats;
        stats.rt_cluster_count += 1;
        stats.rt_cluster_sum += rt;
    }

    /// Forget an RT cluster with value `rt` under `id`, returning the remaining RT cluster count
    pub fn detach_rt_cluster(&mut self, id: MetaboliteId, rt: f64) -> usize {
        let stats = &mut self.entry_mut(id).stats;
        stats.rt_cluster_count = stats
            .rt_cluster_count
            .checked_sub(1)
            .unwrap_or_else(|| panic!("Metabolite {id} has no RT clusters to detach"));
        stats.rt_cluster_sum -= rt;
        if stats.rt_cluster_count == 0 {
            stats.rt_cluster_sum = 0.0;
        }
        stats.rt_cluster_count
    }

    /// Adjust `si` after one of the metabolite's RT clusters changed value by `delta`
    pub fn shift_rt_cluster_sum(&mut self, id: MetaboliteId, delta: f64) {
        self.entry_mut(id).stats.rt_cluster_sum += delta;
    }

    fn entry_mut(&mut self, id: MetaboliteId) -> &mut MetaboliteEntry {
        self.entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Metabolite {id} does not exist"))
    }

    pub fn stats(&self, id: MetaboliteId) -> Option<&TopLevelStats> {
        self.entries.get(&id).map(|e| &e.stats)
    }

    pub fn metabolite(&self, id: MetaboliteId) -> Option<&Metabolite> {
        self.entries.get(&id).map(|e| &e.metabolite)
    }

    pub fn metabolite_mut(&mut self, id: MetaboliteId) -> Option<&mut Metabolite> {
        self.entries.get_mut(&id).map(|e| &mut e.metabolite)
    }

    pub fn contains(&self, id: MetaboliteId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Iterate over live metabolites in id order
    pub fn iter(&self) -> Iter<'_, MetaboliteId, MetaboliteEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, MetaboliteId, MetaboliteEntry> {
        self.entries.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = MetaboliteId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The total number of RT clusters over all metabolites
    pub fn total_rt_clusters(&self) -> usize {
        self.entries.values().map(|e| e.stats.rt_cluster_count).sum()
    }

    /// The number of peaks held by all mass clusters of all metabolites
    pub fn total_peaks(&self) -> usize {
        self.entries.values().map(|e| e.metabolite.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut top = TopLevelState::new();
        let a = top.create_metabolite(10.0);
        let b = top.create_metabolite(50.0);
        assert_eq!(top.len(), 2);

        top.attach_rt_cluster(a, 11.0);
        top.attach_rt_cluster(a, 9.0);
        top.attach_rt_cluster(b, 49.0);
        let stats = top.stats(a).unwrap();
        assert_eq!(stats.rt_cluster_count, 2);
        assert!((stats.rt_cluster_sum - 20.0).abs() < 1e-12);

        top.shift_rt_cluster_sum(a, 0.5);
        assert!((top.stats(a).unwrap().rt_cluster_sum - 20.5).abs() < 1e-12);

        assert_eq!(top.detach_rt_cluster(b, 49.0), 0);
        top.remove_metabolite(b);
        assert!(!top.contains(b));
        assert_eq!(top.total_rt_clusters(), 2);

        // ids keep increasing after a removal
        let c = top.create_metabolite(70.0);
        assert_eq!(c, MetaboliteId(2));
        assert_eq!(top.ids().collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    #[should_panic]
    fn test_remove_referenced() {
        let mut top = TopLevelState::new();
        let a = top.create_metabolite(10.0);
        top.attach_rt_cluster(a, 10.0);
        top.remove_metabolite(a);
    }
}
