//! Sweep dimensions and their cross-product.

use reconf_env::{ParameterSet, TopologyId};

/// Values swept along each dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimensions {
    pub topologies: Vec<TopologyId>,
    pub node_counts: Vec<usize>,
    pub run_ids: Vec<u32>,
}

impl Dimensions {
    /// Every combination, sorted and without duplicates.
    pub fn cross_product(&self) -> Vec<ParameterSet> {
        let mut sweeps: Vec<ParameterSet> = self
            .topologies
            .iter()
            .flat_map(|&topology| {
                self.node_counts.iter().flat_map(move |&node_count| {
                    self.run_ids
                        .iter()
                        .map(move |&run_id| ParameterSet::new(topology, node_count, run_id))
                })
            })
            .collect();
        sweeps.sort();
        sweeps.dedup();
        sweeps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_product_is_unique() {
        let dims = Dimensions {
            topologies: vec![TopologyId::RingFav, TopologyId::StarFav, TopologyId::RingFav],
            node_counts: vec![9, 16],
            run_ids: vec![0, 1, 1],
        };
        let sweeps = dims.cross_product();
        assert_eq!(sweeps.len(), 2 * 2 * 2);
        assert!(sweeps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_dimension_yields_nothing() {
        let dims = Dimensions {
            topologies: TopologyId::all(),
            node_counts: vec![],
            run_ids: vec![0],
        };
        assert!(dims.cross_product().is_empty());
    }
}
