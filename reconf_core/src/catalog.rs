//! Static topology catalog: identifier -> (task list provider, topology provider).

use crate::tasks::{self, TaskListFn};
use crate::topology::{self, TopologyFn};
use reconf_env::{SweepError, TopologyId};
use tracing::debug;

/// Providers used for one topology identifier.
#[derive(Clone, Copy)]
pub struct CatalogEntry {
    pub tasks: TaskListFn,
    pub topology: TopologyFn,
}

/// Looks up the providers for `id`.
pub fn entry(id: TopologyId) -> CatalogEntry {
    let (tasks, topology): (TaskListFn, TopologyFn) = match id {
        TopologyId::StarFav => (tasks::aggregate_at_first, topology::star),
        TopologyId::StarNonFav => (tasks::aggregate_at_middle, topology::star),
        TopologyId::RingFav => (tasks::aggregate_at_first, topology::ring),
        TopologyId::ChainFav => (tasks::aggregate_at_middle, topology::chain),
        TopologyId::ChainNonFav => (tasks::aggregate_at_first, topology::chain),
        TopologyId::CliqueFav => (tasks::aggregate_at_first, topology::clique),
        TopologyId::GridFav => (tasks::aggregate_at_grid_centre, topology::grid),
        TopologyId::GridNonFav => (tasks::aggregate_at_first, topology::grid),
    };
    CatalogEntry { tasks, topology }
}

/// Probes every configured (topology, node count) pair once.
///
/// Run at startup so a broken provider fails the sweep before any worker
/// claims an item.
pub fn validate(
    topologies: &[TopologyId],
    node_counts: &[usize],
    base_bandwidth: f64,
) -> Result<(), SweepError> {
    for &id in topologies {
        let entry = entry(id);
        for &n in node_counts {
            let matrices = (entry.topology)(n, base_bandwidth)?;
            if matrices.node_count() != n || !matrices.is_well_formed() {
                return Err(SweepError::invalid(format!(
                    "{} provider returned malformed matrices for {} nodes",
                    id, n
                )));
            }
            let list = (entry.tasks)(n);
            if list.node_count() != n || !list.references_valid_nodes() {
                return Err(SweepError::invalid(format!(
                    "{} task list does not cover {} nodes",
                    id, n
                )));
            }
        }
    }
    debug!(
        "catalog ok: {} topologies x {} node counts",
        topologies.len(),
        node_counts.len()
    );
    Ok(())
}
