//! Topology Provider - bandwidth and latency matrices per network shape.
//!
//! Every provider takes `(node_count, base_bandwidth)` and returns an
//! `N×N` pair of matrices. Linked pairs carry `base_bandwidth` and
//! [`LINK_LATENCY`]; unlinked pairs and the diagonal are zero, so a zero
//! bandwidth entry means "no direct link".

use nalgebra::DMatrix;
use reconf_env::{Shape, SweepError};
use serde::{Deserialize, Serialize};

/// One-hop latency of every link, in seconds.
pub const LINK_LATENCY: f64 = 0.01;

/// Signature shared by every topology provider.
pub type TopologyFn = fn(usize, f64) -> Result<TopologyMatrices, SweepError>;

/// Interconnect description for `node_count` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyMatrices {
    /// `bandwidth[(i, j)]` in bytes per second (0 = no link)
    pub bandwidth: DMatrix<f64>,

    /// `latency[(i, j)]` in seconds
    pub latency: DMatrix<f64>,
}

impl TopologyMatrices {
    /// Creates disconnected matrices for `node_count` nodes.
    fn disconnected(node_count: usize) -> Self {
        Self {
            bandwidth: DMatrix::zeros(node_count, node_count),
            latency: DMatrix::zeros(node_count, node_count),
        }
    }

    /// Adds a symmetric link between `a` and `b`.
    fn link(&mut self, a: usize, b: usize, bandwidth: f64) {
        if a == b {
            return;
        }
        self.bandwidth[(a, b)] = bandwidth;
        self.bandwidth[(b, a)] = bandwidth;
        self.latency[(a, b)] = LINK_LATENCY;
        self.latency[(b, a)] = LINK_LATENCY;
    }

    /// Number of nodes described.
    pub fn node_count(&self) -> usize {
        self.bandwidth.nrows()
    }

    /// True if `a` and `b` share a direct link.
    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        a != b && self.bandwidth[(a, b)] > 0.0
    }

    /// Directly linked neighbours of `node`, in ascending order.
    pub fn neighbours(&self, node: usize) -> Vec<usize> {
        (0..self.node_count())
            .filter(|&other| self.is_linked(node, other))
            .collect()
    }

    /// Checks the structural invariants: square, same size, symmetric,
    /// zero self-latency.
    pub fn is_well_formed(&self) -> bool {
        let n = self.bandwidth.nrows();
        if !self.bandwidth.is_square()
            || self.latency.nrows() != n
            || self.latency.ncols() != n
        {
            return false;
        }
        (0..n).all(|i| self.latency[(i, i)] == 0.0)
            && self.bandwidth == self.bandwidth.transpose()
            && self.latency == self.latency.transpose()
    }
}

/// Returns the provider for a shape.
pub fn provider(shape: Shape) -> TopologyFn {
    match shape {
        Shape::Clique => clique,
        Shape::Chain => chain,
        Shape::Ring => ring,
        Shape::Star => star,
        Shape::Grid => grid,
    }
}

fn check_args(node_count: usize, base_bandwidth: f64) -> Result<(), SweepError> {
    if node_count == 0 {
        return Err(SweepError::invalid("topology needs at least one node"));
    }
    if !(base_bandwidth.is_finite() && base_bandwidth > 0.0) {
        return Err(SweepError::invalid(format!(
            "bandwidth must be positive, got {}",
            base_bandwidth
        )));
    }
    Ok(())
}

/// Every node linked to every other node.
pub fn clique(node_count: usize, base_bandwidth: f64) -> Result<TopologyMatrices, SweepError> {
    check_args(node_count, base_bandwidth)?;
    let mut m = TopologyMatrices::disconnected(node_count);
    for a in 0..node_count {
        for b in (a + 1)..node_count {
            m.link(a, b, base_bandwidth);
        }
    }
    Ok(m)
}

/// Node `i` linked to node `i + 1`.
pub fn chain(node_count: usize, base_bandwidth: f64) -> Result<TopologyMatrices, SweepError> {
    check_args(node_count, base_bandwidth)?;
    let mut m = TopologyMatrices::disconnected(node_count);
    for a in 1..node_count {
        m.link(a - 1, a, base_bandwidth);
    }
    Ok(m)
}

/// A chain whose ends are linked.
pub fn ring(node_count: usize, base_bandwidth: f64) -> Result<TopologyMatrices, SweepError> {
    let mut m = chain(node_count, base_bandwidth)?;
    if node_count > 2 {
        m.link(node_count - 1, 0, base_bandwidth);
    }
    Ok(m)
}

/// Node 0 is the hub, every other node a leaf.
pub fn star(node_count: usize, base_bandwidth: f64) -> Result<TopologyMatrices, SweepError> {
    check_args(node_count, base_bandwidth)?;
    let mut m = TopologyMatrices::disconnected(node_count);
    for leaf in 1..node_count {
        m.link(0, leaf, base_bandwidth);
    }
    Ok(m)
}

/// Width of the grid layout used for `node_count` nodes.
pub fn grid_width(node_count: usize) -> usize {
    let mut width = (node_count as f64).sqrt().ceil() as usize;
    // Guard against sqrt rounding on perfect squares
    while width > 1 && (width - 1) * (width - 1) >= node_count {
        width -= 1;
    }
    width.max(1)
}

/// Row-major grid; each node links right and down.
///
/// Node counts that are not perfect squares leave the last row partial.
pub fn grid(node_count: usize, base_bandwidth: f64) -> Result<TopologyMatrices, SweepError> {
    check_args(node_count, base_bandwidth)?;
    let width = grid_width(node_count);
    let mut m = TopologyMatrices::disconnected(node_count);
    for node in 0..node_count {
        let right = node + 1;
        if right % width != 0 && right < node_count {
            m.link(node, right, base_bandwidth);
        }
        let down = node + width;
        if down < node_count {
            m.link(node, down, base_bandwidth);
        }
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BW: f64 = 1_000.0;

    #[test]
    fn test_star_links_hub_only() {
        let m = star(6, BW).unwrap();
        assert_eq!(m.neighbours(0), vec![1, 2, 3, 4, 5]);
        assert_eq!(m.neighbours(3), vec![0]);
        assert!(!m.is_linked(1, 2));
    }

    #[test]
    fn test_ring_closes_chain() {
        let c = chain(5, BW).unwrap();
        let r = ring(5, BW).unwrap();
        assert!(!c.is_linked(0, 4));
        assert!(r.is_linked(0, 4));
        assert_eq!(r.neighbours(2), vec![1, 3]);
    }

    #[test]
    fn test_grid_layout() {
        assert_eq!(grid_width(9), 3);
        assert_eq!(grid_width(16), 4);
        assert_eq!(grid_width(6), 3);

        let m = grid(9, BW).unwrap();
        assert_eq!(m.neighbours(4), vec![1, 3, 5, 7]);
        assert_eq!(m.neighbours(2), vec![1, 5]);
        // No wrap from the end of one row to the start of the next
        assert!(!m.is_linked(2, 3));
    }

    #[test]
    fn test_link_values() {
        let m = clique(3, BW).unwrap();
        approx::assert_relative_eq!(m.bandwidth[(0, 2)], BW);
        approx::assert_relative_eq!(m.latency[(2, 1)], LINK_LATENCY);
        approx::assert_relative_eq!(m.bandwidth[(1, 1)], 0.0);
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(star(0, BW).is_err());
        assert!(grid(4, 0.0).is_err());
        assert!(chain(4, f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn prop_matrices_are_square_symmetric_with_zero_diagonal(
            n in 1usize..40,
            shape_idx in 0usize..5,
        ) {
            let shapes = [Shape::Clique, Shape::Chain, Shape::Ring, Shape::Star, Shape::Grid];
            let m = provider(shapes[shape_idx])(n, BW).unwrap();
            prop_assert_eq!(m.bandwidth.shape(), (n, n));
            prop_assert_eq!(m.latency.shape(), (n, n));
            prop_assert!(m.is_well_formed());
        }

        #[test]
        fn prop_every_shape_is_connected(n in 1usize..40, shape_idx in 0usize..5) {
            let shapes = [Shape::Clique, Shape::Chain, Shape::Ring, Shape::Star, Shape::Grid];
            let m = provider(shapes[shape_idx])(n, BW).unwrap();
            let mut seen = vec![false; n];
            let mut stack = vec![0];
            seen[0] = true;
            while let Some(node) = stack.pop() {
                for next in m.neighbours(node) {
                    if !seen[next] {
                        seen[next] = true;
                        stack.push(next);
                    }
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }
    }
}
