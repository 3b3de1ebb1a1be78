use crate::config::TopologyKind;

// Precomputed neighbour table: `neighbors[j]` lists the particles whose
// personal bests particle `j` may follow, always including `j` itself.
// The table is built once and never changes during a swarm's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    neighbors: Vec<Vec<usize>>,
}

impl Topology {
    pub fn new(kind: TopologyKind, size: usize) -> Self {
        match kind {
            TopologyKind::Ring => Topology::ring(size),
            TopologyKind::Global => Topology::global(size),
        }
    }

    // {(j-1) mod n, j, (j+1) mod n}, with duplicates removed for n < 3
    pub fn ring(size: usize) -> Self {
        let neighbors = (0..size)
            .map(|j| {
                let mut group = Vec::with_capacity(3);
                for k in [(j + size - 1) % size, j, (j + 1) % size] {
                    if !group.contains(&k) {
                        group.push(k);
                    }
                }
                group
            })
            .collect();

        Topology { neighbors }
    }

    pub fn global(size: usize) -> Self {
        Topology {
            neighbors: vec![(0..size).collect(); size],
        }
    }

    pub fn neighbors(&self, particle: usize) -> &[usize] {
        &self.neighbors[particle]
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps_around() {
        let ring = Topology::ring(5);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.neighbors(0), &[4, 0, 1]);
        assert_eq!(ring.neighbors(2), &[1, 2, 3]);
        assert_eq!(ring.neighbors(4), &[3, 4, 0]);
    }

    #[test]
    fn small_rings_have_no_duplicates() {
        assert_eq!(Topology::ring(1).neighbors(0), &[0]);

        let pair = Topology::ring(2);
        assert_eq!(pair.neighbors(0), &[1, 0]);
        assert_eq!(pair.neighbors(1), &[0, 1]);
    }

    #[test]
    fn global_topology_sees_everyone() {
        let global = Topology::new(TopologyKind::Global, 4);
        for j in 0..4 {
            assert_eq!(global.neighbors(j), &[0, 1, 2, 3]);
        }
    }
}
