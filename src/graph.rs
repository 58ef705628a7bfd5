//! Mutable directed graph over abstraction dependencies.
//!
//! Vertices map to dense slots drawn from a free list; edges live in a square
//! adjacency matrix sized to the current capacity. When the free list runs
//! out the matrix grows by a fixed increment and the old contents are copied
//! over. Every slot carries a generation so that a [`VertexHandle`] kept past
//! the removal of its vertex never resolves to whatever reused the slot.
//!
//! Borrowing iterators ([`DependencyGraph::edges`], [`DependencyGraph::neighbors`])
//! cannot observe mutation. Detached cursors ([`EdgeCursor`], [`NeighborCursor`])
//! can outlive a borrow and fail with [`GraphError::ConcurrentModification`]
//! if the graph changed between steps.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use thiserror::Error;

/// Number of slots added each time the graph runs out of free slots.
pub const DEFAULT_CAPACITY_INCREMENT: usize = 16;

/// Errors raised by graph traversal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Graph was modified during iteration (expected revision {expected}, found {found})")]
    ConcurrentModification { expected: u64, found: u64 },

    #[error("Vertex handle is stale")]
    StaleHandle,
}

/// A cycle found while sorting. Vertices are listed in edge order and the
/// first vertex is repeated at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<V>(pub Vec<V>);

/// Stable reference to a vertex slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexHandle {
    slot: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    label: Option<V>,
    generation: u32,
}

/// Directed graph with vertex labels `V` and edge weights `W`.
#[derive(Debug, Clone)]
pub struct DependencyGraph<V, W> {
    index: HashMap<V, usize>,
    slots: Vec<Slot<V>>,
    free: Vec<usize>,
    matrix: Vec<Option<W>>,
    increment: usize,
    revision: u64,
}

impl<V, W> Default for DependencyGraph<V, W>
where
    V: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, W> DependencyGraph<V, W>
where
    V: Clone + Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_increment(DEFAULT_CAPACITY_INCREMENT)
    }

    /// Creates an empty graph that grows by `increment` slots at a time.
    #[must_use]
    pub fn with_increment(increment: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            matrix: Vec::new(),
            increment: increment.max(1),
            revision: 0,
        }
    }

    /// Number of slots currently allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn contains(&self, label: &V) -> bool {
        self.index.contains_key(label)
    }

    /// Structural revision, bumped by every mutation.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Adds a vertex. Adding an existing label is a no-op that returns its handle.
    pub fn add_vertex(&mut self, label: V) -> VertexHandle {
        if let Some(&slot) = self.index.get(&label) {
            return self.handle_at(slot);
        }
        let slot = self.free.pop().unwrap_or_else(|| self.grow());
        self.slots[slot].label = Some(label.clone());
        self.index.insert(label, slot);
        self.revision += 1;
        self.handle_at(slot)
    }

    /// Removes a vertex and all incident edges. Returns whether it was present.
    pub fn remove_vertex(&mut self, label: &V) -> bool {
        let Some(slot) = self.index.remove(label) else {
            return false;
        };
        let cap = self.capacity();
        for other in 0..cap {
            self.matrix[slot * cap + other] = None;
            self.matrix[other * cap + slot] = None;
        }
        let entry = &mut self.slots[slot];
        entry.label = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        self.revision += 1;
        true
    }

    /// Handle of a vertex by label.
    #[must_use]
    pub fn handle(&self, label: &V) -> Option<VertexHandle> {
        self.index.get(label).map(|&slot| self.handle_at(slot))
    }

    /// Label of a vertex by handle; `None` once the vertex has been removed.
    #[must_use]
    pub fn label(&self, handle: VertexHandle) -> Option<&V> {
        let slot = self.slots.get(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.label.as_ref()
    }

    /// Sets or clears (`None`) the edge `from -> to`.
    ///
    /// A no-op returning false if either vertex is absent.
    pub fn set_edge(&mut self, from: &V, to: &V, weight: Option<W>) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        let cap = self.capacity();
        self.matrix[a * cap + b] = weight;
        self.revision += 1;
        true
    }

    /// Weight of the edge `from -> to`.
    #[must_use]
    pub fn edge(&self, from: &V, to: &V) -> Option<&W> {
        let a = *self.index.get(from)?;
        let b = *self.index.get(to)?;
        self.matrix[a * self.capacity() + b].as_ref()
    }

    /// Vertices connected to `label` by an edge in either direction.
    pub fn neighbors<'a>(&'a self, label: &V) -> impl Iterator<Item = &'a V> + 'a {
        let slot = self.index.get(label).copied();
        let cap = self.capacity();
        (0..cap).filter_map(move |other| {
            let slot = slot?;
            let linked = self.matrix[slot * cap + other].is_some() || self.matrix[other * cap + slot].is_some();
            if linked {
                self.slots[other].label.as_ref()
            } else {
                None
            }
        })
    }

    /// Targets of edges leaving `label`.
    pub fn successors<'a>(&'a self, label: &V) -> impl Iterator<Item = &'a V> + 'a {
        let slot = self.index.get(label).copied();
        let cap = self.capacity();
        (0..cap).filter_map(move |other| {
            let slot = slot?;
            self.matrix[slot * cap + other]
                .as_ref()
                .and(self.slots[other].label.as_ref())
        })
    }

    /// All edges as `(from, to, weight)`.
    pub fn edges(&self) -> impl Iterator<Item = (&V, &V, &W)> + '_ {
        let cap = self.capacity();
        self.matrix.iter().enumerate().filter_map(move |(i, cell)| {
            let weight = cell.as_ref()?;
            let from = self.slots[i / cap].label.as_ref()?;
            let to = self.slots[i % cap].label.as_ref()?;
            Some((from, to, weight))
        })
    }

    /// Detached cursor over all edges.
    #[must_use]
    pub fn edge_cursor(&self) -> EdgeCursor {
        EdgeCursor {
            expected: self.revision,
            position: 0,
        }
    }

    /// Detached cursor over the neighbors of `label`, or `None` if absent.
    #[must_use]
    pub fn neighbor_cursor(&self, label: &V) -> Option<NeighborCursor> {
        Some(NeighborCursor {
            expected: self.revision,
            vertex: self.handle(label)?,
            position: 0,
        })
    }

    /// Vertices reachable from `label` through one or more edges.
    #[must_use]
    pub fn reachable_from(&self, label: &V) -> Vec<V> {
        let Some(&start) = self.index.get(label) else {
            return Vec::new();
        };
        let cap = self.capacity();
        let mut seen = vec![false; cap];
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(slot) = queue.pop_front() {
            for other in 0..cap {
                if self.matrix[slot * cap + other].is_some() && !seen[other] {
                    seen[other] = true;
                    if let Some(label) = &self.slots[other].label {
                        out.push(label.clone());
                    }
                    queue.push_back(other);
                }
            }
        }
        out
    }

    /// Orders vertices so that every edge `a -> b` has `a` before `b`.
    ///
    /// # Errors
    ///
    /// Returns the first [`Cycle`] found if the graph is not acyclic.
    pub fn topological_sort(&self) -> Result<Vec<V>, Cycle<V>> {
        let cap = self.capacity();
        let live: Vec<usize> = (0..cap).filter(|&s| self.slots[s].label.is_some()).collect();

        let mut in_degree = vec![0usize; cap];
        for &from in &live {
            for &to in &live {
                if self.matrix[from * cap + to].is_some() {
                    in_degree[to] += 1;
                }
            }
        }

        // Kahn's algorithm
        let mut queue: VecDeque<usize> = live.iter().copied().filter(|&s| in_degree[s] == 0).collect();
        let mut sorted = Vec::with_capacity(live.len());
        while let Some(slot) = queue.pop_front() {
            sorted.push(slot);
            for &to in &live {
                if self.matrix[slot * cap + to].is_some() {
                    in_degree[to] -= 1;
                    if in_degree[to] == 0 {
                        queue.push_back(to);
                    }
                }
            }
        }

        if sorted.len() == live.len() {
            return Ok(sorted.into_iter().filter_map(|s| self.slots[s].label.clone()).collect());
        }

        Err(self.extract_cycle(&live, &in_degree))
    }

    /// Walks predecessors among the vertices Kahn's algorithm left behind until
    /// one repeats. Every such vertex has a remaining predecessor.
    fn extract_cycle(&self, live: &[usize], in_degree: &[usize]) -> Cycle<V> {
        let cap = self.capacity();
        let remaining: Vec<usize> = live.iter().copied().filter(|&s| in_degree[s] > 0).collect();
        let mut path: Vec<usize> = Vec::new();
        let Some(&start) = remaining.first() else {
            return Cycle(Vec::new());
        };
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|&s| s == current) {
                let mut cycle: Vec<usize> = path[pos..].to_vec();
                cycle.reverse();
                cycle.push(cycle[0]);
                return Cycle(cycle.into_iter().filter_map(|s| self.slots[s].label.clone()).collect());
            }
            path.push(current);
            let Some(&pred) = remaining
                .iter()
                .find(|&&p| self.matrix[p * cap + current].is_some())
            else {
                return Cycle(Vec::new());
            };
            current = pred;
        }
    }

    fn handle_at(&self, slot: usize) -> VertexHandle {
        VertexHandle {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    /// Grows by one increment and returns the first new slot, which is not
    /// put on the free list.
    fn grow(&mut self) -> usize {
        let old = self.capacity();
        let new = old + self.increment;
        let mut matrix: Vec<Option<W>> = std::iter::repeat_with(|| None).take(new * new).collect();
        for row in 0..old {
            for col in 0..old {
                matrix[row * new + col] = self.matrix[row * old + col].take();
            }
        }
        self.matrix = matrix;
        self.slots.extend((old..new).map(|_| Slot {
            label: None,
            generation: 0,
        }));
        // Lowest slots are handed out first.
        self.free.extend((old + 1..new).rev());
        old
    }
}

/// Cursor over all edges that does not borrow the graph between steps.
#[derive(Debug, Clone)]
pub struct EdgeCursor {
    expected: u64,
    position: usize,
}

impl EdgeCursor {
    /// Returns the next edge.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ConcurrentModification`] if the graph changed
    /// since the cursor was created.
    pub fn advance<'g, V, W>(
        &mut self,
        graph: &'g DependencyGraph<V, W>,
    ) -> Result<Option<(&'g V, &'g V, &'g W)>, GraphError>
    where
        V: Clone + Eq + Hash,
    {
        check_revision(self.expected, graph.revision)?;
        let cap = graph.capacity();
        while self.position < graph.matrix.len() {
            let i = self.position;
            self.position += 1;
            if let Some(weight) = graph.matrix[i].as_ref() {
                if let (Some(from), Some(to)) = (
                    graph.slots[i / cap].label.as_ref(),
                    graph.slots[i % cap].label.as_ref(),
                ) {
                    return Ok(Some((from, to, weight)));
                }
            }
        }
        Ok(None)
    }
}

/// Cursor over a vertex's neighbors that does not borrow the graph between steps.
#[derive(Debug, Clone)]
pub struct NeighborCursor {
    expected: u64,
    vertex: VertexHandle,
    position: usize,
}

impl NeighborCursor {
    /// Returns the next neighbor.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ConcurrentModification`] if the graph changed
    /// since the cursor was created, or [`GraphError::StaleHandle`] if the
    /// vertex is gone.
    pub fn advance<'g, V, W>(&mut self, graph: &'g DependencyGraph<V, W>) -> Result<Option<&'g V>, GraphError>
    where
        V: Clone + Eq + Hash,
    {
        check_revision(self.expected, graph.revision)?;
        if graph.label(self.vertex).is_none() {
            return Err(GraphError::StaleHandle);
        }
        let cap = graph.capacity();
        let slot = self.vertex.slot;
        while self.position < cap {
            let other = self.position;
            self.position += 1;
            let linked = graph.matrix[slot * cap + other].is_some() || graph.matrix[other * cap + slot].is_some();
            if linked {
                if let Some(label) = graph.slots[other].label.as_ref() {
                    return Ok(Some(label));
                }
            }
        }
        Ok(None)
    }
}

fn check_revision(expected: u64, found: u64) -> Result<(), GraphError> {
    if expected == found {
        Ok(())
    } else {
        Err(GraphError::ConcurrentModification { expected, found })
    }
}
