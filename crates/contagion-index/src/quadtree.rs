//! Point quadtree rebuilt from scratch on every call to `rebuild`.

use crate::{BoundingBox, IndexError, NeighborhoodIndex, validate_positions};

/// Points held by a leaf before it splits.
const NODE_CAPACITY: usize = 8;
/// Coincident points stop splitting here instead of recursing forever.
const MAX_DEPTH: u8 = 16;

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(Vec<u32>),
    /// Children ordered south-west, south-east, north-west, north-east.
    Branch([u32; 4]),
}

#[derive(Debug, Clone)]
struct Node {
    bounds: BoundingBox,
    depth: u8,
    kind: NodeKind,
}

impl Node {
    fn leaf(bounds: BoundingBox, depth: u8) -> Self {
        Self {
            bounds,
            depth,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }
}

fn quadrant_of(bounds: &BoundingBox, x: f32, y: f32) -> usize {
    let (mid_x, mid_y) = bounds.center();
    let east = usize::from(x >= mid_x);
    let north = usize::from(y >= mid_y);
    (north << 1) | east
}

fn quadrants(bounds: &BoundingBox) -> [BoundingBox; 4] {
    let (mid_x, mid_y) = bounds.center();
    [
        BoundingBox::new(bounds.min_x, bounds.min_y, mid_x, mid_y),
        BoundingBox::new(mid_x, bounds.min_y, bounds.max_x, mid_y),
        BoundingBox::new(bounds.min_x, mid_y, mid_x, bounds.max_y),
        BoundingBox::new(mid_x, mid_y, bounds.max_x, bounds.max_y),
    ]
}

/// Arena-backed point quadtree.
///
/// The root covers the bounding box of the points passed to the last
/// rebuild, so agents that have drifted past the world edge are still
/// indexed.
#[derive(Debug, Clone, Default)]
pub struct QuadTreeIndex {
    nodes: Vec<Node>,
    positions: Vec<(f32, f32)>,
}

impl QuadTreeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated nodes (leaves and branches).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deepest level reached by the last rebuild.
    #[must_use]
    pub fn depth(&self) -> u8 {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(0)
    }

    fn insert(&mut self, slot: u32) {
        let (x, y) = self.positions[slot as usize];
        let mut node_idx = 0usize;
        while let NodeKind::Branch(children) = &self.nodes[node_idx].kind {
            let quadrant = quadrant_of(&self.nodes[node_idx].bounds, x, y);
            node_idx = children[quadrant] as usize;
        }

        let node = &mut self.nodes[node_idx];
        let overflowing = match &mut node.kind {
            NodeKind::Leaf(entries) => {
                entries.push(slot);
                entries.len() > NODE_CAPACITY && node.depth < MAX_DEPTH
            }
            NodeKind::Branch(_) => false,
        };
        if overflowing {
            self.split(node_idx);
        }
    }

    fn split(&mut self, node_idx: usize) {
        let bounds = self.nodes[node_idx].bounds;
        let depth = self.nodes[node_idx].depth + 1;
        let first = self.nodes.len() as u32;
        let children = [first, first + 1, first + 2, first + 3];
        for quadrant in quadrants(&bounds) {
            self.nodes.push(Node::leaf(quadrant, depth));
        }

        let entries = match std::mem::replace(
            &mut self.nodes[node_idx].kind,
            NodeKind::Branch(children),
        ) {
            NodeKind::Leaf(entries) => entries,
            NodeKind::Branch(_) => return,
        };
        for slot in entries {
            let (x, y) = self.positions[slot as usize];
            let child = children[quadrant_of(&bounds, x, y)] as usize;
            if let NodeKind::Leaf(child_entries) = &mut self.nodes[child].kind {
                child_entries.push(slot);
            }
        }

        for child in children {
            let child = child as usize;
            let overflowing = matches!(
                &self.nodes[child].kind,
                NodeKind::Leaf(entries) if entries.len() > NODE_CAPACITY
            ) && self.nodes[child].depth < MAX_DEPTH;
            if overflowing {
                self.split(child);
            }
        }
    }
}

impl NeighborhoodIndex for QuadTreeIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        validate_positions(positions)?;
        self.nodes.clear();
        self.positions.clear();
        self.positions.extend_from_slice(positions);

        let Some(bounds) = BoundingBox::enclosing(positions) else {
            return Ok(());
        };
        self.nodes.push(Node::leaf(bounds, 0));
        for slot in 0..positions.len() {
            self.insert(slot as u32);
        }
        Ok(())
    }

    fn query_bbox(&self, bbox: &BoundingBox, visitor: &mut dyn FnMut(usize)) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0u32];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if !node.bounds.intersects(bbox) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(entries) => {
                    for &slot in entries {
                        let (x, y) = self.positions[slot as usize];
                        if bbox.contains(x, y) {
                            visitor(slot as usize);
                        }
                    }
                }
                NodeKind::Branch(children) => stack.extend_from_slice(children),
            }
        }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, slot: usize) -> Option<(f32, f32)> {
        self.positions.get(slot).copied()
    }
}
