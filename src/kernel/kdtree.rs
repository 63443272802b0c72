/// 3-D k-d tree used by the spatial cross-match aggregate.

#[derive(Debug)]
pub struct KdTree {
    points: Vec<[f64; 3]>,
    root: Option<usize>,
    nodes: Vec<Node>,
}

#[derive(Debug)]
struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

impl KdTree {
    pub fn build(points: Vec<[f64; 3]>) -> KdTree {
        let mut tree = KdTree {
            root: None,
            nodes: Vec::with_capacity(points.len()),
            points,
        };
        let mut order: Vec<usize> = (0..tree.points.len()).collect();
        tree.root = tree.build_node(&mut order, 0);
        tree
    }

    fn build_node(&mut self, order: &mut [usize], depth: usize) -> Option<usize> {
        if order.is_empty() {
            return None;
        }
        let axis = depth % 3;
        order.sort_by(|&i, &j| self.points[i][axis].total_cmp(&self.points[j][axis]));
        let mid = order.len() / 2;
        let point = order[mid];
        let (left_slice, rest) = order.split_at_mut(mid);
        let right_slice = &mut rest[1..];
        // Recurse on copies; slices borrow `order` which we need for the node.
        let mut left_vec = left_slice.to_vec();
        let mut right_vec = right_slice.to_vec();
        let left = self.build_node(&mut left_vec, depth + 1);
        let right = self.build_node(&mut right_vec, depth + 1);
        self.nodes.push(Node {
            point,
            axis,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, i: usize) -> [f64; 3] {
        self.points[i]
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Indices of all points within Euclidean distance `radius` of `p`.
    pub fn query_ball(&self, p: [f64; 3], radius: f64) -> Vec<usize> {
        let mut hits = Vec::new();
        if let Some(root) = self.root {
            self.query_node(root, p, radius, &mut hits);
        }
        hits
    }

    fn query_node(&self, node: usize, p: [f64; 3], radius: f64, hits: &mut Vec<usize>) {
        let n = &self.nodes[node];
        let q = self.points[n.point];
        let d2 = (0..3).map(|k| (p[k] - q[k]).powi(2)).sum::<f64>();
        if d2 <= radius * radius {
            hits.push(n.point);
        }
        let delta = p[n.axis] - q[n.axis];
        let (near, far) = if delta < 0.0 {
            (n.left, n.right)
        } else {
            (n.right, n.left)
        };
        if let Some(c) = near {
            self.query_node(c, p, radius, hits);
        }
        if delta.abs() <= radius {
            if let Some(c) = far {
                self.query_node(c, p, radius, hits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[[f64; 3]], p: [f64; 3], r: f64) -> Vec<usize> {
        let mut out: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, q)| {
                (0..3).map(|k| (p[k] - q[k]).powi(2)).sum::<f64>() <= r * r
            })
            .map(|(i, _)| i)
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn matches_brute_force() {
        // Deterministic pseudo-random points.
        let mut seed = 0x2545f4914f6cdd1du64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };
        let points: Vec<[f64; 3]> = (0..200).map(|_| [next(), next(), next()]).collect();
        let tree = KdTree::build(points.clone());
        for _ in 0..20 {
            let p = [next(), next(), next()];
            let mut got = tree.query_ball(p, 0.25);
            got.sort_unstable();
            assert_eq!(got, brute_force(&points, p, 0.25));
        }
    }

    #[test]
    fn empty_tree() {
        let tree = KdTree::build(Vec::new());
        assert!(tree.query_ball([0.0, 0.0, 0.0], 1.0).is_empty());
    }
}
