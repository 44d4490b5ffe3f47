//! Impact traversal and shortest path.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use ripple_types::{CoreResult, Criticality, Deadline, EdgeSource, ImpactPath};

use crate::graph::ServiceGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Walk incoming edges: who consumes the current node.
    Upstream,
    /// Walk outgoing edges: what the current node relies on.
    Downstream,
}

impl ServiceGraph {
    /// Shortest path (by edge count) from `from` to `to` over outgoing
    /// edges, including both endpoints. `None` when unreachable or either
    /// endpoint is unknown.
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut queue = VecDeque::from([from.to_string()]);
        let mut parent: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::from([from.to_string()]);

        while let Some(node) = queue.pop_front() {
            for edge in self.outgoing_edges(&node) {
                let next = edge.target.clone();
                if !seen.insert(next.clone()) {
                    continue;
                }
                parent.insert(next.clone(), node.clone());
                if next == to {
                    let mut path = vec![next];
                    while let Some(prev) = parent.get(path.last().expect("path is non-empty")) {
                        path.push(prev.clone());
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Services affected when `origin` breaks: bounded DFS against edge
    /// direction (consumers sit upstream of what they depend on).
    pub fn upstream_impact(
        &self,
        origin: &str,
        max_depth: usize,
        deadline: &Deadline,
    ) -> CoreResult<Vec<ImpactPath>> {
        self.impact(origin, max_depth, Direction::Upstream, deadline)
    }

    /// Services `origin` relies on, transitively: bounded DFS along edge
    /// direction.
    pub fn downstream_impact(
        &self,
        origin: &str,
        max_depth: usize,
        deadline: &Deadline,
    ) -> CoreResult<Vec<ImpactPath>> {
        self.impact(origin, max_depth, Direction::Downstream, deadline)
    }

    fn impact(
        &self,
        origin: &str,
        max_depth: usize,
        direction: Direction,
        deadline: &Deadline,
    ) -> CoreResult<Vec<ImpactPath>> {
        let mut results = Vec::new();
        if !self.nodes.contains_key(origin) {
            return Ok(results);
        }
        // One visited set per traversal: no path revisits a node, and a node
        // reached by one branch is not reported again by another. Dense
        // graphs therefore yield one path per affected node, which is the
        // documented behavior (and what terminates cycles).
        let mut visited: HashSet<String> = HashSet::from([origin.to_string()]);
        let mut path = vec![origin.to_string()];
        self.walk(
            origin,
            0,
            max_depth,
            direction,
            &mut path,
            Criticality::Critical,
            1.0,
            &BTreeSet::new(),
            &mut visited,
            deadline,
            &mut results,
        )?;
        results.sort_by(|a, b| a.hops.cmp(&b.hops).then(a.affected.cmp(&b.affected)));
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        node: &str,
        depth: usize,
        max_depth: usize,
        direction: Direction,
        path: &mut Vec<String>,
        criticality: Criticality,
        confidence: f64,
        edge_sources: &BTreeSet<EdgeSource>,
        visited: &mut HashSet<String>,
        deadline: &Deadline,
        results: &mut Vec<ImpactPath>,
    ) -> CoreResult<()> {
        if depth >= max_depth {
            return Ok(());
        }
        let edges = match direction {
            Direction::Upstream => self.incoming_edges(node),
            Direction::Downstream => self.outgoing_edges(node),
        };
        for edge in edges {
            deadline.check("impact traversal")?;
            let neighbor = match direction {
                Direction::Upstream => edge.source.clone(),
                Direction::Downstream => edge.target.clone(),
            };
            if !visited.insert(neighbor.clone()) {
                continue;
            }

            let next_criticality = Criticality::weakest(criticality, edge.criticality);
            let next_confidence = confidence.min(edge.confidence);
            let mut next_sources = edge_sources.clone();
            next_sources.insert(edge.edge_source);

            path.push(neighbor.clone());
            results.push(ImpactPath {
                source: path[0].clone(),
                affected: neighbor.clone(),
                path: path.clone(),
                hops: path.len(),
                criticality: next_criticality,
                confidence: next_confidence,
                edge_sources: next_sources.iter().copied().collect(),
            });
            self.walk(
                &neighbor,
                depth + 1,
                max_depth,
                direction,
                path,
                next_criticality,
                next_confidence,
                &next_sources,
                visited,
                deadline,
                results,
            )?;
            path.pop();
        }
        Ok(())
    }
}
