//! The Dependency-Chain Analyzer (C6): BFS shortest-path from entrypoint to
//! any offending module, over the forward-import edges the Resolver Plugin
//! recorded during the build.

use std::collections::{HashMap, HashSet, VecDeque};

/// The import graph derived from the build: nodes are input/virtual paths,
/// edges are resolved imports. Uses an arena of integer indices and a
/// visited bitset keyed by index (not by string) so cyclic graphs terminate.
pub struct DependencyGraph {
    nodes: Vec<String>,
    index_of: HashMap<String, usize>,
    forward: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn from_edges(edges: &HashMap<String, Vec<String>>) -> Self {
        let mut nodes = Vec::new();
        let mut index_of = HashMap::new();

        let intern = |nodes: &mut Vec<String>, index_of: &mut HashMap<String, usize>, s: &str| {
            *index_of.entry(s.to_string()).or_insert_with(|| {
                nodes.push(s.to_string());
                nodes.len() - 1
            })
        };

        for (from, tos) in edges {
            intern(&mut nodes, &mut index_of, from);
            for to in tos {
                intern(&mut nodes, &mut index_of, to);
            }
        }

        let mut forward = vec![Vec::new(); nodes.len()];
        for (from, tos) in edges {
            let fi = index_of[from];
            for to in tos {
                forward[fi].push(index_of[to]);
            }
        }

        Self { nodes, index_of, forward }
    }

    /// Picks the entrypoint: the single node that appears as no import's
    /// target, falling back to the given default if there's no unique one.
    pub fn discover_entrypoint(&self, default: &str) -> String {
        let targets: HashSet<usize> = self.forward.iter().flatten().copied().collect();
        let candidates: Vec<usize> =
            (0..self.nodes.len()).filter(|i| !targets.contains(i)).collect();
        match candidates.as_slice() {
            [only] => self.nodes[*only].clone(),
            _ => default.to_string(),
        }
    }

    /// BFS shortest path from `entry` to the first node matching `target`
    /// under the fuzzy rule in §4.6. `None` if unreachable.
    pub fn shortest_path(&self, entry: &str, target: &str) -> Option<Vec<String>> {
        let start = *self.index_of.get(entry)?;
        let mut visited = vec![false; self.nodes.len()];
        let mut prev: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);

        let mut found = None;
        if fuzzy_matches(&self.nodes[start], target) {
            found = Some(start);
        }

        'bfs: while let Some(cur) = queue.pop_front() {
            for &next in &self.forward[cur] {
                if visited[next] {
                    continue;
                }
                visited[next] = true;
                prev[next] = Some(cur);
                if fuzzy_matches(&self.nodes[next], target) {
                    found = Some(next);
                    break 'bfs;
                }
                queue.push_back(next);
            }
        }

        let mut found = found?;
        let mut path = vec![found];
        while let Some(p) = prev[found] {
            path.push(p);
            found = p;
        }
        path.reverse();
        Some(path.into_iter().map(|i| self.nodes[i].clone()).collect())
    }
}

/// Fuzzy target match: exact path, path ending with `/name`, path containing
/// `node_modules/name`, or a namespaced virtual path `ns:name` / ending
/// `/name`.
fn fuzzy_matches(candidate: &str, name: &str) -> bool {
    candidate == name
        || candidate.ends_with(&format!("/{name}"))
        || candidate.contains(&format!("node_modules/{name}"))
        || candidate == format!("forbidden:{name}")
        || candidate.ends_with(&format!(":{name}"))
}

/// Formats a chain for display: strips `./`, collapses `node_modules/X/...`
/// to `X/...`, and rewrites virtual-namespace paths.
pub fn format_chain(chain: &[String]) -> Vec<String> {
    chain.iter().map(|s| format_node(s)).collect()
}

fn format_node(node: &str) -> String {
    if let Some(rest) = node.strip_prefix("forbidden:") {
        return format!("{rest} (forbidden)");
    }
    if let Some(rest) = node.strip_prefix("ignored:") {
        return format!("{rest} (ignored)");
    }

    let stripped = node.strip_prefix("./").unwrap_or(node);
    match stripped.find("node_modules/") {
        Some(idx) => stripped[idx + "node_modules/".len()..].to_string(),
        None => stripped.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in pairs {
            map.entry(from.to_string()).or_default().push(to.to_string());
        }
        map
    }

    #[test]
    fn finds_shortest_path() {
        let g = DependencyGraph::from_edges(&edges(&[
            ("entry.js", "a.js"),
            ("a.js", "b.js"),
            ("b.js", "forbidden:fs"),
            ("entry.js", "forbidden:fs"),
        ]));
        let path = g.shortest_path("entry.js", "fs").unwrap();
        assert_eq!(path, vec!["entry.js".to_string(), "forbidden:fs".to_string()]);
    }

    #[test]
    fn handles_cycles_without_looping_forever() {
        let g = DependencyGraph::from_edges(&edges(&[
            ("entry.js", "a.js"),
            ("a.js", "b.js"),
            ("b.js", "a.js"),
            ("b.js", "forbidden:dns"),
        ]));
        let path = g.shortest_path("entry.js", "dns").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.iter().collect::<HashSet<_>>().len(), path.len());
    }

    #[test]
    fn returns_none_when_unreachable() {
        let g = DependencyGraph::from_edges(&edges(&[("entry.js", "a.js")]));
        assert!(g.shortest_path("entry.js", "fs").is_none());
    }

    #[test]
    fn discovers_unique_entrypoint() {
        let g = DependencyGraph::from_edges(&edges(&[("entry.js", "a.js"), ("a.js", "b.js")]));
        assert_eq!(g.discover_entrypoint("fallback"), "entry.js");
    }

    #[test]
    fn format_chain_strips_node_modules_and_namespaces() {
        let chain = vec![
            "./entry.js".to_string(),
            "node_modules/helper/index.js".to_string(),
            "forbidden:dns".to_string(),
        ];
        assert_eq!(
            format_chain(&chain),
            vec!["entry.js".to_string(), "helper/index.js".to_string(), "dns (forbidden)".to_string()]
        );
    }
}
