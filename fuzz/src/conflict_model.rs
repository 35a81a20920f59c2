//! Candidate filter checked against a direct count of conflicting edges.

use tricolor::Graph;
use tricolor_ring::{Edge, MAX_REMOVED};

/// Vertex ids are folded into this range so conflicts are common.
pub const MAX_VERTICES: u32 = 12;

/// Build a graph from raw pairs and a colouring from raw bytes, then check
/// `Graph::conflicts` against a plain scan.
pub fn execute_and_verify(pairs: &[(u8, u8)], colours: &[u8]) -> Result<(), String> {
    let edges: Vec<Edge> = pairs
        .iter()
        .map(|&(u, v)| Edge::new(u32::from(u) % MAX_VERTICES, u32::from(v) % MAX_VERTICES))
        .collect();
    let Ok(graph) = Graph::new(edges) else {
        return Ok(());
    };

    let colours: Vec<u8> = (0..graph.vertex_slots())
        .map(|i| colours.get(i).copied().unwrap_or(0) % 3)
        .collect();

    let expected: Vec<Edge> = graph
        .edges()
        .iter()
        .copied()
        .filter(|e| colours[e.u as usize] == colours[e.v as usize])
        .collect();

    match graph.conflicts(&colours) {
        Some(solution) if expected.len() > MAX_REMOVED => Err(format!(
            "{} conflicts but a solution came back: {solution}",
            expected.len()
        )),
        Some(solution) if solution.edges() != expected.as_slice() => Err(format!(
            "conflicts {solution}, expected {expected:?}"
        )),
        None if expected.len() <= MAX_REMOVED => Err(format!(
            "candidate dropped with only {} conflicts",
            expected.len()
        )),
        _ => Ok(()),
    }
}
