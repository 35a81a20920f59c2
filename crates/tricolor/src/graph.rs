//! Input graph and random 3-colouring candidates.

use std::fmt;

use rand::Rng;
use tricolor_ring::{Edge, Solution};

/// Largest vertex id a generator accepts.
///
/// The colour table has one byte per id in `[0, max_vertex_id]`, so this
/// caps a generator at about a megabyte of colours.
pub const MAX_VERTEX_ID: u32 = 1_048_575;

/// Number of colours in a candidate colouring.
pub const COLOURS: u8 = 3;

/// Parse one `u-v` edge argument.
///
/// Both ends must be plain decimal digits. Signs, whitespace and trailing
/// text are rejected.
pub fn parse_edge(arg: &str) -> Result<Edge, GraphError> {
    let invalid = |reason| GraphError::InvalidEdge {
        arg: arg.to_owned(),
        reason,
    };

    let (u, v) = arg.split_once('-').ok_or_else(|| invalid("expected u-v"))?;
    let vertex = |s: &str| -> Result<u32, GraphError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("vertex ids must be non-negative integers"));
        }
        let id: u64 = s
            .parse()
            .map_err(|_| invalid("vertex id is too large"))?;
        if id > u64::from(MAX_VERTEX_ID) {
            return Err(GraphError::VertexOutOfRange {
                arg: arg.to_owned(),
                vertex: id,
            });
        }
        Ok(id as u32)
    };

    Ok(Edge::new(vertex(u)?, vertex(v)?))
}

/// The graph a generator colours: its edges in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    edges: Vec<Edge>,
    max_vertex_id: u32,
}

impl Graph {
    pub fn new(edges: Vec<Edge>) -> Result<Self, GraphError> {
        let max_vertex_id = edges
            .iter()
            .map(|e| e.u.max(e.v))
            .max()
            .ok_or(GraphError::NoEdges)?;
        if max_vertex_id > MAX_VERTEX_ID {
            return Err(GraphError::VertexOutOfRange {
                arg: edges
                    .iter()
                    .find(|e| e.u.max(e.v) == max_vertex_id)
                    .map(Edge::to_string)
                    .unwrap_or_default(),
                vertex: u64::from(max_vertex_id),
            });
        }
        Ok(Self {
            edges,
            max_vertex_id,
        })
    }

    /// Parse every argument with [`parse_edge`].
    pub fn parse<I, A>(args: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        let edges = args
            .into_iter()
            .map(|a| parse_edge(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(edges)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Highest vertex id named by any edge.
    pub fn max_vertex_id(&self) -> u32 {
        self.max_vertex_id
    }

    /// Size of a colour table covering every vertex id.
    pub fn vertex_slots(&self) -> usize {
        self.max_vertex_id as usize + 1
    }

    /// Conflict edges of `colours`, scanned in input order.
    ///
    /// Returns `None` once more than [`tricolor_ring::MAX_REMOVED`] edges
    /// conflict; such a candidate is dropped, not sent.
    pub fn conflicts(&self, colours: &[u8]) -> Option<Solution> {
        debug_assert!(colours.len() >= self.vertex_slots());
        let mut solution = Solution::new();
        for edge in &self.edges {
            if colours[edge.u as usize] == colours[edge.v as usize] {
                solution.try_push(*edge).ok()?;
            }
        }
        Some(solution)
    }
}

/// Draws random colourings of one graph, reusing a colour table.
#[derive(Debug)]
pub struct Candidates<'g> {
    graph: &'g Graph,
    colours: Vec<u8>,
}

impl<'g> Candidates<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            colours: vec![0; graph.vertex_slots()],
        }
    }

    /// Colour every vertex uniformly at random and collect the conflicts.
    ///
    /// `None` means the colouring had too many conflicts to send.
    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Solution> {
        for colour in &mut self.colours {
            *colour = rng.random_range(0..COLOURS);
        }
        self.graph.conflicts(&self.colours)
    }
}

/// Errors from building a [`Graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    InvalidEdge { arg: String, reason: &'static str },
    VertexOutOfRange { arg: String, vertex: u64 },
    NoEdges,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEdge { arg, reason } => {
                write!(f, "invalid edge {:?}: {} (use u-v, e.g. 1-2)", arg, reason)
            }
            Self::VertexOutOfRange { arg, vertex } => write!(
                f,
                "edge {:?}: vertex {} exceeds the maximum id {}",
                arg, vertex, MAX_VERTEX_ID
            ),
            Self::NoEdges => write!(f, "at least one edge is required"),
        }
    }
}

impl std::error::Error for GraphError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tricolor_ring::MAX_REMOVED;

    #[test]
    fn test_parse_edge() {
        assert_eq!(parse_edge("0-1").unwrap(), Edge::new(0, 1));
        assert_eq!(parse_edge("12-7").unwrap(), Edge::new(12, 7));
        assert_eq!(parse_edge("3-3").unwrap(), Edge::new(3, 3));
    }

    #[test]
    fn test_parse_edge_rejects_malformed() {
        for arg in ["", "1", "1-", "-1", "a-b", "1-2-3", "+1-2", " 1-2", "1-2x", "1--2"] {
            assert!(
                matches!(parse_edge(arg), Err(GraphError::InvalidEdge { .. })),
                "accepted {arg:?}"
            );
        }
    }

    #[test]
    fn test_parse_edge_rejects_large_ids() {
        assert_eq!(
            parse_edge("0-1048576"),
            Err(GraphError::VertexOutOfRange {
                arg: "0-1048576".into(),
                vertex: 1_048_576
            })
        );
        assert!(matches!(
            parse_edge("99999999999999999999999-0"),
            Err(GraphError::InvalidEdge { .. })
        ));
        assert!(parse_edge("1048575-0").is_ok());
    }

    #[test]
    fn test_graph_needs_edges() {
        assert_eq!(Graph::new(Vec::new()), Err(GraphError::NoEdges));
        assert_eq!(Graph::parse(Vec::<&str>::new()), Err(GraphError::NoEdges));
    }

    #[test]
    fn test_max_vertex_id() {
        let graph = Graph::parse(["0-1", "7-2", "3-4"]).unwrap();
        assert_eq!(graph.max_vertex_id(), 7);
        assert_eq!(graph.vertex_slots(), 8);
    }

    #[test]
    fn test_conflicts_in_input_order() {
        let graph = Graph::parse(["0-1", "1-2", "2-0", "2-3"]).unwrap();
        let solution = graph.conflicts(&[0, 1, 0, 0]).unwrap();
        assert_eq!(solution.edges(), &[Edge::new(2, 0), Edge::new(2, 3)]);

        let proper = graph.conflicts(&[0, 1, 2, 0]).unwrap();
        assert!(proper.is_empty());
    }

    #[test]
    fn test_conflicts_drops_oversized_candidate() {
        // Nine self-loops always conflict.
        let args: Vec<String> = (0..9).map(|i| format!("{i}-{i}")).collect();
        let graph = Graph::parse(&args).unwrap();
        assert_eq!(graph.conflicts(&[0; 9]), None);

        let graph = Graph::parse(&args[..MAX_REMOVED]).unwrap();
        assert_eq!(
            graph.conflicts(&[0; 8]).unwrap().edge_count(),
            MAX_REMOVED as u32
        );
    }

    #[test]
    fn test_candidates_respect_capacity() {
        let args: Vec<String> = (0..20).map(|i| format!("{}-{}", i, (i + 1) % 6)).collect();
        let graph = Graph::parse(&args).unwrap();
        let mut candidates = Candidates::new(&graph);
        let mut rng = StdRng::seed_from_u64(7);

        let mut dropped = 0;
        for _ in 0..2000 {
            match candidates.next(&mut rng) {
                Some(solution) => assert!(solution.edge_count() as usize <= MAX_REMOVED),
                None => dropped += 1,
            }
        }
        assert!(dropped > 0, "expected some colourings to exceed capacity");
    }

    #[test]
    fn test_triangle_eventually_coloured() {
        let graph = Graph::parse(["0-1", "1-2", "2-0"]).unwrap();
        let mut candidates = Candidates::new(&graph);
        let mut rng = StdRng::seed_from_u64(1);
        let found = (0..1000).any(|_| candidates.next(&mut rng).is_some_and(|s| s.is_empty()));
        assert!(found);
    }

    #[test]
    fn test_k4_never_coloured() {
        let graph = Graph::parse(["0-1", "0-2", "0-3", "1-2", "1-3", "2-3"]).unwrap();
        let mut candidates = Candidates::new(&graph);
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..1000 {
            let solution = candidates.next(&mut rng).unwrap();
            assert!(solution.edge_count() >= 1);
        }
    }
}
