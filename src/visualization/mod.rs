//! DOT rendering of hypergraphs for debugging.

mod dot_graph;

pub use dot_graph::{DotEdge, DotGraph, DotNode, graph_to_dot};
