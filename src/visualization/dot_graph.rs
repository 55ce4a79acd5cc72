use std::borrow::Cow;
use std::fmt::{self, Display};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::sir::{EdgeKind, HyperGraph, VertexKind};

pub struct DotGraph {
    pub name: Cow<'static, str>,
    pub nodes: Vec<DotNode>,
    pub edges: Vec<DotEdge>,
}

impl DotGraph {
    pub fn write_to_file(self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path)?;
        file.write_all(self.to_string().as_bytes())?;
        Ok(())
    }
}

impl Display for DotGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph {} {{", self.name)?;
        writeln!(f, "  rankdir=TB;")?;
        for node in &self.nodes {
            writeln!(f, "  {node}")?;
        }
        for edge in &self.edges {
            writeln!(f, "  {edge}")?;
        }
        writeln!(f, "}}")
    }
}

pub struct DotNode {
    pub id: String,
    pub label: String,
    pub shape: &'static str,
    pub color: &'static str,
}

impl Display for DotNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" [label=\"{}\", shape={}, color={}];",
            self.id,
            self.label.replace('"', "\\\""),
            self.shape,
            self.color
        )
    }
}

pub struct DotEdge {
    pub from: String,
    pub to: String,
    pub style: &'static str,
    pub label: String,
}

impl Display for DotEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" -> \"{}\" [style={}, label=\"{}\"];",
            self.from, self.to, self.style, self.label
        )
    }
}

fn node_shape(kind: VertexKind) -> (&'static str, &'static str) {
    match kind {
        VertexKind::Const | VertexKind::Parameter => ("ellipse", "gray"),
        VertexKind::Alloc => ("box", "orange"),
        VertexKind::Load | VertexKind::Store => ("box", "blue"),
        VertexKind::KernelLaunch => ("box3d", "green"),
        VertexKind::Apply => ("box", "black"),
        VertexKind::Phi | VertexKind::Merge => ("diamond", "purple"),
        VertexKind::Return | VertexKind::Branch => ("ellipse", "red"),
    }
}

fn edge_style(kind: &EdgeKind) -> (&'static str, String) {
    match kind {
        EdgeKind::DataFlow { port, .. } => ("solid", format!("df:{port}")),
        EdgeKind::ControlFlow { kind, .. } => ("dashed", format!("{kind:?}")),
        EdgeKind::EffectEdge { ordering } => ("dotted", format!("{ordering:?}")),
        EdgeKind::ParallelEdge { kind, .. } => ("bold", format!("par:{kind:?}")),
        EdgeKind::MemoryEdge { access, region } => ("dotted", format!("{access:?}@{region}")),
        EdgeKind::RegionEdge {
            source_region,
            target_region,
            transfer,
        } => ("dashed", format!("{transfer:?}:{source_region}->{target_region}")),
    }
}

/// Renders a hypergraph as DOT. Hyperedges are expanded into pairwise
/// arrows; a parallel edge (no sources) links its member vertices with
/// bold arrows instead.
pub fn graph_to_dot(graph: &HyperGraph) -> DotGraph {
    let mut nodes = Vec::new();
    for vertex in graph.vertices() {
        let (shape, color) = node_shape(vertex.kind);
        let label = match vertex.function_name() {
            Some(name) => format!("{:?}\\n{name}", vertex.kind),
            None => format!("{:?}", vertex.kind),
        };
        nodes.push(DotNode {
            id: vertex.id.to_string(),
            label,
            shape,
            color,
        });
    }

    let mut edges = Vec::new();
    for edge in graph.edges() {
        let (style, label) = edge_style(&edge.kind);
        if edge.sources.is_empty() {
            for pair in edge.targets.windows(2) {
                edges.push(DotEdge {
                    from: pair[0].to_string(),
                    to: pair[1].to_string(),
                    style,
                    label: label.clone(),
                });
            }
        } else {
            for source in &edge.sources {
                for target in &edge.targets {
                    edges.push(DotEdge {
                        from: source.to_string(),
                        to: target.to_string(),
                        style,
                        label: label.clone(),
                    });
                }
            }
        }
    }

    DotGraph {
        name: Cow::Borrowed("sir"),
        nodes,
        edges,
    }
}
