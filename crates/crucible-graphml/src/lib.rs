//! GraphML step-file parser.
//!
//! A step file describes one DAG of client invocations. Vertices carry three
//! string attributes declared through GraphML `<key>` elements: `label`,
//! `args` and `extra_args`. The parser resolves `<key>` ids (honouring
//! `<default>` values), checks that the graph is directed and acyclic, and
//! exposes a topological order plus predecessor/successor adjacency for the
//! dataflow executor.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use crucible_types::{HarnessError, Result};

/// One vertex of a step graph.
///
/// An empty `label` denotes an empty-request node: the client is invoked with
/// no stdin and no response comparison takes place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepNode {
    pub id: String,
    pub label: String,
    pub args: String,
    pub extra_args: String,
}

/// A parsed, validated step graph.
#[derive(Debug, Clone)]
pub struct StepGraph {
    nodes: Vec<StepNode>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl StepGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> &StepNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    /// Vertex indices sorted sources-first; every edge points forward in
    /// this order.
    pub fn topological_order(&self) -> &[usize] {
        &self.topo
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    pub fn in_degree(&self, index: usize) -> usize {
        self.predecessors[index].len()
    }
}

fn plan_error(origin: &Path, message: impl Into<String>) -> HarnessError {
    HarnessError::PlanParse {
        file: origin.to_path_buf(),
        message: message.into(),
    }
}

/// Which vertex attribute a GraphML `<key>` maps to.
#[derive(Clone, Copy)]
enum NodeField {
    Label,
    Args,
    ExtraArgs,
}

impl NodeField {
    fn from_attr_name(name: &str) -> Option<Self> {
        match name {
            "label" => Some(NodeField::Label),
            "args" => Some(NodeField::Args),
            "extra_args" => Some(NodeField::ExtraArgs),
            _ => None,
        }
    }

    fn set(self, node: &mut StepNode, value: &str) {
        match self {
            NodeField::Label => node.label = value.to_string(),
            NodeField::Args => node.args = value.to_string(),
            NodeField::ExtraArgs => node.extra_args = value.to_string(),
        }
    }
}

/// Parse GraphML text into a [`StepGraph`].
///
/// `origin` is only used for error context; placeholder substitution on the
/// text is the caller's responsibility and must happen before parsing.
pub fn parse(text: &str, origin: &Path) -> Result<StepGraph> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| plan_error(origin, format!("not valid GraphML: {e}")))?;

    let root = doc.root_element();
    if root.tag_name().name() != "graphml" {
        return Err(plan_error(
            origin,
            format!("expected 'graphml' root, found '{}'", root.tag_name().name()),
        ));
    }

    // <key> declarations: id → target field, plus optional defaults.
    let mut fields: HashMap<&str, NodeField> = HashMap::new();
    let mut defaults: Vec<(NodeField, String)> = Vec::new();
    for key in root.children().filter(|n| n.tag_name().name() == "key") {
        if matches!(key.attribute("for"), Some("edge") | Some("graph")) {
            continue;
        }
        let (Some(id), Some(attr_name)) = (key.attribute("id"), key.attribute("attr.name")) else {
            continue;
        };
        let Some(field) = NodeField::from_attr_name(attr_name) else {
            continue;
        };
        fields.insert(id, field);
        if let Some(default) = key
            .children()
            .find(|n| n.tag_name().name() == "default")
            .and_then(|n| n.text())
        {
            defaults.push((field, default.to_string()));
        }
    }

    let graph = root
        .children()
        .find(|n| n.tag_name().name() == "graph")
        .ok_or_else(|| plan_error(origin, "missing 'graph' element"))?;

    match graph.attribute("edgedefault") {
        Some("directed") => {}
        other => {
            return Err(plan_error(
                origin,
                format!("graph must be directed, edgedefault is {other:?}"),
            ));
        }
    }

    // Vertices.
    let mut nodes: Vec<StepNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for element in graph.children().filter(|n| n.tag_name().name() == "node") {
        let id = element
            .attribute("id")
            .ok_or_else(|| plan_error(origin, "node without an 'id' attribute"))?;
        if index.contains_key(id) {
            return Err(plan_error(origin, format!("duplicate node id '{id}'")));
        }

        let mut node = StepNode {
            id: id.to_string(),
            ..StepNode::default()
        };
        for (field, value) in &defaults {
            field.set(&mut node, value);
        }
        for data in element.children().filter(|n| n.tag_name().name() == "data") {
            let Some(field) = data.attribute("key").and_then(|k| fields.get(k)) else {
                continue;
            };
            field.set(&mut node, data.text().unwrap_or(""));
        }

        index.insert(node.id.clone(), nodes.len());
        nodes.push(node);
    }

    // Edges.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for element in graph.children().filter(|n| n.tag_name().name() == "edge") {
        let source = element
            .attribute("source")
            .ok_or_else(|| plan_error(origin, "edge without a 'source' attribute"))?;
        let target = element
            .attribute("target")
            .ok_or_else(|| plan_error(origin, "edge without a 'target' attribute"))?;
        let &from = index
            .get(source)
            .ok_or_else(|| plan_error(origin, format!("edge source '{source}' is not a node")))?;
        let &to = index
            .get(target)
            .ok_or_else(|| plan_error(origin, format!("edge target '{target}' is not a node")))?;
        successors[from].push(to);
        predecessors[to].push(from);
    }

    // Kahn's algorithm: produces the sources-first order and doubles as the
    // acyclicity check.
    let mut remaining: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut topo = Vec::with_capacity(nodes.len());
    while let Some(current) = queue.pop_front() {
        topo.push(current);
        for &next in &successors[current] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                queue.push_back(next);
            }
        }
    }
    if topo.len() != nodes.len() {
        let stuck: Vec<&str> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(i, _)| nodes[i].id.as_str())
            .collect();
        return Err(plan_error(
            origin,
            format!("cycle detected involving nodes: {}", stuck.join(", ")),
        ));
    }

    Ok(StepGraph {
        nodes,
        successors,
        predecessors,
        topo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("step.graphml")
    }

    fn parse_ok(text: &str) -> StepGraph {
        parse(text, &origin()).expect("graph should parse")
    }

    const LINEAR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="key0" for="node" attr.name="label" attr.type="string"/>
  <key id="key1" for="node" attr.name="args" attr.type="string"/>
  <key id="key2" for="node" attr.name="extra_args" attr.type="string"/>
  <graph id="G" edgedefault="directed">
    <node id="n0"><data key="key0">first</data><data key="key1">--db,main</data></node>
    <node id="n1"><data key="key0">second</data><data key="key2">--trace</data></node>
    <edge id="e0" source="n0" target="n1"/>
  </graph>
</graphml>"#;

    #[test]
    fn parses_linear_graph() {
        let graph = parse_ok(LINEAR);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node(0).id, "n0");
        assert_eq!(graph.node(0).label, "first");
        assert_eq!(graph.node(0).args, "--db,main");
        assert_eq!(graph.node(0).extra_args, "");
        assert_eq!(graph.node(1).label, "second");
        assert_eq!(graph.node(1).extra_args, "--trace");
        assert_eq!(graph.successors(0), &[1]);
        assert_eq!(graph.predecessors(1), &[0]);
        assert_eq!(graph.in_degree(0), 0);
    }

    #[test]
    fn topological_order_respects_edges() {
        let text = r#"<graphml>
  <key id="k" for="node" attr.name="label"/>
  <graph edgedefault="directed">
    <node id="a"/>
    <node id="b"/>
    <node id="c"/>
    <node id="d"/>
    <edge source="a" target="c"/>
    <edge source="b" target="c"/>
    <edge source="c" target="d"/>
  </graph>
</graphml>"#;
        let graph = parse_ok(text);
        let order = graph.topological_order();
        let position: Vec<usize> = (0..4).map(|i| order.iter().position(|&o| o == i).unwrap()).collect();
        assert!(position[0] < position[2]);
        assert!(position[1] < position[2]);
        assert!(position[2] < position[3]);
    }

    #[test]
    fn key_default_applies_when_data_absent() {
        let text = r#"<graphml>
  <key id="k0" for="node" attr.name="args"><default>--quiet</default></key>
  <graph edgedefault="directed">
    <node id="a"/>
    <node id="b"><data key="k0">--loud</data></node>
  </graph>
</graphml>"#;
        let graph = parse_ok(text);
        assert_eq!(graph.node(0).args, "--quiet");
        assert_eq!(graph.node(1).args, "--loud");
    }

    #[test]
    fn empty_label_is_preserved() {
        let text = r#"<graphml>
  <key id="k0" for="node" attr.name="label"/>
  <graph edgedefault="directed">
    <node id="a"><data key="k0"></data></node>
  </graph>
</graphml>"#;
        let graph = parse_ok(text);
        assert_eq!(graph.node(0).label, "");
    }

    #[test]
    fn cycle_is_rejected() {
        let text = r#"<graphml>
  <graph edgedefault="directed">
    <node id="a"/>
    <node id="b"/>
    <edge source="a" target="b"/>
    <edge source="b" target="a"/>
  </graph>
</graphml>"#;
        let err = parse(text, &origin()).unwrap_err();
        assert!(err.to_string().contains("cycle detected"), "got: {err}");
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let text = r#"<graphml>
  <graph edgedefault="directed">
    <node id="a"/>
    <edge source="a" target="a"/>
  </graph>
</graphml>"#;
        assert!(parse(text, &origin()).is_err());
    }

    #[test]
    fn undirected_graph_is_rejected() {
        let text = r#"<graphml>
  <graph edgedefault="undirected">
    <node id="a"/>
  </graph>
</graphml>"#;
        let err = parse(text, &origin()).unwrap_err();
        assert!(err.to_string().contains("must be directed"), "got: {err}");
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let text = r#"<graphml>
  <graph edgedefault="directed">
    <node id="a"/>
    <edge source="a" target="ghost"/>
  </graph>
</graphml>"#;
        let err = parse(text, &origin()).unwrap_err();
        assert!(err.to_string().contains("'ghost'"), "got: {err}");
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let text = r#"<graphml>
  <graph edgedefault="directed">
    <node id="a"/>
    <node id="a"/>
  </graph>
</graphml>"#;
        assert!(parse(text, &origin()).is_err());
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = parse("<tests/>", &origin()).unwrap_err();
        assert!(err.to_string().contains("expected 'graphml' root"));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(parse("<graphml><graph>", &origin()).is_err());
    }

    #[test]
    fn empty_graph_is_valid() {
        let graph = parse_ok(r#"<graphml><graph edgedefault="directed"/></graphml>"#);
        assert_eq!(graph.node_count(), 0);
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn data_for_undeclared_key_is_ignored() {
        let text = r#"<graphml>
  <key id="k0" for="node" attr.name="label"/>
  <graph edgedefault="directed">
    <node id="a"><data key="mystery">x</data><data key="k0">ok</data></node>
  </graph>
</graphml>"#;
        let graph = parse_ok(text);
        assert_eq!(graph.node(0).label, "ok");
    }

    #[test]
    fn edge_scoped_keys_do_not_capture_node_fields() {
        let text = r#"<graphml>
  <key id="k0" for="edge" attr.name="label"/>
  <key id="k1" for="node" attr.name="label"/>
  <graph edgedefault="directed">
    <node id="a"><data key="k0">edge-label</data><data key="k1">node-label</data></node>
  </graph>
</graphml>"#;
        let graph = parse_ok(text);
        assert_eq!(graph.node(0).label, "node-label");
    }
}
