//! Graphviz DOT rendering of call trees
//!
//! Produces a strict digraph with plaintext nodes whose labels are two-row
//! HTML tables: the header names the operation and state, the body lists
//! `key=value` metadata. Operation edges carry the duration in microseconds.
//! Feed the result to `dot -Tpng` to get an image.

use crate::call_tree::{CallTree, Node, NodeKind};

/// Escape HTML-like label text
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn node_label(header: &str, fields: &[(String, String)]) -> String {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", escape_html(k), escape_html(v)))
        .collect::<Vec<_>>()
        .join("<BR/>");

    format!(
        "<<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\" CELLPADDING=\"4\">\
         <TR><TD>{}</TD></TR><TR><TD>{}</TD></TR></TABLE>>",
        escape_html(header),
        body
    )
}

fn node_fields(tree: &CallTree, node: &Node) -> Vec<(String, String)> {
    let parent = tree
        .operation(node.opid)
        .and_then(|op| op.parent)
        .unwrap_or(0);

    let mut fields = vec![
        ("opid".to_string(), node.opid.to_string()),
        ("parent opid".to_string(), parent.to_string()),
    ];

    match node.kind {
        NodeKind::Init => {
            fields.push(("op start time".to_string(), node.start.to_string()));
            fields.extend(node.attributes.iter().cloned());
        }
        NodeKind::Finish => {
            fields.push(("op end time".to_string(), node.end.to_string()));
        }
        NodeKind::Interval => {
            fields.push(("start time".to_string(), node.start.to_string()));
            fields.push(("end time".to_string(), node.end.to_string()));
            fields.push(("time".to_string(), format!("{} us", node.duration())));
        }
    }
    fields
}

/// Render `tree` as a DOT document
pub fn render_call_tree(tree: &CallTree) -> String {
    let mut out = String::new();
    out.push_str(&format!("strict digraph \"opid_{}\" {{\n", tree.root()));
    out.push_str("    node [shape=plaintext];\n");

    for node in tree.nodes() {
        let label = node_label(&node.label, &node_fields(tree, node));
        out.push_str(&format!("    n{} [label={}];\n", node.id.index(), label));
    }

    for edge in tree.edges() {
        match edge.duration {
            Some(us) => out.push_str(&format!(
                "    n{} -> n{} [label=\"{} us\"];\n",
                edge.from.index(),
                edge.to.index(),
                us
            )),
            None => out.push_str(&format!(
                "    n{} -> n{};\n",
                edge.from.index(),
                edge.to.index()
            )),
        }
    }

    out.push_str("}\n");
    out
}
