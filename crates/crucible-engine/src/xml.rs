//! XML comparison utilities.
//!
//! Responses are compared as text after both sides pass through the same
//! pipeline: parse, remove every node matched by the suppression XPaths, then
//! serialise with fixed settings (one space of indentation per level,
//! whitespace-only text nodes, comments, processing instructions and the
//! declaration dropped, attributes in document order, mixed content inline).
//! Byte equality of the two serialisations is the comparison verdict.

use std::path::{Path, PathBuf};

use crucible_types::{HarnessError, Result};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};

/// A compiled suppression list from an ignore sidecar.
#[derive(Debug)]
pub struct Suppressions {
    sidecar: PathBuf,
    xpaths: Vec<XPath>,
}

impl Suppressions {
    /// Compile one XPath per line. An unparseable line is fatal to the case.
    pub fn compile(lines: &[String], sidecar: &Path) -> Result<Self> {
        let factory = Factory::new();
        let mut xpaths = Vec::with_capacity(lines.len());
        for line in lines {
            let xpath = factory
                .build(line)
                .map_err(|e| HarnessError::PlanParse {
                    file: sidecar.to_path_buf(),
                    message: format!("invalid XPath '{line}': {e:?}"),
                })?
                .ok_or_else(|| HarnessError::PlanParse {
                    file: sidecar.to_path_buf(),
                    message: format!("empty XPath '{line}'"),
                })?;
            xpaths.push(xpath);
        }
        Ok(Self {
            sidecar: sidecar.to_path_buf(),
            xpaths,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.xpaths.is_empty()
    }

    fn apply(&self, doc: &Document<'_>) -> Result<()> {
        let context = Context::new();
        for xpath in &self.xpaths {
            let value = xpath
                .evaluate(&context, doc.root())
                .map_err(|e| HarnessError::PlanParse {
                    file: self.sidecar.clone(),
                    message: format!("suppression XPath failed to evaluate: {e:?}"),
                })?;
            if let Value::Nodeset(nodes) = value {
                for node in nodes.document_order() {
                    remove_node(node);
                }
            }
        }
        Ok(())
    }
}

fn remove_node(node: Node<'_>) {
    match node {
        Node::Element(e) => e.remove_from_parent(),
        Node::Text(t) => t.remove_from_parent(),
        Node::Comment(c) => c.remove_from_parent(),
        Node::ProcessingInstruction(pi) => pi.remove_from_parent(),
        Node::Attribute(a) => {
            if let Some(parent) = a.parent() {
                parent.remove_attribute(a.name());
            }
        }
        Node::Root(_) | Node::Namespace(_) => {}
    }
}

/// Read the ignore sidecar for a request file: one XPath per non-empty line.
pub fn load_ignore_sidecar(request_file: &Path) -> Result<Vec<String>> {
    let ignore_file = ignore_file_for(request_file);
    if !ignore_file.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&ignore_file)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

pub fn ignore_file_for(request_file: &Path) -> PathBuf {
    request_file.with_extension("ign")
}

/// Parse a document, apply suppressions, and serialise it canonically.
///
/// `origin` names the document in error messages.
pub fn canonical_form(text: &str, origin: &str, suppressions: &Suppressions) -> Result<String> {
    let package = sxd_document::parser::parse(text).map_err(|e| HarnessError::ResponseNotXml {
        origin: origin.to_string(),
        message: format!("{e:?}"),
    })?;
    let doc = package.as_document();
    suppressions.apply(&doc)?;
    Ok(serialize(&doc))
}

fn serialize(doc: &Document<'_>) -> String {
    let mut out = String::new();
    for child in doc.root().children() {
        if let ChildOfRoot::Element(element) = child {
            write_element(element, 0, &mut out);
            out.push('\n');
        }
    }
    out
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push(' ');
    }
}

fn push_escaped(text: &str, in_attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

fn write_element(element: Element<'_>, depth: usize, out: &mut String) {
    out.push('<');
    out.push_str(element.name().local_part());

    // Document order; attribute order is significant for the comparison.
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(attribute.name().local_part());
        out.push_str("=\"");
        push_escaped(attribute.value(), true, out);
        out.push('"');
    }

    let children: Vec<ChildOfElement<'_>> = element
        .children()
        .into_iter()
        .filter(|child| match child {
            ChildOfElement::Element(_) => true,
            ChildOfElement::Text(t) => !t.text().trim().is_empty(),
            _ => false,
        })
        .collect();

    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let mixed = children
        .iter()
        .any(|child| matches!(child, ChildOfElement::Text(_)));
    if mixed {
        for child in children {
            match child {
                ChildOfElement::Text(t) => push_escaped(t.text(), false, out),
                ChildOfElement::Element(e) => write_element(e, depth + 1, out),
                _ => {}
            }
        }
    } else {
        out.push('\n');
        for child in children {
            if let ChildOfElement::Element(e) = child {
                push_indent(depth + 1, out);
                write_element(e, depth + 1, out);
                out.push('\n');
            }
        }
        push_indent(depth, out);
    }

    out.push_str("</");
    out.push_str(element.name().local_part());
    out.push('>');
}
