//! Placeholder substitution and capture extraction.
//!
//! Substitution replaces `${key}` occurrences in a message with values from a
//! [`PropertyMap`]. Map keys are raw names; the `${…}` pattern is formed here.
//! Keys are applied longest-first (ties broken lexicographically) so that
//! overlapping keys always resolve the same way, and each key is one full pass
//! over the current string.
//!
//! Captures are declared in an optional control sidecar next to a request
//! file: `<request>.ctl` holds a `control` document whose `placeholder`
//! children pair a `name` with a `metavalue` XPath evaluated against the
//! observed response.

use std::path::{Path, PathBuf};

use crucible_types::{HarnessError, PropertyMap, Result};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value};

/// Expand `${key}` patterns in a message.
///
/// Unknown placeholders are left as-is; values are not re-scanned within a
/// pass.
pub fn apply_placeholders(message: &str, placeholders: &PropertyMap) -> String {
    let mut keys: Vec<&str> = placeholders.keys().map(String::as_str).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut rendered = message.to_string();
    for key in keys {
        let pattern = format!("${{{key}}}");
        if rendered.contains(&pattern) {
            rendered = rendered.replace(&pattern, &placeholders[key]);
        }
    }
    rendered
}

/// One capture declaration from a control sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    pub name: String,
    pub metavalue: String,
}

/// Outcome of evaluating a set of capture declarations.
///
/// Declarations whose XPath matched no node land in `missing` as
/// `CaptureMissing` errors; they are recorded non-fatally while the matched
/// captures are still published.
#[derive(Debug, Default)]
pub struct CaptureResult {
    pub values: Vec<(String, String)>,
    pub missing: Vec<HarnessError>,
}

fn control_file_for(request_file: &Path) -> PathBuf {
    request_file.with_extension("ctl")
}

/// Load the capture declarations for a request file, if any.
///
/// Entries with an empty `name` or `metavalue` are skipped. A sidecar that is
/// not valid XML is fatal; a sidecar whose root is not `control` declares
/// nothing.
pub fn load_control_sidecar(request_file: &Path) -> Result<Vec<CaptureSpec>> {
    let control_file = control_file_for(request_file);
    if !control_file.is_file() {
        return Ok(Vec::new());
    }

    let text = std::fs::read_to_string(&control_file)?;
    let doc = roxmltree::Document::parse(&text).map_err(|e| HarnessError::ResponseNotXml {
        origin: control_file.display().to_string(),
        message: e.to_string(),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "control" {
        return Ok(Vec::new());
    }

    let mut specs = Vec::new();
    for placeholder in root
        .children()
        .filter(|n| n.tag_name().name() == "placeholder")
    {
        let child_text = |tag: &str| {
            placeholder
                .children()
                .find(|n| n.tag_name().name() == tag)
                .and_then(|n| n.text())
                .unwrap_or("")
                .trim()
                .to_string()
        };
        let name = child_text("name");
        let metavalue = child_text("metavalue");
        if !name.is_empty() && !metavalue.is_empty() {
            specs.push(CaptureSpec { name, metavalue });
        }
    }
    Ok(specs)
}

/// The textual value of a matched node, following the first-text-child rule
/// for elements.
fn capture_value(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => element
            .children()
            .into_iter()
            .filter_map(|child| match child {
                sxd_document::dom::ChildOfElement::Text(t) => Some(t.text()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat(),
        Node::Attribute(attribute) => attribute.value().to_string(),
        Node::Text(text) => text.text().to_string(),
        _ => String::new(),
    }
}

/// Evaluate capture declarations against the observed response.
///
/// The response here is the raw client output after placeholder rendering,
/// before any suppression.
pub fn extract_captures(
    response: &str,
    specs: &[CaptureSpec],
    request_file: &Path,
) -> Result<CaptureResult> {
    let package = sxd_document::parser::parse(response).map_err(|e| HarnessError::ResponseNotXml {
        origin: format!("response for request '{}'", request_file.display()),
        message: format!("{e:?}"),
    })?;
    let doc = package.as_document();
    let factory = Factory::new();
    let context = Context::new();

    let mut result = CaptureResult::default();
    for spec in specs {
        let xpath = factory
            .build(&spec.metavalue)
            .map_err(|e| HarnessError::PlanParse {
                file: control_file_for(request_file),
                message: format!("invalid XPath '{}': {e:?}", spec.metavalue),
            })?
            .ok_or_else(|| HarnessError::PlanParse {
                file: control_file_for(request_file),
                message: format!("empty XPath for capture '{}'", spec.name),
            })?;
        let value = xpath
            .evaluate(&context, doc.root())
            .map_err(|e| HarnessError::PlanParse {
                file: control_file_for(request_file),
                message: format!("XPath '{}' failed to evaluate: {e:?}", spec.metavalue),
            })?;

        let matched = match value {
            Value::Nodeset(nodes) => nodes.document_order_first().map(capture_value),
            _ => None,
        };
        match matched {
            Some(text) => result.values.push((spec.name.clone(), text)),
            None => result.missing.push(HarnessError::CaptureMissing {
                name: spec.name.clone(),
                metavalue: spec.metavalue.clone(),
                request_file: request_file.to_path_buf(),
            }),
        }
    }
    Ok(result)
}
