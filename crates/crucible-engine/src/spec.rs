//! Test specification loading.
//!
//! The specification is one XML file:
//!
//! ```xml
//! <tests>
//!   <suite name="accounts" enabled="yes">
//!     <setup><path>plans/login.graphml</path></setup>
//!     <teardown><path>plans/logout.graphml</path></teardown>
//!     <case name="create" enabled="yes" basetime="2024-01-01T00:00:00Z">
//!       <path>plans/create.graphml</path>
//!       <setup><path>plans/seed.graphml</path></setup>
//!     </case>
//!   </suite>
//! </tests>
//! ```
//!
//! Relative paths resolve against the specification file's directory.
//! `enabled` enables only for the literal `yes`. A `suite` or `case` missing
//! a mandatory attribute, or a case without at least one `path`, is a hard
//! load error.

use std::path::{Path, PathBuf};

use crucible_types::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct Specification {
    pub suites: Vec<Suite>,
}

#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub enabled: bool,
    pub setup: Vec<PathBuf>,
    pub teardown: Vec<PathBuf>,
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub enabled: bool,
    /// Required by the loader; currently opaque and unused.
    pub basetime: String,
    pub plan: Vec<PathBuf>,
    pub setup: Vec<PathBuf>,
    pub teardown: Vec<PathBuf>,
}

fn spec_error(path: &Path, message: impl Into<String>) -> HarnessError {
    HarnessError::SpecParse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let candidate = PathBuf::from(value);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

/// Direct `path` children of an element, resolved against `base`.
fn paths_of(node: roxmltree::Node<'_, '_>, base: &Path) -> Vec<PathBuf> {
    node.children()
        .filter(|n| n.tag_name().name() == "path")
        .map(|n| resolve_path(base, n.text().unwrap_or("").trim()))
        .collect()
}

/// Paths inside the first child of the given name (`setup` or `teardown`).
fn phase_paths(node: roxmltree::Node<'_, '_>, phase: &str, base: &Path) -> Vec<PathBuf> {
    node.children()
        .find(|n| n.tag_name().name() == phase)
        .map(|n| paths_of(n, base))
        .unwrap_or_default()
}

fn required_attribute<'a>(
    node: roxmltree::Node<'a, '_>,
    attribute: &str,
    what: &str,
    path: &Path,
) -> Result<&'a str> {
    node.attribute(attribute)
        .ok_or_else(|| spec_error(path, format!("{what} is missing the '{attribute}' attribute")))
}

/// Load and validate a specification file.
pub fn load_specification(path: &Path) -> Result<Specification> {
    let text = std::fs::read_to_string(path)?;
    let doc = roxmltree::Document::parse(&text).map_err(|e| spec_error(path, e.to_string()))?;

    let root = doc.root_element();
    if root.tag_name().name() != "tests" {
        return Err(spec_error(path, "missing 'tests' node"));
    }

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut suites = Vec::new();

    for suite_node in root.children().filter(|n| n.tag_name().name() == "suite") {
        let name = required_attribute(suite_node, "name", "a suite", path)?;
        let enabled = required_attribute(suite_node, "enabled", format!("suite '{name}'").as_str(), path)?;

        let mut suite = Suite {
            name: name.to_string(),
            enabled: enabled == "yes",
            setup: phase_paths(suite_node, "setup", base),
            teardown: phase_paths(suite_node, "teardown", base),
            cases: Vec::new(),
        };

        for case_node in suite_node
            .children()
            .filter(|n| n.tag_name().name() == "case")
        {
            let what = format!("a case in suite '{name}'");
            let case_name = required_attribute(case_node, "name", &what, path)?;
            let case_what = format!("case '{name}.{case_name}'");
            let case_enabled = required_attribute(case_node, "enabled", &case_what, path)?;
            let basetime = required_attribute(case_node, "basetime", &case_what, path)?;

            let plan = paths_of(case_node, base);
            if plan.is_empty() {
                return Err(spec_error(
                    path,
                    format!("{case_what} has no 'path' element"),
                ));
            }

            suite.cases.push(Case {
                name: case_name.to_string(),
                enabled: case_enabled == "yes",
                basetime: basetime.to_string(),
                plan,
                setup: phase_paths(case_node, "setup", base),
                teardown: phase_paths(case_node, "teardown", base),
            });
        }

        suites.push(suite);
    }

    Ok(Specification { suites })
}
