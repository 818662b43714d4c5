//! Step execution — the dataflow heart of the harness.
//!
//! A phase (setup, body, or teardown) is an ordered plan of step files. Each
//! step file is rendered with the current placeholder map, parsed into a DAG,
//! and executed by a dataflow scheduler: every vertex holds a counter of
//! unfinished predecessors, vertices whose counter reaches zero are spawned
//! as tasks, and a semaphore bounds how many node bodies run at once.
//!
//! Fail-fast is cooperative: a fatal failure clears the phase's healthy flag,
//! tasks read the flag at entry and become no-ops, and once the running step
//! quiesces no further step of the plan starts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crucible_graphml::{StepGraph, StepNode};
use crucible_types::{Failure, HarnessError, PropertyMap, Result};
use tokio::sync::{mpsc, Semaphore};

use crate::lock;
use crate::placeholder::{apply_placeholders, extract_captures, load_control_sidecar};
use crate::process::ClientInvoker;
use crate::xml::{canonical_form, ignore_file_for, load_ignore_sidecar, Suppressions};

/// Split a comma-separated argument list, dropping empty tokens.
fn split_arg_list(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// A short single-line extract for failure messages.
fn excerpt(text: &str) -> String {
    let flat = text.trim().replace('\n', " | ");
    if flat.chars().count() > 200 {
        let mut cut: String = flat.chars().take(200).collect();
        cut.push('…');
        cut
    } else {
        flat
    }
}

struct NodeFiles {
    request: PathBuf,
    expected_response: PathBuf,
}

/// Runtime record for one vertex: resolved files plus the final argv tail.
pub(crate) struct NodeSpec {
    id: String,
    args: Vec<String>,
    files: Option<NodeFiles>,
}

impl NodeSpec {
    fn resolve(node: &StepNode, requests_dir: &Path, responses_dir: &Path) -> Result<Self> {
        let mut args = split_arg_list(&node.args);
        args.extend(split_arg_list(&node.extra_args));

        let files = if node.label.is_empty() {
            None
        } else {
            let request = requests_dir.join(&node.label);
            if !request.is_file() {
                return Err(HarnessError::MissingArtifact {
                    file: request,
                    context: format!("request file for node '{}' does not exist", node.id),
                });
            }
            let expected_response = responses_dir.join(&node.label);
            if !expected_response.is_file() {
                return Err(HarnessError::MissingArtifact {
                    file: expected_response,
                    context: format!(
                        "expected response file for node '{}' does not exist",
                        node.id
                    ),
                });
            }
            Some(NodeFiles {
                request,
                expected_response,
            })
        };

        Ok(Self {
            id: node.id.clone(),
            args,
            files,
        })
    }
}

/// State shared between the scheduler and its node tasks.
struct TaskShared {
    invoker: Arc<dyn ClientInvoker>,
    placeholders: Arc<Mutex<PropertyMap>>,
    new_properties: Mutex<PropertyMap>,
    failures: Mutex<Vec<Failure>>,
    healthy: AtomicBool,
}

impl TaskShared {
    fn record(&self, failure: Failure) {
        if failure.fatal {
            self.healthy.store(false, Ordering::SeqCst);
        }
        lock(&self.failures).push(failure);
    }

    fn record_error(&self, err: &HarnessError) {
        self.record(Failure::from_error(err));
    }

    fn snapshot(&self) -> PropertyMap {
        lock(&self.placeholders).clone()
    }
}

/// Executes one plan (an ordered list of step files) against the client.
///
/// The placeholder map is shared with the enclosing case so captures made
/// here are visible to the following phases; the healthy flag and the failure
/// list are private to this phase.
pub struct PhaseRunner {
    shared: Arc<TaskShared>,
    concurrency: usize,
}

fn effective_concurrency(maximum_concurrency: u64) -> usize {
    let width = if maximum_concurrency == 0 {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    } else {
        usize::try_from(maximum_concurrency).unwrap_or(usize::MAX)
    };
    width.min(Semaphore::MAX_PERMITS)
}

impl PhaseRunner {
    pub fn new(
        invoker: Arc<dyn ClientInvoker>,
        placeholders: Arc<Mutex<PropertyMap>>,
        maximum_concurrency: u64,
    ) -> Self {
        Self {
            shared: Arc::new(TaskShared {
                invoker,
                placeholders,
                new_properties: Mutex::new(PropertyMap::new()),
                failures: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }),
            concurrency: effective_concurrency(maximum_concurrency),
        }
    }

    pub fn healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::SeqCst)
    }

    pub fn take_failures(&self) -> Vec<Failure> {
        std::mem::take(&mut *lock(&self.shared.failures))
    }

    pub fn take_new_properties(&self) -> PropertyMap {
        std::mem::take(&mut *lock(&self.shared.new_properties))
    }

    /// Run every step of the plan in order, stopping after a fatal failure.
    pub async fn run_plan(&self, plan: &[PathBuf]) {
        for step_file in plan {
            if !self.healthy() {
                tracing::warn!(
                    step = %step_file.display(),
                    "skipping step after fatal failure"
                );
                break;
            }
            tracing::info!(step = %step_file.display(), "running step");
            if let Err(err) = self.run_step(step_file).await {
                tracing::error!(step = %step_file.display(), error = %err, "step failed");
                self.shared.record(Failure::fatal_from(&err));
            }
        }
    }

    async fn run_step(&self, step_file: &Path) -> Result<()> {
        if !step_file.is_file() {
            return Err(HarnessError::MissingArtifact {
                file: step_file.to_path_buf(),
                context: "step file does not exist".into(),
            });
        }
        let raw = tokio::fs::read_to_string(step_file).await?;
        let rendered = apply_placeholders(&raw, &self.shared.snapshot());
        if rendered.trim().is_empty() {
            return Err(HarnessError::PlanParse {
                file: step_file.to_path_buf(),
                message: "step file is empty".into(),
            });
        }
        let graph = crucible_graphml::parse(&rendered, step_file)?;

        let step_dir = step_file
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(step_file.file_stem().unwrap_or_default());
        let requests_dir = step_dir.join("requests");
        let responses_dir = step_dir.join("responses");

        let mut specs = Vec::with_capacity(graph.node_count());
        for node in graph.nodes() {
            specs.push(Arc::new(NodeSpec::resolve(
                node,
                &requests_dir,
                &responses_dir,
            )?));
        }

        self.execute_dataflow(&graph, &specs).await;
        Ok(())
    }

    /// In-degree-counter scheduler: tasks whose predecessors have all
    /// finished are spawned; completions stream back and unlock successors.
    async fn execute_dataflow(&self, graph: &StepGraph, specs: &[Arc<NodeSpec>]) {
        let total = graph.node_count();
        if total == 0 {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<usize>();

        let mut remaining: Vec<usize> = (0..total).map(|i| graph.in_degree(i)).collect();
        for (index, &degree) in remaining.iter().enumerate() {
            if degree == 0 {
                self.spawn_node(index, specs[index].clone(), semaphore.clone(), done_tx.clone());
            }
        }

        let mut completed = 0;
        while completed < total {
            let Some(index) = done_rx.recv().await else {
                break;
            };
            completed += 1;
            for &next in graph.successors(index) {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    self.spawn_node(next, specs[next].clone(), semaphore.clone(), done_tx.clone());
                }
            }
        }
    }

    fn spawn_node(
        &self,
        index: usize,
        spec: Arc<NodeSpec>,
        semaphore: Arc<Semaphore>,
        done: mpsc::UnboundedSender<usize>,
    ) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            // The flag is read at task entry: tasks scheduled after a fatal
            // failure become no-ops, tasks already past this point run to
            // completion.
            if permit.is_ok() && shared.healthy.load(Ordering::SeqCst) {
                if let Err(err) = run_node(&shared, &spec).await {
                    tracing::error!(node = %spec.id, error = %err, "node failed fatally");
                    shared.record(Failure::fatal_from(&err));
                }
            }
            let _ = done.send(index);
        });
    }
}

async fn render_artifact(file: &Path, what: &str, placeholders: &PropertyMap) -> Result<String> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| HarnessError::MissingArtifact {
            file: file.to_path_buf(),
            context: format!("{what} could not be read: {e}"),
        })?;
    let rendered = apply_placeholders(&raw, placeholders);
    if rendered.is_empty() {
        return Err(HarnessError::MissingArtifact {
            file: file.to_path_buf(),
            context: format!("{what} rendered to an empty document"),
        });
    }
    Ok(rendered)
}

/// Execute one vertex. The returned error, if any, is fatal to the phase;
/// non-fatal findings are recorded directly on `shared`.
async fn run_node(shared: &TaskShared, node: &NodeSpec) -> Result<()> {
    let placeholders = shared.snapshot();

    let Some(files) = &node.files else {
        tracing::debug!(node = %node.id, "empty-request node");
        let output = shared.invoker.invoke(&node.args, "").await;
        if !output.success() {
            shared.record_error(&HarnessError::ClientInvocationFailed {
                exit_code: output.exit_code,
                context: format!(
                    "empty-request node '{}': {}",
                    node.id,
                    excerpt(&output.stderr)
                ),
            });
        }
        return Ok(());
    };

    let request = render_artifact(&files.request, "request", &placeholders).await?;
    let expected = render_artifact(&files.expected_response, "expected response", &placeholders).await?;

    let output = shared.invoker.invoke(&node.args, &request).await;
    if !output.success() {
        shared.record_error(&HarnessError::ClientInvocationFailed {
            exit_code: output.exit_code,
            context: format!(
                "request '{}': {}",
                files.request.display(),
                excerpt(&output.stderr)
            ),
        });
    }
    let observed = apply_placeholders(&output.stdout, &placeholders);
    if observed.is_empty() {
        // Without a response there is nothing to compare or capture; the
        // node cannot complete, so the invocation failure escalates.
        return Err(HarnessError::ClientInvocationFailed {
            exit_code: output.exit_code,
            context: format!("request '{}' produced no response", files.request.display()),
        });
    }

    let ignores = load_ignore_sidecar(&files.request)?;
    let suppressions = Suppressions::compile(&ignores, &ignore_file_for(&files.request))?;
    let expected_canonical = canonical_form(
        &expected,
        &format!("expected response '{}'", files.expected_response.display()),
        &suppressions,
    )?;
    let observed_canonical = canonical_form(
        &observed,
        &format!("response for request '{}'", files.request.display()),
        &suppressions,
    )?;
    if expected_canonical != observed_canonical {
        shared.record_error(&HarnessError::ResponseMismatch {
            request_file: files.request.clone(),
            expected: expected_canonical,
            observed: observed_canonical,
        });
    }

    // Captures read the raw response, before suppression.
    let capture_specs = load_control_sidecar(&files.request)?;
    if !capture_specs.is_empty() {
        let captures = extract_captures(&observed, &capture_specs, &files.request)?;
        for missing in &captures.missing {
            shared.record_error(missing);
        }
        if !captures.values.is_empty() {
            let mut live = lock(&shared.placeholders);
            let mut fresh = lock(&shared.new_properties);
            for (name, value) in captures.values {
                tracing::debug!(node = %node.id, name = %name, value = %value, "captured placeholder");
                live.insert(name.clone(), value.clone());
                fresh.insert(name, value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crucible_types::FailureKind;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::process::RunOutput;

    /// Test client keyed by the node's first argument. Records invocation
    /// order, concurrency high-water mark, and entry/exit sequence numbers.
    struct ScriptedClient {
        responses: HashMap<String, RunOutput>,
        delay_ms: u64,
        calls: Mutex<Vec<String>>,
        events: Mutex<Vec<(String, usize, usize)>>,
        sequence: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ScriptedClient {
        fn echoing() -> Self {
            Self::with_responses(HashMap::new())
        }

        fn with_responses(responses: HashMap<String, RunOutput>) -> Self {
            Self {
                responses,
                delay_ms: 0,
                calls: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                sequence: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> Vec<String> {
            lock(&self.calls).clone()
        }

        fn events(&self) -> Vec<(String, usize, usize)> {
            lock(&self.events).clone()
        }
    }

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> RunOutput {
        RunOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait]
    impl ClientInvoker for ScriptedClient {
        async fn invoke(&self, args: &[String], stdin: &str) -> RunOutput {
            let tag = args.first().cloned().unwrap_or_default();
            let entry = self.sequence.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let response = self
                .responses
                .get(&tag)
                .cloned()
                .unwrap_or_else(|| output(0, stdin, ""));

            self.running.fetch_sub(1, Ordering::SeqCst);
            let exit = self.sequence.fetch_add(1, Ordering::SeqCst);
            lock(&self.calls).push(tag.clone());
            lock(&self.events).push((tag, entry, exit));
            response
        }
    }

    fn write_step_file(
        dir: &Path,
        stem: &str,
        nodes: &[(&str, &str, &str)],
        edges: &[(&str, &str)],
    ) -> PathBuf {
        let mut xml = String::from(
            "<graphml>\n<key id=\"k0\" for=\"node\" attr.name=\"label\"/>\n<key id=\"k1\" for=\"node\" attr.name=\"args\"/>\n<key id=\"k2\" for=\"node\" attr.name=\"extra_args\"/>\n<graph edgedefault=\"directed\">\n",
        );
        for (id, label, args) in nodes {
            xml.push_str(&format!(
                "<node id=\"{id}\"><data key=\"k0\">{label}</data><data key=\"k1\">{args}</data></node>\n"
            ));
        }
        for (source, target) in edges {
            xml.push_str(&format!("<edge source=\"{source}\" target=\"{target}\"/>\n"));
        }
        xml.push_str("</graph>\n</graphml>\n");
        let path = dir.join(format!("{stem}.graphml"));
        std::fs::write(&path, xml).unwrap();
        path
    }

    fn write_node_files(dir: &Path, stem: &str, label: &str, request: &str, response: &str) {
        let base = dir.join(stem);
        std::fs::create_dir_all(base.join("requests")).unwrap();
        std::fs::create_dir_all(base.join("responses")).unwrap();
        std::fs::write(base.join("requests").join(label), request).unwrap();
        std::fs::write(base.join("responses").join(label), response).unwrap();
    }

    fn runner(client: &Arc<ScriptedClient>, maximum_concurrency: u64) -> PhaseRunner {
        let invoker: Arc<dyn ClientInvoker> = client.clone();
        PhaseRunner::new(
            invoker,
            Arc::new(Mutex::new(PropertyMap::new())),
            maximum_concurrency,
        )
    }

    #[test]
    fn split_arg_list_drops_empty_tokens() {
        assert_eq!(split_arg_list("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_arg_list("a,,b"), vec!["a", "b"]);
        assert_eq!(split_arg_list(""), Vec::<String>::new());
        assert_eq!(split_arg_list("solo"), vec!["solo"]);
    }

    #[tokio::test]
    async fn linear_step_passes_and_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(
            dir.path(),
            "step1",
            &[("n0", "a", "a"), ("n1", "b", "b")],
            &[("n0", "n1")],
        );
        write_node_files(dir.path(), "step1", "a", "<q id=\"a\"/>", "<q id=\"a\"/>");
        write_node_files(dir.path(), "step1", "b", "<q id=\"b\"/>", "<q id=\"b\"/>");

        let client = Arc::new(ScriptedClient::echoing());
        let phase = runner(&client, 4);
        phase.run_plan(&[step]).await;

        assert!(phase.healthy());
        assert!(phase.take_failures().is_empty());
        assert_eq!(client.calls(), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_cap_is_never_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let nodes: Vec<(String, String)> = (0..6)
            .map(|i| (format!("n{i}"), format!("l{i}")))
            .collect();
        let node_refs: Vec<(&str, &str, &str)> = nodes
            .iter()
            .map(|(id, label)| (id.as_str(), label.as_str(), label.as_str()))
            .collect();
        let step = write_step_file(dir.path(), "wide", &node_refs, &[]);
        for (_, label) in &nodes {
            write_node_files(dir.path(), "wide", label, "<q/>", "<q/>");
        }

        let mut client = ScriptedClient::echoing();
        client.delay_ms = 25;
        let client = Arc::new(client);
        let phase = runner(&client, 2);
        phase.run_plan(&[step]).await;

        assert!(phase.healthy());
        assert_eq!(client.calls().len(), 6);
        assert!(
            client.max_running.load(Ordering::SeqCst) <= 2,
            "cap exceeded: {}",
            client.max_running.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dag_edges_are_respected_under_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(
            dir.path(),
            "diamond",
            &[
                ("a", "a", "a"),
                ("b", "b", "b"),
                ("c", "c", "c"),
                ("d", "d", "d"),
            ],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        for label in ["a", "b", "c", "d"] {
            write_node_files(dir.path(), "diamond", label, "<q/>", "<q/>");
        }

        let mut client = ScriptedClient::echoing();
        client.delay_ms = 10;
        let client = Arc::new(client);
        let phase = runner(&client, 4);
        phase.run_plan(&[step]).await;
        assert!(phase.take_failures().is_empty());

        let events = client.events();
        let of = |tag: &str| {
            events
                .iter()
                .find(|(t, _, _)| t == tag)
                .cloned()
                .unwrap_or_else(|| panic!("no event for {tag}"))
        };
        let (_, _, a_exit) = of("a");
        let (_, b_entry, b_exit) = of("b");
        let (_, c_entry, c_exit) = of("c");
        let (_, d_entry, _) = of("d");
        assert!(b_entry > a_exit);
        assert!(c_entry > a_exit);
        assert!(d_entry > b_exit);
        assert!(d_entry > c_exit);
    }

    #[tokio::test]
    async fn fatal_failure_stops_following_steps() {
        let dir = tempfile::tempdir().unwrap();
        let step1 = write_step_file(dir.path(), "s1", &[("n0", "boom", "boom")], &[]);
        write_node_files(dir.path(), "s1", "boom", "<q/>", "<r/>");
        let step2 = write_step_file(dir.path(), "s2", &[("n0", "after", "after")], &[]);
        write_node_files(dir.path(), "s2", "after", "<q/>", "<q/>");

        let mut responses = HashMap::new();
        responses.insert("boom".to_string(), output(3, "", "client blew up"));
        let client = Arc::new(ScriptedClient::with_responses(responses));
        let phase = runner(&client, 2);
        phase.run_plan(&[step1, step2]).await;

        assert!(!phase.healthy());
        assert!(!client.calls().contains(&"after".to_string()));
        let failures = phase.take_failures();
        assert!(failures
            .iter()
            .any(|f| f.kind == FailureKind::ClientInvocationFailed && f.fatal));
    }

    #[tokio::test]
    async fn captures_are_visible_to_successors() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(
            dir.path(),
            "cap",
            &[("n0", "login", "login"), ("n1", "use", "use")],
            &[("n0", "n1")],
        );
        write_node_files(dir.path(), "cap", "login", "<login/>", "<r><id>7</id></r>");
        write_node_files(
            dir.path(),
            "cap",
            "use",
            "<q ref=\"${token}\"/>",
            "<q ref=\"7\"/>",
        );
        std::fs::write(
            dir.path().join("cap/requests/login.ctl"),
            "<control><placeholder><name>token</name><metavalue>/r/id</metavalue></placeholder></control>",
        )
        .unwrap();

        let mut responses = HashMap::new();
        responses.insert("login".to_string(), output(0, "<r><id>7</id></r>", ""));
        let client = Arc::new(ScriptedClient::with_responses(responses));
        let phase = runner(&client, 2);
        phase.run_plan(&[step]).await;

        let failures = phase.take_failures();
        assert!(failures.is_empty(), "unexpected failures: {failures:?}");
        let fresh = phase.take_new_properties();
        assert_eq!(fresh.get("token").map(String::as_str), Some("7"));
    }

    #[tokio::test]
    async fn mismatch_is_non_fatal_and_siblings_run() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(
            dir.path(),
            "mix",
            &[("n0", "bad", "bad"), ("n1", "good", "good")],
            &[],
        );
        write_node_files(dir.path(), "mix", "bad", "<q/>", "<r><v>1</v></r>");
        write_node_files(dir.path(), "mix", "good", "<ok/>", "<ok/>");

        let mut responses = HashMap::new();
        responses.insert("bad".to_string(), output(0, "<r><v>2</v></r>", ""));
        let client = Arc::new(ScriptedClient::with_responses(responses));
        let phase = runner(&client, 2);
        phase.run_plan(&[step]).await;

        assert!(phase.healthy(), "mismatch must not trip fail-fast");
        assert_eq!(client.calls().len(), 2);
        let failures = phase.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::ResponseMismatch);
        assert!(!failures[0].fatal);
    }

    #[tokio::test]
    async fn missing_request_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(dir.path(), "gone", &[("n0", "absent", "")], &[]);
        // No requests/responses tree is written.

        let client = Arc::new(ScriptedClient::echoing());
        let phase = runner(&client, 1);
        phase.run_plan(&[step]).await;

        assert!(!phase.healthy());
        assert!(client.calls().is_empty());
        let failures = phase.take_failures();
        assert_eq!(failures[0].kind, FailureKind::MissingArtifact);
        assert!(failures[0].fatal);
    }

    #[tokio::test]
    async fn empty_label_node_skips_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(dir.path(), "bare", &[("n0", "", "ping,--fast")], &[]);

        let client = Arc::new(ScriptedClient::echoing());
        let phase = runner(&client, 1);
        phase.run_plan(&[step]).await;

        assert!(phase.healthy());
        assert!(phase.take_failures().is_empty());
        assert_eq!(client.calls(), vec!["ping"]);
    }

    #[tokio::test]
    async fn empty_label_node_failure_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let step = write_step_file(dir.path(), "bare", &[("n0", "", "flaky")], &[]);

        let mut responses = HashMap::new();
        responses.insert("flaky".to_string(), output(2, "", "transient"));
        let client = Arc::new(ScriptedClient::with_responses(responses));
        let phase = runner(&client, 1);
        phase.run_plan(&[step]).await;

        assert!(phase.healthy());
        let failures = phase.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::ClientInvocationFailed);
        assert!(!failures[0].fatal);
    }

    #[tokio::test]
    async fn missing_step_file_is_fatal() {
        let client = Arc::new(ScriptedClient::echoing());
        let phase = runner(&client, 1);
        phase.run_plan(&[PathBuf::from("/nope/step.graphml")]).await;

        assert!(!phase.healthy());
        let failures = phase.take_failures();
        assert_eq!(failures[0].kind, FailureKind::MissingArtifact);
    }

    #[tokio::test]
    async fn placeholders_render_the_step_file_itself() {
        let dir = tempfile::tempdir().unwrap();
        // The node's args come from a placeholder expanded before parsing.
        let step = write_step_file(dir.path(), "tpl", &[("n0", "", "${mode}")], &[]);

        let client = Arc::new(ScriptedClient::echoing());
        let invoker: Arc<dyn ClientInvoker> = client.clone();
        let map: PropertyMap = [("mode".to_string(), "fast".to_string())].into_iter().collect();
        let phase = PhaseRunner::new(invoker, Arc::new(Mutex::new(map)), 1);
        phase.run_plan(&[step]).await;

        assert_eq!(client.calls(), vec!["fast"]);
    }
}
