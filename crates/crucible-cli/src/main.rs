//! CLI binary for running crucible test specifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crucible_engine::{
    load_specification, ConsoleReporter, JsonReporter, LifecycleDriver, ProcessClient, Reporter,
};
use crucible_types::PropertyMap;

#[derive(Parser)]
#[command(
    name = "crucible",
    version,
    about = "Declarative black-box test orchestrator for XML request/response clients"
)]
struct Cli {
    /// Path to the top-level XML test specification
    #[arg(long = "test_spec", value_name = "PATH")]
    test_spec: PathBuf,

    /// Client executable invoked for every test node
    #[arg(long = "client", value_name = "PATH")]
    client: PathBuf,

    /// Maximum level of concurrency (0 means hardware default)
    #[arg(long = "maximum_concurrency", value_name = "N", default_value_t = 0)]
    maximum_concurrency: u64,

    /// Definition of property=value, seeds the placeholder map
    #[arg(
        long = "property",
        short = 'D',
        value_name = "KEY=VALUE",
        value_parser = parse_property
    )]
    property: Vec<(String, String)>,

    /// Write a machine-readable run report to this path
    #[arg(long = "report_json", value_name = "PATH")]
    report_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn ensure_regular_file(path: &Path, what: &str) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("{what} '{}' does not exist", path.display());
    }
    if !path.is_file() {
        anyhow::bail!("{what} '{}' is not a file", path.display());
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    ensure_regular_file(&cli.test_spec, "test specification")?;
    ensure_regular_file(&cli.client, "client")?;

    let spec = load_specification(&cli.test_spec)
        .with_context(|| format!("loading '{}'", cli.test_spec.display()))?;

    let properties: PropertyMap = cli.property.into_iter().collect();
    tracing::debug!(
        suites = spec.suites.len(),
        properties = properties.len(),
        maximum_concurrency = cli.maximum_concurrency,
        "specification loaded"
    );

    let invoker = Arc::new(ProcessClient::new(&cli.client));
    let driver = LifecycleDriver::new(invoker, cli.maximum_concurrency, properties);

    let mut console = ConsoleReporter::new();
    let mut json = cli.report_json.map(JsonReporter::new);
    let mut reporters: Vec<&mut dyn Reporter> = vec![&mut console];
    if let Some(reporter) = json.as_mut() {
        reporters.push(reporter);
    }

    let summary = driver.run(&spec, &mut reporters).await;
    Ok(summary.all_passed())
}

#[tokio::main]
async fn main() {
    // Usage problems and --help both exit non-zero: a run that executed no
    // tests must not look like a passing run.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(2);
        }
    };

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_property_splits_on_first_equals() {
        assert_eq!(
            parse_property("key=value").unwrap(),
            ("key".to_string(), "value".to_string())
        );
        assert_eq!(
            parse_property("url=http://host?a=b").unwrap(),
            ("url".to_string(), "http://host?a=b".to_string())
        );
    }

    #[test]
    fn parse_property_rejects_missing_equals() {
        assert!(parse_property("no-separator").is_err());
        assert!(parse_property("=value").is_err());
    }

    #[test]
    fn cli_parses_required_flags() {
        let cli = Cli::try_parse_from([
            "crucible",
            "--test_spec",
            "tests.xml",
            "--client",
            "/bin/client",
            "--maximum_concurrency",
            "4",
            "-D",
            "env=staging",
            "--property",
            "region=eu",
        ])
        .unwrap();
        assert_eq!(cli.test_spec, PathBuf::from("tests.xml"));
        assert_eq!(cli.client, PathBuf::from("/bin/client"));
        assert_eq!(cli.maximum_concurrency, 4);
        assert_eq!(cli.property.len(), 2);
    }

    #[test]
    fn cli_requires_test_spec_and_client() {
        assert!(Cli::try_parse_from(["crucible"]).is_err());
        assert!(Cli::try_parse_from(["crucible", "--test_spec", "t.xml"]).is_err());
    }

    #[test]
    fn maximum_concurrency_defaults_to_zero() {
        let cli = Cli::try_parse_from([
            "crucible",
            "--test_spec",
            "t.xml",
            "--client",
            "c",
        ])
        .unwrap();
        assert_eq!(cli.maximum_concurrency, 0);
    }
}
