//!
//! glyph CLI binary
//! ----------------
//! Runs the glyph aggregation for a project document against a columnar query
//! service, prints the composed SQL, or fetches the rows behind a glyph selection.

use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use glyph_engine::cli::{fit_to_terminal, format_row_id_arg, parse_row_id_arg, render_buckets, render_rows};
use glyph_engine::config::{EngineConfig, EngineConfigOverrides};
use glyph_engine::glyph::{compose_aggregation_query, encode_glyph_selection_with, poll_until_terminal, QueryRunner, QueryState, RowRetriever, RunnerConfig};
use glyph_engine::project::{MemoryProjectSource, Project};
use glyph_engine::service::{HttpQueryService, QueryService};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --project <project.json> [--print-sql] [--filter <sql>] [--connect <url>] [--poll-ms <ms>] [--select]\n  {program} --project <project.json> --rows <ids> [--page <n>] [--page-size <n>] [--export] [--connect <url>]\n\nFlags:\n  --project <path>     Project document (camelCase JSON with view and axis properties)\n  --print-sql          Print the composed aggregation and exit\n  --filter <sql>       Predicate applied to source rows instead of the axis filters\n  --connect <url>      Query service base URL (default: GLYPH_SERVICE_URL or config)\n  --poll-ms <ms>       Status polling interval\n  --select             After the buckets, print the whole grid as a --rows selection\n  --rows <ids>         Comma separated glyph selection; -9999 <id> expands the bucket of <id>\n  --page <n>           Zero-based page number (default 0)\n  --page-size <n>      Rows per page (default from config)\n  --export             Fetch every matching row, ignoring paging\n  -h, --help           Show this help\n\nEnvironment:\n  GLYPH_CONFIG, GLYPH_SERVICE_URL, GLYPH_POLL_INTERVAL_MS, GLYPH_POLL_TIMEOUT_MS, GLYPH_MAX_DIRECT_ROW_IDS, RUST_LOG"
    );
}

fn take_value(args: &[String], i: usize, flag: &str, program: &str) -> String {
    match args.get(i + 1) {
        Some(v) => v.clone(),
        None => {
            eprintln!("{} requires a value", flag);
            print_usage(program);
            std::process::exit(2);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut project_path: Option<String> = None;
    let mut print_sql = false;
    let mut explicit_filter: Option<String> = None;
    let mut rows_arg: Option<String> = None;
    let mut page: usize = 0;
    let mut page_size: Option<usize> = None;
    let mut export = false;
    let mut select = false;
    let mut overrides = EngineConfigOverrides::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--project" => { project_path = Some(take_value(&args, i, "--project", &program)); i += 2; }
            "--print-sql" => { print_sql = true; i += 1; }
            "--filter" => { explicit_filter = Some(take_value(&args, i, "--filter", &program)); i += 2; }
            "--connect" => { overrides.service_url = Some(take_value(&args, i, "--connect", &program)); i += 2; }
            "--poll-ms" => {
                let v = take_value(&args, i, "--poll-ms", &program);
                overrides.poll_interval_ms = Some(v.parse().with_context(|| format!("invalid --poll-ms '{}'", v))?);
                i += 2;
            }
            "--rows" => { rows_arg = Some(take_value(&args, i, "--rows", &program)); i += 2; }
            "--page" => {
                let v = take_value(&args, i, "--page", &program);
                page = v.parse().with_context(|| format!("invalid --page '{}'", v))?;
                i += 2;
            }
            "--page-size" => {
                let v = take_value(&args, i, "--page-size", &program);
                page_size = Some(v.parse().with_context(|| format!("invalid --page-size '{}'", v))?);
                i += 2;
            }
            "--export" => { export = true; i += 1; }
            "--select" => { select = true; i += 1; }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            unk => {
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let Some(project_path) = project_path else {
        print_usage(&program);
        std::process::exit(2);
    };
    let text = std::fs::read_to_string(Path::new(&project_path))
        .with_context(|| format!("failed to read project document {}", project_path))?;
    let project: Project = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse project document {}", project_path))?;

    let cfg = EngineConfig::from_layers(&EngineConfig::load()?, &overrides);
    let mut runner_cfg = RunnerConfig::from_project(&project)?;
    if let Some(f) = explicit_filter {
        runner_cfg = runner_cfg.with_filter(f);
    }

    if print_sql {
        println!("{}", compose_aggregation_query(&runner_cfg));
        return Ok(());
    }

    let service = Arc::new(HttpQueryService::from_config(&cfg)?);
    info!(target: "glyph", "project '{}' on {} via {}", project.id, project.view.qualified(), cfg.service_url);

    if let Some(ids) = rows_arg {
        let ids = parse_row_id_arg(&ids)?;
        let projects = Arc::new(MemoryProjectSource::new());
        let project_id = project.id.clone();
        projects.insert(project);
        let retriever = RowRetriever::with_config(service.clone(), projects, &cfg);
        service.init().await?;
        let rows = retriever
            .fetch_glyph_rows(&project_id, &ids, page_size.unwrap_or(cfg.default_page_size), page, export)
            .await?;
        println!("{}", fit_to_terminal(&render_rows(&rows)));
        return Ok(());
    }

    let mut runner = QueryRunner::new(service, runner_cfg);
    runner.init().await?;
    let execution_id = runner.start_query().await?;
    eprintln!("execution {}", execution_id);
    let status = poll_until_terminal(&mut runner, cfg.poll_interval(), cfg.poll_timeout()).await?;
    if status.status == QueryState::Failed {
        eprintln!("aggregation failed: {}", status.error.unwrap_or_default());
        std::process::exit(1);
    }
    let buckets = runner.results().await?;
    println!("{}", fit_to_terminal(&render_buckets(&buckets)));
    if select {
        println!("selection: {}", format_row_id_arg(&encode_glyph_selection_with(&buckets, &cfg)));
    }
    Ok(())
}
