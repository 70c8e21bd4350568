//! Subcommand implementations

use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use topology_api::{RecordStore, Snapshot};
use topology_core::{
    render_snapshot, BuildOptions, ClusterSource, CollectorConfig, DiagramFormat, PipelineOutput,
    PlacementMap, RunSummary, TopologyCollector, TopologyError,
};
use topology_kube::{
    ClusterCandidate, ClusterClient, ClusterLocator, KubeSource, KubeSourceConfig, LocatorConfig,
    PermissionAuditor, PermissionReport,
};
use tokio::time;
use tracing::{debug, info};

use crate::cli::{ClusterArgs, CollectArgs, Commands, DiagramArgs, PlacementArgs};
use crate::settings::Settings;

pub async fn run(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Locate(args) => locate(&settings, &args).await,
        Commands::Diagram(args) => diagram(&settings, &args).await,
        Commands::Placement(args) => placement(&settings, &args).await,
    }
}

fn locator_config(settings: &Settings, args: &ClusterArgs) -> LocatorConfig {
    let mut config = LocatorConfig::from_env();
    config.explicit = args.kubeconfigs.clone();
    config.namespaces = settings.namespaces.clone();
    config.probe_timeout = args
        .probe_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.probe_timeout());
    config
}

fn collector_config(settings: &Settings, args: &CollectArgs) -> CollectorConfig {
    CollectorConfig {
        max_concurrency: args.max_concurrency.unwrap_or(settings.max_concurrency),
        node_timeout: Duration::from_secs(args.node_timeout.unwrap_or(settings.node_timeout_secs)),
        overall_timeout: Duration::from_secs(args.timeout.unwrap_or(settings.timeout_secs)),
    }
}

fn build_options(settings: &Settings, args: &CollectArgs) -> BuildOptions {
    let mut pod_cidrs = settings.pod_cidrs.clone();
    for cidr in &args.pod_cidrs {
        if !pod_cidrs.contains(cidr) {
            pod_cidrs.push(*cidr);
        }
    }
    BuildOptions { pod_cidrs }
}

async fn locate(settings: &Settings, args: &ClusterArgs) -> Result<()> {
    let location = ClusterLocator::new(locator_config(settings, args)).locate().await;
    if location.candidates.is_empty() {
        return Err(TopologyError::NoClusterFound {
            searched: location.searched,
            failures: location.failures,
        }
        .into());
    }
    print!("{}", render_candidates(&location.candidates));
    Ok(())
}

/// A snapshot plus where it came from
struct Collected {
    snapshot: Snapshot,
    context: Option<String>,
    collected_at: DateTime<Utc>,
}

async fn collect(settings: &Settings, args: &CollectArgs) -> Result<Collected> {
    let collected = match &args.from_records {
        Some(dir) => {
            let store = RecordStore::read_dir(dir)
                .with_context(|| format!("Failed to read records from {}", dir.display()))?;
            let snapshot = store.to_snapshot()?;
            info!(
                "Replaying {} records for {} nodes from {}",
                store.len(),
                snapshot.nodes.len(),
                dir.display()
            );
            Collected {
                snapshot,
                context: None,
                collected_at: Utc::now(),
            }
        }
        None => collect_live(settings, args).await?,
    };

    if let Some(dir) = &args.export_records {
        let store = RecordStore::from_snapshot(&collected.snapshot);
        store
            .write_dir(dir)
            .with_context(|| format!("Failed to export records to {}", dir.display()))?;
        info!("Exported {} records to {}", store.len(), dir.display());
    }
    Ok(collected)
}

async fn collect_live(settings: &Settings, args: &CollectArgs) -> Result<Collected> {
    let locator = ClusterLocator::new(locator_config(settings, &args.cluster));
    let candidate: ClusterCandidate = locator.select(args.cluster.context.as_deref()).await?;
    info!(
        context = %candidate.context,
        namespace = %candidate.namespace,
        "Selected cluster {}",
        candidate.cluster
    );

    let mut config = collector_config(settings, args);
    let started = Instant::now();
    let (source, report, nodes) = within(config.overall_timeout, async {
        let client = ClusterClient::connect(&candidate.path, &candidate.context).await?;
        let auditor = PermissionAuditor::new(client.clone_client());
        let source = Arc::new(KubeSource::new(
            client.clone_client(),
            KubeSourceConfig {
                namespace: candidate.namespace.clone(),
                nbdb_containers: settings.nbdb_containers.clone(),
            },
        ));
        let (report, nodes) =
            tokio::join!(auditor.audit(&candidate.context), source.list_nodes());
        Ok::<_, anyhow::Error>((source, report, nodes))
    })
    .await?;
    // The collector gets what is left; the consent prompt is not counted
    config.overall_timeout = config.overall_timeout.saturating_sub(started.elapsed());
    debug!(remaining = ?config.overall_timeout, "Cluster setup done");

    confirm_access(&report, args.yes)?;
    let nodes = nodes?;

    let collector = TopologyCollector::new(source, config);
    let snapshot = collector.collect_nodes(nodes).await?;

    Ok(Collected {
        snapshot,
        context: Some(candidate.context),
        collected_at: Utc::now(),
    })
}

/// Run a setup step under the collection budget
async fn within<T>(budget: Duration, step: impl Future<Output = Result<T>>) -> Result<T> {
    match time::timeout(budget, step).await {
        Ok(result) => result,
        Err(_) => Err(TopologyError::CollectionTimeout(budget).into()),
    }
}

/// Ask before reading with credentials that could write
fn confirm_access(report: &PermissionReport, yes: bool) -> Result<()> {
    if report.is_read_only() {
        return Ok(());
    }
    eprintln!("{}", report.render_text());
    let acknowledged = yes || (io::stdin().is_terminal() && prompt("Continue? [y/N] ")?);
    report.gate(acknowledged)?;
    Ok(())
}

fn prompt(question: &str) -> Result<bool> {
    let mut stderr = io::stderr();
    stderr.write_all(question.as_bytes())?;
    stderr.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn diagram(settings: &Settings, args: &DiagramArgs) -> Result<()> {
    let collected = collect(settings, &args.collect).await?;
    let format = args.format.unwrap_or(settings.format);
    let output = render_snapshot(
        &collected.snapshot,
        &build_options(settings, &args.collect),
        format,
    );

    match &args.output {
        Some(path) => {
            fs::write(path, &output.diagram)
                .with_context(|| format!("Failed to write diagram to {}", path.display()))?;
            info!("Wrote {} diagram to {}", format, path.display());
        }
        None => print!("{}", output.diagram),
    }

    let summary = summarize(&collected, &output, format);
    if args.summary_json {
        eprintln!("{}", summary.to_json()?);
    } else {
        eprint!("{}", summary.render_text());
    }
    Ok(())
}

async fn placement(settings: &Settings, args: &PlacementArgs) -> Result<()> {
    let collected = collect(settings, &args.collect).await?;
    print!("{}", placement_report(&collected.snapshot, args.json)?);
    Ok(())
}

fn placement_report(snapshot: &Snapshot, json: bool) -> Result<String> {
    let placement = PlacementMap::classify(snapshot.components());
    if json {
        let mut out = serde_json::to_string_pretty(&placement)?;
        out.push('\n');
        Ok(out)
    } else {
        Ok(render_placement(&placement))
    }
}

fn summarize(collected: &Collected, output: &PipelineOutput, format: DiagramFormat) -> RunSummary {
    let summary = RunSummary::new(&collected.snapshot, output, format, collected.collected_at);
    match &collected.context {
        Some(context) => summary.with_context(context.clone()),
        None => summary,
    }
}

/// Column-aligned text table, header first
fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows) {
        let mut line = String::new();
        for (i, (cell, width)) in row.iter().zip(&widths).enumerate() {
            if i + 1 == row.len() {
                line.push_str(cell);
            } else {
                let _ = write!(line, "{:<width$}  ", cell, width = width);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn render_candidates(candidates: &[ClusterCandidate]) -> String {
    let rows: Vec<Vec<String>> = candidates
        .iter()
        .map(|c| {
            vec![
                c.context.clone(),
                c.cluster.clone(),
                c.namespace.clone(),
                c.node_count.to_string(),
                c.path.display().to_string(),
            ]
        })
        .collect();
    render_table(&["CONTEXT", "CLUSTER", "NAMESPACE", "NODES", "KUBECONFIG"], &rows)
}

fn render_placement(placement: &PlacementMap) -> String {
    let rows: Vec<Vec<String>> = placement
        .records()
        .map(|r| {
            vec![
                r.name.clone(),
                r.kind.to_string(),
                r.structural.to_string(),
                r.effective.to_string(),
                r.reporters.len().to_string(),
                r.distinct_identities.to_string(),
                r.override_rule.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    let mut out = format!(
        "mode: {}, override table v{}\n",
        placement.mode(),
        placement.table_version()
    );
    out.push_str(&render_table(
        &["NAME", "KIND", "STRUCTURAL", "EFFECTIVE", "REPORTERS", "IDENTITIES", "RULE"],
        &rows,
    ));
    out
}
