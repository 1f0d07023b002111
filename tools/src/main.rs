//! pipeline-runner: headless batch runner for the remediation pipeline.
//!
//! Usage:
//!   pipeline-runner --seed 42 --transactions 2500 --db run.db
//!   pipeline-runner --feed feed.json --config pipeline.json --history-json history.json
//!   pipeline-runner --seed 7 --proposals recorded.json --as-of 2026-01-31T23:59:00Z --json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use remediation_core::{
    config::PipelineConfig,
    engine::{new_run_id, raw_feed, AnalysisEngine, Collaborators},
    execution::SimulatedExecutor,
    feed::{generate, FeedSpec},
    pattern_history::{JsonFileHistoryRepository, PatternHistoryRepository},
    proposer::{CannedProposer, DecisionProposer, ScriptedCouncil},
    report::RunReport,
    store::PipelineStore,
    transaction::RawTransaction,
};
use std::env;

#[derive(serde::Serialize)]
struct JsonSummary<'a> {
    run_id: &'a str,
    outcome: &'static str,
    transactions_processed: usize,
    transactions_skipped: usize,
    clusters: usize,
    proposed: usize,
    validated: usize,
    approved: usize,
    refused: usize,
    total_cost: f64,
    total_revenue_saved: f64,
    net_profit: f64,
    capital_preserved: f64,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("{e:#}");
        eprintln!("pipeline-runner: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let transactions = parse_arg(&args, "--transactions", 2500usize);
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let feed_path = flag_value(&args, "--feed");
    let config_path = flag_value(&args, "--config");
    let history_path = flag_value(&args, "--history-json");
    let proposals_path = flag_value(&args, "--proposals");
    let as_of = flag_value(&args, "--as-of")
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .with_context(|| format!("--as-of '{s}' is not RFC 3339"))
        })
        .transpose()?;
    let json_output = args.iter().any(|a| a == "--json");

    let config = match config_path {
        Some(p) => PipelineConfig::load(p)?,
        None => PipelineConfig::default(),
    };

    let records: Vec<RawTransaction> = match feed_path {
        Some(p) => {
            let content = std::fs::read_to_string(p).with_context(|| format!("Cannot read feed {p}"))?;
            serde_json::from_str(&content).with_context(|| format!("Cannot parse feed {p}"))?
        }
        None => raw_feed(&generate(&FeedSpec {
            seed,
            total_transactions: transactions,
            ..FeedSpec::default()
        })),
    };

    if !json_output {
        println!("pipeline-runner: payment remediation analysis");
        println!("  seed:          {seed}");
        println!("  records:       {}", records.len());
        println!("  db:            {db}");
        println!("  feed:          {}", feed_path.unwrap_or("(synthetic)"));
        println!("  history:       {}", history_path.unwrap_or("(db)"));
        println!();
    }

    let store = PipelineStore::open(db)?;
    store.migrate()?;
    let run_id = new_run_id();
    let seed_recorded = feed_path.is_none().then_some(seed);
    store.insert_run(&run_id, seed_recorded, env!("CARGO_PKG_VERSION"), Utc::now())?;

    let json_repo = history_path.map(JsonFileHistoryRepository::new);
    let history: &dyn PatternHistoryRepository = match &json_repo {
        Some(repo) => repo,
        None => &store,
    };

    let mut council = ScriptedCouncil::new(&config.economics);
    let mut canned = match proposals_path {
        Some(p) => {
            let content = std::fs::read_to_string(p).with_context(|| format!("Cannot read proposals {p}"))?;
            Some(CannedProposer::from_json(&content)?)
        }
        None => None,
    };
    let proposer: &mut dyn DecisionProposer = match canned.as_mut() {
        Some(c) => c,
        None => &mut council,
    };
    let mut executor = SimulatedExecutor::new(&config.economics);

    let mut engine = AnalysisEngine::new(run_id.clone(), &config, &store);
    let report = engine.run(
        records,
        as_of,
        Collaborators {
            history,
            proposer,
            executor: &mut executor,
        },
    )?;

    if json_output {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_json(report: &RunReport) -> Result<()> {
    let summary = JsonSummary {
        run_id: &report.run_id,
        outcome: report.outcome.label(),
        transactions_processed: report.transactions_processed,
        transactions_skipped: report.transactions_skipped,
        clusters: report.clusters_analysed,
        proposed: report.decisions_proposed,
        validated: report.decisions_validated,
        approved: report.decisions_approved,
        refused: report.decisions_refused,
        total_cost: report.metrics.total_cost,
        total_revenue_saved: report.metrics.total_revenue_saved,
        net_profit: report.metrics.net_profit,
        capital_preserved: report.capital_preserved,
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {}", report.run_id);
    println!("  as_of:           {}", report.as_of);
    println!("  outcome:         {}", report.outcome.label());
    println!("  transactions:    {} ({} skipped)", report.transactions_processed, report.transactions_skipped);
    println!("  failures:        {}", report.failures);
    println!("  clusters:        {} of {} found", report.clusters_analysed, report.clusters_found);
    println!("  proposed:        {}", report.decisions_proposed);
    println!("  validated:       {}", report.decisions_validated);
    println!("  rejected:        {}", report.decisions_rejected);
    println!("  approved:        {}", report.decisions_approved);
    println!("  refused:         {}", report.decisions_refused);

    if !report.calibrations.is_empty() {
        println!();
        println!("=== CALIBRATIONS ===");
        for c in &report.calibrations {
            println!(
                "  {:<32} {:<18} baseline {:.2}{}{}",
                c.cluster.to_string(),
                c.pattern_type.label(),
                c.confidence_baseline,
                if c.floor_hit { " [floor]" } else { "" },
                if c.needs_rescan { " [rescan]" } else { "" }
            );
        }
    }

    if !report.rejections.is_empty() {
        println!();
        println!("=== REJECTED ===");
        for r in &report.rejections {
            println!("  #{} {}", r.index, r.summary());
        }
    }

    if !report.overrides.is_empty() {
        println!();
        println!("=== SAFETY OVERRIDES ===");
        for o in &report.overrides {
            println!(
                "  {} '{}': {} (₹{:.0} preserved)",
                o.decision.action(),
                o.decision.pattern_detected(),
                o.reason,
                o.capital_preserved
            );
        }
    }

    let m = &report.metrics;
    println!();
    println!("=== FINANCIAL SUMMARY ===");
    println!("  reroutes:          {}", m.reroutes_executed);
    println!("  ignored:           {}", m.reroutes_ignored);
    println!("  alerts:            {}", m.alerts_raised);
    println!("  total cost:        ₹{:.2}", m.total_cost);
    println!("  revenue saved:     ₹{:.2}", m.total_revenue_saved);
    println!("  net profit:        ₹{:.2}", m.net_profit);
    println!("  ROI:               {:.1}%", m.roi());
    println!("  efficiency:        {:.1}%", m.efficiency_score());
    println!("  capital preserved: ₹{:.2}", report.capital_preserved);
    match m.decision_accuracy {
        Some(a) => println!("  accuracy:          {:.0}%", a * 100.0),
        None => println!("  accuracy:          (no graded predictions yet)"),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    flag_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
