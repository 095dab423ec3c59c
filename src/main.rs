use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use clusterdoctor::scheduler::pairs;
use clusterdoctor::storage;

#[derive(Parser)]
#[command(
    name = "clusterdoctor",
    about = "Continuous validation orchestrator for GPU clusters",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling loop (or a single cycle with --once)
    Orchestrate {
        /// TOML config file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run one cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Create the result store schema (idempotent)
    Init {
        /// SQLite database path
        #[arg(long, default_value = "data/validation.db")]
        db: String,
    },

    /// Append one completed run to the history log
    Add {
        #[arg(long, default_value = "data/validation.db")]
        db: String,

        /// Node name
        #[arg(long)]
        node: String,

        /// Test name
        #[arg(long)]
        test: String,

        /// pass|fail|incomplete
        #[arg(long)]
        result: String,

        /// ISO-8601 UTC or epoch seconds; defaults to now
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Show latest status per (node, test)
    Status {
        #[arg(long, default_value = "data/validation.db")]
        db: String,

        /// Filter by node name
        #[arg(long)]
        node: Option<String>,
    },

    /// Show the most recent history rows
    History {
        #[arg(long, default_value = "data/validation.db")]
        db: String,

        /// Number of rows
        #[arg(long, default_value = "20")]
        tail: u32,
    },

    /// Export latest status to a file
    Export {
        #[arg(long, default_value = "data/validation.db")]
        db: String,

        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,

        /// Output file path
        #[arg(long)]
        out: PathBuf,
    },

    /// Show cluster GPU capacity (NODE/CAP/ALLOC/USED/FREE)
    FreeNodes {
        /// Substring filter on node names
        #[arg(long, default_value = "hgx")]
        filter: String,
    },

    /// Generate parallel-safe all-pairs rounds (no node repeats per round)
    Pairs {
        /// Use nodes 0..n-1 (ignored if --nodes-file is given)
        #[arg(long)]
        nitems: Option<usize>,

        /// Path with one node per line
        #[arg(long)]
        nodes_file: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: PairsFormat,

        /// Check per-round uniqueness and global coverage
        #[arg(long)]
        verify: bool,
    },

    /// Delete all validation vcjobs in the namespace
    PurgeJobs {
        #[arg(long, default_value = "gcr-admin")]
        namespace: String,

        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum PairsFormat {
    Text,
    Csv,
    Jsonl,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Orchestrate { config, once } => {
            let cfg = clusterdoctor::config::Config::load(config.as_deref())?;
            tracing::info!("Starting clusterdoctor orchestrator");
            clusterdoctor::orchestrate(cfg, once).await?;
        }
        Commands::Init { db } => {
            storage::open_pool(&db)?;
            println!("Initialized DB: {}", db);
            println!("Objects: table=runs, view=latest_status, metric tables");
        }
        Commands::Add {
            db,
            node,
            test,
            result,
            timestamp,
        } => {
            let result: storage::RunResult = result.parse()?;
            let epoch = match timestamp {
                Some(ts) => storage::parse_timestamp(&ts)?,
                None => chrono::Utc::now().timestamp(),
            };

            let pool = storage::open_pool(&db)?;
            storage::insert_run(&pool, &node, &test, epoch, result)?;

            println!("Inserted 1 run:");
            println!("  node={}", node);
            println!("  test={}", test);
            println!("  timestamp={} ({})", storage::epoch_to_iso(epoch), epoch);
            println!("  result={}", result);
        }
        Commands::Status { db, node } => {
            let pool = storage::open_pool(&db)?;
            let rows = storage::query_latest_status(&pool, node.as_deref())?;

            println!("node\ttest\tlatest_timestamp\tresult");
            for r in rows {
                println!(
                    "{}\t{}\t{}\t{}",
                    r.node,
                    r.test,
                    storage::epoch_to_iso(r.latest_timestamp),
                    r.result
                );
            }
        }
        Commands::History { db, tail } => {
            let pool = storage::open_pool(&db)?;
            let rows = storage::query_history(&pool, tail)?;

            println!("node\ttest\ttimestamp\tresult");
            for r in rows {
                println!(
                    "{}\t{}\t{}\t{}",
                    r.node,
                    r.test,
                    storage::epoch_to_iso(r.timestamp),
                    r.result
                );
            }
        }
        Commands::Export { db, format, out } => {
            let pool = storage::open_pool(&db)?;
            let rows = storage::query_latest_status(&pool, None)?;
            let count = rows.len();

            if let Some(dir) = out.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }

            match format {
                ExportFormat::Csv => {
                    let mut body = String::from("node,test,latest_timestamp,result\n");
                    for r in rows {
                        body.push_str(&format!(
                            "{},{},{},{}\n",
                            r.node,
                            r.test,
                            storage::epoch_to_iso(r.latest_timestamp),
                            r.result
                        ));
                    }
                    std::fs::write(&out, body)?;
                }
                ExportFormat::Json => {
                    let payload = serde_json::json!({
                        "generated_at": storage::epoch_to_iso(chrono::Utc::now().timestamp()),
                        "latest": rows,
                    });
                    std::fs::write(&out, serde_json::to_string_pretty(&payload)?)?;
                }
            }
            println!("Wrote: {} (rows={})", out.display(), count);
        }
        Commands::FreeNodes { filter } => {
            use clusterdoctor::cluster::{self, CapacityApi};

            let api = cluster::kubectl::KubectlCapacity::new(Some(filter));
            let nodes = api.list_nodes().await?;

            println!("\n{:<30} {:<6} {:<6} {:<6} {:<6}", "NODE NAME", "CAP", "ALLOC", "USED", "FREE");
            println!("{:-<60}", "");
            if nodes.is_empty() {
                println!("No matching nodes found.");
            } else {
                for n in &nodes {
                    println!(
                        "{:<30} {:<6} {:<6} {:<6} {:<6}",
                        n.node,
                        n.capacity,
                        n.allocatable,
                        n.used,
                        n.free()
                    );
                }
                let t = cluster::totals(&nodes);
                println!("{:-<60}", "");
                println!(
                    "{:<30} {:<6} {:<6} {:<6} {:<6}\n",
                    "TOTAL", t.capacity, t.allocatable, t.used, t.free
                );
            }
        }
        Commands::Pairs {
            nitems,
            nodes_file,
            format,
            verify,
        } => {
            let items = load_participants(nitems, nodes_file)?;
            let rounds = if verify {
                let rounds = pairs::checked_schedule(&items)?;
                let expected = items.len() * items.len().saturating_sub(1) / 2;
                eprintln!("Coverage: {}/{} unordered pairs -> OK", expected, expected);
                rounds
            } else {
                pairs::schedule(&items)
            };

            emit_rounds(&rounds, format)?;
        }
        Commands::PurgeJobs { namespace, yes } => {
            if !yes {
                anyhow::bail!("refusing to purge without --yes");
            }
            let jobs = clusterdoctor::jobs::kubectl::KubectlJobs::new(namespace);
            let deleted = jobs.purge_validation_jobs().await?;
            println!("Deleted {} validation jobs.", deleted);
        }
    }

    Ok(())
}

fn load_participants(nitems: Option<usize>, nodes_file: Option<PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = nodes_file {
        let raw = std::fs::read_to_string(&path)?;
        let items: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        return Ok(items);
    }
    match nitems {
        Some(n) if n >= 2 => Ok((0..n).map(|i| i.to_string()).collect()),
        _ => anyhow::bail!("provide --nodes-file or --nitems >= 2"),
    }
}

fn emit_rounds(rounds: &[pairs::Round], format: PairsFormat) -> Result<()> {
    match format {
        PairsFormat::Text => {
            for round in rounds {
                let line: Vec<String> =
                    round.iter().map(|(a, b)| format!("{} {}", a, b)).collect();
                println!("{}", line.join(" | "));
            }
        }
        PairsFormat::Csv => {
            println!("round,a,b");
            for (i, round) in rounds.iter().enumerate() {
                for (a, b) in round {
                    println!("{},{},{}", i, a, b);
                }
            }
        }
        PairsFormat::Jsonl => {
            for (i, round) in rounds.iter().enumerate() {
                println!(
                    "{}",
                    serde_json::to_string(&serde_json::json!({"round": i, "pairs": round}))?
                );
            }
        }
    }
    Ok(())
}
