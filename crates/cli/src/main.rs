//! skillmem CLI - skill lifecycle maintenance for a trading agent.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skillmem_core::{Domain, LifecycleConfig, SkillFilter, SkillStatus};
use skillmem_engine::LifecycleEngine;
use skillmem_evolution::PromotionOutcome;
use skillmem_knowledge::render_skills;
use skillmem_storage::StaticDecisionFeed;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skillmem")]
#[command(about = "Skill memory lifecycle for trading agents", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON file of closed decisions to read from
    #[arg(long, global = true)]
    decisions: Option<PathBuf>,

    /// Override the storage path from the configuration
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expire skills past their TTL
    Sweep,
    /// Merge similar skills in every bucket
    Merge,
    /// Promote cross-domain themes to general skills
    Synthesize,
    /// Judge closed decisions that have no insight yet
    Judge {
        /// Only this domain
        #[arg(long)]
        domain: Option<Domain>,
    },
    /// Show the skills the decision step would see
    Retrieve {
        /// Domain
        domain: Domain,
        /// Maximum skills
        #[arg(long, default_value = "10")]
        max: usize,
    },
    /// Show aggregated judge context
    JudgeSynthesis {
        /// Only this domain
        #[arg(long)]
        domain: Option<Domain>,
        /// Insights considered (0 = configured window)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// List skills, archived and expired ones included
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<SkillStatus>,
        /// Filter by domain
        #[arg(long)]
        domain: Option<Domain>,
    },
    /// Effectiveness per domain
    Report,
    /// Run lifecycle cycles
    Run {
        /// Run this many cycles back to back and exit
        #[arg(long)]
        cycles: Option<u64>,
        /// Seconds between cycles when running continuously
        #[arg(long, default_value = "60")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(data) = cli.data {
        config.storage.path = data;
    }
    let feed = match &cli.decisions {
        Some(path) => StaticDecisionFeed::from_json_file(path)
            .await
            .with_context(|| format!("reading decisions from {}", path.display()))?,
        None => StaticDecisionFeed::new(),
    };
    let engine = LifecycleEngine::open(config, Arc::new(feed)).await?;

    match cli.command {
        Commands::Sweep => {
            let expired = engine.sweep_expired_skills(chrono::Utc::now()).await?;
            println!("Expired {} skills", expired.len());
            for id in expired {
                println!("  {}", id);
            }
        }
        Commands::Merge => {
            let report = engine.run_merge_pass().await;
            println!(
                "Scanned {} buckets: {} evolved, {} archived",
                report.buckets_scanned,
                report.evolved.len(),
                report.archived
            );
            for bucket in report.conflicts {
                println!("  skipped {} (changed during pass)", bucket);
            }
            for (bucket, error) in report.failures {
                println!("  failed {}: {}", bucket, error);
            }
        }
        Commands::Synthesize => {
            let report = engine.run_cross_domain_synthesis().await;
            println!("Themes ({})", report.patterns.len());
            for pattern in &report.patterns {
                println!(
                    "  {} | {} domains | {:.0}% of {} | {:?}",
                    pattern.theme_key,
                    pattern.domains().len(),
                    pattern.win_rate * 100.0,
                    pattern.sample_size,
                    pattern.applicability
                );
            }
            for (theme, outcome) in &report.outcomes {
                match outcome {
                    PromotionOutcome::Promoted(created) => {
                        println!("  promoted {} -> {}", theme, created.skill_id())
                    }
                    PromotionOutcome::Collision(existing) => {
                        println!("  {} already covered by {}", theme, existing)
                    }
                    PromotionOutcome::SynthesisFailed(e) => println!("  {} deferred: {}", theme, e),
                }
            }
            for (domain, error) in &report.failures {
                println!("  could not read {}: {}", domain, error);
            }
        }
        Commands::Judge { domain } => {
            let domains = match domain {
                Some(d) => vec![d],
                None => Domain::TRADING.to_vec(),
            };
            for domain in domains {
                let run = engine.judge_pending(domain).await?;
                println!(
                    "{}: {} judged, {} already judged, {} skipped",
                    domain, run.evaluated, run.already_judged, run.skipped
                );
            }
        }
        Commands::Retrieve { domain, max } => {
            let skills = engine.retrieve_skills(domain, max).await?;
            if skills.is_empty() {
                println!("No skills for {}", domain);
            } else {
                println!("{}", render_skills(&skills));
            }
        }
        Commands::JudgeSynthesis { domain, limit } => {
            let synthesis = engine.get_judge_synthesis(domain, limit).await?;
            if synthesis.is_empty() {
                println!("No judge insights yet");
            } else {
                println!("{}", synthesis.render());
            }
        }
        Commands::List { status, domain } => {
            let mut filter = SkillFilter::all();
            filter.statuses = status.map(|s| vec![s]);
            filter.domain = domain;
            let skills = engine.list_skills(&filter).await?;

            println!("Skills ({})", skills.len());
            for skill in skills {
                println!(
                    "  {} | {} | {} | {} | {}{}",
                    skill.id,
                    skill.status.as_str(),
                    skill.domain,
                    skill.skill_type,
                    skill.title,
                    if skill.excluded_from_retrieval { " (excluded)" } else { "" },
                );
            }
        }
        Commands::Report => {
            let report = engine.effectiveness_report().await?;
            println!("Skills: {}", report.total_skills);
            for (domain, stats) in &report.domains {
                println!(
                    "  {} | active {} ({} excluded) | archived {} | expired {} | success {} | applied {}/{}",
                    domain,
                    stats.active,
                    stats.excluded,
                    stats.archived,
                    stats.expired,
                    stats
                        .mean_success_rate
                        .map(|r| format!("{:.0}%", r * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                    stats.applied,
                    stats.presented,
                );
            }
        }
        Commands::Run { cycles, interval } => match cycles {
            Some(n) => {
                for _ in 0..n {
                    engine.run_cycle(chrono::Utc::now()).await;
                }
                info!("Completed {} cycles", engine.cycles());
            }
            None => {
                let engine = Arc::new(engine);
                let task = engine.clone().spawn_background(Duration::from_secs(interval.max(1)));
                tokio::signal::ctrl_c().await?;
                info!("Shutting down");
                task.stop().await;
            }
        },
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<LifecycleConfig> {
    let Some(path) = path else {
        return Ok(LifecycleConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}
