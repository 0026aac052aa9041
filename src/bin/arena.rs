//! Operator commands for a competition's round engine.
//!
//! Fixtures dispatched by `open-round`/`step` are written to stdout, one JSON
//! object per line, for whatever runs the games. Their results come back in
//! through `ingest`.

use std::path::PathBuf;

use anyhow::Context;
use batalja::{
    competitions::{
        Competition,
        rounds::{
            dispatch::{DispatchError, DispatchRequest, GameExecutor},
            results::{FixtureKey, GameOutcome, ingest_by_handle, ingest_result},
            round_state,
            scheduler::{Scheduler, resume_competition},
        },
        standings::{replay_team_elo, standings},
        teams::Team,
    },
    config::EngineConfig,
    state::make_pool,
    utc_now,
};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde::Deserialize;

#[derive(Parser)]
struct Args {
    /// Path to the engine's TOML configuration.
    #[clap(long, short)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates the database (if needed) and applies pending migrations.
    Migrate,
    /// Opens the competition's next round.
    OpenRound { competition_id: String },
    /// Advances the current round by one step.
    Step { competition_id: String },
    /// Resumes a halted competition.
    Resume { competition_id: String },
    Standings { competition_id: String },
    /// Prints the current round as JSON.
    RoundState { competition_id: String },
    /// Ingests a result from a JSON file (`-` reads stdin).
    Ingest { path: PathBuf },
    /// Replays the rating history of every team in the competition.
    Audit { competition_id: String },
}

/// A result as reported by the game runner, addressed either by the teams
/// or by the handle it was dispatched with.
#[derive(Deserialize)]
#[serde(untagged)]
enum Report {
    ByFixture {
        fixture: FixtureKey,
        outcome: GameOutcome,
    },
    ByHandle {
        handle: String,
        outcome: GameOutcome,
    },
}

/// Hands fixtures to the game runner by printing them.
struct JsonLinesExecutor;

impl GameExecutor for JsonLinesExecutor {
    fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        let line = serde_json::to_string(request)
            .map_err(|e| DispatchError(format!("could not encode the request: {e}")))?;
        println!("{line}");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;

    // Migrations run whenever a pool is made.
    let pool = make_pool(&config.database_url)
        .with_context(|| format!("failed to open {}", config.database_url))?;
    let mut conn = pool.get()?;
    let conn = &mut *conn;

    let executor = JsonLinesExecutor;
    let scheduler = Scheduler::new(&config, &executor);
    let now = utc_now();

    match args.command {
        Command::Migrate => {
            eprintln!("database at {} is up to date", config.database_url);
        }
        Command::OpenRound { competition_id } => {
            let round = scheduler.open_next_round(&competition_id, now, conn)?;
            eprintln!("opened round {}", round.seq);
        }
        Command::Step { competition_id } => {
            let report = scheduler.step(&competition_id, now, conn)?;
            eprintln!(
                "round {}: {} -> {} ({} dispatched, {} voided)",
                report.round,
                report.from.as_str(),
                report.to.as_str(),
                report.dispatched,
                report.voided
            );
        }
        Command::Resume { competition_id } => {
            let competition = resume_competition(&competition_id, conn)?;
            eprintln!(
                "competition {} is {}",
                competition.id,
                competition.status().as_str()
            );
        }
        Command::Standings { competition_id } => {
            for standing in standings(&competition_id, conn)? {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    standing.rank,
                    standing.team_id,
                    standing.elo,
                    standing.played(),
                    if standing.withdrawn { "\twithdrawn" } else { "" }
                );
            }
        }
        Command::RoundState { competition_id } => match round_state(&competition_id, conn)? {
            Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
            None => eprintln!("no round has been opened yet"),
        },
        Command::Ingest { path } => {
            let contents = if path.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?
            };
            let report: Report =
                serde_json::from_str(&contents).context("malformed result")?;

            let rating = config.rating();
            let status = match report {
                Report::ByFixture { fixture, outcome } => {
                    ingest_result(&fixture, &outcome, &rating, now, conn)?
                }
                Report::ByHandle { handle, outcome } => {
                    ingest_by_handle(&handle, &outcome, &rating, now, conn)?
                }
            };
            eprintln!("{status:?}");
        }
        Command::Audit { competition_id } => {
            Competition::fetch(&competition_id, conn)?
                .with_context(|| format!("no competition {competition_id}"))?;

            let mut inconsistent = Vec::new();
            for team in Team::of_competition(&competition_id, conn)? {
                let audit = replay_team_elo(&team.id, conn)?;
                println!(
                    "{}\tstored {}\treplayed {}\t{} games",
                    audit.team_id,
                    audit.stored_elo,
                    audit.replayed_elo,
                    audit.entries.len()
                );
                if !audit.consistent() {
                    inconsistent.push(audit.team_id);
                }
            }

            if !inconsistent.is_empty() {
                anyhow::bail!(
                    "ratings do not replay for {}",
                    inconsistent.iter().join(", ")
                );
            }
        }
    }

    Ok(())
}
