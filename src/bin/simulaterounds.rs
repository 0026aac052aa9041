//! Simulates a competition.
//!
//! Seeds a competition with randomly skilled teams and plays every round
//! through the round driver. Games are decided by the teams' hidden skill, so
//! after a few rounds the standings should roughly follow it.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use batalja::{
    competitions::{
        NewCompetition,
        bots::{BotSelector, CompileStatus, record_compile_status, submit_bot},
        create_competition,
        rating::expected_score,
        rounds::{
            dispatch::{DispatchError, DispatchRequest, GameExecutor},
            results::{BotResult, GameOutcome, Winner},
        },
        standings::standings,
        teams::{NewTeam, register_team},
    },
    config::EngineConfig,
    driver::RoundDriver,
    state::{DbPool, make_pool},
    users::{Role, create_user},
    utc_now,
};
use chrono::TimeDelta;
use clap::Parser;
use rand::{Rng, SeedableRng, distr::Uniform};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;

#[derive(Parser)]
pub struct Simulate {
    database_url: Option<String>,
    #[clap(long, default_value_t = 12)]
    teams: usize,
    #[clap(long, default_value_t = 5)]
    rounds: i64,
    #[clap(long, default_value_t = 4)]
    games_per_round: i64,
    /// Makes a run reproducible. Random if not given.
    #[clap(long)]
    seed: Option<u64>,
}

struct ChannelExecutor(mpsc::UnboundedSender<DispatchRequest>);

impl GameExecutor for ChannelExecutor {
    fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        self.0
            .send(request.clone())
            .map_err(|_| DispatchError("the simulator has stopped".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Simulate::parse();
    let mut config = EngineConfig::load(None)?;
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    config.scheduler.poll_interval_ms = 50;
    config.scheduler.round_interval_secs = 0;
    config.scheduler.auto_advance = true;

    let mut rng = match args.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };

    let pool = make_pool(&config.database_url)?;
    let (competition_id, skill) =
        seed_competition(&pool, &config, &args, &mut rng)?;
    println!(
        "Simulating {} rounds between {} teams.",
        args.rounds, args.teams
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchRequest>();
    let driver = RoundDriver::new(
        pool.clone(),
        Arc::new(config),
        Arc::new(ChannelExecutor(tx)),
    );

    let reporter = driver.reporter();
    let runner = tokio::spawn(async move {
        let mut played = 0usize;
        while let Some(request) = rx.recv().await {
            let outcome = play(&request, &skill, &mut rng);
            let reporter = reporter.clone();
            let handle = request.handle.clone();
            tokio::task::spawn_blocking(move || {
                reporter.report_by_handle(&handle, &outcome)
            })
            .await??;
            played += 1;
        }
        anyhow::Ok(played)
    });

    let status = driver.run(&competition_id).await?;
    drop(driver);
    let played = runner.await??;

    println!("Finished ({}) after {played} games.", status.as_str());
    let mut conn = pool.get()?;
    for standing in standings(&competition_id, &mut *conn)? {
        println!(
            "{:>3}. {} {:>5} ({} played)",
            standing.rank,
            standing.team_id,
            standing.elo,
            standing.played()
        );
    }

    Ok(())
}

/// Creates the competition and its teams. Returns the competition's id and
/// each team's hidden skill.
fn seed_competition(
    pool: &DbPool,
    config: &EngineConfig,
    args: &Simulate,
    rng: &mut ChaCha8Rng,
) -> anyhow::Result<(String, HashMap<String, i64>)> {
    let mut conn = pool.get()?;
    let now = utc_now();

    let competition = create_competition(
        NewCompetition {
            name: "Simulated Ladder".to_string(),
            start: now,
            end: now + TimeDelta::days(1),
            type_: "Ranked".to_string(),
            final_round: args.rounds,
            games_per_round: Some(args.games_per_round),
            game_pack: None,
            allowed_submissions: None,
            submission_cutoff: None,
        },
        now,
        &mut conn,
    )
    .context("failed to create the competition")?;

    let skills = Uniform::new_inclusive(600i64, 1400).context("bad skill range")?;
    let mut skill = HashMap::with_capacity(args.teams);
    for n in 0..args.teams {
        let owner = create_user(
            &format!("Simulated {n}"),
            &format!("uid=sim{n}"),
            Role::Participant,
            now,
            &mut conn,
        )?;
        let team = register_team(
            NewTeam {
                owner: owner.id,
                competition_id: competition.id.clone(),
                partner: None,
            },
            config.rating.initial_elo,
            now,
            &mut conn,
        )?;
        for slot in [BotSelector::First, BotSelector::Second] {
            let bot = submit_bot(&team.id, slot, "/dev/null", now, &mut conn)?;
            record_compile_status(&bot.id, &CompileStatus::Compiled, &mut conn)?;
        }
        skill.insert(team.id, rng.sample(&skills));
    }

    Ok((competition.id, skill))
}

fn play(
    request: &DispatchRequest,
    skill: &HashMap<String, i64>,
    rng: &mut ChaCha8Rng,
) -> GameOutcome {
    let skill_of = |team: &str| skill.get(team).copied().unwrap_or(1000);
    let p_a = expected_score(
        skill_of(&request.team_a.team_id),
        skill_of(&request.team_b.team_id),
    );

    let roll: f64 = rng.random();
    let winner = if roll < 0.02 {
        Winner::Void
    } else if roll < 0.08 {
        Winner::Draw
    } else if rng.random_bool(p_a) {
        Winner::Team(request.team_a.team_id.clone())
    } else {
        Winner::Team(request.team_b.team_id.clone())
    };

    // Nobody is eliminated in a drawn or void game.
    let survives = |team: &str| match &winner {
        Winner::Team(id) => id == team,
        Winner::Draw | Winner::Void => true,
    };
    let a_survives = survives(&request.team_a.team_id);
    let b_survives = survives(&request.team_b.team_id);

    GameOutcome {
        winner,
        bots: vec![
            BotResult {
                bot_id: request.team_a.bot1.clone(),
                survived: a_survives,
            },
            BotResult {
                bot_id: request.team_a.bot2.clone(),
                survived: a_survives,
            },
            BotResult {
                bot_id: request.team_b.bot1.clone(),
                survived: b_survives,
            },
            BotResult {
                bot_id: request.team_b.bot2.clone(),
                survived: b_survives,
            },
        ],
        public: true,
        additional_data: None,
    }
}

