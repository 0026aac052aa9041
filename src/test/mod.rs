//! Workload tests that run the whole engine against a real (SQLite) database.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{NaiveDateTime, TimeDelta};

use crate::{
    competitions::{
        Competition, NewCompetition,
        bots::{
            BotSelector, CompileStatus, CompileStatusSource,
            record_compile_status, submit_bot,
        },
        create_competition,
        rounds::{
            dispatch::{DispatchError, DispatchRequest, GameExecutor},
            results::{BotResult, FixtureKey, GameOutcome, Winner},
            scheduler::Scheduler,
        },
        teams::{NewTeam, Team, register_team},
    },
    config::EngineConfig,
    state::{Conn, DbPool, make_pool},
    users::{Role, create_user},
    utc_now,
};

mod registry;

pub struct TestArena {
    pub pool: DbPool,
    pub config: EngineConfig,
    pub competition: Competition,
    teams: Mutex<usize>,
}

impl TestArena {
    /// A competition that started an hour ago and runs for a month.
    pub fn new(final_round: i64, games_per_round: i64) -> Self {
        Self::with_database(":memory:", final_round, games_per_round)
    }

    pub fn with_database(
        db_url: &str,
        final_round: i64,
        games_per_round: i64,
    ) -> Self {
        let pool = make_pool(db_url).unwrap();
        let now = utc_now();

        let competition = create_competition(
            NewCompetition {
                name: "Spring Ladder".to_string(),
                start: now - TimeDelta::hours(1),
                end: now + TimeDelta::days(30),
                type_: "Ranked".to_string(),
                final_round,
                games_per_round: Some(games_per_round),
                game_pack: None,
                allowed_submissions: None,
                submission_cutoff: None,
            },
            now - TimeDelta::hours(2),
            &mut pool.get().unwrap(),
        )
        .unwrap();

        Self {
            pool,
            config: EngineConfig::default(),
            competition,
            teams: Mutex::new(0),
        }
    }

    pub fn conn(&self) -> Conn {
        self.pool.get().unwrap()
    }

    pub fn id(&self) -> &str {
        &self.competition.id
    }

    pub fn competition(&self) -> Competition {
        Competition::fetch(&self.competition.id, &mut *self.conn())
            .unwrap()
            .unwrap()
    }

    /// Registers a team whose two bots have compiled successfully.
    pub fn add_team(&self) -> Team {
        let n = {
            let mut teams = self.teams.lock().unwrap();
            *teams += 1;
            *teams
        };

        let mut conn = self.conn();
        let now = utc_now() - TimeDelta::minutes(90);
        let owner = create_user(
            &format!("Player {n}"),
            &format!("uid=player{n}"),
            Role::Participant,
            now,
            &mut conn,
        )
        .unwrap();

        let team = register_team(
            NewTeam {
                owner: owner.id,
                competition_id: self.competition.id.clone(),
                partner: None,
            },
            self.config.rating.initial_elo,
            now,
            &mut conn,
        )
        .unwrap();

        for (slot, name) in [(BotSelector::First, "a"), (BotSelector::Second, "b")] {
            let bot = submit_bot(
                &team.id,
                slot,
                &format!("/submissions/{n}/{name}.zip"),
                now,
                &mut conn,
            )
            .unwrap();
            record_compile_status(&bot.id, &CompileStatus::Compiled, &mut conn)
                .unwrap();
        }

        Team::fetch(&team.id, &mut *conn).unwrap().unwrap()
    }

    pub fn add_teams(&self, n: usize) -> Vec<Team> {
        (0..n).map(|_| self.add_team()).collect()
    }

    pub fn team(&self, team_id: &str) -> Team {
        Team::fetch(team_id, &mut *self.conn()).unwrap().unwrap()
    }

    pub fn scheduler<'a>(&'a self, executor: &'a dyn GameExecutor) -> Scheduler<'a> {
        Scheduler::new(&self.config, executor)
    }
}

/// Accepts every fixture and remembers it, so the test can report results.
#[derive(Default)]
pub struct RecordingExecutor {
    requests: Mutex<Vec<DispatchRequest>>,
    pub refuse: AtomicBool,
}

impl RecordingExecutor {
    /// The fixtures dispatched since the last call.
    pub fn take(&self) -> Vec<DispatchRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

impl GameExecutor for RecordingExecutor {
    fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DispatchError("no runners available".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// A compilation service with a fixed answer per bot.
#[derive(Default)]
pub struct StaticCompileStatus(pub HashMap<String, CompileStatus>);

impl CompileStatusSource for StaticCompileStatus {
    fn compile_status(&self, bot_id: &str) -> Option<CompileStatus> {
        self.0.get(bot_id).cloned()
    }
}

pub fn key_of(request: &DispatchRequest) -> FixtureKey {
    FixtureKey {
        competition_id: request.competition_id.clone(),
        round: request.round,
        team_a: request.team_a.team_id.clone(),
        team_b: request.team_b.team_id.clone(),
    }
}

/// A well-formed outcome for `request`. The losing side's bots die.
pub fn outcome(request: &DispatchRequest, winner: Winner) -> GameOutcome {
    let a_survives = winner != Winner::Team(request.team_b.team_id.clone());
    let b_survives = winner != Winner::Team(request.team_a.team_id.clone());
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
        additional_data: Some(format!("{{\"fixture\":\"{}\"}}", request.fixture_id)),
    }
}

pub fn team_a_wins(request: &DispatchRequest) -> GameOutcome {
    outcome(request, Winner::Team(request.team_a.team_id.clone()))
}

pub fn later(now: NaiveDateTime, seconds: i64) -> NaiveDateTime {
    now + TimeDelta::seconds(seconds)
}
