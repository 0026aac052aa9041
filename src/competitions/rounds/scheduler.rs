//! The per-competition round state machine.
//!
//! All state lives in the database, so a scheduler can be dropped at any
//! point and a fresh one picks up where it left off. Each call to
//! [`Scheduler::step`] performs at most one state transition.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus, RegistryError,
        bots::{CompileStatusSource, refresh_compile_status},
        rounds::{
            Round, RoundState,
            dispatch::{GameExecutor, dispatch_queued, void_timed_out},
            draws::{
                DrawInput, Fixture, PairingError, PairingHistory,
                persist_draw,
                swiss::{describe, make_draw},
            },
            eligibility::{EligibilityError, eligible_teams},
            transition,
        },
        set_status,
        standings::snapshot_round,
    },
    config::EngineConfig,
    schema::{competition_rounds, competitions},
};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("competition {0} does not exist")]
    CompetitionNotFound(String),
    #[error("competition {competition_id} is {status:?}, expected {expected}")]
    InvalidStatus {
        competition_id: String,
        status: CompetitionStatus,
        expected: &'static str,
    },
    #[error("competition {0} has not started yet")]
    NotStarted(String),
    #[error("competition {0} has no open round")]
    NoOpenRound(String),
    #[error("round {round} is still {state:?}")]
    RoundInProgress { round: i64, state: RoundState },
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Pairing(#[from] PairingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

/// What a single [`Scheduler::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub round: i64,
    pub from: RoundState,
    pub to: RoundState,
    pub dispatched: usize,
    pub voided: usize,
}

impl StepReport {
    /// Whether anything changed. A step that did nothing is waiting on
    /// results (or on an operator).
    pub fn progressed(&self) -> bool {
        self.from != self.to || self.dispatched > 0 || self.voided > 0
    }
}

pub struct Scheduler<'a> {
    pub config: &'a EngineConfig,
    pub executor: &'a dyn GameExecutor,
    /// When set, compile status is pulled from here before every pairing.
    pub compile_status: Option<&'a dyn CompileStatusSource>,
}

impl<'a> Scheduler<'a> {
    pub fn new(config: &'a EngineConfig, executor: &'a dyn GameExecutor) -> Self {
        Self {
            config,
            executor,
            compile_status: None,
        }
    }

    pub fn with_compile_status(
        mut self,
        source: &'a dyn CompileStatusSource,
    ) -> Self {
        self.compile_status = Some(source);
        self
    }

    /// Opens the round after the current one. Refused while the current round
    /// is unfinished, or unless the competition is open or running. If the
    /// competition has already played its last round it is closed instead.
    #[tracing::instrument(skip(self, conn))]
    pub fn open_next_round(
        &self,
        competition_id: &str,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
    ) -> Result<Round, SchedulerError> {
        conn.immediate_transaction(
            |conn| -> Result<Result<Round, SchedulerError>, diesel::result::Error> {
                let Some(competition) = Competition::fetch(competition_id, conn)? else {
                    return Ok(Err(SchedulerError::CompetitionNotFound(
                        competition_id.to_string(),
                    )));
                };

                match competition.status() {
                    CompetitionStatus::Open | CompetitionStatus::Running => {}
                    status => {
                        return Ok(Err(SchedulerError::InvalidStatus {
                            competition_id: competition.id,
                            status,
                            expected: "open or running",
                        }));
                    }
                }

                if now < competition.start {
                    return Ok(Err(SchedulerError::NotStarted(competition.id)));
                }

                let played = match Round::current(competition_id, conn)? {
                    Some(current) if current.state() != RoundState::Complete => {
                        return Ok(Err(SchedulerError::RoundInProgress {
                            round: current.seq,
                            state: current.state(),
                        }));
                    }
                    Some(current) => current.seq,
                    None => 0,
                };

                if competition.is_last_round(played, now) {
                    set_status(competition_id, CompetitionStatus::Closed, conn)?;
                    tracing::info!(played, "no rounds left, competition closed");
                    return Ok(Err(SchedulerError::InvalidStatus {
                        competition_id: competition.id,
                        status: CompetitionStatus::Closed,
                        expected: "open or running",
                    }));
                }

                let seq = competition.round + 1;
                let id = Uuid::now_v7().to_string();
                diesel::insert_into(competition_rounds::table)
                    .values((
                        competition_rounds::id.eq(&id),
                        competition_rounds::competition_id.eq(competition_id),
                        competition_rounds::seq.eq(seq),
                        competition_rounds::state.eq(RoundState::Pending.as_str()),
                        competition_rounds::opened_at.eq(now),
                        competition_rounds::paired_at.eq(None::<NaiveDateTime>),
                        competition_rounds::closed_at.eq(None::<NaiveDateTime>),
                        competition_rounds::skip_reason.eq(None::<String>),
                    ))
                    .execute(conn)?;

                diesel::update(competitions::table.filter(competitions::id.eq(competition_id)))
                    .set((
                        competitions::round.eq(seq),
                        competitions::status.eq(CompetitionStatus::Running.as_str()),
                    ))
                    .execute(conn)?;

                tracing::info!(round = seq, "opened round");

                Ok(Round::fetch(competition_id, seq, conn)?
                    .ok_or_else(|| SchedulerError::NoOpenRound(competition_id.to_string())))
            },
        )?
    }

    /// Advances the competition's current round by (at most) one state.
    #[tracing::instrument(skip(self, conn))]
    pub fn step(
        &self,
        competition_id: &str,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
    ) -> Result<StepReport, SchedulerError> {
        let competition = Competition::fetch(competition_id, conn)?.ok_or_else(|| {
            SchedulerError::CompetitionNotFound(competition_id.to_string())
        })?;
        if competition.status() != CompetitionStatus::Running {
            return Err(SchedulerError::InvalidStatus {
                competition_id: competition.id.clone(),
                status: competition.status(),
                expected: "running",
            });
        }

        let round = Round::current(competition_id, conn)?
            .ok_or_else(|| SchedulerError::NoOpenRound(competition_id.to_string()))?;

        let from = round.state();
        let mut report = StepReport {
            round: round.seq,
            from,
            to: from,
            dispatched: 0,
            voided: 0,
        };

        match from {
            RoundState::Pending => {
                if transition(&round, RoundState::Pending, RoundState::Pairing, conn)? {
                    report.to = RoundState::Pairing;
                }
            }
            RoundState::Pairing => self.pair(&competition, &round, now, conn, &mut report)?,
            RoundState::AwaitingResults => {
                self.await_results(&competition, &round, now, conn, &mut report)?
            }
            RoundState::Closing => self.close(&competition, &round, now, conn, &mut report)?,
            RoundState::Complete => {}
        }

        Ok(report)
    }

    fn pair(
        &self,
        competition: &Competition,
        round: &Round,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
        report: &mut StepReport,
    ) -> Result<(), SchedulerError> {
        if let Some(source) = self.compile_status {
            let refreshed = refresh_compile_status(&competition.id, source, conn)?;
            tracing::debug!(refreshed, "refreshed compile status");
        }

        let search_budget = self.config.matchmaker.search_budget;
        let paired = conn.immediate_transaction(
            |conn| -> Result<Result<bool, SchedulerError>, diesel::result::Error> {
                let teams = match eligible_teams(competition, round.seq, conn) {
                    Ok(teams) => teams,
                    Err(EligibilityError::Database(e)) => return Err(e),
                    Err(e) => return Ok(Err(e.into())),
                };
                let history = PairingHistory::fetch(&competition.id, round.seq, conn)?;

                let draw = match make_draw(DrawInput {
                    teams,
                    history,
                    games_per_round: competition.games_per_round,
                    search_budget,
                }) {
                    Ok(draw) => draw,
                    Err(e) => return Ok(Err(e.into())),
                };

                if !transition(round, RoundState::Pairing, RoundState::AwaitingResults, conn)? {
                    return Ok(Ok(false));
                }

                persist_draw(&competition.id, round.seq, &draw, conn)?;
                diesel::update(competition_rounds::table.filter(competition_rounds::id.eq(&round.id)))
                    .set(competition_rounds::paired_at.eq(Some(now)))
                    .execute(conn)?;

                if draw.rematches > 0 {
                    tracing::warn!(rematches = draw.rematches, "draw repeats earlier pairings");
                }
                tracing::info!(round = round.seq, draw = %describe(&draw), "round drawn");

                Ok(Ok(true))
            },
        )?;

        match paired {
            Ok(true) => {
                report.to = RoundState::AwaitingResults;
                report.dispatched =
                    dispatch_queued(competition, round.seq, self.executor, now, conn)?;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(error) => {
                self.skip(competition, round, &error, now, conn)?;
                Err(error)
            }
        }
    }

    /// Completes a round that could not be drawn and halts the competition
    /// until an operator resumes it.
    fn skip(
        &self,
        competition: &Competition,
        round: &Round,
        reason: &SchedulerError,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
    ) -> Result<(), diesel::result::Error> {
        conn.immediate_transaction(|conn| {
            diesel::update(
                competition_rounds::table.filter(
                    competition_rounds::id
                        .eq(&round.id)
                        .and(competition_rounds::state.eq(RoundState::Pairing.as_str())),
                ),
            )
            .set((
                competition_rounds::state.eq(RoundState::Complete.as_str()),
                competition_rounds::closed_at.eq(Some(now)),
                competition_rounds::skip_reason.eq(Some(reason.to_string())),
            ))
            .execute(conn)?;

            set_status(&competition.id, CompetitionStatus::Halted, conn)?;

            tracing::warn!(
                round = round.seq,
                %reason,
                "round skipped, competition halted"
            );

            Ok(())
        })
    }

    fn await_results(
        &self,
        competition: &Competition,
        round: &Round,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
        report: &mut StepReport,
    ) -> Result<(), SchedulerError> {
        report.voided = void_timed_out(
            &competition.id,
            round.seq,
            self.config.fixture_timeout(),
            now,
            conn,
        )?;
        report.dispatched = dispatch_queued(competition, round.seq, self.executor, now, conn)?;

        let finished = conn.immediate_transaction(|conn| {
            let unresolved = Fixture::of_round(&competition.id, round.seq, conn)?
                .iter()
                .filter(|fixture| !fixture.status().is_terminal())
                .count();
            if unresolved > 0 {
                tracing::trace!(unresolved, "waiting for results");
                return Ok(false);
            }
            transition(round, RoundState::AwaitingResults, RoundState::Closing, conn)
        })?;

        if finished {
            report.to = RoundState::Closing;
        }
        Ok(())
    }

    fn close(
        &self,
        competition: &Competition,
        round: &Round,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
        report: &mut StepReport,
    ) -> Result<(), SchedulerError> {
        let closed = conn.immediate_transaction(|conn| {
            if !transition(round, RoundState::Closing, RoundState::Complete, conn)? {
                return Ok(false);
            }

            let teams = snapshot_round(&competition.id, round.seq, conn)?;
            diesel::update(competition_rounds::table.filter(competition_rounds::id.eq(&round.id)))
                .set(competition_rounds::closed_at.eq(Some(now)))
                .execute(conn)?;
            tracing::debug!(teams, "standings snapshot taken");

            if competition.is_last_round(round.seq, now) {
                set_status(&competition.id, CompetitionStatus::Closed, conn)?;
                tracing::info!(round = round.seq, "competition closed");
            }

            Ok::<_, diesel::result::Error>(true)
        })?;

        if closed {
            report.to = RoundState::Complete;
        }
        Ok(())
    }
}

/// Lets a halted competition run again. The skipped round stays skipped; the
/// next round is opened as usual.
#[tracing::instrument(skip(conn))]
pub fn resume_competition(
    competition_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Competition, SchedulerError> {
    conn.immediate_transaction(|conn| {
        let competition = Competition::fetch(competition_id, conn)?.ok_or_else(|| {
            SchedulerError::CompetitionNotFound(competition_id.to_string())
        })?;
        if competition.status() != CompetitionStatus::Halted {
            return Err(SchedulerError::InvalidStatus {
                competition_id: competition.id.clone(),
                status: competition.status(),
                expected: "halted",
            });
        }

        set_status(competition_id, CompetitionStatus::Running, conn)?;
        tracing::info!("competition resumed");

        Competition::fetch(competition_id, conn)?
            .ok_or_else(|| SchedulerError::CompetitionNotFound(competition_id.to_string()))
    })
}
