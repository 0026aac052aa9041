//! Runs a competition's rounds to completion.
//!
//! The driver repeatedly steps the scheduler on a blocking thread. When a step
//! changes nothing it sleeps until either a result is reported or the poll
//! interval elapses.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        bots::CompileStatusSource,
        rating::RatingConfig,
        rounds::{
            Round, RoundState,
            dispatch::GameExecutor,
            results::{
                FixtureKey, GameOutcome, IngestError, IngestStatus,
                ingest_by_handle, ingest_result,
            },
            scheduler::{Scheduler, SchedulerError},
        },
    },
    config::EngineConfig,
    state::DbPool,
    utc_now,
};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct RoundDriver {
    pool: DbPool,
    config: Arc<EngineConfig>,
    executor: Arc<dyn GameExecutor + Send + Sync>,
    compile_status: Option<Arc<dyn CompileStatusSource + Send + Sync>>,
    signals: Arc<Notify>,
}

/// Reports game outcomes and wakes the driver. Cheap to clone; hand one to
/// whatever receives results from the executor.
#[derive(Clone)]
pub struct ResultReporter {
    pool: DbPool,
    rating: RatingConfig,
    signals: Arc<Notify>,
}

impl ResultReporter {
    pub fn report(
        &self,
        key: &FixtureKey,
        outcome: &GameOutcome,
    ) -> Result<IngestStatus, DriverError> {
        let mut conn = self.pool.get()?;
        let status = ingest_result(key, outcome, &self.rating, utc_now(), &mut conn)?;
        self.signals.notify_one();
        Ok(status)
    }

    pub fn report_by_handle(
        &self,
        handle: &str,
        outcome: &GameOutcome,
    ) -> Result<IngestStatus, DriverError> {
        let mut conn = self.pool.get()?;
        let status =
            ingest_by_handle(handle, outcome, &self.rating, utc_now(), &mut conn)?;
        self.signals.notify_one();
        Ok(status)
    }
}

/// Outcome of one pass over the competition.
struct Tick {
    status: CompetitionStatus,
    progressed: bool,
}

impl RoundDriver {
    pub fn new(
        pool: DbPool,
        config: Arc<EngineConfig>,
        executor: Arc<dyn GameExecutor + Send + Sync>,
    ) -> Self {
        Self {
            pool,
            config,
            executor,
            compile_status: None,
            signals: Arc::new(Notify::new()),
        }
    }

    pub fn with_compile_status(
        mut self,
        source: Arc<dyn CompileStatusSource + Send + Sync>,
    ) -> Self {
        self.compile_status = Some(source);
        self
    }

    pub fn reporter(&self) -> ResultReporter {
        ResultReporter {
            pool: self.pool.clone(),
            rating: self.config.rating(),
            signals: self.signals.clone(),
        }
    }

    /// Drives the competition until it is closed or halted, and returns the
    /// status it ended in. A round that cannot be drawn halts the competition;
    /// the reason is logged and kept on the skipped round.
    #[tracing::instrument(skip(self))]
    pub async fn run(
        &self,
        competition_id: &str,
    ) -> Result<CompetitionStatus, DriverError> {
        loop {
            let tick = self.tick(competition_id.to_string()).await?;

            match tick.status {
                CompetitionStatus::Closed | CompetitionStatus::Halted => {
                    tracing::info!(status = tick.status.as_str(), "driver stopping");
                    return Ok(tick.status);
                }
                CompetitionStatus::Open | CompetitionStatus::Running => {}
            }

            if !tick.progressed {
                tokio::select! {
                    _ = self.signals.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }
    }

    async fn tick(&self, competition_id: String) -> Result<Tick, DriverError> {
        let pool = self.pool.clone();
        let config = self.config.clone();
        let executor = self.executor.clone();
        let compile_status = self.compile_status.clone();

        tokio::task::spawn_blocking(move || -> Result<Tick, DriverError> {
            let mut conn = pool.get()?;
            let conn = &mut *conn;
            let now = utc_now();

            let mut scheduler = Scheduler::new(&config, executor.as_ref());
            if let Some(source) = compile_status.as_deref() {
                scheduler = scheduler.with_compile_status(source);
            }

            let competition = Competition::fetch(&competition_id, conn)?
                .ok_or_else(|| {
                    SchedulerError::CompetitionNotFound(competition_id.clone())
                })?;

            let status = competition.status();
            let may_open = match status {
                CompetitionStatus::Closed | CompetitionStatus::Halted => {
                    return Ok(Tick {
                        status,
                        progressed: false,
                    });
                }
                CompetitionStatus::Open => {
                    config.scheduler.auto_advance && now >= competition.start
                }
                CompetitionStatus::Running => {
                    let report = match scheduler.step(&competition_id, now, conn) {
                        Ok(report) => report,
                        // The scheduler has already skipped the round.
                        Err(
                            error @ (SchedulerError::Eligibility(_)
                            | SchedulerError::Pairing(_)),
                        ) => {
                            tracing::warn!(%error, "competition halted");
                            return Ok(Tick {
                                status: CompetitionStatus::Halted,
                                progressed: true,
                            });
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if report.progressed() {
                        return Ok(Tick {
                            status,
                            progressed: true,
                        });
                    }
                    report.to == RoundState::Complete
                        && config.scheduler.auto_advance
                        && Round::current(&competition_id, conn)?
                            .and_then(|round| round.closed_at)
                            .is_none_or(|closed| {
                                closed + config.round_interval() <= now
                            })
                }
            };

            if !may_open {
                return Ok(Tick {
                    status,
                    progressed: false,
                });
            }

            match scheduler.open_next_round(&competition_id, now, conn) {
                Ok(_) => Ok(Tick {
                    status: CompetitionStatus::Running,
                    progressed: true,
                }),
                // The last round has been played.
                Err(SchedulerError::InvalidStatus {
                    status: CompetitionStatus::Closed,
                    ..
                }) => Ok(Tick {
                    status: CompetitionStatus::Closed,
                    progressed: true,
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }
}
