//! Decides which teams may take part in a round.

use std::collections::{BTreeSet, HashMap};

use diesel::{connection::LoadConnection, sqlite::Sqlite};

use crate::competitions::{
    Competition, SubmissionPolicy, bots::Bot, teams::Team,
};

#[derive(Debug, thiserror::Error)]
pub enum EligibilityError {
    #[error(
        "round {round} of competition {competition_id} has {eligible} eligible \
         team(s), at least two are needed"
    )]
    NoEligibleTeams {
        competition_id: String,
        round: i64,
        eligible: usize,
    },
    #[error("competition {0} does not exist")]
    CompetitionNotFound(String),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

/// Why a team was left out of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    Withdrawn,
    OtherCompetition,
    /// One of the bot slots is empty, or points at a bot that does not exist.
    MissingBot,
    /// A bot slot points at a bot submitted by a different team.
    ForeignBot(String),
    NotCompiled { bot_id: String, error: String },
    SubmittedAfterCutoff(String),
}

/// A team cleared to play, with the bots it will play with.
#[derive(Debug, Clone)]
pub struct EligibleTeam {
    pub team: Team,
    pub bot1: Bot,
    pub bot2: Bot,
}

/// Checks a single team against the competition's rules. `bots` must contain
/// (at least) the team's current bots.
pub fn check_team(
    competition: &Competition,
    team: &Team,
    bots: &HashMap<String, Bot>,
) -> Result<(Bot, Bot), Ineligibility> {
    if team.competition_id != competition.id {
        return Err(Ineligibility::OtherCompetition);
    }
    if team.withdrawn {
        return Err(Ineligibility::Withdrawn);
    }

    let (Some(bot1), Some(bot2)) = (
        team.bot1.as_ref().and_then(|id| bots.get(id)),
        team.bot2.as_ref().and_then(|id| bots.get(id)),
    ) else {
        return Err(Ineligibility::MissingBot);
    };

    for bot in [bot1, bot2] {
        if bot.team_id != team.id {
            return Err(Ineligibility::ForeignBot(bot.id.clone()));
        }
        if !bot.compiled() {
            return Err(Ineligibility::NotCompiled {
                bot_id: bot.id.clone(),
                error: bot.compile_error.clone(),
            });
        }
        if competition.submission_policy() == SubmissionPolicy::Window
            && bot.submitted_at > competition.submission_cutoff()
        {
            return Err(Ineligibility::SubmittedAfterCutoff(bot.id.clone()));
        }
    }

    Ok((bot1.clone(), bot2.clone()))
}

/// Returns the teams eligible for `round`, ordered by team id. Fails when
/// fewer than two teams are eligible, since no round can be played then.
#[tracing::instrument(skip(competition, conn), fields(competition_id = %competition.id))]
pub fn eligible_teams(
    competition: &Competition,
    round: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<EligibleTeam>, EligibilityError> {
    let teams = Team::of_competition(&competition.id, conn)?;

    let bot_ids = teams
        .iter()
        .flat_map(|team| [team.bot1.clone(), team.bot2.clone()])
        .flatten()
        .collect::<Vec<_>>();
    let bots = Bot::fetch_many(&bot_ids, conn)?
        .into_iter()
        .map(|bot| (bot.id.clone(), bot))
        .collect::<HashMap<_, _>>();

    let mut eligible = Vec::with_capacity(teams.len());
    for team in teams {
        match check_team(competition, &team, &bots) {
            Ok((bot1, bot2)) => eligible.push(EligibleTeam { team, bot1, bot2 }),
            Err(reason) => {
                tracing::debug!(team_id = %team.id, ?reason, "team not eligible");
            }
        }
    }

    if eligible.len() < 2 {
        return Err(EligibilityError::NoEligibleTeams {
            competition_id: competition.id.clone(),
            round,
            eligible: eligible.len(),
        });
    }

    tracing::debug!(eligible = eligible.len(), "eligibility checked");

    Ok(eligible)
}

/// The ids of the teams eligible for `round` of `competition_id`.
pub fn eligible_team_ids(
    competition_id: &str,
    round: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<BTreeSet<String>, EligibilityError> {
    let competition = Competition::fetch(competition_id, conn)?.ok_or_else(|| {
        EligibilityError::CompetitionNotFound(competition_id.to_string())
    })?;
    Ok(eligible_teams(&competition, round, conn)?
        .into_iter()
        .map(|eligible| eligible.team.id)
        .collect())
}
