//! Swiss-style pairing by rating.
//!
//! Teams are ranked by Elo and paired with their nearest-rated neighbour. A
//! depth-first search over nearest-first candidates looks for a pairing with
//! no rematches. If it runs out of budget, a greedy pass pairs the remaining
//! teams and only repeats a pairing when no fresh opponent is left.

use itertools::Itertools;

use crate::competitions::rounds::draws::{
    Draw, DrawInput, DrawnFixture, PairingError, PairingHistory,
};

/// Computes the draw for one round. Deterministic: the same input always
/// yields the same draw.
pub fn make_draw(
    DrawInput {
        teams,
        history,
        games_per_round,
        search_budget,
    }: DrawInput,
) -> Result<Draw, PairingError> {
    let mut teams = teams
        .into_iter()
        .sorted_by(|a, b| {
            b.team
                .elo
                .cmp(&a.team.elo)
                .then_with(|| a.team.id.cmp(&b.team.id))
        })
        .collect::<Vec<_>>();

    let bye = if teams.len() % 2 == 1 {
        let idx = teams
            .iter()
            .rposition(|team| !history.had_bye(&team.team.id))
            .unwrap_or(teams.len() - 1);
        Some(teams.remove(idx))
    } else {
        None
    };

    if teams.len() < 2 {
        return Err(PairingError::InsufficientTeams {
            available: teams.len(),
        });
    }

    let ids = teams.iter().map(|t| t.team.id.as_str()).collect::<Vec<_>>();

    let mut budget = search_budget;
    let mut pairs = Vec::with_capacity(teams.len() / 2);
    let remaining = (0..teams.len()).collect::<Vec<_>>();
    let pairs = if search(&ids, &history, &remaining, &mut pairs, &mut budget) {
        pairs
    } else {
        tracing::debug!(
            teams = teams.len(),
            "no rematch-free pairing found within budget, pairing greedily"
        );
        greedy(&ids, &history)
    };

    let rematches = pairs
        .iter()
        .filter(|(a, b)| history.have_played(ids[*a], ids[*b]))
        .count();

    let wave_size = games_per_round.max(1) as usize;
    let mut slots = teams.into_iter().map(Some).collect::<Vec<_>>();
    let mut fixtures = Vec::with_capacity(pairs.len());
    for (n, (a, b)) in pairs.into_iter().enumerate() {
        let (Some(team1), Some(team2)) = (slots[a].take(), slots[b].take())
        else {
            unreachable!("every team is paired at most once");
        };
        fixtures.push(DrawnFixture {
            team1,
            team2,
            wave: (n / wave_size) as i64,
        });
    }

    Ok(Draw {
        fixtures,
        bye,
        rematches,
    })
}

/// Pairs the highest-ranked team in `remaining` with the nearest-rated team
/// it has not played, then recurses. Returns `false` when no such pairing
/// exists or the budget runs out.
fn search(
    ids: &[&str],
    history: &PairingHistory,
    remaining: &[usize],
    pairs: &mut Vec<(usize, usize)>,
    budget: &mut usize,
) -> bool {
    let Some((&first, rest)) = remaining.split_first() else {
        return true;
    };
    if *budget == 0 {
        return false;
    }
    *budget -= 1;

    for (k, &other) in rest.iter().enumerate() {
        if history.have_played(ids[first], ids[other]) {
            continue;
        }

        let next = rest
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != k)
            .map(|(_, idx)| *idx)
            .collect::<Vec<_>>();

        pairs.push((first, other));
        if search(ids, history, &next, pairs, budget) {
            return true;
        }
        pairs.pop();

        if *budget == 0 {
            return false;
        }
    }

    false
}

fn greedy(ids: &[&str], history: &PairingHistory) -> Vec<(usize, usize)> {
    let mut remaining = (0..ids.len()).collect::<Vec<_>>();
    let mut pairs = Vec::with_capacity(ids.len() / 2);

    while remaining.len() >= 2 {
        let first = remaining.remove(0);
        let k = remaining
            .iter()
            .position(|&other| !history.have_played(ids[first], ids[other]))
            .unwrap_or(0);
        pairs.push((first, remaining.remove(k)));
    }

    pairs
}

/// Ids of the teams in a draw, in fixture order, for logging.
pub fn describe(draw: &Draw) -> String {
    draw.fixtures
        .iter()
        .map(|fixture| {
            format!("{} v {}", fixture.team1.team.id, fixture.team2.team.id)
        })
        .chain(draw.bye.iter().map(|bye| format!("bye: {}", bye.team.id)))
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::competitions::{
        bots::Bot, rounds::eligibility::EligibleTeam, teams::Team,
    };

    fn team(id: &str, elo: i64) -> EligibleTeam {
        let at = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let bot = |slot: &str| Bot {
            id: format!("{id}-{slot}"),
            team_id: id.to_string(),
            source_path: format!("/bots/{id}-{slot}.zip"),
            compile_error: String::new(),
            submitted_at: at,
        };
        EligibleTeam {
            team: Team {
                id: id.to_string(),
                competition_id: "c1".to_string(),
                owner: "u1".to_string(),
                partner: None,
                bot1: Some(format!("{id}-a")),
                bot2: Some(format!("{id}-b")),
                elo,
                initial_elo: 1000,
                withdrawn: false,
                created_at: at,
            },
            bot1: bot("a"),
            bot2: bot("b"),
        }
    }

    fn input(teams: Vec<EligibleTeam>, history: PairingHistory) -> DrawInput {
        DrawInput {
            teams,
            history,
            games_per_round: 6,
            search_budget: 10_000,
        }
    }

    fn pairs(draw: &Draw) -> Vec<(String, String)> {
        draw.fixtures
            .iter()
            .map(|f| (f.team1.team.id.clone(), f.team2.team.id.clone()))
            .collect()
    }

    fn p(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn adjacent_teams_are_paired_by_rating() {
        let draw = make_draw(input(
            vec![
                team("t1", 1000),
                team("t2", 1300),
                team("t3", 1100),
                team("t4", 1200),
            ],
            PairingHistory::default(),
        ))
        .unwrap();

        assert_eq!(pairs(&draw), vec![p("t2", "t4"), p("t3", "t1")]);
        assert!(draw.bye.is_none());
        assert_eq!(draw.rematches, 0);
    }

    #[test]
    fn equal_ratings_are_ordered_by_id() {
        let draw = make_draw(input(
            vec![
                team("d", 1000),
                team("b", 1000),
                team("c", 1000),
                team("a", 1000),
            ],
            PairingHistory::default(),
        ))
        .unwrap();

        assert_eq!(pairs(&draw), vec![p("a", "b"), p("c", "d")]);
    }

    #[test]
    fn odd_count_gives_lowest_rated_a_bye() {
        let draw = make_draw(input(
            vec![
                team("t1", 1200),
                team("t2", 1150),
                team("t3", 1100),
                team("t4", 1050),
                team("t5", 1000),
            ],
            PairingHistory::default(),
        ))
        .unwrap();

        assert_eq!(draw.fixtures.len(), 2);
        assert_eq!(draw.bye.as_ref().unwrap().team.id, "t5");
    }

    #[test]
    fn bye_goes_to_lowest_rated_team_without_one() {
        let mut history = PairingHistory::default();
        history.record_bye("t3");

        let draw = make_draw(input(
            vec![team("t1", 1200), team("t2", 1100), team("t3", 1000)],
            history,
        ))
        .unwrap();
        assert_eq!(draw.bye.as_ref().unwrap().team.id, "t2");
        assert_eq!(pairs(&draw), vec![p("t1", "t3")]);

        let mut everyone = PairingHistory::default();
        for id in ["t1", "t2", "t3"] {
            everyone.record_bye(id);
        }
        let draw = make_draw(input(
            vec![team("t1", 1200), team("t2", 1100), team("t3", 1000)],
            everyone,
        ))
        .unwrap();
        assert_eq!(draw.bye.as_ref().unwrap().team.id, "t3");
    }

    #[test]
    fn repeat_pairing_swaps_with_next_nearest() {
        let mut history = PairingHistory::default();
        history.record_pair("t1", "t2");

        let draw = make_draw(input(
            vec![
                team("t1", 1300),
                team("t2", 1200),
                team("t3", 1100),
                team("t4", 1000),
            ],
            history,
        ))
        .unwrap();

        assert_eq!(pairs(&draw), vec![p("t1", "t3"), p("t2", "t4")]);
        assert_eq!(draw.rematches, 0);
    }

    #[test]
    fn search_backtracks_to_avoid_a_forced_rematch() {
        // Greedy would pair t1-t3 and then be left with t2-t4, which is a
        // rematch.
        let mut history = PairingHistory::default();
        history.record_pair("t1", "t2");
        history.record_pair("t2", "t4");

        let draw = make_draw(input(
            vec![
                team("t1", 1300),
                team("t2", 1200),
                team("t3", 1100),
                team("t4", 1000),
            ],
            history,
        ))
        .unwrap();

        assert_eq!(pairs(&draw), vec![p("t1", "t4"), p("t2", "t3")]);
        assert_eq!(draw.rematches, 0);
    }

    #[test]
    fn rematch_allowed_when_unavoidable() {
        let mut history = PairingHistory::default();
        history.record_pair("t1", "t2");

        let draw = make_draw(input(
            vec![team("t1", 1100), team("t2", 1000)],
            history,
        ))
        .unwrap();

        assert_eq!(pairs(&draw), vec![p("t1", "t2")]);
        assert_eq!(draw.rematches, 1);
    }

    #[test]
    fn exhausted_budget_falls_back_to_greedy() {
        let mut history = PairingHistory::default();
        history.record_pair("t1", "t2");
        history.record_pair("t2", "t4");

        let mut input = input(
            vec![
                team("t1", 1300),
                team("t2", 1200),
                team("t3", 1100),
                team("t4", 1000),
            ],
            history,
        );
        input.search_budget = 1;

        let draw = make_draw(input).unwrap();
        assert_eq!(pairs(&draw), vec![p("t1", "t3"), p("t2", "t4")]);
        assert_eq!(draw.rematches, 1);
    }

    #[test]
    fn fixtures_are_split_into_waves() {
        let teams = (0..10)
            .map(|n| team(&format!("t{n}"), 1000 + n * 10))
            .collect();
        let mut input = input(teams, PairingHistory::default());
        input.games_per_round = 2;

        let draw = make_draw(input).unwrap();
        let waves = draw.fixtures.iter().map(|f| f.wave).collect::<Vec<_>>();
        assert_eq!(waves, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn no_team_is_paired_twice() {
        let teams = (0..17)
            .map(|n| team(&format!("t{n:02}"), 1000 + (n * 37) % 200))
            .collect();
        let draw = make_draw(input(teams, PairingHistory::default())).unwrap();

        let mut seen = HashSet::new();
        for fixture in &draw.fixtures {
            assert!(seen.insert(fixture.team1.team.id.clone()));
            assert!(seen.insert(fixture.team2.team.id.clone()));
        }
        assert!(seen.insert(draw.bye.unwrap().team.id));
        assert_eq!(seen.len(), 17);
    }

    #[test]
    fn too_few_teams() {
        assert!(matches!(
            make_draw(input(vec![team("t1", 1000)], PairingHistory::default())),
            Err(PairingError::InsufficientTeams { available: 0 })
        ));
        assert!(matches!(
            make_draw(input(vec![], PairingHistory::default())),
            Err(PairingError::InsufficientTeams { available: 0 })
        ));
    }
}
