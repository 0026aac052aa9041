use chrono::TimeDelta;

use crate::{
    competitions::{
        CompetitionStatus, NewCompetition, RegistryError, SubmissionPolicy,
        bots::{Bot, BotSelector, CompileStatus, record_compile_status, submit_bot},
        create_competition,
        rounds::eligibility::{EligibilityError, eligible_team_ids},
        set_status,
        teams::{NewTeam, register_team, set_partner, withdraw_team},
    },
    test::TestArena,
    users::{Role, User, create_user, set_role},
    utc_now,
};

fn competition(start_offset_hours: i64) -> NewCompetition {
    let now = utc_now();
    NewCompetition {
        name: "Autumn Open".to_string(),
        start: now + TimeDelta::hours(start_offset_hours),
        end: now + TimeDelta::days(7),
        type_: "Casual".to_string(),
        final_round: 4,
        games_per_round: None,
        game_pack: None,
        allowed_submissions: None,
        submission_cutoff: None,
    }
}

#[test]
fn competition_defaults_are_filled_in() {
    let arena = TestArena::new(1, 1);
    let mut conn = arena.conn();

    let created = create_competition(competition(1), utc_now(), &mut conn).unwrap();
    assert_eq!(created.status(), CompetitionStatus::Open);
    assert_eq!(created.round, 0);
    assert_eq!(created.games_per_round, 6);
    assert_eq!(created.game_pack, "./resources/packs/BataljaCasualPack.zip");
    assert_eq!(created.submission_policy(), SubmissionPolicy::Anytime);
    assert_eq!(created.submission_cutoff(), created.start);
}

#[test]
fn malformed_competitions_are_rejected() {
    let arena = TestArena::new(1, 1);
    let mut conn = arena.conn();

    let backwards = NewCompetition {
        end: utc_now() - TimeDelta::days(1),
        ..competition(0)
    };
    let no_rounds = NewCompetition {
        final_round: 0,
        ..competition(0)
    };
    let no_games = NewCompetition {
        games_per_round: Some(0),
        ..competition(0)
    };

    for bad in [backwards, no_rounds, no_games] {
        assert!(matches!(
            create_competition(bad, utc_now(), &mut conn),
            Err(RegistryError::Invalid(_))
        ));
    }
}

#[test]
fn users_need_a_directory_id_without_spaces() {
    let arena = TestArena::new(1, 1);
    let mut conn = arena.conn();
    let now = utc_now();

    assert!(matches!(
        create_user("Ada", "uid=ada lovelace", Role::Participant, now, &mut conn),
        Err(RegistryError::Invalid(_))
    ));
    assert!(matches!(
        create_user("", "uid=ada", Role::Participant, now, &mut conn),
        Err(RegistryError::Invalid(_))
    ));

    let user = create_user("  Ada ", "uid=ada", Role::Participant, now, &mut conn)
        .unwrap();
    assert_eq!(user.display_name, "Ada");

    set_role(&user.id, Role::Admin, &mut conn).unwrap();
    let user = User::fetch(&user.id, &mut *conn).unwrap().unwrap();
    assert_eq!(user.role(), Role::Admin);
}

#[test]
fn team_partner_must_be_someone_else() {
    let arena = TestArena::new(1, 1);
    let team = arena.add_team();
    let mut conn = arena.conn();
    let now = utc_now();

    assert!(matches!(
        set_partner(&team.id, &team.owner, &mut conn),
        Err(RegistryError::Invalid(_))
    ));
    assert!(matches!(
        set_partner(&team.id, "nobody", &mut conn),
        Err(RegistryError::NotFound { kind: "user", .. })
    ));

    let partner =
        create_user("Grace", "uid=grace", Role::Participant, now, &mut conn).unwrap();
    set_partner(&team.id, &partner.id, &mut conn).unwrap();
    drop(conn);
    assert_eq!(arena.team(&team.id).partner, Some(partner.id));
}

#[test]
fn closed_competitions_take_no_registrations() {
    let arena = TestArena::new(1, 1);
    let team = arena.add_team();
    let mut conn = arena.conn();
    let now = utc_now();

    let owner =
        create_user("Late", "uid=late", Role::Participant, now, &mut conn).unwrap();
    assert!(matches!(
        register_team(
            NewTeam {
                owner: "nobody".to_string(),
                competition_id: arena.id().to_string(),
                partner: None,
            },
            1000,
            now,
            &mut conn,
        ),
        Err(RegistryError::NotFound { kind: "user", .. })
    ));

    set_status(arena.id(), CompetitionStatus::Closed, &mut conn).unwrap();
    assert!(matches!(
        register_team(
            NewTeam {
                owner: owner.id,
                competition_id: arena.id().to_string(),
                partner: None,
            },
            1000,
            now,
            &mut conn,
        ),
        Err(RegistryError::Invalid(_))
    ));
    assert!(matches!(
        submit_bot(&team.id, BotSelector::First, "/late.zip", now, &mut conn),
        Err(RegistryError::Invalid(_))
    ));
    drop(conn);
    assert_eq!(arena.competition().status(), CompetitionStatus::Closed);
}

#[test]
fn resubmitting_repoints_the_slot() {
    let arena = TestArena::new(1, 1);
    let team = arena.add_teams(3).remove(0);
    let old_bot = team.bot1.clone().unwrap();
    let mut conn = arena.conn();

    let new_bot =
        submit_bot(&team.id, BotSelector::First, "/v2.zip", utc_now(), &mut conn)
            .unwrap();
    assert!(!new_bot.compiled());

    // The new bot has not compiled yet, so the team sits out.
    assert!(
        !eligible_team_ids(arena.id(), 1, &mut *conn)
            .unwrap()
            .contains(&team.id)
    );

    record_compile_status(&new_bot.id, &CompileStatus::Compiled, &mut conn).unwrap();
    assert!(
        eligible_team_ids(arena.id(), 1, &mut *conn)
            .unwrap()
            .contains(&team.id)
    );

    // The replaced bot is kept for the games that used it.
    assert!(Bot::fetch(&old_bot, &mut *conn).unwrap().is_some());
    drop(conn);

    let team = arena.team(&team.id);
    assert_eq!(team.bot1.as_deref(), Some(new_bot.id.as_str()));
    assert_ne!(team.bot1, Some(old_bot));
}

#[test]
fn late_submissions_miss_a_windowed_competition() {
    let arena = TestArena::new(1, 1);
    let mut conn = arena.conn();
    let now = utc_now();

    let windowed = create_competition(
        NewCompetition {
            allowed_submissions: Some(SubmissionPolicy::Window),
            submission_cutoff: Some(now - TimeDelta::minutes(5)),
            ..competition(-1)
        },
        now - TimeDelta::hours(2),
        &mut conn,
    )
    .unwrap();

    let mut team_ids = Vec::new();
    for (n, submitted) in [
        now - TimeDelta::minutes(30),
        now - TimeDelta::minutes(20),
        now,
    ]
    .into_iter()
    .enumerate()
    {
        let owner = create_user(
            &format!("Window {n}"),
            &format!("uid=window{n}"),
            Role::Participant,
            submitted,
            &mut conn,
        )
        .unwrap();
        let team = register_team(
            NewTeam {
                owner: owner.id,
                competition_id: windowed.id.clone(),
                partner: None,
            },
            1000,
            submitted,
            &mut conn,
        )
        .unwrap();
        for slot in [BotSelector::First, BotSelector::Second] {
            let bot = submit_bot(&team.id, slot, "/bot.zip", submitted, &mut conn)
                .unwrap();
            record_compile_status(&bot.id, &CompileStatus::Compiled, &mut conn)
                .unwrap();
        }
        team_ids.push(team.id);
    }

    let eligible = eligible_team_ids(&windowed.id, 1, &mut *conn).unwrap();
    assert!(eligible.contains(&team_ids[0]));
    assert!(eligible.contains(&team_ids[1]));
    assert!(!eligible.contains(&team_ids[2]));

    withdraw_team(&team_ids[0], &mut conn).unwrap();
    assert!(matches!(
        eligible_team_ids(&windowed.id, 1, &mut *conn),
        Err(EligibilityError::NoEligibleTeams { eligible: 1, .. })
    ));

    assert!(matches!(
        withdraw_team("no-such-team", &mut conn),
        Err(RegistryError::NotFound { kind: "team", .. })
    ));
}
