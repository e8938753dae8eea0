//! Multi-client scenarios over a shared ledger hub.

use std::collections::BTreeMap;
use std::sync::Arc;

use regency::check::{builtin_catalog, Catalog, OutcomeTier};
use regency::error::{CheckError, ErrorKind};
use regency::kingdom::{KingdomLedger, Resource, Settlement};
use regency::roll::FixedRoller;
use regency::session::{Player, Session, SessionEvent, StartOutcome};
use regency::transport::{LedgerHub, LedgerTransport, Replica};
use regency::turn::{self, TurnPhase, ALL_PHASES};

fn catalog() -> Arc<Catalog> {
    Arc::new(builtin_catalog().unwrap())
}

/// A kingdom sitting at the start of `phase` on turn 1.
fn hub_at(phase: TurnPhase) -> LedgerHub {
    let mut ledger = KingdomLedger::new("Stolen Lands");
    ledger.add_settlement(Settlement::new("s1", "Tatzlford", 2));
    ledger.set_resource(Resource::Gold, 12);
    ledger.set_resource(Resource::Unrest, 3);
    for p in ALL_PHASES {
        turn::start_phase(&mut ledger, p);
    }
    for p in ALL_PHASES {
        if p == phase {
            break;
        }
        for step in 0..p.step_count() {
            turn::complete_step(&mut ledger, p, step);
        }
        turn::advance_phase(&mut ledger).unwrap();
    }
    LedgerHub::new(ledger)
}

fn client(hub: &LedgerHub, id: &str, name: &str, tier: OutcomeTier) -> Session<Replica> {
    Session::new(
        Player::new(id, name, 2),
        hub.connect(),
        catalog(),
        Box::new(FixedRoller { tier }),
    )
}

fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn applied_effects_are_visible_to_every_client() {
    let hub = hub_at(TurnPhase::Actions);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Success);
    let mut ezren = client(&hub, "p2", "Ezren", OutcomeTier::Success);

    amiri
        .start_check("upgrade-settlement", "politics", meta(&[("settlement", "s1")]), false)
        .unwrap();
    amiri.poll();
    let report = amiri.apply_result("upgrade-settlement").unwrap();
    assert_eq!(report.upgraded, vec![("s1".to_string(), 3)]);

    let seen = ezren.ledger();
    assert_eq!(seen.settlement("s1").unwrap().level, 3);
    assert_eq!(seen.resource(Resource::Gold), 9);
    assert!(seen.checks().is_empty());
}

#[test]
fn structure_is_queued_at_half_cost_and_built_in_upkeep() {
    let hub = hub_at(TurnPhase::Actions);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::CriticalSuccess);
    amiri
        .start_check(
            "build-structure",
            "crafting",
            meta(&[("settlement", "s1"), ("structure", "barracks")]),
            false,
        )
        .unwrap();
    let events = amiri.poll();
    assert!(matches!(
        &events[..],
        [SessionEvent::Preview { outcome, .. }] if outcome.message == "Work on the Barracks in Tatzlford begins at half the cost."
    ));
    let report = amiri.apply_result("build-structure").unwrap();
    assert_eq!(report.queued, vec!["project-1".to_string()]);

    let project = amiri.ledger().build_queue()[0].clone();
    assert_eq!(project.remaining[Resource::Lumber as usize], 2);
    assert_eq!(project.remaining[Resource::Stone as usize], 2);
    assert_eq!(project.remaining[Resource::Ore as usize], 1);

    amiri
        .transport_mut()
        .update("stockpile", |l| {
            l.set_resource(Resource::Lumber, 5);
            l.set_resource(Resource::Stone, 5);
            l.set_resource(Resource::Ore, 1);
            Ok::<_, ()>(())
        })
        .unwrap();
    for step in 0..TurnPhase::Actions.step_count() {
        amiri.complete_step(TurnPhase::Actions, step);
    }
    assert_eq!(amiri.advance_phase(), Ok(TurnPhase::Upkeep));
    assert_eq!(amiri.process_build_queue(), vec!["project-1".to_string()]);

    let ledger = amiri.ledger();
    assert!(ledger.build_queue().is_empty());
    assert_eq!(ledger.settlement("s1").unwrap().structures, vec!["barracks".to_string()]);
    assert_eq!(ledger.resource(Resource::Lumber), 3);
}

#[test]
fn stale_client_overwrites_whole_record() {
    let hub = hub_at(TurnPhase::Events);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Success);
    let mut ezren = client(&hub, "p2", "Ezren", OutcomeTier::Failure);

    // Ezren has not yet received Amiri's write.
    ezren.transport_mut().hold_sync(true);
    amiri
        .start_check("bandit-raid", "warfare", BTreeMap::new(), false)
        .unwrap();
    let started = ezren.start_check("bandit-raid", "diplomacy", BTreeMap::new(), false);
    assert!(matches!(started, Ok(StartOutcome::Rolling(_))));

    // Last writer wins: Amiri's instance is gone.
    let events = amiri.poll();
    assert!(matches!(&events[..], [SessionEvent::Dropped { check_id, .. }] if check_id == "bandit-raid"));
    assert!(amiri.local_instance("bandit-raid").is_none());

    ezren.transport_mut().hold_sync(false);
    ezren.poll();
    ezren.apply_result("bandit-raid").unwrap();
    assert_eq!(hub.snapshot().ledger.resource(Resource::Gold), 10);
}

#[test]
fn retried_apply_never_double_applies() {
    let hub = hub_at(TurnPhase::Actions);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Success);
    amiri
        .start_check("deal-with-unrest", "religion", BTreeMap::new(), false)
        .unwrap();
    amiri.poll();
    amiri.apply_result("deal-with-unrest").unwrap();
    let after_first = hub.snapshot().ledger;
    let retry = amiri.apply_result("deal-with-unrest").unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::MissingEntity);
    assert_eq!(*hub.snapshot().ledger, *after_first);
    assert_eq!(after_first.resource(Resource::Unrest), 1);
    assert_eq!(after_first.turn_state().action_log.entries().len(), 1);
}

#[test]
fn aid_from_another_player_feeds_the_roll() {
    let hub = hub_at(TurnPhase::Events);
    let mut helper = client(&hub, "p2", "Ezren", OutcomeTier::Success);
    let mut actor = client(&hub, "p1", "Amiri", OutcomeTier::Success);

    helper.request_aid("bandit-raid", "intimidation", 3).unwrap();
    assert_eq!(
        helper.poll(),
        vec![SessionEvent::AidStored {
            target_check_id: "bandit-raid".into(),
            tier: OutcomeTier::Success,
            bonus: 3,
            keep_higher: false,
        }]
    );

    // The helper spent their action and needs confirmation for another.
    let gated = helper
        .start_check("bandit-raid", "warfare", BTreeMap::new(), false)
        .unwrap();
    assert!(matches!(gated, StartOutcome::NeedsConfirmation { taken: 1, .. }));

    actor
        .start_check("bandit-raid", "warfare", BTreeMap::new(), false)
        .unwrap();
    let views = actor.views();
    let aid = views[0].aid.as_ref().unwrap();
    assert_eq!(aid.bonus, 3);
    assert_eq!(aid.helpers, vec!["Ezren".to_string()]);

    actor.poll();
    assert!(actor.ledger().turn_state().aids.is_empty());
    assert!(actor.views()[0].aid.is_none());
}

#[test]
fn incident_resolves_in_unrest_phase() {
    let hub = hub_at(TurnPhase::Unrest);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::CriticalFailure);
    let started = amiri
        .start_check("plague", "medicine", BTreeMap::new(), false)
        .unwrap();
    assert!(matches!(started, StartOutcome::Rolling(_)));
    amiri.poll();
    amiri.apply_result("plague").unwrap();
    let ledger = amiri.ledger();
    assert_eq!(ledger.resource(Resource::Unrest), 6);
    // Incidents sit outside the action economy.
    assert!(ledger.turn_state().action_log.is_empty());
}

#[test]
fn missing_tier_resolves_to_nothing() {
    let hub = hub_at(TurnPhase::Events);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Failure);
    let before_food = amiri.ledger().resource(Resource::Food);
    amiri
        .start_check("good-harvest", "nature", BTreeMap::new(), false)
        .unwrap();
    let events = amiri.poll();
    assert!(matches!(
        &events[..],
        [SessionEvent::Preview { outcome, .. }] if outcome.message == "Good Harvest: nothing happens." && outcome.modifiers.is_empty()
    ));
    amiri.apply_result("good-harvest").unwrap();
    assert_eq!(amiri.ledger().resource(Resource::Food), before_food);
}

#[test]
fn unknown_settlement_is_rejected_before_roll() {
    let hub = hub_at(TurnPhase::Actions);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Success);
    let before = hub.snapshot();
    let err = amiri
        .start_check("upgrade-settlement", "politics", meta(&[("settlement", "nowhere")]), false)
        .unwrap_err();
    assert_eq!(
        err,
        CheckError::Validation(vec!["unknown settlement 'nowhere'".to_string()])
    );
    assert_eq!(hub.snapshot().version, before.version);
    assert!(amiri.poll().is_empty());
}

#[test]
fn turn_rollover_clears_everything_for_everyone() {
    let hub = hub_at(TurnPhase::Actions);
    let mut amiri = client(&hub, "p1", "Amiri", OutcomeTier::Success);
    let mut ezren = client(&hub, "p2", "Ezren", OutcomeTier::Success);
    amiri
        .start_check("harvest-resources", "nature", BTreeMap::new(), false)
        .unwrap();
    amiri.poll();
    amiri.apply_result("harvest-resources").unwrap();
    ezren
        .start_check("claim-hexes", "survival", BTreeMap::new(), false)
        .unwrap();

    assert_eq!(amiri.end_turn(), 2);

    let ledger = ezren.ledger();
    assert_eq!(ledger.turn_state().turn, 2);
    assert_eq!(ledger.turn_state().phase, TurnPhase::Status);
    assert!(ledger.checks().is_empty());
    assert!(ledger.turn_state().action_log.is_empty());
    assert_eq!(ledger.resource(Resource::Lumber), 0);
    assert_eq!(ledger.resource(Resource::Gold), 12);

    // Ezren's outcome arrives after the rollover and has nowhere to go.
    let events = ezren.poll();
    assert!(matches!(&events[..], [SessionEvent::Dropped { .. }]));
}

#[test]
fn aid_outcome_arriving_after_rollover_is_dropped() {
    let hub = hub_at(TurnPhase::Events);
    let mut ezren = client(&hub, "p2", "Ezren", OutcomeTier::CriticalFailure);
    ezren.request_aid("bandit-raid", "diplomacy", 2).unwrap();

    let mut moderator = hub.connect();
    moderator
        .update("end_turn", |l| Ok::<_, ()>(turn::end_turn(l)))
        .unwrap();

    let events = ezren.poll();
    assert!(matches!(
        &events[..],
        [SessionEvent::Dropped { check_id, .. }] if check_id == "bandit-raid"
    ));
    let state = hub.snapshot().ledger.turn_state().clone();
    assert_eq!(state.turn, 2);
    assert!(state.aids.is_empty());
    assert_eq!(state.aids.bonus_for("bandit-raid").bonus, 0);
    assert!(state.action_log.is_empty());
}
