mod common;

use common::{create_multi_rule_strategy, facade, multi_rule_request, wafer_3x3};
use semver::Version;
use waferplan::api::shapes::{SimulateRequest, UpdateStrategyRequest};
use waferplan::api::Facade;
use waferplan::error::ErrorCode;
use waferplan::repo::StrategyFilter;
use waferplan::strategy::LifecycleState;

fn simulate(facade: &Facade, id: uuid::Uuid) {
    facade
        .simulate(
            id,
            SimulateRequest {
                wafer_map: wafer_3x3(),
                process_params: Default::default(),
                tool_constraints: Default::default(),
                wafer_size: None,
                product_type: None,
                process_layer: None,
                defect_density: None,
                version: None,
            },
        )
        .unwrap();
}

#[test]
fn promote_through_review_and_approval() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    assert_eq!(strategy.lifecycle_state, LifecycleState::Draft);

    let reviewed = facade.promote_strategy(strategy.id, "lead-eng").unwrap();
    assert_eq!(reviewed.lifecycle_state, LifecycleState::Review);

    // Approval requires a recorded simulation.
    let err = facade.promote_strategy(strategy.id, "lead-eng").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LifecycleViolation);

    simulate(&facade, strategy.id);
    let approved = facade.promote_strategy(strategy.id, "lead-eng").unwrap();
    assert_eq!(approved.lifecycle_state, LifecycleState::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("lead-eng"));
    // Version never decreased along the way.
    assert!(approved.version >= strategy.version);

    let log = facade.transition_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].from, LifecycleState::Draft);
    assert_eq!(log[0].to, LifecycleState::Review);
    assert_eq!(log[1].to, LifecycleState::Approved);
    assert_eq!(log[1].user, "lead-eng");
}

#[test]
fn rule_less_draft_cannot_enter_review() {
    let facade = facade();
    let mut request = multi_rule_request();
    request.rules.clear();
    let strategy = facade.create_strategy(request).unwrap();
    let err = facade.promote_strategy(strategy.id, "lead").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LifecycleViolation);
}

#[test]
fn broken_rules_fail_promotion_with_compile_error() {
    let facade = facade();
    let mut request = multi_rule_request();
    request.rules[0].rule_type = "adaptive".to_string();
    let strategy = facade.create_strategy(request).unwrap();
    let err = facade.promote_strategy(strategy.id, "lead").unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompileError);
}

#[test]
fn activation_deprecates_the_prior_active() {
    let facade = facade();

    let first = create_multi_rule_strategy(&facade);
    simulate(&facade, first.id);
    facade.promote_strategy(first.id, "lead").unwrap();
    facade.promote_strategy(first.id, "lead").unwrap();
    let active = facade.promote_strategy(first.id, "lead").unwrap();
    assert_eq!(active.lifecycle_state, LifecycleState::Active);

    // A second strategy for the same (process step, tool type) takes over.
    let mut request = multi_rule_request();
    request.name = "successor".to_string();
    let second = facade.create_strategy(request).unwrap();
    simulate(&facade, second.id);
    facade.promote_strategy(second.id, "lead").unwrap();
    facade.promote_strategy(second.id, "lead").unwrap();
    let now_active = facade.promote_strategy(second.id, "lead").unwrap();
    assert_eq!(now_active.lifecycle_state, LifecycleState::Active);

    let prior = facade.get_strategy(first.id, None).unwrap();
    assert_eq!(prior.lifecycle_state, LifecycleState::Deprecated);

    // Exactly one active strategy per (process step, tool type).
    let active_list = facade
        .list_strategies(&StrategyFilter {
            lifecycle_state: Some(LifecycleState::Active),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(active_list.len(), 1);
    assert_eq!(active_list[0].id, second.id);
}

#[test]
fn active_strategies_cannot_be_promoted_further() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    simulate(&facade, strategy.id);
    for _ in 0..3 {
        facade.promote_strategy(strategy.id, "lead").unwrap();
    }
    let err = facade.promote_strategy(strategy.id, "lead").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LifecycleViolation);
}

#[test]
fn retract_returns_to_draft_and_clears_reviewer() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    simulate(&facade, strategy.id);
    facade.promote_strategy(strategy.id, "lead").unwrap();
    let approved = facade.promote_strategy(strategy.id, "lead").unwrap();
    assert!(approved.reviewed_by.is_some());

    let retracted = facade.retract_strategy(strategy.id, "lead").unwrap();
    assert_eq!(retracted.lifecycle_state, LifecycleState::Draft);
    assert!(retracted.reviewed_by.is_none());
}

#[test]
fn deprecation_is_terminal() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    simulate(&facade, strategy.id);
    facade.promote_strategy(strategy.id, "lead").unwrap();
    let deprecated = facade.deprecate_strategy(strategy.id, "lead").unwrap();
    assert_eq!(deprecated.lifecycle_state, LifecycleState::Deprecated);

    assert!(facade.promote_strategy(strategy.id, "lead").is_err());
    assert!(facade.retract_strategy(strategy.id, "lead").is_err());
    // Drafts are not deprecable either; they are simply deleted.
    let draft = create_multi_rule_strategy(&facade);
    assert!(facade.deprecate_strategy(draft.id, "lead").is_err());
}

#[test]
fn updating_an_approved_strategy_forks_a_new_draft() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    simulate(&facade, strategy.id);
    facade.promote_strategy(strategy.id, "lead").unwrap();
    facade.promote_strategy(strategy.id, "lead").unwrap();

    let updated = facade
        .update_strategy(
            strategy.id,
            UpdateStrategyRequest {
                description: Some("tightened sampling".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.lifecycle_state, LifecycleState::Draft);
    assert_eq!(updated.version, Version::new(1, 0, 1));
    assert!(updated.reviewed_by.is_none());

    // Both versions remain retrievable.
    let original = facade
        .get_strategy(strategy.id, Some(&Version::new(1, 0, 0)))
        .unwrap();
    assert_eq!(original.lifecycle_state, LifecycleState::Approved);

    // The fork invalidated the simulation record, so approval needs a
    // fresh run.
    facade.promote_strategy(strategy.id, "lead").unwrap();
    let err = facade.promote_strategy(strategy.id, "lead").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LifecycleViolation);
}

#[test]
fn clone_starts_a_fresh_draft_lineage() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    simulate(&facade, strategy.id);
    facade.promote_strategy(strategy.id, "lead").unwrap();
    facade.promote_strategy(strategy.id, "lead").unwrap();

    let cloned = facade
        .clone_strategy(strategy.id, "baseline-sampling-v2", "new-eng")
        .unwrap();
    assert_ne!(cloned.id, strategy.id);
    assert_eq!(cloned.version, Version::new(1, 0, 0));
    assert_eq!(cloned.lifecycle_state, LifecycleState::Draft);
    assert_eq!(cloned.author, "new-eng");
    assert_eq!(cloned.rules.len(), strategy.rules.len());
    assert!(cloned.description.contains(&strategy.name));
}
