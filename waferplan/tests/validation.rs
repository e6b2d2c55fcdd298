mod common;

use common::{create_multi_rule_strategy, facade, svg_grid, upload};
use waferplan::api::shapes::ValidateRequest;
use waferplan::validate::{ValidationMode, ValidationStatus};

#[test]
fn multi_rule_strategy_validates_against_svg_grid() {
    let facade = facade();
    let schematic_id = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();
    let strategy = create_multi_rule_strategy(&facade);

    let result = facade
        .validate(
            schematic_id,
            ValidateRequest {
                strategy_id: strategy.id,
                validation_mode: ValidationMode::Permissive,
                validated_by: Some("reviewer".to_string()),
            },
        )
        .unwrap();

    assert!(result.conflicts.is_empty(), "{:?}", result.conflicts);
    assert!(result.alignment_score >= 0.8, "{}", result.alignment_score);
    assert!(result.coverage_pct >= 50.0, "{}", result.coverage_pct);
    assert!(result.warnings.len() <= 2, "{:?}", result.warnings);
    assert_eq!(result.validation_status, ValidationStatus::Pass);
    assert_eq!(result.validated_by, "reviewer");
    assert_eq!(result.strategy_id, strategy.id);
    assert_eq!(result.schematic_id, schematic_id);
}

#[test]
fn validation_results_are_stored_and_listed() {
    let facade = facade();
    let schematic_id = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();
    let strategy = create_multi_rule_strategy(&facade);

    let request = || ValidateRequest {
        strategy_id: strategy.id,
        validation_mode: ValidationMode::Permissive,
        validated_by: None,
    };
    let first = facade.validate(schematic_id, request()).unwrap();
    let second = facade.validate(schematic_id, request()).unwrap();
    assert_ne!(first.id, second.id);

    let listed = facade.list_validations_for_schematic(schematic_id).unwrap();
    assert_eq!(listed.len(), 2);
    let fetched = facade.get_validation(first.id).unwrap();
    assert_eq!(fetched.id, first.id);
}

#[test]
fn validating_against_a_missing_schematic_fails() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let err = facade
        .validate(
            uuid::Uuid::new_v4(),
            ValidateRequest {
                strategy_id: strategy.id,
                validation_mode: ValidationMode::Permissive,
                validated_by: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), waferplan::error::ErrorCode::NotFound);
}
