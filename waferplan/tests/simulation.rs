mod common;

use common::{create_multi_rule_strategy, facade, wafer_3x3};
use waferplan::api::shapes::SimulateRequest;
use waferplan::exec::ToolConstraints;

fn simulate_request() -> SimulateRequest {
    SimulateRequest {
        wafer_map: wafer_3x3(),
        process_params: Default::default(),
        tool_constraints: ToolConstraints::default(),
        wafer_size: None,
        product_type: None,
        process_layer: None,
        defect_density: None,
        version: None,
    }
}

#[test]
fn multi_rule_simulation_on_3x3_grid() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);

    let result = facade.simulate(strategy.id, simulate_request()).unwrap();
    let stats = &result.coverage_stats;
    assert!(stats.selected_count >= 3, "{}", stats.selected_count);
    assert!(stats.selected_count <= 9);
    assert!(stats.coverage_pct >= 33.0);
    for rule in ["fixedPoint", "centerEdge", "uniformGrid"] {
        assert!(
            stats.rule_distribution[rule] > 0,
            "rule {rule} produced nothing"
        );
    }
    // The ranked list is priority-descending.
    for pair in result.selected_points.windows(2) {
        assert!(pair[0].priority >= pair[1].priority);
    }
}

#[test]
fn simulation_is_reproducible_through_the_facade() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let a = facade.simulate(strategy.id, simulate_request()).unwrap();
    let b = facade.simulate(strategy.id, simulate_request()).unwrap();
    assert_eq!(a.selected_points, b.selected_points);
    assert_eq!(a.coverage_stats, b.coverage_stats);
    assert_eq!(a.warnings, b.warnings);
}

#[test]
fn max_sites_clamps_the_ranked_list() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let mut request = simulate_request();
    request.tool_constraints.max_sites = Some(2);
    let result = facade.simulate(strategy.id, request).unwrap();
    assert_eq!(result.selected_points.len(), 2);
    // The kept sites are the top-priority ones.
    let full = facade.simulate(strategy.id, simulate_request()).unwrap();
    assert_eq!(
        result.selected_points[..],
        full.selected_points[..2],
    );
}

#[test]
fn unknown_strategy_is_not_found() {
    let facade = facade();
    let err = facade
        .simulate(uuid::Uuid::new_v4(), simulate_request())
        .unwrap_err();
    assert_eq!(err.code(), waferplan::error::ErrorCode::NotFound);
}

#[test]
fn empty_wafer_returns_a_well_formed_empty_result() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let mut request = simulate_request();
    request.wafer_map = waferplan::wafer::WaferMap::default();
    let result = facade.simulate(strategy.id, request).unwrap();
    assert!(result.selected_points.is_empty());
    assert_eq!(result.coverage_stats.selected_count, 0);
    assert!(!result.warnings.is_empty());
}
