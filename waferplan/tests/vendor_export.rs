mod common;

use common::{create_multi_rule_strategy, facade, multi_rule_request, wafer_3x3};
use serde_json::Value;
use waferplan::api::shapes::ExportStrategyRequest;

fn export_request(vendor: &str) -> ExportStrategyRequest {
    ExportStrategyRequest {
        wafer_map: wafer_3x3().with_wafer_size("300mm"),
        vendor: Some(vendor.to_string()),
        tool_constraints: Default::default(),
        process_params: Default::default(),
        validation_id: None,
    }
}

#[test]
fn asml_export_shape_and_center_origin() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let output = facade
        .export_strategy(strategy.id, export_request("asml"))
        .unwrap();
    assert_eq!(output.content_type, "application/json");

    let doc: Value = serde_json::from_slice(&output.bytes).unwrap();
    for key in ["format", "version", "wafer_data", "sampling_points"] {
        assert!(doc.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(doc["format"], "ASML_JSON");
    assert_eq!(doc["wafer_data"]["size"], "300mm");

    let sites = doc["sampling_points"].as_array().unwrap();
    assert!(!sites.is_empty());
    // Center-origin: the site cloud is centered on zero in both axes.
    let xs: Vec<f64> = sites.iter().map(|s| s["SiteX"].as_f64().unwrap()).collect();
    let ys: Vec<f64> = sites.iter().map(|s| s["SiteY"].as_f64().unwrap()).collect();
    let x_mid = (xs.iter().cloned().fold(f64::INFINITY, f64::min)
        + xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        / 2.0;
    let y_mid = (ys.iter().cloned().fold(f64::INFINITY, f64::min)
        + ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        / 2.0;
    assert!(x_mid.abs() < 1e-9);
    assert!(y_mid.abs() < 1e-9);
}

#[test]
fn kla_export_is_corner_origin_with_flipped_y() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);

    let asml = facade
        .export_strategy(strategy.id, export_request("asml"))
        .unwrap();
    let asml_doc: Value = serde_json::from_slice(&asml.bytes).unwrap();
    let asml_sites = asml_doc["sampling_points"].as_array().unwrap();

    let kla = facade
        .export_strategy(strategy.id, export_request("kla"))
        .unwrap();
    assert_eq!(kla.content_type, "application/xml");
    let text = String::from_utf8(kla.bytes).unwrap();
    assert!(text.contains("<KLA_SamplingPlan version=\"2.0\""));
    assert!(text.contains("Enabled=\"true\""));

    // Corner origin: no negative coordinates anywhere.
    for attr in ["X_Position=\"-", "Y_Position=\"-"] {
        assert!(!text.contains(attr), "negative coordinate in {text}");
    }

    // The y-axis is flipped relative to the ASML (y-up) emission: the
    // ASML site with the greatest SiteY has the smallest KLA Y_Position.
    let max_y = asml_sites
        .iter()
        .map(|s| s["SiteY"].as_f64().unwrap())
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = asml_sites
        .iter()
        .map(|s| s["SiteY"].as_f64().unwrap())
        .fold(f64::INFINITY, f64::min);
    assert!(max_y > min_y);
    assert!(text.contains("Y_Position=\"0\""));
}

#[test]
fn export_uses_the_strategy_target_vendor_as_default() {
    let facade = facade();
    let mut request = multi_rule_request();
    request.target_vendor = Some("kla".to_string());
    let strategy = facade.create_strategy(request).unwrap();

    let mut export = export_request("kla");
    export.vendor = None;
    let output = facade.export_strategy(strategy.id, export).unwrap();
    assert_eq!(output.content_type, "application/xml");
}

#[test]
fn unknown_vendor_is_rejected() {
    let facade = facade();
    let strategy = create_multi_rule_strategy(&facade);
    let err = facade
        .export_strategy(strategy.id, export_request("nikon"))
        .unwrap_err();
    assert_eq!(err.code(), waferplan::error::ErrorCode::UnknownPlugin);
}

#[test]
fn discovery_lists_formats_rules_and_vendors() {
    let facade = facade();
    assert_eq!(facade.supported_formats(), vec!["gdsii", "dxf", "svg"]);
    assert_eq!(
        facade.rule_types(),
        vec!["fixedPoint", "centerEdge", "uniformGrid", "randomSampling"]
    );
    assert_eq!(facade.vendor_names(), vec!["asml", "kla"]);
    assert_eq!(facade.health().status, "ok");
}
