#![allow(dead_code)]

use serde_json::json;
use uuid::Uuid;
use waferplan::api::shapes::{CreateStrategyRequest, UploadSchematicRequest};
use waferplan::api::Facade;
use waferplan::config::Config;
use waferplan::strategy::{RuleConfig, StrategyDefinition, StrategyType};
use waferplan::wafer::{Die, WaferMap};

pub fn facade() -> Facade {
    Facade::in_memory(Config::default())
}

/// An SVG wafer map: `n` x `n` dies of the given size on the given pitch.
pub fn svg_grid(n: usize, die: f64, pitch: f64) -> String {
    let extent = n as f64 * pitch;
    let mut s = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {extent} {extent}\">\n"
    );
    for row in 0..n {
        for col in 0..n {
            s.push_str(&format!(
                "  <rect x=\"{}\" y=\"{}\" width=\"{die}\" height=\"{die}\"/>\n",
                col as f64 * pitch,
                row as f64 * pitch
            ));
        }
    }
    s.push_str("</svg>\n");
    s
}

pub fn upload(facade: &Facade, filename: &str, bytes: Vec<u8>) -> waferplan::error::Result<Uuid> {
    facade
        .upload_schematic(UploadSchematicRequest {
            filename: filename.to_string(),
            bytes,
            created_by: "test-eng".to_string(),
            coordinate_scale: None,
            target_layer: None,
            target_cell: None,
            die_size_filter_min: None,
            die_size_filter_max: None,
        })
        .map(|detail| detail.summary.id)
}

/// The three-rule strategy used across the scenarios: fixed points on the
/// diagonal, a center-edge pick, and a coarse uniform grid.
pub fn multi_rule_request() -> CreateStrategyRequest {
    CreateStrategyRequest {
        name: "baseline-sampling".to_string(),
        description: "diagonal + center-edge + grid".to_string(),
        strategy_type: StrategyType::Custom,
        process_step: "litho".to_string(),
        tool_type: "scanner".to_string(),
        rules: vec![
            RuleConfig::new("fixedPoint", json!({ "points": [[0, 0], [1, 1], [2, 2]] }), 0.4),
            RuleConfig::new("centerEdge", json!({ "edgeMargin": 5 }), 0.3),
            RuleConfig::new("uniformGrid", json!({ "gridSpacing": 10.0 }), 0.3),
        ],
        global_conditions: None,
        transformations: None,
        target_vendor: None,
        vendor_specific_params: Default::default(),
        author: "test-eng".to_string(),
    }
}

pub fn create_multi_rule_strategy(facade: &Facade) -> StrategyDefinition {
    facade.create_strategy(multi_rule_request()).unwrap()
}

pub fn wafer_3x3() -> WaferMap {
    WaferMap::new((0..3).flat_map(|x| (0..3).map(move |y| Die::new(x, y))))
}

// --- Minimal GDSII byte builder -----------------------------------------

fn gds_record(rtype: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&((data.len() as u16 + 4).to_be_bytes()));
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(data);
    out
}

fn gds_real8(value: f64) -> [u8; 8] {
    if value == 0.0 {
        return [0; 8];
    }
    let mut v = value.abs();
    let mut exp = 0i32;
    while v >= 1.0 {
        v /= 16.0;
        exp += 1;
    }
    while v < 1.0 / 16.0 {
        v *= 16.0;
        exp -= 1;
    }
    let mantissa = (v * 2f64.powi(56)) as u64;
    let mut out = [0u8; 8];
    out[0] = (exp + 64) as u8 & 0x7f;
    out[1..8].copy_from_slice(&mantissa.to_be_bytes()[1..8]);
    out
}

/// A single-structure GDSII library holding `n` x `n` boundary squares on
/// layer 2, in 1e-3 user units.
pub fn gds_grid(n: i32) -> Vec<u8> {
    let mut bytes = gds_record(0x0002, &600u16.to_be_bytes());
    bytes.extend(gds_record(0x0102, &[0u8; 24]));
    bytes.extend(gds_record(0x0206, b"LIB\0"));
    let mut units = Vec::new();
    units.extend_from_slice(&gds_real8(1e-3));
    units.extend_from_slice(&gds_real8(1e-9));
    bytes.extend(gds_record(0x0305, &units));

    bytes.extend(gds_record(0x0502, &[0u8; 24]));
    bytes.extend(gds_record(0x0606, b"TOP\0"));
    for y in 0..n {
        for x in 0..n {
            let (x0, y0) = (x * 10_000, y * 10_000);
            let (x1, y1) = (x0 + 8_000, y0 + 8_000);
            bytes.extend(gds_record(0x0800, &[]));
            bytes.extend(gds_record(0x0D02, &2i16.to_be_bytes()));
            let mut xy = Vec::new();
            for (px, py) in [(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)] {
                xy.extend_from_slice(&px.to_be_bytes());
                xy.extend_from_slice(&py.to_be_bytes());
            }
            bytes.extend(gds_record(0x1003, &xy));
            bytes.extend(gds_record(0x1100, &[]));
        }
    }
    bytes.extend(gds_record(0x0700, &[]));
    bytes.extend(gds_record(0x0400, &[]));
    bytes
}
