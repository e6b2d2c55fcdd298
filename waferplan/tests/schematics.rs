mod common;

use common::{facade, svg_grid, upload};
use waferplan::api::shapes::{ErrorEnvelope, UploadSchematicRequest};
use waferplan::api::Facade;
use waferplan::config::Config;
use waferplan::error::ErrorCode;
use waferplan::repo::SchematicFilter;
use waferplan::schematic::FormatType;
use wafergeom::CoordinateSystem;

#[test]
fn simple_svg_3x3() {
    let facade = facade();
    let id = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();

    let detail = facade.get_schematic(id).unwrap();
    assert_eq!(detail.summary.die_count, 9);
    assert_eq!(detail.summary.available_die_count, 9);
    assert_eq!(detail.summary.format_type, FormatType::Svg);
    assert_eq!(detail.coordinate_system, CoordinateSystem::SvgUnits);

    let boundaries = facade.get_die_boundaries(id).unwrap();
    assert_eq!(boundaries.len(), 9);
    assert!(boundaries.iter().all(|b| b.available));
    let layout = detail.statistics.layout_bounds.unwrap();
    for b in &boundaries {
        assert!(layout.encloses(&b.bounds));
    }
}

#[test]
fn complex_svg_7x7_with_corner_markers() {
    // 49 inner dies plus 4 corner markers small enough to fail the die
    // heuristic but large enough to be kept as unavailable markers.
    let mut svg = svg_grid(7, 8.0, 10.0);
    let close = svg.rfind("</svg>").unwrap();
    let body = svg.split_off(close);
    for (x, y) in [(-6.0, -6.0), (72.0, -6.0), (-6.0, 72.0), (72.0, 72.0)] {
        svg.push_str(&format!(
            "  <rect x=\"{x}\" y=\"{y}\" width=\"1.5\" height=\"1.5\"/>\n"
        ));
    }
    svg.push_str(&body);

    let facade = facade();
    let id = upload(&facade, "grid7.svg", svg.into_bytes()).unwrap();
    let detail = facade.get_schematic(id).unwrap();
    assert_eq!(detail.summary.die_count, 53);
    assert_eq!(detail.summary.available_die_count, 49);

    // The center die sits at the center of the die lattice.
    let boundaries = facade.get_die_boundaries(id).unwrap();
    let available: Vec<_> = boundaries.iter().filter(|b| b.available).collect();
    let center_x = available.iter().map(|b| b.center_x).sum::<f64>() / available.len() as f64;
    let center_y = available.iter().map(|b| b.center_y).sum::<f64>() / available.len() as f64;
    assert!(available
        .iter()
        .any(|b| (b.center_x - center_x).abs() < 1e-9 && (b.center_y - center_y).abs() < 1e-9));
}

#[test]
fn dxf_with_target_layer_and_text_labels() {
    let mut doc = String::new();
    let mut pair = |code: i32, value: String| {
        doc.push_str(&format!("{code}\n{value}\n"));
    };
    pair(0, "SECTION".into());
    pair(2, "HEADER".into());
    pair(9, "$INSUNITS".into());
    pair(70, "4".into());
    pair(0, "ENDSEC".into());
    pair(0, "SECTION".into());
    pair(2, "ENTITIES".into());
    for i in 0..4 {
        let x = i as f64 * 12.0;
        pair(0, "LWPOLYLINE".into());
        pair(8, "DIE_BOUNDARY".into());
        pair(70, "1".into());
        for (px, py) in [(x, 0.0), (x + 8.0, 0.0), (x + 8.0, 8.0), (x, 8.0)] {
            pair(10, px.to_string());
            pair(20, py.to_string());
        }
        pair(0, "TEXT".into());
        pair(8, "DIE_BOUNDARY".into());
        pair(10, (x + 4.0).to_string());
        pair(20, "4.0".into());
        pair(40, "0.5".into());
        pair(1, format!("T{i}"));
    }
    // Entities on other layers must be ignored.
    pair(0, "LWPOLYLINE".into());
    pair(8, "METAL1".into());
    pair(70, "1".into());
    for (px, py) in [(0.0, 40.0), (60.0, 40.0), (60.0, 80.0), (0.0, 80.0)] {
        pair(10, px.to_string());
        pair(20, py.to_string());
    }
    pair(0, "CIRCLE".into());
    pair(8, "0".into());
    pair(10, "100".into());
    pair(20, "100".into());
    pair(40, "5".into());
    pair(0, "ENDSEC".into());
    pair(0, "EOF".into());

    let facade = facade();
    let request = UploadSchematicRequest {
        filename: "four_dies.dxf".to_string(),
        bytes: doc.into_bytes(),
        created_by: "test-eng".to_string(),
        coordinate_scale: None,
        target_layer: Some("DIE_BOUNDARY".to_string()),
        target_cell: None,
        die_size_filter_min: None,
        die_size_filter_max: None,
    };
    let detail = facade.upload_schematic(request).unwrap();
    assert_eq!(detail.summary.die_count, 4);
    assert_eq!(detail.summary.format_type, FormatType::Dxf);

    let boundaries = facade.get_die_boundaries(detail.summary.id).unwrap();
    let ids: Vec<&str> = boundaries.iter().map(|b| b.die_id.as_str()).collect();
    assert_eq!(ids, vec!["T0", "T1", "T2", "T3"]);
}

#[test]
fn plain_text_upload_is_rejected_naming_formats() {
    let facade = facade();
    let err = upload(&facade, "notes.txt", b"this is not a layout".to_vec()).unwrap_err();
    let envelope = ErrorEnvelope::new(&err, "req-test");
    assert!(matches!(
        envelope.error.code,
        ErrorCode::ParserError | ErrorCode::ValidationError
    ));
    assert_eq!(envelope.http_status(), 400);
    for format in ["gdsii", "dxf", "svg"] {
        assert!(
            envelope.error.message.contains(format),
            "message {:?} does not name {format}",
            envelope.error.message
        );
    }
}

#[test]
fn oversized_upload_is_rejected_with_the_limit() {
    let config = Config {
        max_upload_bytes: 1024,
        ..Default::default()
    };
    let facade = Facade::in_memory(config);
    let err = upload(&facade, "big.svg", vec![b'x'; 4096]).unwrap_err();
    let envelope = ErrorEnvelope::new(&err, "req-test");
    assert_eq!(envelope.error.code, ErrorCode::PayloadTooLarge);
    assert_eq!(envelope.http_status(), 413);
    assert!(envelope.error.message.contains("1024"));
}

#[test]
fn die_cap_is_enforced() {
    let config = Config {
        max_dies: 8,
        ..Default::default()
    };
    let facade = Facade::in_memory(config);
    let err = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap_err();
    let envelope = ErrorEnvelope::new(&err, "req-test");
    assert_eq!(envelope.error.code, ErrorCode::TooManyDies);
    assert_eq!(envelope.http_status(), 413);
}

#[test]
fn list_and_delete() {
    let facade = facade();
    let a = upload(&facade, "a.svg", svg_grid(2, 8.0, 10.0).into_bytes()).unwrap();
    let _b = upload(&facade, "b.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();

    let listed = facade.list_schematics(&SchematicFilter::default()).unwrap();
    assert_eq!(listed.len(), 2);

    facade.delete_schematic(a).unwrap();
    let listed = facade.list_schematics(&SchematicFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(facade.get_schematic(a).is_err());
}

#[test]
fn annotations_are_mutable_on_an_immutable_body() {
    let facade = facade();
    let id = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();
    facade
        .annotate_schematic(
            id,
            vec!["golden".to_string()],
            Some("reference layout".to_string()),
        )
        .unwrap();
    let detail = facade.get_schematic(id).unwrap();
    assert_eq!(detail.summary.tags, vec!["golden"]);
    assert_eq!(detail.notes.as_deref(), Some("reference layout"));
    // The parsed body is untouched.
    assert_eq!(detail.summary.die_count, 9);
}

#[test]
fn reemission_round_trips_through_the_dxf_parser() {
    let facade = facade();
    let id = upload(&facade, "grid3.svg", svg_grid(3, 8.0, 10.0).into_bytes()).unwrap();

    let svg = facade.export_schematic(id, FormatType::Svg).unwrap();
    assert_eq!(svg.content_type, "image/svg+xml");
    assert!(String::from_utf8(svg.bytes).unwrap().contains("<rect"));

    let dxf = facade.export_schematic(id, FormatType::Dxf).unwrap();
    assert_eq!(dxf.content_type, "application/dxf");
    let reparsed = upload(&facade, "reemitted.dxf", dxf.bytes).unwrap();
    let detail = facade.get_schematic(reparsed).unwrap();
    assert_eq!(detail.summary.die_count, 9);

    assert!(facade.export_schematic(id, FormatType::Gdsii).is_err());
}

#[test]
fn gdsii_upload_by_magic_sniff() {
    let facade = facade();
    // A misleading extension: the GDSII magic must win.
    let id = upload(&facade, "layout.svg", common::gds_grid(3)).unwrap();
    let detail = facade.get_schematic(id).unwrap();
    assert_eq!(detail.summary.format_type, FormatType::Gdsii);
    assert_eq!(detail.summary.die_count, 9);
    assert_eq!(detail.coordinate_system, CoordinateSystem::GdsiiUnits);
    // Coordinates arrive scaled into user units.
    let boundaries = facade.get_die_boundaries(id).unwrap();
    assert!((boundaries[0].width - 8.0).abs() < 1e-9);
}

#[test]
fn large_schematic_smoke() {
    let facade = facade();
    let id = upload(&facade, "grid40.svg", svg_grid(40, 8.0, 10.0).into_bytes()).unwrap();
    let detail = facade.get_schematic(id).unwrap();
    assert_eq!(detail.summary.die_count, 1600);
}
