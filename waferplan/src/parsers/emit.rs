//! Re-emission of parsed schematics as SVG or DXF.
//!
//! The output is a rendering of the die-boundary model, not a copy of the
//! uploaded bytes: availability is color-coded in SVG and layer-coded in
//! DXF.

use std::fmt::Write;

use crate::schematic::{FormatType, SchematicData};

/// Rendered bytes plus their media type.
pub struct Rendering {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub fn render(schematic: &SchematicData, target: FormatType) -> Option<Rendering> {
    match target {
        FormatType::Svg => Some(Rendering {
            bytes: to_svg(schematic).into_bytes(),
            content_type: "image/svg+xml",
        }),
        FormatType::Dxf => Some(Rendering {
            bytes: to_dxf(schematic).into_bytes(),
            content_type: "application/dxf",
        }),
        FormatType::Gdsii => None,
    }
}

fn to_svg(schematic: &SchematicData) -> String {
    let bounds = schematic.layout_bounds().unwrap_or_default();
    let (w, h) = (bounds.width(), bounds.height());
    let mut out = String::new();
    let _ = writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"{} {} {} {}\" width=\"{w}\" height=\"{h}\">",
        bounds.x_min, bounds.y_min, w, h
    );
    let _ = writeln!(out, "  <title>{} - die layout</title>", schematic.filename);
    let _ = writeln!(
        out,
        "  <desc>Wafer layout with {} dies</desc>",
        schematic.die_count()
    );
    for die in &schematic.dies {
        let fill = if die.available { "#4CAF50" } else { "#F44336" };
        let _ = writeln!(
            out,
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{fill}\" stroke=\"#333\" stroke-width=\"1\" opacity=\"0.7\"/>",
            die.bounds.x_min,
            die.bounds.y_min,
            die.width(),
            die.height()
        );
        let center = die.center();
        let _ = writeln!(
            out,
            "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" dominant-baseline=\"central\" font-size=\"{}\" fill=\"white\">{}</text>",
            center.x,
            center.y,
            (die.width().min(die.height()) * 0.2).max(1.0),
            die.die_id
        );
    }
    out.push_str("</svg>\n");
    out
}

const AVAILABLE_LAYER: &str = "AVAILABLE_DIES";
const UNAVAILABLE_LAYER: &str = "UNAVAILABLE_DIES";

fn to_dxf(schematic: &SchematicData) -> String {
    let mut out = String::new();
    let mut pair = |code: i32, value: &str| {
        let _ = writeln!(out, "{code}\n{value}");
    };

    pair(0, "SECTION");
    pair(2, "HEADER");
    pair(9, "$ACADVER");
    pair(1, "AC1027");
    pair(9, "$INSUNITS");
    pair(70, "4");
    pair(0, "ENDSEC");

    pair(0, "SECTION");
    pair(2, "ENTITIES");
    for die in &schematic.dies {
        let layer = if die.available {
            AVAILABLE_LAYER
        } else {
            UNAVAILABLE_LAYER
        };
        pair(0, "LWPOLYLINE");
        pair(8, layer);
        pair(90, "4");
        pair(70, "1");
        let b = die.bounds;
        for (x, y) in [
            (b.x_min, b.y_min),
            (b.x_max, b.y_min),
            (b.x_max, b.y_max),
            (b.x_min, b.y_max),
        ] {
            pair(10, &x.to_string());
            pair(20, &y.to_string());
        }

        let center = die.center();
        pair(0, "TEXT");
        pair(8, layer);
        pair(10, &center.x.to_string());
        pair(20, &center.y.to_string());
        pair(40, &(die.width().min(die.height()) * 0.1).to_string());
        pair(1, die.die_id.as_str());
    }
    pair(0, "ENDSEC");
    pair(0, "EOF");
    out
}
