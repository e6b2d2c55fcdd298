//! DXF parser.
//!
//! DXF is a line-oriented text format of (group code, value) pairs. Layers
//! carry the semantics: die outlines conventionally live on a layer named
//! something like `DIE_BOUNDARY`, so layer selection happens before entity
//! interpretation.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use wafergeom::{Bounds, CoordinateSystem, Point};

use super::{finalize_boundaries, ParseError, ParseOptions};
use crate::budget::OpBudget;
use crate::error::Result;
use crate::schematic::{
    estimate_wafer_size, median, DieBoundary, FormatType, SchematicData, SchematicMetadata,
};

pub fn parse(bytes: &[u8], options: &ParseOptions, budget: &OpBudget) -> Result<SchematicData> {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = PairReader::new(&text);

    let mut doc = Document::default();
    let mut section = String::new();

    while let Some((code, value)) = reader.next_pair()? {
        budget.check()?;
        if code != 0 {
            // Section-level pairs: header variables are handled inside
            // read_header; anything else outside an entity is skipped.
            continue;
        }
        match value.as_str() {
            "SECTION" => {
                section = match reader.next_pair()? {
                    Some((2, name)) => name,
                    _ => {
                        return Err(ParseError::at_offset(
                            FormatType::Dxf,
                            reader.line() as u64,
                            "SECTION without a name",
                        )
                        .into());
                    }
                };
                if section == "HEADER" {
                    read_header(&mut reader, &mut doc)?;
                    section.clear();
                }
            }
            "ENDSEC" => section.clear(),
            "BLOCK" if section == "BLOCKS" => read_block(&mut reader, &mut doc, budget)?,
            "EOF" => break,
            etype if section == "ENTITIES" => {
                let entity = read_entity(&mut reader, etype)?;
                doc.entities.push(entity);
            }
            _ => {}
        }
    }

    build_schematic(doc, options, bytes.len() as u64)
}

#[derive(Debug, Default)]
struct Document {
    insunits: i32,
    acadver: Option<String>,
    blocks: HashMap<String, Bounds>,
    entities: Vec<Entity>,
}

#[derive(Debug, Default, Clone)]
struct Entity {
    etype: String,
    layer: String,
    /// Accumulated 10/20 coordinate series.
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second point (11/21) for LINE.
    x2: Option<f64>,
    y2: Option<f64>,
    /// Group 40: radius for CIRCLE, height for TEXT.
    size: Option<f64>,
    text: Option<String>,
    flags: i32,
    /// Group 2: block name for INSERT.
    name: Option<String>,
    scale_x: f64,
    scale_y: f64,
}

impl Entity {
    fn new(etype: &str) -> Self {
        Self {
            etype: etype.to_string(),
            layer: "0".to_string(),
            scale_x: 1.0,
            scale_y: 1.0,
            ..Default::default()
        }
    }

    fn points_bounds(&self) -> Option<Bounds> {
        let mut points = self.xs.iter().zip(&self.ys);
        let first = points.next()?;
        let mut b = Bounds::from_point(Point::new(*first.0, *first.1));
        for (x, y) in points {
            b = b.add_point(Point::new(*x, *y));
        }
        Some(b)
    }

    fn is_closed(&self) -> bool {
        if self.flags & 1 != 0 {
            return true;
        }
        match (self.xs.first(), self.xs.last(), self.ys.first(), self.ys.last()) {
            (Some(x0), Some(x1), Some(y0), Some(y1)) => {
                self.xs.len() > 2 && (x0 - x1).abs() < 1e-9 && (y0 - y1).abs() < 1e-9
            }
            _ => false,
        }
    }
}

/// Lazy (group code, value) pair reader with line tracking.
struct PairReader<'a> {
    lines: std::str::Lines<'a>,
    line_no: usize,
    peeked: Option<(i32, String)>,
}

impl<'a> PairReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line_no: 0,
            peeked: None,
        }
    }

    fn line(&self) -> usize {
        self.line_no
    }

    fn next_pair(&mut self) -> std::result::Result<Option<(i32, String)>, ParseError> {
        if let Some(pair) = self.peeked.take() {
            return Ok(Some(pair));
        }
        let Some(code_line) = self.lines.next() else {
            return Ok(None);
        };
        self.line_no += 1;
        let code = code_line.trim().parse::<i32>().map_err(|_| {
            ParseError::at_offset(
                FormatType::Dxf,
                self.line_no as u64,
                format!("expected a group code, found `{}`", code_line.trim()),
            )
        })?;
        let Some(value) = self.lines.next() else {
            return Err(ParseError::at_offset(
                FormatType::Dxf,
                self.line_no as u64,
                "group code without a value",
            ));
        };
        self.line_no += 1;
        Ok(Some((code, value.trim().to_string())))
    }

    fn push_back(&mut self, pair: (i32, String)) {
        self.peeked = Some(pair);
    }
}

fn read_header(
    reader: &mut PairReader<'_>,
    doc: &mut Document,
) -> std::result::Result<(), ParseError> {
    let mut current_var = String::new();
    while let Some((code, value)) = reader.next_pair()? {
        match code {
            0 if value == "ENDSEC" => return Ok(()),
            9 => current_var = value,
            70 if current_var == "$INSUNITS" => {
                doc.insunits = value.parse().unwrap_or(0);
            }
            1 if current_var == "$ACADVER" => doc.acadver = Some(value),
            _ => {}
        }
    }
    Ok(())
}

/// Reads one block definition, recording the union bbox of its geometry.
fn read_block(
    reader: &mut PairReader<'_>,
    doc: &mut Document,
    budget: &OpBudget,
) -> Result<()> {
    let mut name = String::new();
    let mut bounds: Option<Bounds> = None;
    loop {
        budget.check()?;
        let Some((code, value)) = reader.next_pair()? else {
            return Err(
                ParseError::malformed(FormatType::Dxf, "unterminated BLOCK definition").into(),
            );
        };
        match code {
            2 if name.is_empty() => name = value,
            0 if value == "ENDBLK" => break,
            0 => {
                let entity = read_entity(reader, &value)?;
                if let Some(b) = entity_bounds_any(&entity) {
                    bounds = Some(match bounds {
                        Some(acc) => acc.union(&b),
                        None => b,
                    });
                }
            }
            _ => {}
        }
    }
    if let Some(b) = bounds {
        doc.blocks.insert(name, b);
    }
    Ok(())
}

/// Reads pairs of a single entity up to (but not consuming) the next
/// entity separator. POLYLINE absorbs its VERTEX/SEQEND children.
fn read_entity(
    reader: &mut PairReader<'_>,
    etype: &str,
) -> std::result::Result<Entity, ParseError> {
    let mut entity = Entity::new(etype);
    while let Some((code, value)) = reader.next_pair()? {
        match code {
            0 => {
                if entity.etype == "POLYLINE" && value == "VERTEX" {
                    // Vertex coordinates accumulate onto the polyline.
                    continue;
                }
                if entity.etype == "POLYLINE" && value == "SEQEND" {
                    // Consume the SEQEND body, then finish the polyline.
                    continue;
                }
                reader.push_back((0, value));
                break;
            }
            8 => entity.layer = value,
            10 => entity.xs.push(value.parse().unwrap_or(0.0)),
            20 => entity.ys.push(value.parse().unwrap_or(0.0)),
            11 => entity.x2 = value.parse().ok(),
            21 => entity.y2 = value.parse().ok(),
            40 => entity.size = value.parse().ok(),
            41 => entity.scale_x = value.parse().unwrap_or(1.0),
            42 => entity.scale_y = value.parse().unwrap_or(1.0),
            70 => entity.flags = value.parse().unwrap_or(0),
            1 => entity.text = Some(value),
            2 => entity.name = Some(value),
            _ => {}
        }
    }
    Ok(entity)
}

fn entity_bounds_any(entity: &Entity) -> Option<Bounds> {
    match entity.etype.as_str() {
        "CIRCLE" => {
            let (cx, cy) = (*entity.xs.first()?, *entity.ys.first()?);
            let r = entity.size?;
            Some(Bounds::new(cx - r, cy - r, cx + r, cy + r))
        }
        "LINE" => {
            let mut b = entity.points_bounds()?;
            if let (Some(x2), Some(y2)) = (entity.x2, entity.y2) {
                b = b.add_point(Point::new(x2, y2));
            }
            Some(b)
        }
        _ => entity.points_bounds(),
    }
}

/// Layer selection: explicit hint, else the best match for die-ish names,
/// else the default layer "0".
fn choose_layer(layers: &BTreeSet<String>, target: Option<&str>) -> String {
    if let Some(target) = target {
        return target.to_string();
    }
    for keyword in ["die", "boundary", "chip"] {
        if let Some(layer) = layers
            .iter()
            .find(|name| name.to_ascii_lowercase().contains(keyword))
        {
            return layer.clone();
        }
    }
    "0".to_string()
}

fn build_schematic(doc: Document, options: &ParseOptions, file_size: u64) -> Result<SchematicData> {
    let scale = options.coordinate_scale.unwrap_or(1.0);
    let layers: BTreeSet<String> = doc.entities.iter().map(|e| e.layer.clone()).collect();
    let layer = choose_layer(&layers, options.target_layer.as_deref());

    let mut boundaries: Vec<DieBoundary> = Vec::new();
    let mut labels: Vec<(Point, String)> = Vec::new();
    let mut loose_lines: Vec<&Entity> = Vec::new();

    for entity in doc.entities.iter().filter(|e| e.layer == layer) {
        match entity.etype.as_str() {
            "LWPOLYLINE" | "POLYLINE" => {
                if entity.is_closed() {
                    if let Some(b) = entity.points_bounds() {
                        boundaries.push(scaled_boundary(b, scale, &entity.etype));
                    }
                }
            }
            "CIRCLE" => {
                if let Some(b) = entity_bounds_any(entity) {
                    boundaries.push(scaled_boundary(b, scale, "CIRCLE"));
                }
            }
            "INSERT" => {
                let Some(block) = entity.name.as_ref().and_then(|n| doc.blocks.get(n)) else {
                    continue;
                };
                let (ox, oy) = (
                    entity.xs.first().copied().unwrap_or(0.0),
                    entity.ys.first().copied().unwrap_or(0.0),
                );
                let b = Bounds::new(
                    ox + block.x_min * entity.scale_x,
                    oy + block.y_min * entity.scale_y,
                    ox + block.x_max * entity.scale_x,
                    oy + block.y_max * entity.scale_y,
                );
                boundaries.push(scaled_boundary(b, scale, "INSERT"));
            }
            "LINE" => loose_lines.push(entity),
            "TEXT" | "MTEXT" => {
                if let (Some(&x), Some(&y), Some(text)) =
                    (entity.xs.first(), entity.ys.first(), entity.text.as_ref())
                {
                    labels.push((Point::new(x * scale, y * scale), text.clone()));
                }
            }
            _ => {}
        }
    }

    // LINE entities group into closed loops; each loop is a candidate die.
    for b in line_loops(&loose_lines) {
        boundaries.push(scaled_boundary(b, scale, "LINE"));
    }

    attach_nearest_labels(&mut boundaries, &labels);

    let merge_threshold = median(boundaries.iter().map(|b| b.width()))
        .map(|w| w * 0.1)
        .unwrap_or(f64::EPSILON);
    let boundaries = finalize_boundaries(boundaries, options, merge_threshold)?;

    let units_label = insunits_label(doc.insunits);
    let mut metadata = SchematicMetadata {
        software: doc
            .acadver
            .as_ref()
            .map(|v| format!("DXF {v}"))
            .or_else(|| Some("DXF".to_string())),
        units: Some(units_label.to_string()),
        scale_factor: scale,
        file_size,
        extra: IndexMap::new(),
    };
    metadata.extra.insert(
        "layers".to_string(),
        layers.iter().cloned().collect::<Vec<_>>().into(),
    );
    metadata
        .extra
        .insert("selectedLayer".to_string(), layer.clone().into());

    let mut schematic = SchematicData::new(
        String::new(),
        FormatType::Dxf,
        CoordinateSystem::CadUnits,
        boundaries,
        metadata,
    );
    if let Some(bounds) = schematic.layout_bounds() {
        let diameter = bounds.width().max(bounds.height());
        schematic.wafer_size = estimate_wafer_size(diameter * insunits_to_mm(doc.insunits));
    }
    Ok(schematic)
}

fn scaled_boundary(b: Bounds, scale: f64, source: &str) -> DieBoundary {
    let mut boundary = DieBoundary::new(
        "",
        Bounds::new(
            b.x_min * scale,
            b.y_min * scale,
            b.x_max * scale,
            b.y_max * scale,
        ),
    );
    boundary
        .metadata
        .insert("entityType".to_string(), source.into());
    boundary
}

/// Chains LINE segments into closed loops by walking shared endpoints.
fn line_loops(lines: &[&Entity]) -> Vec<Bounds> {
    const TOL: f64 = 1e-6;
    let mut segments: Vec<(Point, Point)> = lines
        .iter()
        .filter_map(|e| {
            let start = Point::new(*e.xs.first()?, *e.ys.first()?);
            let end = Point::new(e.x2?, e.y2?);
            Some((start, end))
        })
        .collect();

    let mut loops = Vec::new();
    while let Some((start, mut cursor)) = segments.pop() {
        let mut bounds = Bounds::from_point(start).add_point(cursor);
        let mut closed = false;
        loop {
            if cursor.distance_to(start) < TOL {
                closed = true;
                break;
            }
            let Some(i) = segments.iter().position(|(a, b)| {
                a.distance_to(cursor) < TOL || b.distance_to(cursor) < TOL
            }) else {
                break;
            };
            let (a, b) = segments.swap_remove(i);
            cursor = if a.distance_to(cursor) < TOL { b } else { a };
            bounds = bounds.add_point(cursor);
        }
        if closed {
            loops.push(bounds);
        }
    }
    loops
}

/// Assigns each unlabeled boundary the nearest label within one die
/// footprint of its center.
fn attach_nearest_labels(boundaries: &mut [DieBoundary], labels: &[(Point, String)]) {
    for boundary in boundaries.iter_mut() {
        if !boundary.die_id.is_empty() {
            continue;
        }
        let reach = boundary.width().max(boundary.height());
        let mut best: Option<(f64, &str)> = None;
        for (pos, text) in labels {
            if text.trim().is_empty() {
                continue;
            }
            let d = boundary.center().distance_to(*pos);
            if d <= reach && best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, text));
            }
        }
        if let Some((_, text)) = best {
            boundary.die_id = text.trim().into();
        }
    }
}

fn insunits_label(code: i32) -> &'static str {
    match code {
        0 => "unitless",
        1 => "inches",
        4 => "millimeters",
        5 => "centimeters",
        6 => "meters",
        12 => "nanometers",
        13 => "microns",
        _ => "unknown",
    }
}

fn insunits_to_mm(code: i32) -> f64 {
    match code {
        1 => 25.4,
        4 => 1.0,
        5 => 10.0,
        6 => 1000.0,
        12 => 1e-6,
        13 => 1e-3,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(code: i32, value: impl std::fmt::Display) -> String {
        format!("{code}\n{value}\n")
    }

    fn lwpolyline(layer: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> String {
        let mut s = pair(0, "LWPOLYLINE");
        s += &pair(8, layer);
        s += &pair(90, 4);
        s += &pair(70, 1);
        for (x, y) in [(x0, y0), (x1, y0), (x1, y1), (x0, y1)] {
            s += &pair(10, x);
            s += &pair(20, y);
        }
        s
    }

    fn text(layer: &str, x: f64, y: f64, value: &str) -> String {
        let mut s = pair(0, "TEXT");
        s += &pair(8, layer);
        s += &pair(10, x);
        s += &pair(20, y);
        s += &pair(40, 0.5);
        s += &pair(1, value);
        s
    }

    fn document(entities: &str) -> String {
        let mut s = String::new();
        s += &pair(0, "SECTION");
        s += &pair(2, "HEADER");
        s += &pair(9, "$ACADVER");
        s += &pair(1, "AC1027");
        s += &pair(9, "$INSUNITS");
        s += &pair(70, 4);
        s += &pair(0, "ENDSEC");
        s += &pair(0, "SECTION");
        s += &pair(2, "ENTITIES");
        s += entities;
        s += &pair(0, "ENDSEC");
        s += &pair(0, "EOF");
        s
    }

    fn parse_str(doc: &str, options: &ParseOptions) -> Result<SchematicData> {
        parse(doc.as_bytes(), options, &OpBudget::unlimited("parse"))
    }

    #[test]
    fn target_layer_restricts_entities() {
        let mut entities = String::new();
        for i in 0..4 {
            let x = i as f64 * 12.0;
            entities += &lwpolyline("DIE_BOUNDARY", x, 0.0, x + 8.0, 8.0);
            entities += &text("DIE_BOUNDARY", x + 4.0, 4.0, &format!("D{i}"));
        }
        entities += &lwpolyline("METAL1", 0.0, 50.0, 8.0, 58.0);
        entities += &(pair(0, "CIRCLE")
            + &pair(8, "0")
            + &pair(10, 100.0)
            + &pair(20, 100.0)
            + &pair(40, 3.0));

        let options = ParseOptions {
            target_layer: Some("DIE_BOUNDARY".to_string()),
            ..Default::default()
        };
        let schematic = parse_str(&document(&entities), &options).unwrap();
        assert_eq!(schematic.die_count(), 4);
        assert_eq!(schematic.coordinate_system, CoordinateSystem::CadUnits);
        let ids: Vec<&str> = schematic.dies.iter().map(|d| d.die_id.as_str()).collect();
        assert_eq!(ids, vec!["D0", "D1", "D2", "D3"]);
    }

    #[test]
    fn die_like_layer_names_win_auto_selection() {
        let mut entities = String::new();
        entities += &lwpolyline("CHIP_OUTLINES", 0.0, 0.0, 5.0, 5.0);
        entities += &lwpolyline("0", 100.0, 100.0, 200.0, 200.0);
        let schematic = parse_str(&document(&entities), &ParseOptions::default()).unwrap();
        assert_eq!(schematic.die_count(), 1);
        assert_eq!(schematic.dies[0].bounds.x_max, 5.0);
    }

    #[test]
    fn circle_uses_circumscribed_square() {
        let entities = pair(0, "CIRCLE")
            + &pair(8, "DIE")
            + &pair(10, 10.0)
            + &pair(20, 10.0)
            + &pair(40, 4.0);
        let schematic = parse_str(&document(&entities), &ParseOptions::default()).unwrap();
        assert_eq!(schematic.dies[0].bounds, Bounds::new(6.0, 6.0, 14.0, 14.0));
    }

    #[test]
    fn lines_group_into_closed_loops() {
        let mut entities = String::new();
        let corners = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            entities += &(pair(0, "LINE")
                + &pair(8, "DIE")
                + &pair(10, x0)
                + &pair(20, y0)
                + &pair(11, x1)
                + &pair(21, y1));
        }
        // A dangling segment that closes nothing.
        entities +=
            &(pair(0, "LINE") + &pair(8, "DIE") + &pair(10, 50.0) + &pair(20, 50.0) + &pair(11, 60.0) + &pair(21, 50.0));
        let schematic = parse_str(&document(&entities), &ParseOptions::default()).unwrap();
        assert_eq!(schematic.die_count(), 1);
        assert_eq!(schematic.dies[0].bounds, Bounds::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn insert_expands_block_bbox() {
        let mut s = String::new();
        s += &pair(0, "SECTION");
        s += &pair(2, "BLOCKS");
        s += &pair(0, "BLOCK");
        s += &pair(2, "DIECELL");
        s += &lwpolyline("DIE", 0.0, 0.0, 8.0, 8.0);
        s += &pair(0, "ENDBLK");
        s += &pair(0, "ENDSEC");
        s += &pair(0, "SECTION");
        s += &pair(2, "ENTITIES");
        for i in 0..3 {
            s += &(pair(0, "INSERT")
                + &pair(8, "DIE")
                + &pair(2, "DIECELL")
                + &pair(10, i as f64 * 10.0)
                + &pair(20, 0.0));
        }
        s += &pair(0, "ENDSEC");
        s += &pair(0, "EOF");
        let schematic = parse_str(&s, &ParseOptions::default()).unwrap();
        assert_eq!(schematic.die_count(), 3);
        assert_eq!(schematic.dies[2].bounds, Bounds::new(20.0, 0.0, 28.0, 8.0));
    }

    #[test]
    fn garbage_group_code_is_malformed() {
        let err = parse_str("not-a-code\nSECTION\n", &ParseOptions::default()).unwrap_err();
        assert!(matches!(
            err.into_inner(),
            crate::error::ErrorSource::Parse(ParseError::Malformed { .. })
        ));
    }
}
