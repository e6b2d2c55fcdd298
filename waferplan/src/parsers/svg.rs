//! SVG parser.
//!
//! Walks the XML event stream, propagating `<g>` transforms, and collects
//! candidate shapes. A shape is kept as a die only if its area is within
//! one order of magnitude of the median candidate area and its aspect
//! ratio is at most 4:1; shapes that fail the area test by no more than a
//! second order of magnitude are kept as unavailable markers (corner
//! targets, alignment crosses), and everything else is treated as
//! decoration and dropped.

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use wafergeom::{Bounds, CoordinateSystem, Point, Transformation};

use super::{attach_labels, finalize_boundaries, ParseError, ParseOptions};
use crate::budget::OpBudget;
use crate::error::Result;
use crate::schematic::{
    estimate_wafer_size, median, DieBoundary, FormatType, SchematicData, SchematicMetadata,
};

struct Candidate {
    bounds: Bounds,
    id: Option<String>,
    source: &'static str,
}

pub fn parse(bytes: &[u8], options: &ParseOptions, budget: &OpBudget) -> Result<SchematicData> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut labels: Vec<(Point, String)> = Vec::new();
    // Stack of (transform, matches-target) per open <g>/<svg> scope.
    let mut groups: Vec<(Transformation, bool)> = Vec::new();
    let mut text_anchor: Option<Point> = None;
    let mut text_content = String::new();
    let mut view_box = None;
    let mut saw_svg = false;

    loop {
        budget.check()?;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"svg" => {
                        saw_svg = true;
                        view_box = attr(&e, "viewBox");
                        groups.push((Transformation::identity(), false));
                    }
                    b"g" => {
                        // Each scope stores only its own transform; the
                        // cumulative matrix is the cascade of the stack.
                        let matched = group_matches(&e, options.target_layer.as_deref());
                        groups.push((element_transform(&e), matched));
                    }
                    b"text" => {
                        let x = attr_f64(&e, "x").unwrap_or(0.0);
                        let y = attr_f64(&e, "y").unwrap_or(0.0);
                        let ctm = cascade_with(&groups, element_transform(&e));
                        text_anchor = Some(ctm.apply(Point::new(x, y)));
                        text_content.clear();
                    }
                    _ => {
                        if in_scope(&groups, options.target_layer.as_deref()) {
                            collect_shape(&e, &groups, &mut candidates);
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"g" || name.as_ref() == b"svg" {
                    // Self-closing groups contribute nothing.
                } else if in_scope(&groups, options.target_layer.as_deref()) {
                    collect_shape(&e, &groups, &mut candidates);
                }
            }
            Ok(Event::Text(t)) => {
                if text_anchor.is_some() {
                    if let Ok(s) = t.unescape() {
                        text_content.push_str(&s);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"g" | b"svg" => {
                    groups.pop();
                }
                b"text" => {
                    if let Some(anchor) = text_anchor.take() {
                        let content = text_content.trim().to_string();
                        if !content.is_empty() {
                            labels.push((anchor, content));
                        }
                    }
                }
                _ => {}
            },
            Ok(_) => {}
            Err(err) => {
                return Err(ParseError::at_offset(
                    FormatType::Svg,
                    reader.buffer_position() as u64,
                    err.to_string(),
                )
                .into());
            }
        }
        buf.clear();
    }

    if !saw_svg {
        return Err(ParseError::malformed(FormatType::Svg, "no <svg> root element").into());
    }

    let scale = options.coordinate_scale.unwrap_or(1.0);
    let mut boundaries = classify(candidates, scale);
    let scaled_labels: Vec<(Point, String)> = labels
        .into_iter()
        .map(|(p, s)| (Point::new(p.x * scale, p.y * scale), s))
        .collect();
    attach_labels(&mut boundaries, &scaled_labels);

    let merge_threshold = median(
        boundaries
            .iter()
            .filter(|b| b.available)
            .map(|b| b.width()),
    )
    .map(|w| w * 0.1)
    .unwrap_or(f64::EPSILON);
    let boundaries = finalize_boundaries(boundaries, options, merge_threshold)?;

    let mut metadata = SchematicMetadata {
        software: Some("SVG".to_string()),
        units: Some("SVG user units".to_string()),
        scale_factor: scale,
        file_size: bytes.len() as u64,
        extra: IndexMap::new(),
    };
    if let Some(vb) = view_box {
        metadata.extra.insert("viewBox".to_string(), vb.into());
    }

    let mut schematic = SchematicData::new(
        String::new(),
        FormatType::Svg,
        CoordinateSystem::SvgUnits,
        boundaries,
        metadata,
    );
    if let Some(bounds) = schematic.layout_bounds() {
        schematic.wafer_size = estimate_wafer_size(bounds.width().max(bounds.height()));
    }
    Ok(schematic)
}

/// Applies the die heuristic, marking near-die-sized shapes unavailable and
/// dropping decoration.
fn classify(candidates: Vec<Candidate>, scale: f64) -> Vec<DieBoundary> {
    let Some(median_area) = median(candidates.iter().map(|c| c.bounds.area())) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for c in candidates {
        let area = c.bounds.area();
        let aspect = c.bounds.aspect_ratio();
        if aspect > 4.0 || area <= 0.0 {
            continue;
        }
        let is_die = area >= median_area / 10.0 && area <= median_area * 10.0;
        let is_marker = !is_die && area >= median_area / 100.0 && area <= median_area * 100.0;
        if !is_die && !is_marker {
            continue;
        }
        let b = c.bounds;
        let mut boundary = DieBoundary::new(
            c.id.as_deref().unwrap_or(""),
            Bounds::new(
                b.x_min * scale,
                b.y_min * scale,
                b.x_max * scale,
                b.y_max * scale,
            ),
        );
        boundary.available = is_die;
        boundary
            .metadata
            .insert("elementType".to_string(), c.source.into());
        out.push(boundary);
    }
    out
}

fn collect_shape(
    e: &BytesStart<'_>,
    groups: &[(Transformation, bool)],
    candidates: &mut Vec<Candidate>,
) {
    let ctm = cascade_with(groups, element_transform(e));
    let (local, source) = match e.local_name().as_ref() {
        b"rect" => {
            let x = attr_f64(e, "x").unwrap_or(0.0);
            let y = attr_f64(e, "y").unwrap_or(0.0);
            let w = attr_f64(e, "width").unwrap_or(0.0);
            let h = attr_f64(e, "height").unwrap_or(0.0);
            (Some(Bounds::new(x, y, x + w, y + h)), "rect")
        }
        b"circle" => {
            let cx = attr_f64(e, "cx").unwrap_or(0.0);
            let cy = attr_f64(e, "cy").unwrap_or(0.0);
            let r = attr_f64(e, "r").unwrap_or(0.0);
            (
                Some(Bounds::new(cx - r, cy - r, cx + r, cy + r)),
                "circle",
            )
        }
        b"ellipse" => {
            let cx = attr_f64(e, "cx").unwrap_or(0.0);
            let cy = attr_f64(e, "cy").unwrap_or(0.0);
            let rx = attr_f64(e, "rx").unwrap_or(0.0);
            let ry = attr_f64(e, "ry").unwrap_or(0.0);
            (
                Some(Bounds::new(cx - rx, cy - ry, cx + rx, cy + ry)),
                "ellipse",
            )
        }
        b"polygon" | b"polyline" => (
            attr(e, "points").and_then(|p| bounds_of_numbers(&p)),
            "polygon",
        ),
        b"path" => (attr(e, "d").and_then(|d| bounds_of_numbers(&d)), "path"),
        _ => (None, ""),
    };
    let Some(local) = local else { return };
    if local.area() == 0.0 && local.width() == 0.0 && local.height() == 0.0 {
        return;
    }
    candidates.push(Candidate {
        bounds: transform_bounds(&ctm, local),
        id: attr(e, "id"),
        source,
    });
}

fn transform_bounds(ctm: &Transformation, b: Bounds) -> Bounds {
    let corners = [
        Point::new(b.x_min, b.y_min),
        Point::new(b.x_max, b.y_min),
        Point::new(b.x_max, b.y_max),
        Point::new(b.x_min, b.y_max),
    ];
    let mut out = Bounds::from_point(ctm.apply(corners[0]));
    for c in &corners[1..] {
        out = out.add_point(ctm.apply(*c));
    }
    out
}

fn cascade_with(groups: &[(Transformation, bool)], own: Transformation) -> Transformation {
    let mut ctm = Transformation::identity();
    for (t, _) in groups {
        ctm = Transformation::cascade(ctm, *t);
    }
    Transformation::cascade(ctm, own)
}

fn in_scope(groups: &[(Transformation, bool)], target: Option<&str>) -> bool {
    match target {
        None => true,
        Some(_) => groups.iter().any(|(_, matched)| *matched),
    }
}

fn group_matches(e: &BytesStart<'_>, target: Option<&str>) -> bool {
    let Some(target) = target else { return false };
    for key in ["id", "class", "inkscape:label"] {
        if let Some(value) = attr(e, key) {
            if value.contains(target) {
                return true;
            }
        }
    }
    false
}

/// Parses an element's `transform` attribute. Supported functions:
/// translate, scale, rotate (about the origin), and matrix.
fn element_transform(e: &BytesStart<'_>) -> Transformation {
    let Some(spec) = attr(e, "transform") else {
        return Transformation::identity();
    };
    parse_transform(&spec)
}

fn parse_transform(spec: &str) -> Transformation {
    let mut ctm = Transformation::identity();
    let mut rest = spec;
    while let Some(open) = rest.find('(') {
        let name = rest[..open].trim().trim_start_matches(',').trim();
        let Some(close) = rest[open..].find(')') else { break };
        let args = numbers(&rest[open + 1..open + close]);
        let t = match (name, args.as_slice()) {
            ("translate", [x]) => Transformation::translate(*x, 0.0),
            ("translate", [x, y, ..]) => Transformation::translate(*x, *y),
            ("scale", [s]) => Transformation::scale(*s, *s),
            ("scale", [sx, sy, ..]) => Transformation::scale(*sx, *sy),
            ("rotate", [deg, ..]) => Transformation::rotate(*deg),
            ("matrix", [a, b, c, d, e, f]) => Transformation {
                a: [[*a, *c], [*b, *d]],
                b: [*e, *f],
            },
            _ => Transformation::identity(),
        };
        ctm = Transformation::cascade(ctm, t);
        rest = &rest[open + close + 1..];
    }
    ctm
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    for a in e.attributes().flatten() {
        if a.key.as_ref() == name.as_bytes() {
            return a.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}

fn attr_f64(e: &BytesStart<'_>, name: &str) -> Option<f64> {
    attr(e, name).and_then(|v| numbers(&v).first().copied())
}

/// Extracts the numeric tokens from an attribute value, ignoring command
/// letters and separators.
fn numbers(s: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut token = String::new();
    for ch in s.chars() {
        let numeric = ch.is_ascii_digit()
            || ch == '.'
            || ch == 'e'
            || ch == 'E'
            || (ch == '-' && (token.is_empty() || token.ends_with('e') || token.ends_with('E')))
            || (ch == '+' && (token.ends_with('e') || token.ends_with('E')));
        if numeric {
            token.push(ch);
        } else {
            if let Ok(v) = token.parse::<f64>() {
                out.push(v);
            }
            token.clear();
            if ch == '-' {
                token.push(ch);
            }
        }
    }
    if let Ok(v) = token.parse::<f64>() {
        out.push(v);
    }
    out
}

fn bounds_of_numbers(s: &str) -> Option<Bounds> {
    let values = numbers(s);
    let mut pairs = values.chunks_exact(2);
    let first = pairs.next()?;
    let mut b = Bounds::from_point(Point::new(first[0], first[1]));
    for pair in pairs {
        b = b.add_point(Point::new(pair[0], pair[1]));
    }
    Some(b)
}
