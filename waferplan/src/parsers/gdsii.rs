//! GDSII stream parser.
//!
//! A GDSII file is a sequence of length-tagged binary records. The reader
//! streams records one at a time and folds element coordinates into
//! bounding boxes immediately, so memory stays proportional to the number
//! of structures rather than the file size.
//!
//! Die detection runs three methods in priority order: closed shapes on the
//! target layer, TEXT labels for die ids, and structure-reference arrays
//! when the top cell contains no usable shapes.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use indexmap::IndexMap;
use wafergeom::{Bounds, CoordinateSystem, Point};

use super::{attach_labels, finalize_boundaries, ParseError, ParseOptions};
use crate::budget::OpBudget;
use crate::error::Result;
use crate::log::warn;
use crate::schematic::{
    estimate_wafer_size, median, DieBoundary, FormatType, SchematicData, SchematicMetadata,
};

// Record identifiers: record type in the high byte, data type in the low.
mod record {
    pub const HEADER: u16 = 0x0002;
    pub const BGNLIB: u16 = 0x0102;
    pub const LIBNAME: u16 = 0x0206;
    pub const UNITS: u16 = 0x0305;
    pub const ENDLIB: u16 = 0x0400;
    pub const BGNSTR: u16 = 0x0502;
    pub const STRNAME: u16 = 0x0606;
    pub const ENDSTR: u16 = 0x0700;
    pub const BOUNDARY: u16 = 0x0800;
    pub const PATH: u16 = 0x0900;
    pub const SREF: u16 = 0x0A00;
    pub const AREF: u16 = 0x0B00;
    pub const TEXT: u16 = 0x0C00;
    pub const LAYER: u16 = 0x0D02;
    pub const XY: u16 = 0x1003;
    pub const ENDEL: u16 = 0x1100;
    pub const SNAME: u16 = 0x1206;
    pub const COLROW: u16 = 0x1302;
    pub const STRING: u16 = 0x1906;
    pub const BOX: u16 = 0x2D00;
}

struct Record {
    rtype: u16,
    data: Vec<u8>,
    offset: u64,
}

impl Record {
    fn as_i16s(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    fn as_i32s(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn as_string(&self) -> String {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }

    fn as_real8s(&self) -> Vec<f64> {
        self.data.chunks_exact(8).map(real8).collect()
    }
}

/// Decodes a GDSII excess-64, base-16 8-byte real.
fn real8(bytes: &[u8]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7f) as i32 - 64;
    let mut mantissa = 0u64;
    for &b in &bytes[1..8] {
        mantissa = (mantissa << 8) | b as u64;
    }
    sign * (mantissa as f64 / 2f64.powi(56)) * 16f64.powi(exponent)
}

struct RecordReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn next_record(&mut self) -> std::result::Result<Option<Record>, ParseError> {
        let offset = self.cursor.position();
        let remaining = self.cursor.get_ref().len() as u64 - offset;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < 4 {
            return Err(ParseError::at_offset(
                FormatType::Gdsii,
                offset,
                "truncated record header",
            ));
        }
        let header_err =
            |_| ParseError::at_offset(FormatType::Gdsii, offset, "truncated record header");
        let length = self.cursor.read_u16::<BigEndian>().map_err(header_err)? as usize;
        let rtype = self.cursor.read_u16::<BigEndian>().map_err(header_err)?;
        if length < 4 || length % 2 != 0 {
            return Err(ParseError::at_offset(
                FormatType::Gdsii,
                offset,
                format!("invalid record length {length}"),
            ));
        }
        let payload = length - 4;
        if (remaining as usize) < length {
            return Err(ParseError::at_offset(
                FormatType::Gdsii,
                offset,
                format!("record of {length} bytes extends past end of input"),
            ));
        }
        let mut data = vec![0u8; payload];
        self.cursor
            .read_exact(&mut data)
            .map_err(|_| ParseError::at_offset(FormatType::Gdsii, offset, "truncated record"))?;
        Ok(Some(Record {
            rtype,
            data,
            offset,
        }))
    }
}

#[derive(Debug, Clone)]
struct ShapeInfo {
    layer: i16,
    bounds: Bounds,
}

#[derive(Debug, Clone)]
struct RefInfo {
    sname: String,
    origins: Vec<Point>,
}

#[derive(Debug, Default)]
struct StructData {
    shapes: Vec<ShapeInfo>,
    texts: Vec<(Point, String)>,
    refs: Vec<RefInfo>,
}

impl StructData {
    fn shape_bounds(&self) -> Option<Bounds> {
        Bounds::enclosing(self.shapes.iter().map(|s| s.bounds))
    }
}

pub fn parse(bytes: &[u8], options: &ParseOptions, budget: &OpBudget) -> Result<SchematicData> {
    let mut reader = RecordReader::new(bytes);

    // Library-level state.
    let mut lib_name = String::new();
    let mut uu_per_db = 1.0f64;
    let mut m_per_db = 1e-9f64;
    let mut structs: IndexMap<String, StructData> = IndexMap::new();
    let mut current: Option<(String, StructData)> = None;
    let mut saw_header = false;
    let mut saw_endlib = false;

    while let Some(rec) = reader.next_record()? {
        budget.check()?;
        match rec.rtype {
            record::HEADER => saw_header = true,
            record::BGNLIB => {}
            record::LIBNAME => lib_name = rec.as_string(),
            record::UNITS => {
                let reals = rec.as_real8s();
                if reals.len() != 2 {
                    return Err(ParseError::at_offset(
                        FormatType::Gdsii,
                        rec.offset,
                        "UNITS record must carry two 8-byte reals",
                    )
                    .into());
                }
                uu_per_db = reals[0];
                m_per_db = reals[1];
            }
            record::BGNSTR => {
                current = Some((String::new(), StructData::default()));
            }
            record::STRNAME => {
                if let Some((name, _)) = current.as_mut() {
                    *name = rec.as_string();
                }
            }
            record::ENDSTR => {
                if let Some((name, data)) = current.take() {
                    structs.insert(name, data);
                }
            }
            record::BOUNDARY | record::BOX => {
                let shape = read_shape(&mut reader, rec.offset)?;
                if let Some((_, data)) = current.as_mut() {
                    data.shapes.push(shape);
                }
            }
            record::PATH => {
                // Paths are routing, not die outlines; consume the element.
                skip_element(&mut reader)?;
            }
            record::TEXT => {
                let text = read_text(&mut reader, rec.offset)?;
                if let Some((_, data)) = current.as_mut() {
                    data.texts.push(text);
                }
            }
            record::SREF => {
                let r = read_sref(&mut reader, rec.offset)?;
                if let Some((_, data)) = current.as_mut() {
                    data.refs.push(r);
                }
            }
            record::AREF => {
                let r = read_aref(&mut reader, rec.offset)?;
                if let Some((_, data)) = current.as_mut() {
                    data.refs.push(r);
                }
            }
            record::ENDLIB => {
                saw_endlib = true;
                break;
            }
            _ => {}
        }
    }

    if !saw_header {
        return Err(ParseError::at_offset(
            FormatType::Gdsii,
            0,
            "missing HEADER record",
        )
        .into());
    }
    if !saw_endlib {
        return Err(ParseError::malformed(FormatType::Gdsii, "missing ENDLIB record").into());
    }

    let scale = uu_per_db * options.coordinate_scale.unwrap_or(1.0);
    let top_name = top_cell(&structs, options.target_cell.as_deref()).ok_or_else(|| {
        ParseError::malformed(FormatType::Gdsii, "no structures found in library")
    })?;
    let top = &structs[&top_name];

    // Method 1: closed shapes on the target layer.
    let mut boundaries = boundaries_from_shapes(top, options, scale);

    // Method 2: TEXT records supply die ids.
    let labels: Vec<(Point, String)> = top
        .texts
        .iter()
        .map(|(p, s)| (scale_point(*p, scale), s.clone()))
        .collect();
    attach_labels(&mut boundaries, &labels);

    // Method 3: arrays of structure references.
    if boundaries.is_empty() {
        boundaries = boundaries_from_refs(top, &structs, scale);
    }

    let merge_threshold = median(boundaries.iter().map(|b| b.width()))
        .map(|w| w * 0.1)
        .unwrap_or(f64::EPSILON);
    let boundaries = finalize_boundaries(boundaries, options, merge_threshold)?;

    let mut metadata = SchematicMetadata {
        software: Some("GDSII Stream Format".to_string()),
        units: Some(format!(
            "{uu_per_db} user units, {m_per_db} m database units"
        )),
        scale_factor: uu_per_db,
        file_size: bytes.len() as u64,
        extra: IndexMap::new(),
    };
    metadata
        .extra
        .insert("libraryName".to_string(), lib_name.clone().into());
    metadata
        .extra
        .insert("topCell".to_string(), top_name.clone().into());
    metadata
        .extra
        .insert("structureCount".to_string(), structs.len().into());

    let mut schematic = SchematicData::new(
        String::new(),
        FormatType::Gdsii,
        CoordinateSystem::GdsiiUnits,
        boundaries,
        metadata,
    );

    if let Some(bounds) = schematic.layout_bounds() {
        // Layout extent in db units is extent / scale; convert to mm.
        let diameter_db = bounds.width().max(bounds.height()) / scale.max(f64::MIN_POSITIVE);
        schematic.wafer_size = estimate_wafer_size(diameter_db * m_per_db * 1e3);
    }
    Ok(schematic)
}

fn scale_point(p: Point, scale: f64) -> Point {
    Point::new(p.x * scale, p.y * scale)
}

/// Reads records of one shape element up to ENDEL, folding XY into a bbox.
fn read_shape(
    reader: &mut RecordReader<'_>,
    start: u64,
) -> std::result::Result<ShapeInfo, ParseError> {
    let mut layer = 0i16;
    let mut bounds: Option<Bounds> = None;
    loop {
        let rec = reader.next_record()?.ok_or_else(|| {
            ParseError::at_offset(FormatType::Gdsii, start, "unterminated element")
        })?;
        match rec.rtype {
            record::LAYER => layer = rec.as_i16s().first().copied().unwrap_or(0),
            record::XY => {
                let coords = rec.as_i32s();
                for pair in coords.chunks_exact(2) {
                    let p = Point::new(pair[0] as f64, pair[1] as f64);
                    bounds = Some(match bounds {
                        Some(b) => b.add_point(p),
                        None => Bounds::from_point(p),
                    });
                }
            }
            record::ENDEL => break,
            _ => {}
        }
    }
    let bounds = bounds.ok_or_else(|| {
        ParseError::at_offset(FormatType::Gdsii, start, "shape element without XY record")
    })?;
    Ok(ShapeInfo { layer, bounds })
}

fn read_text(
    reader: &mut RecordReader<'_>,
    start: u64,
) -> std::result::Result<(Point, String), ParseError> {
    let mut position = Point::zero();
    let mut string = String::new();
    loop {
        let rec = reader.next_record()?.ok_or_else(|| {
            ParseError::at_offset(FormatType::Gdsii, start, "unterminated text element")
        })?;
        match rec.rtype {
            record::XY => {
                let coords = rec.as_i32s();
                if coords.len() >= 2 {
                    position = Point::new(coords[0] as f64, coords[1] as f64);
                }
            }
            record::STRING => string = rec.as_string(),
            record::ENDEL => break,
            _ => {}
        }
    }
    Ok((position, string))
}

fn read_sref(
    reader: &mut RecordReader<'_>,
    start: u64,
) -> std::result::Result<RefInfo, ParseError> {
    let mut sname = String::new();
    let mut origins = Vec::new();
    loop {
        let rec = reader.next_record()?.ok_or_else(|| {
            ParseError::at_offset(FormatType::Gdsii, start, "unterminated structure reference")
        })?;
        match rec.rtype {
            record::SNAME => sname = rec.as_string(),
            record::XY => {
                let coords = rec.as_i32s();
                if coords.len() >= 2 {
                    origins.push(Point::new(coords[0] as f64, coords[1] as f64));
                }
            }
            record::ENDEL => break,
            _ => {}
        }
    }
    Ok(RefInfo { sname, origins })
}

/// Expands an AREF's column/row lattice into per-instance origins.
fn read_aref(
    reader: &mut RecordReader<'_>,
    start: u64,
) -> std::result::Result<RefInfo, ParseError> {
    let mut sname = String::new();
    let mut colrow = (1i16, 1i16);
    let mut corners: Vec<Point> = Vec::new();
    loop {
        let rec = reader.next_record()?.ok_or_else(|| {
            ParseError::at_offset(FormatType::Gdsii, start, "unterminated array reference")
        })?;
        match rec.rtype {
            record::SNAME => sname = rec.as_string(),
            record::COLROW => {
                let v = rec.as_i16s();
                if v.len() >= 2 {
                    colrow = (v[0].max(1), v[1].max(1));
                }
            }
            record::XY => {
                for pair in rec.as_i32s().chunks_exact(2) {
                    corners.push(Point::new(pair[0] as f64, pair[1] as f64));
                }
            }
            record::ENDEL => break,
            _ => {}
        }
    }

    let (cols, rows) = (colrow.0 as f64, colrow.1 as f64);
    let mut origins = Vec::new();
    if corners.len() >= 3 {
        let origin = corners[0];
        let col_step = Point::new(
            (corners[1].x - origin.x) / cols,
            (corners[1].y - origin.y) / cols,
        );
        let row_step = Point::new(
            (corners[2].x - origin.x) / rows,
            (corners[2].y - origin.y) / rows,
        );
        for r in 0..colrow.1 {
            for c in 0..colrow.0 {
                origins.push(Point::new(
                    origin.x + col_step.x * c as f64 + row_step.x * r as f64,
                    origin.y + col_step.y * c as f64 + row_step.y * r as f64,
                ));
            }
        }
    } else if let Some(&origin) = corners.first() {
        origins.push(origin);
    }
    Ok(RefInfo { sname, origins })
}

fn skip_element(reader: &mut RecordReader<'_>) -> std::result::Result<(), ParseError> {
    while let Some(rec) = reader.next_record()? {
        if rec.rtype == record::ENDEL {
            return Ok(());
        }
    }
    Err(ParseError::malformed(
        FormatType::Gdsii,
        "unterminated element",
    ))
}

/// The top cell is the hinted cell, else the first structure that nothing
/// references.
fn top_cell(structs: &IndexMap<String, StructData>, target: Option<&str>) -> Option<String> {
    if let Some(target) = target {
        if structs.contains_key(target) {
            return Some(target.to_string());
        }
        warn!("target cell {target} not found; falling back to top-cell detection");
    }
    let mut referenced: HashMap<&str, bool> = HashMap::new();
    for data in structs.values() {
        for r in &data.refs {
            referenced.insert(r.sname.as_str(), true);
        }
    }
    structs
        .keys()
        .find(|name| !referenced.contains_key(name.as_str()))
        .or_else(|| structs.keys().next())
        .cloned()
}

/// Shape analysis: candidates are closed shapes on the target layer, which
/// defaults to the layer carrying the most shapes of similar size (within
/// 10% area of that layer's median).
fn boundaries_from_shapes(
    top: &StructData,
    options: &ParseOptions,
    scale: f64,
) -> Vec<DieBoundary> {
    let layer = match options
        .target_layer
        .as_deref()
        .and_then(|l| l.parse::<i16>().ok())
    {
        Some(layer) => Some(layer),
        None => auto_layer(top),
    };
    let Some(layer) = layer else {
        return Vec::new();
    };

    top.shapes
        .iter()
        .filter(|s| s.layer == layer)
        .map(|s| {
            let b = s.bounds;
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
                .insert("layer".to_string(), (s.layer as i64).into());
            boundary
                .metadata
                .insert("source".to_string(), "shape".into());
            boundary
        })
        .collect()
}

fn auto_layer(top: &StructData) -> Option<i16> {
    let mut by_layer: std::collections::BTreeMap<i16, Vec<f64>> = Default::default();
    for s in &top.shapes {
        by_layer.entry(s.layer).or_default().push(s.bounds.area());
    }
    let mut best: Option<(i16, usize)> = None;
    for (&layer, areas) in &by_layer {
        let median_area = median(areas.iter().copied()).unwrap_or(0.0);
        let similar = areas
            .iter()
            .filter(|&&a| (a - median_area).abs() <= median_area * 0.1)
            .count();
        match best {
            Some((_, count)) if similar <= count => {}
            _ => best = Some((layer, similar)),
        }
    }
    best.map(|(layer, _)| layer)
}

/// Reference analysis: each instance of an arrayed cell becomes a boundary
/// using the referenced cell's bounding box translated by the instance
/// origin.
fn boundaries_from_refs(
    top: &StructData,
    structs: &IndexMap<String, StructData>,
    scale: f64,
) -> Vec<DieBoundary> {
    let mut out = Vec::new();
    for r in &top.refs {
        let Some(cell_bounds) = structs.get(&r.sname).and_then(|s| s.shape_bounds()) else {
            continue;
        };
        for origin in &r.origins {
            let b = Bounds::new(
                (cell_bounds.x_min + origin.x) * scale,
                (cell_bounds.y_min + origin.y) * scale,
                (cell_bounds.x_max + origin.x) * scale,
                (cell_bounds.y_max + origin.y) * scale,
            );
            let mut boundary = DieBoundary::new("", b);
            boundary
                .metadata
                .insert("source".to_string(), "structureReference".into());
            boundary
                .metadata
                .insert("referencedCell".to_string(), r.sname.clone().into());
            out.push(boundary);
        }
    }
    out
}
