//! Schematic parsers: format-specific decoders producing the uniform
//! [`SchematicData`] model.
//!
//! Dispatch is by filename extension first, then by magic-byte sniff; when
//! the two disagree, the sniff wins. Parsers take the upload bytes and a
//! set of hints, and check the operation budget at record boundaries so
//! large uploads remain cancellable.

use thiserror::Error;
use wafergeom::Point;

use crate::budget::OpBudget;
use crate::error::Result;
use crate::schematic::{DieBoundary, FormatType, SchematicData};

pub mod dxf;
pub mod emit;
pub mod gdsii;
pub mod svg;

/// Hints supplied alongside an upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOptions {
    /// GDSII: name of the cell to treat as the top cell.
    pub target_cell: Option<String>,
    /// DXF/SVG: layer (or group) to restrict detection to. For GDSII this is
    /// a numeric layer.
    pub target_layer: Option<String>,
    /// Multiplier applied to all coordinates after unit scaling.
    pub coordinate_scale: Option<f64>,
    /// Drop dies whose area falls outside `[min, max]`.
    pub die_size_filter: Option<(f64, f64)>,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported format `{given}`; supported formats are gdsii, dxf, svg")]
    UnsupportedFormat { given: String },

    #[error("malformed {format} input: {reason}")]
    Malformed {
        format: FormatType,
        offset: Option<u64>,
        reason: String,
    },

    #[error("no die boundaries detected")]
    NoDiesDetected,
}

impl ParseError {
    pub(crate) fn malformed(format: FormatType, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            offset: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn at_offset(format: FormatType, offset: u64, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            offset: Some(offset),
            reason: reason.into(),
        }
    }
}

/// Detects the schematic format from the filename extension and the leading
/// bytes. The sniff overrides the extension when they disagree.
pub fn detect_format(filename: &str, bytes: &[u8]) -> Option<FormatType> {
    let by_extension = filename
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .and_then(|ext| match ext.as_str() {
            "gds" | "gdsii" => Some(FormatType::Gdsii),
            "dxf" => Some(FormatType::Dxf),
            "svg" => Some(FormatType::Svg),
            _ => None,
        });
    let by_magic = sniff(bytes);
    by_magic.or(by_extension)
}

/// Inspects leading bytes: a GDSII stream opens with a six-byte HEADER
/// record; SVG and DXF are text.
fn sniff(bytes: &[u8]) -> Option<FormatType> {
    if bytes.len() >= 4 && bytes[0] == 0x00 && bytes[1] == 0x06 && bytes[2] == 0x00 && bytes[3] == 0x02
    {
        return Some(FormatType::Gdsii);
    }
    let head = &bytes[..bytes.len().min(512)];
    let text = std::str::from_utf8(head).ok()?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") || trimmed.starts_with("<svg") {
        return Some(FormatType::Svg);
    }
    // A DXF file opens with a group code line (usually "0") followed by
    // "SECTION".
    let mut lines = trimmed.lines().map(str::trim);
    if let (Some(code), Some(value)) = (lines.next(), lines.next()) {
        if code.parse::<i32>().is_ok() && (value == "SECTION" || value == "EOF") {
            return Some(FormatType::Dxf);
        }
    }
    None
}

/// Parses `bytes` as a schematic, dispatching on the detected format.
pub fn parse(
    filename: &str,
    bytes: &[u8],
    options: &ParseOptions,
    budget: &OpBudget,
) -> Result<SchematicData> {
    let format = detect_format(filename, bytes).ok_or_else(|| ParseError::UnsupportedFormat {
        given: filename
            .rsplit('.')
            .next()
            .unwrap_or(filename)
            .to_string(),
    })?;
    let mut schematic = match format {
        FormatType::Gdsii => gdsii::parse(bytes, options, budget)?,
        FormatType::Dxf => dxf::parse(bytes, options, budget)?,
        FormatType::Svg => svg::parse(bytes, options, budget)?,
    };
    schematic.filename = filename.to_string();
    schematic.metadata.file_size = bytes.len() as u64;
    Ok(schematic)
}

/// Shared post-processing: size filter, positional dedup, stable ordering,
/// and die-id reassignment for anonymous boundaries.
pub(crate) fn finalize_boundaries(
    mut boundaries: Vec<DieBoundary>,
    options: &ParseOptions,
    merge_threshold: f64,
) -> std::result::Result<Vec<DieBoundary>, ParseError> {
    if let Some((min_area, max_area)) = options.die_size_filter {
        boundaries.retain(|b| {
            let area = b.area();
            min_area <= area && area <= max_area
        });
    }

    // Deterministic ordering: row-major by center.
    boundaries.sort_by(|a, b| {
        let (ca, cb) = (a.center(), b.center());
        ca.y.partial_cmp(&cb.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ca.x.partial_cmp(&cb.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    // Merge near-coincident detections (the same die found by two methods).
    let mut unique: Vec<DieBoundary> = Vec::with_capacity(boundaries.len());
    for boundary in boundaries {
        let duplicate = unique
            .iter()
            .any(|kept| kept.center().distance_to(boundary.center()) < merge_threshold);
        if !duplicate {
            unique.push(boundary);
        }
    }

    if unique.is_empty() {
        return Err(ParseError::NoDiesDetected);
    }

    // Anonymous detections get stable positional ids.
    let mut counter = 0usize;
    for boundary in unique.iter_mut() {
        if boundary.die_id.is_empty() {
            counter += 1;
            boundary.die_id = arcstr::format!("die_{counter:03}");
        }
    }

    Ok(unique)
}

/// Attaches the nearest label within each boundary as its die id.
pub(crate) fn attach_labels(boundaries: &mut [DieBoundary], labels: &[(Point, String)]) {
    for boundary in boundaries.iter_mut() {
        if !boundary.die_id.is_empty() {
            continue;
        }
        let mut best: Option<(f64, &str)> = None;
        for (pos, text) in labels {
            if !boundary.contains(*pos) || text.trim().is_empty() {
                continue;
            }
            let d = boundary.center().distance_to(*pos);
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, text));
            }
        }
        if let Some((_, text)) = best {
            boundary.die_id = text.trim().into();
        }
    }
}

#[cfg(test)]
mod tests {
    use wafergeom::Bounds;

    use super::*;

    #[test]
    fn sniff_overrides_extension() {
        let gds_header = [0x00u8, 0x06, 0x00, 0x02, 0x02, 0x58];
        assert_eq!(detect_format("layout.svg", &gds_header), Some(FormatType::Gdsii));
        assert_eq!(
            detect_format("layout.gds", b"<?xml version=\"1.0\"?><svg/>"),
            Some(FormatType::Svg)
        );
    }

    #[test]
    fn extension_used_when_sniff_is_inconclusive() {
        assert_eq!(detect_format("layout.gds", b""), Some(FormatType::Gdsii));
        assert_eq!(detect_format("layout.txt", b"hello"), None);
    }

    #[test]
    fn dxf_detected_by_group_code_preamble() {
        let body = b"0\nSECTION\n2\nENTITIES\n0\nENDSEC\n0\nEOF\n";
        assert_eq!(detect_format("upload.bin", body), Some(FormatType::Dxf));
    }

    #[test]
    fn finalize_filters_and_renames() {
        let boundaries = vec![
            DieBoundary::new("", Bounds::new(0.0, 0.0, 10.0, 10.0)),
            DieBoundary::new("", Bounds::new(20.0, 0.0, 30.0, 10.0)),
            // Tiny sliver dropped by the size filter.
            DieBoundary::new("", Bounds::new(50.0, 0.0, 50.5, 0.5)),
            // Duplicate detection of the first die.
            DieBoundary::new("", Bounds::new(0.1, 0.1, 10.1, 10.1)),
        ];
        let options = ParseOptions {
            die_size_filter: Some((1.0, 1000.0)),
            ..Default::default()
        };
        let result = finalize_boundaries(boundaries, &options, 1.0).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].die_id.as_str(), "die_001");
        assert_eq!(result[1].die_id.as_str(), "die_002");
    }

    #[test]
    fn finalize_reports_empty_detection() {
        let err = finalize_boundaries(Vec::new(), &ParseOptions::default(), 1.0).unwrap_err();
        assert!(matches!(err, ParseError::NoDiesDetected));
    }

    #[test]
    fn labels_attach_to_containing_boundary() {
        let mut boundaries = vec![
            DieBoundary::new("", Bounds::new(0.0, 0.0, 10.0, 10.0)),
            DieBoundary::new("", Bounds::new(20.0, 0.0, 30.0, 10.0)),
        ];
        let labels = vec![
            (Point::new(5.0, 5.0), "A1".to_string()),
            (Point::new(100.0, 100.0), "stray".to_string()),
        ];
        attach_labels(&mut boundaries, &labels);
        assert_eq!(boundaries[0].die_id.as_str(), "A1");
        assert!(boundaries[1].die_id.is_empty());
    }
}
