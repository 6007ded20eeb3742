//! Anchor box table.

use crate::error::ResourceError;

/// One reference box, in normalised chip coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

impl Anchor {
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        ((self.ymin + self.ymax) / 2.0, (self.xmin + self.xmax) / 2.0)
    }

    /// `(height, width)`.
    #[must_use]
    pub fn size(&self) -> (f64, f64) {
        (self.ymax - self.ymin, self.xmax - self.xmin)
    }
}

/// Ordered anchor table; line order in the source file defines anchor index.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable {
    anchors: Vec<Anchor>,
}

impl AnchorTable {
    /// Parses `ymin,xmin,ymax,xmax` lines. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Any other line that is not four comma-separated floats is fatal, as is
    /// a document with no anchors.
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        let mut anchors = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            anchors.push(parse_line(line).map_err(|reason| ResourceError::MalformedAnchor {
                line: n + 1,
                reason,
            })?);
        }
        if anchors.is_empty() {
            return Err(ResourceError::NoAnchors);
        }
        Ok(Self { anchors })
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }
}

fn parse_line(line: &str) -> Result<Anchor, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    }
    let mut values = [0.0f64; 4];
    for (value, field) in values.iter_mut().zip(&fields) {
        *value = field
            .parse()
            .map_err(|e| format!("invalid number {field:?}: {e}"))?;
    }
    let [ymin, xmin, ymax, xmax] = values;
    Ok(Anchor {
        ymin,
        xmin,
        ymax,
        xmax,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_in_file_order() {
        let table = AnchorTable::parse("0.1,0.2,0.3,0.4\n0.0,0.0,1.0,1.0\n").unwrap();
        assert_eq!(table.len(), 2);
        let first = table.get(0).unwrap();
        assert_eq!(first.ymin, 0.1);
        assert_eq!(first.xmax, 0.4);
        assert_eq!(table.get(1).unwrap().size(), (1.0, 1.0));
        assert!(table.get(2).is_none());
    }

    #[test]
    fn anchor_center_and_size() {
        let anchor = Anchor {
            ymin: 0.2,
            xmin: 0.0,
            ymax: 0.6,
            xmax: 0.5,
        };
        let (cy, cx) = anchor.center();
        assert!((cy - 0.4).abs() < 1e-12);
        assert!((cx - 0.25).abs() < 1e-12);
        let (h, w) = anchor.size();
        assert!((h - 0.4).abs() < 1e-12);
        assert!((w - 0.5).abs() < 1e-12);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let table = AnchorTable::parse("\n0.1,0.2,0.3,0.4\n\n  \n").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = AnchorTable::parse("0.1,0.2,0.3,0.4\n0.1,0.2,abc,0.4\n").unwrap_err();
        assert_matches!(err, ResourceError::MalformedAnchor { line: 2, .. });

        let err = AnchorTable::parse("0.1,0.2,0.3\n").unwrap_err();
        assert_matches!(err, ResourceError::MalformedAnchor { line: 1, .. });
    }

    #[test]
    fn empty_document_is_rejected() {
        assert_eq!(AnchorTable::parse("\n\n"), Err(ResourceError::NoAnchors));
    }
}
