//! Resize geometry
//!
//! Turns width, height, crop, gravity and the two preservation flags into
//! the pieces of an ImageMagick resize: the size token with its constraint
//! markers, the gravity setting and the extent slot.

use crate::options::OptionClaims;

/// What follows the resize operator when both dimensions are given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtentClause {
    /// `-extent WxH`: fill the box, cutting overflow around the gravity point
    Extent(u32, u32),
    /// `+repage`: keep the resized canvas as is
    Repage,
}

impl ExtentClause {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            ExtentClause::Extent(w, h) => vec!["-extent".to_string(), format!("{}x{}", w, h)],
            ExtentClause::Repage => vec!["+repage".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Geometry {
    /// `W`, `xH` or `WxH` followed by markers; `None` when no dimension is set
    pub size: Option<String>,
    /// Only set when both dimensions are present
    pub gravity: Option<String>,
    /// Only set when both dimensions are present
    pub extent: Option<ExtentClause>,
}

impl Geometry {
    /// Claim the geometry options and compute the resize geometry.
    pub fn from_claims(claims: &mut OptionClaims<'_>) -> Self {
        let width = claims.claim("width").parse::<u32>().ok();
        let height = claims.claim("height").parse::<u32>().ok();
        let crop = claims.claim_truthy("crop");
        let gravity = claims.claim("gravity");
        let preserve_aspect_ratio = claims.claim_truthy("preserve-aspect-ratio");
        let preserve_natural_size = claims.claim_truthy("preserve-natural-size");

        match (width, height) {
            (None, None) => Geometry::default(),
            (Some(w), None) => Geometry {
                size: Some(w.to_string()),
                ..Default::default()
            },
            (None, Some(h)) => Geometry {
                size: Some(format!("x{}", h)),
                ..Default::default()
            },
            (Some(w), Some(h)) => {
                let mut size = format!("{}x{}", w, h);
                if preserve_natural_size {
                    size.push('>');
                }
                let extent = if crop {
                    size.push('^');
                    ExtentClause::Extent(w, h)
                } else {
                    ExtentClause::Repage
                };
                if !preserve_aspect_ratio {
                    size.push('!');
                }

                Geometry {
                    size: Some(size),
                    gravity: (!gravity.is_empty()).then(|| gravity.to_string()),
                    extent: Some(extent),
                }
            }
        }
    }
}
