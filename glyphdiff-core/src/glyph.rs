use serde::{Deserialize, Serialize};

/// A glyph outline point in font units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GlyphError {
    #[error("invalid coordinate {value:?} in point {index}")]
    InvalidCoordinate { index: usize, value: String },
}

/// Parses `x,y|x,y|...`.
///
/// Segments that do not hold exactly two coordinates are skipped; a
/// coordinate that is not an integer fails the whole glyph.
pub fn parse_glyph(input: &str) -> Result<Vec<Point>, GlyphError> {
    let mut points = Vec::new();
    for (index, segment) in input.split('|').enumerate() {
        let mut coords: Vec<&str> = segment.split(',').collect();
        while coords.last().is_some_and(|c| c.is_empty()) {
            coords.pop();
        }
        let [x, y] = coords[..] else {
            continue;
        };
        let parse = |raw: &str| {
            raw.trim()
                .parse::<i32>()
                .map_err(|_| GlyphError::InvalidCoordinate {
                    index,
                    value: raw.trim().to_string(),
                })
        };
        points.push(Point::new(parse(x)?, parse(y)?));
    }
    Ok(points)
}

/// Interleaves points into `[x0, y0, x1, y1, ...]`.
pub fn flatten(points: &[Point]) -> Vec<i32> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

/// Bounding extents of a glyph. They always include the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extents {
    pub max_x: i32,
    pub min_x: i32,
    pub max_y: i32,
    pub min_y: i32,
}

impl Extents {
    pub fn of(points: &[Point]) -> Self {
        points.iter().fold(Extents::default(), |e, p| Extents {
            max_x: e.max_x.max(p.x),
            min_x: e.min_x.min(p.x),
            max_y: e.max_y.max(p.y),
            min_y: e.min_y.min(p.y),
        })
    }

    /// True when every bound differs from `other`'s by at most `tolerance`.
    pub fn within(&self, other: &Extents, tolerance: u32) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array())
            .all(|(a, b)| a.abs_diff(b) <= tolerance)
    }

    pub fn to_array(self) -> [i32; 4] {
        [self.max_x, self.min_x, self.max_y, self.min_y]
    }
}

/// A catalog glyph ready for scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphShape {
    pub codepoint: u32,
    pub coords: Vec<i32>,
    pub extents: Extents,
}

impl GlyphShape {
    pub fn new(codepoint: u32, points: &[Point]) -> Self {
        Self {
            codepoint,
            coords: flatten(points),
            extents: Extents::of(points),
        }
    }

    pub fn point_count(&self) -> usize {
        self.coords.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_with_whitespace() {
        let points = parse_glyph(" 1, 2| -3 ,4|5,-6 ").unwrap();
        assert_eq!(
            points,
            vec![Point::new(1, 2), Point::new(-3, 4), Point::new(5, -6)]
        );
    }

    #[test]
    fn skips_malformed_segments() {
        let points = parse_glyph("1,2||3|4,5,6|7,8|9,").unwrap();
        assert_eq!(points, vec![Point::new(1, 2), Point::new(7, 8)]);
        assert!(parse_glyph("").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(
            parse_glyph("1,2|x,3").unwrap_err(),
            GlyphError::InvalidCoordinate {
                index: 1,
                value: "x".into()
            }
        );
        assert!(parse_glyph("1,99999999999").is_err());
    }

    #[test]
    fn extents_include_origin() {
        let extents = Extents::of(&[Point::new(5, 7), Point::new(10, 3)]);
        assert_eq!(
            extents,
            Extents {
                max_x: 10,
                min_x: 0,
                max_y: 7,
                min_y: 0
            }
        );
        let negative = Extents::of(&[Point::new(-4, -2)]);
        assert_eq!(negative.to_array(), [0, -4, 0, -2]);
    }

    #[test]
    fn extents_tolerance() {
        let a = Extents::of(&[Point::new(100, 50), Point::new(-20, -10)]);
        let b = Extents::of(&[Point::new(103, 47), Point::new(-17, -13)]);
        assert!(a.within(&b, 3));
        assert!(!a.within(&b, 2));
    }

    #[test]
    fn shape_flattens_points() {
        let shape = GlyphShape::new(0x41, &[Point::new(1, 2), Point::new(3, 4)]);
        assert_eq!(shape.coords, vec![1, 2, 3, 4]);
        assert_eq!(shape.point_count(), 2);
    }
}
