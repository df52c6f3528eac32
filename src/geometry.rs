//! CPU-side geometry for the primitives: quad corners, texture rectangles and outline
//! tessellation. Everything here is pure and safe to call from any thread.

use lyon::math::point;
use lyon::path::Path;
use lyon::tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};

use crate::error::StagingError;

/// Fixed triangulation of a quad whose corners are ordered
/// top-left, bottom-left, bottom-right, top-right.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Number of scalars in a quad's vertex array (4 corners, xyz each).
pub const QUAD_VERTEX_SCALARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Four screen-space corners of a (possibly non-rectangular) quad.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quad2d {
    pub top_left: Coord,
    pub top_right: Coord,
    pub bottom_right: Coord,
    pub bottom_left: Coord,
}

impl Quad2d {
    pub const fn new(top_left: Coord, top_right: Coord, bottom_right: Coord, bottom_left: Coord) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Axis-aligned quad spanning `(x, y)` to `(x + width, y + height)`.
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            top_left: Coord::new(x, y),
            top_right: Coord::new(x + width, y),
            bottom_right: Coord::new(x + width, y + height),
            bottom_left: Coord::new(x, y + height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectD {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectD {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Default for RectD {
    /// The whole texture.
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }
}

/// Vertex positions of `frame` at z = 0, in index order top-left, bottom-left, bottom-right,
/// top-right.
pub fn quad_vertices(frame: &Quad2d) -> [f32; QUAD_VERTEX_SCALARS] {
    let z = 0.0;
    [
        frame.top_left.x as f32,
        frame.top_left.y as f32,
        z,
        frame.bottom_left.x as f32,
        frame.bottom_left.y as f32,
        z,
        frame.bottom_right.x as f32,
        frame.bottom_right.y as f32,
        z,
        frame.top_right.x as f32,
        frame.top_right.y as f32,
        z,
    ]
}

/// Texture coordinates for the quad corners, scaled by the image/backing-texture factors.
///
/// Backing textures may be padded up to power-of-two dimensions, so the usable image only
/// covers `factor_width x factor_height` of the normalized texture space.
pub fn texture_coordinates(rect: &RectD, factor_width: f32, factor_height: f32) -> [f32; 8] {
    let min_x = factor_width * rect.x as f32;
    let max_x = factor_width * (rect.x + rect.width) as f32;
    let min_y = factor_height * rect.y as f32;
    let max_y = factor_height * (rect.y + rect.height) as f32;

    [min_x, min_y, min_x, max_y, max_x, max_y, max_x, min_y]
}

/// Pre-triangulated polygon geometry ready to be staged into a polygon primitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonGeometry {
    /// xyz per vertex.
    pub vertices: Vec<f32>,
    pub indices: Vec<u16>,
}

/// Fills the closed outline through `points` with an even-odd rule.
///
/// Outlines with fewer than three points produce empty geometry.
pub fn tessellate_outline(points: &[Coord]) -> Result<PolygonGeometry, StagingError> {
    if points.len() < 3 {
        return Ok(PolygonGeometry::default());
    }

    let mut builder = Path::builder();
    builder.begin(point(points[0].x as f32, points[0].y as f32));
    for coord in &points[1..] {
        builder.line_to(point(coord.x as f32, coord.y as f32));
    }
    builder.end(true);
    let path = builder.build();

    let mut buffers: VertexBuffers<[f32; 3], u16> = VertexBuffers::new();
    let mut tessellator = FillTessellator::new();
    tessellator
        .tessellate_path(
            &path,
            &FillOptions::default(),
            &mut BuffersBuilder::new(&mut buffers, |vertex: FillVertex| {
                let position = vertex.position();
                [position.x, position.y, 0.0]
            }),
        )
        .map_err(|error| StagingError::Tessellation(format!("{error:?}")))?;

    Ok(PolygonGeometry {
        vertices: buffers.vertices.into_iter().flatten().collect(),
        indices: buffers.indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_vertices_follow_index_order() {
        let frame = Quad2d::from_rect(10.0, 20.0, 30.0, 40.0);
        let vertices = quad_vertices(&frame);

        assert_eq!(vertices.len(), QUAD_VERTEX_SCALARS);
        assert_eq!(&vertices[0..3], &[10.0, 20.0, 0.0]);
        assert_eq!(&vertices[3..6], &[10.0, 60.0, 0.0]);
        assert_eq!(&vertices[6..9], &[40.0, 60.0, 0.0]);
        assert_eq!(&vertices[9..12], &[40.0, 20.0, 0.0]);
    }

    #[test]
    fn texture_coordinates_scale_by_padding_factors() {
        let coords = texture_coordinates(&RectD::new(0.0, 0.0, 1.0, 1.0), 0.5, 0.5);
        assert_eq!(coords, [0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn texture_coordinates_for_a_sub_rectangle() {
        let coords = texture_coordinates(&RectD::new(0.25, 0.5, 0.5, 0.25), 1.0, 0.5);
        assert_eq!(coords, [0.25, 0.25, 0.25, 0.375, 0.75, 0.375, 0.75, 0.25]);
    }

    #[test]
    fn square_outline_tessellates_into_two_triangles() {
        let outline = [
            Coord::new(0.0, 0.0),
            Coord::new(10.0, 0.0),
            Coord::new(10.0, 10.0),
            Coord::new(0.0, 10.0),
        ];
        let geometry = tessellate_outline(&outline).unwrap();

        assert_eq!(geometry.indices.len(), 6);
        assert_eq!(geometry.vertices.len() % 3, 0);
        assert!(geometry
            .indices
            .iter()
            .all(|&index| (index as usize) < geometry.vertices.len() / 3));
    }

    #[test]
    fn degenerate_outline_is_empty() {
        let geometry = tessellate_outline(&[Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)]).unwrap();
        assert!(geometry.vertices.is_empty());
        assert!(geometry.indices.is_empty());
    }
}
