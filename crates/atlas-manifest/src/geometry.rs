use atlas_transport::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, AtlasResult};

/// Unique identifier for a partition region within one heuristic generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoundsID(pub u32);

/// A 2-D axis-aligned rect labeled with its grid row/col, one of the cells
/// that makes up a `Bound`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub row: i32,
    pub col: i32,
    pub min: (f32, f32),
    pub max: (f32, f32),
}

/// An axis-aligned 3-D region of the world, identified by `id`, made up of
/// one or more grid cells. `min <= max` componentwise and two bounds never
/// overlap within one heuristic generation (enforced by the heuristic that
/// produces them, not by this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub id: BoundsID,
    pub min: Vec3,
    pub max: Vec3,
    pub cells: Vec<GridCell>,
}

impl Bound {
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Canonical byte serialization, used as the opaque "encoded bound" the
    /// manifest stores. The first four bytes are always the `BoundsID`, which
    /// is how `RequeueClaimed` recovers the id from a claim it only holds as
    /// bytes.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.id.0.to_le_bytes());
        for v in [self.min, self.max] {
            out.extend_from_slice(&v.x.to_le_bytes());
            out.extend_from_slice(&v.y.to_le_bytes());
            out.extend_from_slice(&v.z.to_le_bytes());
        }
        out.extend_from_slice(&(self.cells.len() as u32).to_le_bytes());
        for cell in &self.cells {
            out.extend_from_slice(&cell.row.to_le_bytes());
            out.extend_from_slice(&cell.col.to_le_bytes());
            out.extend_from_slice(&cell.min.0.to_le_bytes());
            out.extend_from_slice(&cell.min.1.to_le_bytes());
            out.extend_from_slice(&cell.max.0.to_le_bytes());
            out.extend_from_slice(&cell.max.1.to_le_bytes());
        }
        out
    }

    pub fn from_canonical_bytes(buf: &[u8]) -> AtlasResult<Self> {
        let malformed = |reason: &str| AtlasError::MalformedRecord { reason: reason.to_string() };
        if buf.len() < 4 + 24 + 24 + 4 {
            return Err(malformed("bound record too short"));
        }
        let id = BoundsID(u32::from_le_bytes(buf[0..4].try_into().unwrap()));
        let read_vec3 = |b: &[u8]| Vec3::new(
            f32::from_le_bytes(b[0..4].try_into().unwrap()),
            f32::from_le_bytes(b[4..8].try_into().unwrap()),
            f32::from_le_bytes(b[8..12].try_into().unwrap()),
        );
        let min = read_vec3(&buf[4..16]);
        let max = read_vec3(&buf[16..28]);
        let cell_count = u32::from_le_bytes(buf[28..32].try_into().unwrap()) as usize;
        let mut cursor = 32;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            if buf.len() < cursor + 24 {
                return Err(malformed("bound record cell list truncated"));
            }
            let row = i32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
            let col = i32::from_le_bytes(buf[cursor + 4..cursor + 8].try_into().unwrap());
            let min_x = f32::from_le_bytes(buf[cursor + 8..cursor + 12].try_into().unwrap());
            let min_y = f32::from_le_bytes(buf[cursor + 12..cursor + 16].try_into().unwrap());
            let max_x = f32::from_le_bytes(buf[cursor + 16..cursor + 20].try_into().unwrap());
            let max_y = f32::from_le_bytes(buf[cursor + 20..cursor + 24].try_into().unwrap());
            cells.push(GridCell { row, col, min: (min_x, min_y), max: (max_x, max_y) });
            cursor += 24;
        }
        Ok(Self { id, min, max, cells })
    }

    /// Recovers the `BoundsID` from the leading four bytes of an opaque
    /// encoded bound, without fully decoding it. Used by `RequeueClaimed`.
    pub fn id_from_canonical_bytes(buf: &[u8]) -> AtlasResult<BoundsID> {
        if buf.len() < 4 {
            return Err(AtlasError::MalformedRecord { reason: "bound record missing id prefix".into() });
        }
        Ok(BoundsID(u32::from_le_bytes(buf[0..4].try_into().unwrap())))
    }
}

/// Which spatial heuristic is currently active, mirroring the source's
/// `Heuristic_Type` string enum (`eNone`/`eGridCell`/`eQuadtree`/`eOctree`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicKind {
    None,
    GridCell,
    Quadtree,
    Octree,
}

impl HeuristicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "eNone",
            Self::GridCell => "eGridCell",
            Self::Quadtree => "eQuadtree",
            Self::Octree => "eOctree",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "eGridCell" => Self::GridCell,
            "eQuadtree" => Self::Quadtree,
            "eOctree" => Self::Octree,
            _ => Self::None,
        }
    }
}

/// A spatial partitioning scheme: divides the world into disjoint `Bound`s
/// and can answer "which bound contains this point". The runtime is agnostic
/// to which concrete heuristic is wired in (§4.10 interface-contract style).
pub trait Heuristic: Send + Sync {
    fn kind(&self) -> HeuristicKind;
    fn enumerate_bounds(&self) -> Vec<Bound>;
    fn query_position(&self, p: Vec3) -> Option<&Bound>;
    fn serialize(&self) -> Vec<u8>;
}

/// Uniform grid partition: the world is cut into `cell_size`-sided squares on
/// the XY plane, each cell is its own bound (one cell per bound, matching the
/// simplest case the source's GridCellManifest handles).
#[derive(Debug, Clone)]
pub struct GridCellHeuristic {
    bounds: Vec<Bound>,
}

impl GridCellHeuristic {
    pub fn new(world_min: (f32, f32), world_max: (f32, f32), cell_size: f32) -> Self {
        let mut bounds = Vec::new();
        let mut next_id = 0u32;
        let cols = (((world_max.0 - world_min.0) / cell_size).ceil() as i32).max(1);
        let rows = (((world_max.1 - world_min.1) / cell_size).ceil() as i32).max(1);
        for row in 0..rows {
            for col in 0..cols {
                let min_x = world_min.0 + col as f32 * cell_size;
                let min_y = world_min.1 + row as f32 * cell_size;
                let max_x = (min_x + cell_size).min(world_max.0);
                let max_y = (min_y + cell_size).min(world_max.1);
                let cell = GridCell { row, col, min: (min_x, min_y), max: (max_x, max_y) };
                bounds.push(Bound {
                    id: BoundsID(next_id),
                    min: Vec3::new(min_x, min_y, f32::MIN / 2.0),
                    max: Vec3::new(max_x, max_y, f32::MAX / 2.0),
                    cells: vec![cell],
                });
                next_id += 1;
            }
        }
        Self { bounds }
    }
}

impl Heuristic for GridCellHeuristic {
    fn kind(&self) -> HeuristicKind {
        HeuristicKind::GridCell
    }

    fn enumerate_bounds(&self) -> Vec<Bound> {
        self.bounds.clone()
    }

    fn query_position(&self, p: Vec3) -> Option<&Bound> {
        self.bounds.iter().find(|b| b.contains(p))
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.bounds.len() as u32).to_le_bytes());
        for b in &self.bounds {
            let bytes = b.to_canonical_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }
}
