//! Labyrinth map built from wall observations.
//!
//! The grid is fixed at [`LABYRINTH_ROWS`] × [`LABYRINTH_COLS`] cells.  Every
//! cell stores a 4-bit wall mask (one bit per [`Direction`]), a visited flag
//! and an optional info annotation.  A wall between two cells is stored on
//! both sides; [`LabyrinthMap::record_wall`] updates both inside one write
//! lock, so readers never see a one-sided wall.
//!
//! World frame: the grid is centred on the origin, `+x` points east (columns
//! grow) and `+y` points north (rows shrink), one cell is [`LABY_CELLSIZE`] mm.
//!
//! | Operation | Effect |
//! |---|---|
//! | [`record_wall`][LabyrinthMap::record_wall] | set/clear a wall and its mirror |
//! | [`record_wall_info`][LabyrinthMap::record_wall_info] | same, from a wire record |
//! | [`record_cell_info`][LabyrinthMap::record_cell_info] | mark visited, store annotation |
//! | [`snapshot`][LabyrinthMap::snapshot] | wire bitset of every wall |
//! | [`clear`][LabyrinthMap::clear] | forget everything |

use mazebot_types::{
    CellIndex, Direction, FPoint, INFO_CLEAR, LABY_CELLSIZE, LABYRINTH_COLS, LABYRINTH_ROWS,
    LabyrinthCellInfo, LabyrinthWallInfo, LabyrinthWalls, MazeError,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

const CELLS: usize = LABYRINTH_ROWS * LABYRINTH_COLS;

#[derive(Debug, Clone)]
struct Grid {
    walls: [u8; CELLS],
    visited: [bool; CELLS],
    info: [Option<i8>; CELLS],
    /// Bumped on every change of the wall set.
    revision: u64,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            walls: [0; CELLS],
            visited: [false; CELLS],
            info: [None; CELLS],
            revision: 0,
        }
    }
}

fn slot(cell: CellIndex) -> usize {
    cell.row as usize * LABYRINTH_COLS + cell.col as usize
}

fn check_bounds(cell: CellIndex) -> Result<(), MazeError> {
    if cell.in_bounds() {
        Ok(())
    } else {
        warn!(row = cell.row, col = cell.col, "cell outside labyrinth rejected");
        Err(MazeError::BoundsViolation {
            row: cell.row,
            col: cell.col,
        })
    }
}

/// Thread-safe labyrinth grid.
#[derive(Debug, Default)]
pub struct LabyrinthMap {
    grid: RwLock<Grid>,
}

impl LabyrinthMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the wall on side `dir` of `cell`, mirrored on the
    /// neighbour when it lies inside the grid.
    ///
    /// Returns whether the map changed.
    pub fn record_wall(
        &self,
        cell: CellIndex,
        dir: Direction,
        present: bool,
    ) -> Result<bool, MazeError> {
        check_bounds(cell)?;
        let mut grid = self.grid.write();
        let i = slot(cell);
        let before = grid.walls[i];
        set_bit(&mut grid.walls[i], dir, present);
        if let Some(n) = cell.neighbor(dir) {
            set_bit(&mut grid.walls[slot(n)], dir.opposite(), present);
        }
        let changed = grid.walls[i] != before;
        if changed {
            grid.revision += 1;
            debug!(row = cell.row, col = cell.col, ?dir, present, "wall recorded");
        }
        Ok(changed)
    }

    /// Apply a wall observation from the wire; `info > 0` means present.
    pub fn record_wall_info(&self, info: &LabyrinthWallInfo) -> Result<bool, MazeError> {
        self.record_wall(info.cell(), info.dir, info.is_present())
    }

    /// Mark a cell visited and store its annotation.
    ///
    /// [`INFO_CLEAR`] removes the annotation but the cell stays visited.
    pub fn record_cell_info(&self, info: &LabyrinthCellInfo) -> Result<(), MazeError> {
        let cell = info.cell();
        check_bounds(cell)?;
        let mut grid = self.grid.write();
        let i = slot(cell);
        grid.visited[i] = true;
        grid.info[i] = (info.info != INFO_CLEAR).then_some(info.info);
        Ok(())
    }

    /// Mark `cell` visited without touching its annotation.
    pub fn mark_visited(&self, cell: CellIndex) -> Result<(), MazeError> {
        check_bounds(cell)?;
        self.grid.write().visited[slot(cell)] = true;
        Ok(())
    }

    /// Full-grid copy in the wire bitset layout.
    pub fn snapshot(&self) -> LabyrinthWalls {
        let grid = self.grid.read();
        let mut out = LabyrinthWalls::default();
        for row in 0..LABYRINTH_ROWS as u8 {
            for col in 0..LABYRINTH_COLS as u8 {
                let mask = grid.walls[slot(CellIndex::new(row, col))];
                for dir in Direction::ALL {
                    if mask & dir.bit() != 0 {
                        out.set_wall(row, col, dir, true);
                    }
                }
            }
        }
        out
    }

    /// `false` for cells outside the grid.
    pub fn has_wall(&self, cell: CellIndex, dir: Direction) -> bool {
        cell.in_bounds() && self.grid.read().walls[slot(cell)] & dir.bit() != 0
    }

    /// 4-bit wall mask of `cell` (bit per [`Direction`]).
    pub fn walls_of(&self, cell: CellIndex) -> Option<u8> {
        cell.in_bounds().then(|| self.grid.read().walls[slot(cell)])
    }

    /// Whether a wall separates two orthogonally adjacent cells; `None` when
    /// they are not adjacent.
    pub fn wall_between(&self, from: CellIndex, to: CellIndex) -> Option<bool> {
        let dir = from.direction_to(to)?;
        Some(self.has_wall(from, dir))
    }

    pub fn is_visited(&self, cell: CellIndex) -> bool {
        cell.in_bounds() && self.grid.read().visited[slot(cell)]
    }

    pub fn visited_count(&self) -> usize {
        self.grid.read().visited.iter().filter(|v| **v).count()
    }

    /// Annotation of `cell`, if one is set.
    pub fn info(&self, cell: CellIndex) -> Option<i8> {
        if !cell.in_bounds() {
            return None;
        }
        self.grid.read().info[slot(cell)]
    }

    /// Counter that increases whenever the wall set changes.
    pub fn revision(&self) -> u64 {
        self.grid.read().revision
    }

    /// Forget every wall, visit and annotation.
    pub fn clear(&self) {
        let mut grid = self.grid.write();
        let revision = grid.revision + 1;
        *grid = Grid {
            revision,
            ..Grid::default()
        };
        debug!("labyrinth cleared");
    }

    /// Cell containing the world point `p`, if inside the grid.
    pub fn cell_at(p: FPoint) -> Option<CellIndex> {
        let mid_col = (LABYRINTH_COLS as f32 - 1.0) / 2.0;
        let mid_row = (LABYRINTH_ROWS as f32 - 1.0) / 2.0;
        let col = (p.x / LABY_CELLSIZE + mid_col).round();
        let row = (mid_row - p.y / LABY_CELLSIZE).round();
        if !(0.0..LABYRINTH_COLS as f32).contains(&col) || !(0.0..LABYRINTH_ROWS as f32).contains(&row)
        {
            return None;
        }
        Some(CellIndex::new(row as u8, col as u8))
    }

    /// World coordinates of the centre of `cell`.
    pub fn cell_center(cell: CellIndex) -> FPoint {
        let mid_col = (LABYRINTH_COLS as f32 - 1.0) / 2.0;
        let mid_row = (LABYRINTH_ROWS as f32 - 1.0) / 2.0;
        FPoint::new(
            (cell.col as f32 - mid_col) * LABY_CELLSIZE,
            (mid_row - cell.row as f32) * LABY_CELLSIZE,
        )
    }
}

fn set_bit(mask: &mut u8, dir: Direction, present: bool) {
    if present {
        *mask |= dir.bit();
    } else {
        *mask &= !dir.bit();
    }
}
