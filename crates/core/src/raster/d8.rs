//! D8 flow direction encoding shared by the routing tools.
//!
//! Direction codes: 0 means no flow (pit, flat or edge exit), 1-8 walk
//! counter-clockwise from east.

/// Direction offsets: (row_offset, col_offset), indexed by direction code
pub const OFFSETS: [(isize, isize); 9] = [
    (0, 0),   // 0: no flow / pit
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Distance multipliers for each direction code.
/// Cardinal directions = 1.0, diagonal = sqrt(2).
pub const DISTANCES: [f64; 9] = [
    0.0,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
];

/// Apply a direction code to a cell index, returning the neighbor indices if
/// they fall inside a raster of the given shape
pub fn neighbor(
    row: usize,
    col: usize,
    dir: u8,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    if dir == 0 || dir > 8 {
        return None;
    }
    let (dr, dc) = OFFSETS[dir as usize];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
        None
    } else {
        Some((nr as usize, nc as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbor_bounds() {
        assert_eq!(neighbor(0, 0, 1, 3, 3), Some((0, 1)));
        assert_eq!(neighbor(0, 0, 3, 3, 3), None); // N off the top
        assert_eq!(neighbor(2, 2, 8, 3, 3), None); // SE off the corner
        assert_eq!(neighbor(1, 1, 0, 3, 3), None); // pit
    }
}
