//! Cascade cache files.
//!
//! Plain-text records, one line per cell in row-major order:
//! `row col v0 .. v{stride-1}`. Pending routed inflow has not reached
//! stage 0 yet when a run ends, so saving folds the carry into the first
//! stage value; loading therefore restores a plain arena with no carry.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rivgis_core::Raster;

use crate::cascade::CascadeArena;
use crate::error::{Result, SimError};

/// Write the cascade contents of every cell to a cache file
pub fn save_cascade(
    path: impl AsRef<Path>,
    arena: &CascadeArena,
    carry: &Raster<f64>,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    for row in 0..arena.rows() {
        for col in 0..arena.cols() {
            write!(out, "{row} {col}")?;
            let pending = carry.get(row, col).unwrap_or(0.0);
            for (stage, &v) in arena.stages(row, col).iter().enumerate() {
                let v = if stage == 0 && pending > 0.0 {
                    v + pending
                } else {
                    v
                };
                write!(out, " {v}")?;
            }
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Read a cache file back into an arena of the given shape.
///
/// The file must hold exactly `rows * cols` records with `stride` stage
/// values each; anything else is a shape error, not a warning, because a
/// warm start from a mismatched cache would silently corrupt the run.
pub fn load_cascade(
    path: impl AsRef<Path>,
    rows: usize,
    cols: usize,
    stride: usize,
) -> Result<CascadeArena> {
    let reader = BufReader::new(File::open(path)?);
    let mut arena = CascadeArena::new(rows, cols, stride);
    let mut records = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let mut fields = line.split_whitespace();

        let row = parse_field(fields.next(), lineno, "row")?;
        let col = parse_field(fields.next(), lineno, "col")?;
        if row >= rows || col >= cols {
            return Err(SimError::CacheParse {
                line: lineno,
                reason: format!("cell ({row}, {col}) outside a {rows}x{cols} grid"),
            });
        }

        let stages = arena.stages_mut(row, col);
        for (stage, slot) in stages.iter_mut().enumerate() {
            let raw = fields.next().ok_or_else(|| SimError::CacheParse {
                line: lineno,
                reason: format!("missing stage value {stage}"),
            })?;
            *slot = raw.parse().map_err(|_| SimError::CacheParse {
                line: lineno,
                reason: format!("unreadable stage value {raw:?}"),
            })?;
        }
        if fields.next().is_some() {
            return Err(SimError::CacheParse {
                line: lineno,
                reason: format!("more than {stride} stage values"),
            });
        }
        records += 1;
    }

    if records != rows * cols {
        return Err(SimError::CacheShape {
            expected: rows * cols,
            found: records,
        });
    }
    Ok(arena)
}

fn parse_field(raw: Option<&str>, lineno: usize, name: &str) -> Result<usize> {
    let raw = raw.ok_or_else(|| SimError::CacheParse {
        line: lineno,
        reason: format!("missing {name} index"),
    })?;
    raw.parse().map_err(|_| SimError::CacheParse {
        line: lineno,
        reason: format!("unreadable {name} index {raw:?}"),
    })
}
