//! Deterministic replicated chunk names.
//!
//! Server and client derive a chunk's network name from its cell and spawn
//! count alone, so both sides agree without ever sending the string.

use crate::grid::ChunkCell;

/// Name of the chunk at `cell` on its `count`-th replicated spawn.
pub fn chunk_name(cell: ChunkCell, count: i32) -> String {
    format!("X{}_Y{}_Z{}_N{}", cell.x, cell.y, cell.z, count)
}

/// Recovers `(cell, count)` from a name produced by [`chunk_name`].
pub fn parse_chunk_name(name: &str) -> Option<(ChunkCell, i32)> {
    let mut parts = name.split('_');
    let mut field = |prefix: char| -> Option<i32> {
        parts.next()?.strip_prefix(prefix)?.parse().ok()
    };
    let x = field('X')?;
    let y = field('Y')?;
    let z = field('Z')?;
    let n = field('N')?;
    if parts.next().is_some() {
        return None;
    }
    Some((ChunkCell::new(x, y, z), n))
}
