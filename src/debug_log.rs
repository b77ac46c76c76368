//! Debug logging infrastructure for mesh synthesis diagnostics
//!
//! Writes to `tile_terrain_debug.log` in the working directory.
//! Until `init_debug_log()` is called, `debug_log` is a no-op, so synthesis
//! can run on worker threads and in tests without touching the engine.

use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

use godot::prelude::*;

use crate::mesh_synthesis::Diagnostics;

lazy_static::lazy_static! {
    static ref DEBUG_LOG: Mutex<Option<File>> = Mutex::new(None);
}

/// Log a debug message to the synthesis debug log file
pub fn debug_log(msg: &str) {
    if let Ok(mut guard) = DEBUG_LOG.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "{}", msg);
            let _ = file.flush();
        }
    }
}

/// Initialize the debug log file (overwrites any existing log)
pub fn init_debug_log() {
    if let Ok(mut guard) = DEBUG_LOG.lock() {
        *guard = File::create("tile_terrain_debug.log").ok();
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "=== TILE TERRAIN DEBUG LOG ===");
            let _ = writeln!(file, "Timestamp: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

/// Statistics about normals in a mesh
#[derive(Debug)]
pub struct NormalStats {
    pub min_len: f32,
    pub max_len: f32,
    pub degenerate_count: usize,
}

/// Compute statistics about normal vectors
/// A normal is considered degenerate if its length is not close to 1.0
pub fn compute_normal_stats(normals: &[Vector3]) -> NormalStats {
    let mut min_len = f32::MAX;
    let mut max_len = f32::MIN;
    let mut degenerate_count = 0;

    for n in normals {
        let len = n.length();
        min_len = min_len.min(len);
        max_len = max_len.max(len);

        if !(0.99..=1.01).contains(&len) || len.is_nan() {
            degenerate_count += 1;
        }
    }

    if normals.is_empty() {
        min_len = 0.0;
        max_len = 0.0;
    }

    NormalStats {
        min_len,
        max_len,
        degenerate_count,
    }
}

/// One-line summary of a pass's data gaps, `None` when there were none.
pub fn summarize_diagnostics(label: &str, diagnostics: &Diagnostics) -> Option<String> {
    if diagnostics.is_clean() {
        return None;
    }
    let gaps: Vec<String> = diagnostics
        .unsupported_roofs
        .iter()
        .map(|g| format!("({}, {})@level{}", g.x, g.y, g.level))
        .collect();
    Some(format!(
        "[{}] unsupported roofs: {} [{}], unknown wall types: {:?}, unknown roof types: {:?}",
        label,
        diagnostics.unsupported_roofs.len(),
        gaps.join(" "),
        diagnostics.unknown_wall_types,
        diagnostics.unknown_roof_types
    ))
}
