//! Morton (Z-order) encoder: bijection (point, global bounds) → 64-bit
//! code, plus bbox → code-range coverage (`spec.md` §4.2), grounded in
//! `original_source/include/index/spatial_index.h::MortonEncoder`.

use crate::geo::geometry::MBR;

fn normalize_coord(coord: f64, min_val: f64, max_val: f64) -> u32 {
    if max_val <= min_val {
        return 0;
    }
    let t = ((coord - min_val) / (max_val - min_val)).clamp(0.0, 1.0);
    (t * u32::MAX as f64) as u32
}

fn denormalize_coord(norm: u32, min_val: f64, max_val: f64) -> f64 {
    let t = norm as f64 / u32::MAX as f64;
    min_val + t * (max_val - min_val)
}

fn interleave_bits_2d(x: u32, y: u32) -> u64 {
    fn spread(v: u32) -> u64 {
        let mut x = v as u64;
        x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
        x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
        x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
        x = (x | (x << 2)) & 0x3333_3333_3333_3333;
        x = (x | (x << 1)) & 0x5555_5555_5555_5555;
        x
    }
    spread(x) | (spread(y) << 1)
}

fn unspread_bits(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

fn interleave_bits_3d(x: u32, y: u32, z: u32) -> u64 {
    fn spread21(v: u32) -> u64 {
        let mut x = (v & 0x1F_FFFF) as u64;
        x = (x | (x << 32)) & 0x001F_0000_0000_FFFF;
        x = (x | (x << 16)) & 0x001F_0000_FF00_00FF;
        x = (x | (x << 8)) & 0x100F_00F0_0F00_F00F;
        x = (x | (x << 4)) & 0x10C3_0C30_C30C_30C3;
        x = (x | (x << 2)) & 0x1249_2492_4924_9249;
        x
    }
    spread21(x) | (spread21(y) << 1) | (spread21(z) << 2)
}

pub fn encode2d(x: f64, y: f64, bounds: &MBR) -> u64 {
    let nx = normalize_coord(x, bounds.minx, bounds.maxx);
    let ny = normalize_coord(y, bounds.miny, bounds.maxy);
    interleave_bits_2d(nx, ny)
}

pub fn encode3d(x: f64, y: f64, z: f64, bounds: &MBR) -> u64 {
    let nx = normalize_coord(x, bounds.minx, bounds.maxx) >> 11; // top 21 bits
    let ny = normalize_coord(y, bounds.miny, bounds.maxy) >> 11;
    let (zmin, zmax) = (bounds.z_min.unwrap_or(0.0), bounds.z_max.unwrap_or(1.0));
    let nz = normalize_coord(z, zmin, zmax) >> 11;
    interleave_bits_3d(nx, ny, nz)
}

pub fn decode2d(code: u64, bounds: &MBR) -> (f64, f64) {
    let nx = unspread_bits(code);
    let ny = unspread_bits(code >> 1);
    (
        denormalize_coord(nx, bounds.minx, bounds.maxx),
        denormalize_coord(ny, bounds.miny, bounds.maxy),
    )
}

/// Superset-covering 1-D Morton ranges for a query MBR: the union of the
/// returned intervals contains every Morton code of any point inside
/// `query_bbox` (false positives allowed, false negatives forbidden,
/// per `spec.md` §4.2). A single coarse range is always a valid (if
/// imprecise) answer; this implementation recursively quad-splits the
/// bounds until ranges are tight or `max_ranges` is exhausted.
pub fn ranges(query_bbox: &MBR, total_bounds: &MBR, max_ranges: usize) -> Vec<(u64, u64)> {
    let max_ranges = max_ranges.max(1);
    let mut result = Vec::new();
    let mut queue = vec![*total_bounds];
    while !queue.is_empty() && result.len() + queue.len() < max_ranges {
        let cell = queue.remove(0);
        if !cell.intersects(query_bbox) {
            continue;
        }
        if query_bbox.contains_mbr(&cell) || result.len() + queue.len() + 1 >= max_ranges {
            result.push(cell_range(&cell, total_bounds));
            continue;
        }
        for sub in quad_split(&cell) {
            queue.push(sub);
        }
    }
    for cell in queue {
        if cell.intersects(query_bbox) {
            result.push(cell_range(&cell, total_bounds));
        }
    }
    if result.is_empty() {
        result.push(cell_range(total_bounds, total_bounds));
    }
    merge_ranges(result)
}

fn quad_split(cell: &MBR) -> [MBR; 4] {
    let mx = (cell.minx + cell.maxx) / 2.0;
    let my = (cell.miny + cell.maxy) / 2.0;
    [
        MBR::new(cell.minx, cell.miny, mx, my),
        MBR::new(mx, cell.miny, cell.maxx, my),
        MBR::new(cell.minx, my, mx, cell.maxy),
        MBR::new(mx, my, cell.maxx, cell.maxy),
    ]
}

fn cell_range(cell: &MBR, total_bounds: &MBR) -> (u64, u64) {
    let lo = encode2d(cell.minx, cell.miny, total_bounds);
    let hi = encode2d(cell.maxx, cell.maxy, total_bounds);
    (lo.min(hi), lo.max(hi))
}

fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        if let Some(last) = merged.last_mut() {
            if lo <= last.1.saturating_add(1) {
                last.1 = last.1.max(hi);
                continue;
            }
        }
        merged.push((lo, hi));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_approximate_inverse_of_encode() {
        let bounds = MBR::new(0.0, 0.0, 100.0, 100.0);
        let code = encode2d(37.5, 62.25, &bounds);
        let (x, y) = decode2d(code, &bounds);
        assert!((x - 37.5).abs() < 0.01);
        assert!((y - 62.25).abs() < 0.01);
    }

    #[test]
    fn ranges_cover_every_point_in_query_bbox() {
        let total_bounds = MBR::new(0.0, 0.0, 1000.0, 1000.0);
        let query = MBR::new(100.0, 100.0, 200.0, 200.0);
        let rngs = ranges(&query, &total_bounds, 16);
        // sample a grid of points inside the query bbox; every Morton code
        // for those points must fall inside at least one returned range.
        let mut uncovered = 0;
        for i in 0..10 {
            for j in 0..10 {
                let x = 100.0 + i as f64 * 10.0;
                let y = 100.0 + j as f64 * 10.0;
                let code = encode2d(x, y, &total_bounds);
                if !rngs.iter().any(|(lo, hi)| code >= *lo && code <= *hi) {
                    uncovered += 1;
                }
            }
        }
        assert_eq!(uncovered, 0, "superset coverage must hold (false negatives forbidden)");
    }

    #[test]
    fn morton_monotonicity_is_probabilistic_locality() {
        // points nearer to each other should usually have Morton codes
        // closer together than points far apart (property 5, spec.md §8).
        let bounds = MBR::new(0.0, 0.0, 1000.0, 1000.0);
        let mut rng_state: u64 = 42;
        let mut next = || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            (rng_state % 1000) as f64
        };
        let mut hits = 0;
        let trials = 2000;
        for _ in 0..trials {
            let (p1x, p1y) = (next(), next());
            let (p2x, p2y) = (p1x + 5.0, p1y + 5.0);
            let (p3x, p3y) = (next(), next());
            let d12 = ((p1x - p2x).powi(2) + (p1y - p2y).powi(2)).sqrt();
            let d13 = ((p1x - p3x).powi(2) + (p1y - p3y).powi(2)).sqrt();
            if d12 > d13 {
                continue;
            }
            let c1 = encode2d(p1x, p1y, &bounds);
            let c2 = encode2d(p2x, p2y, &bounds);
            let c3 = encode2d(p3x, p3y, &bounds);
            let m12 = c1.abs_diff(c2);
            let m13 = c1.abs_diff(c3);
            if m12 <= m13 {
                hits += 1;
            }
        }
        assert!(hits as f64 / trials as f64 >= 0.6);
    }
}
