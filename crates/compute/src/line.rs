use geo::{Coord, LineString};

/// Smallest budget a line can satisfy.
pub const MIN_LINE_BUDGET: usize = 2;

/// Halves a line by coordinate index until every piece has at most
/// `max_nodes` coordinates. Neighbouring pieces share their cut vertex.
///
/// Recursion depth is `log2(len)`.
pub fn subdivide_line(line: &LineString<f64>, max_nodes: usize) -> Vec<LineString<f64>> {
    let max_nodes = max_nodes.max(MIN_LINE_BUDGET);
    let mut out = Vec::new();
    split_range(&line.0, max_nodes, &mut out);
    out
}

fn split_range(coords: &[Coord<f64>], max_nodes: usize, out: &mut Vec<LineString<f64>>) {
    if coords.len() < 2 {
        return;
    }
    if coords.len() <= max_nodes {
        out.push(LineString(coords.to_vec()));
        return;
    }
    let mid = (coords.len() / 2).max(1);
    split_range(&coords[..=mid], max_nodes, out);
    split_range(&coords[mid..], max_nodes, out);
}
