//! Terrain-file parsing.
//!
//! The terrain file itself is produced by an external generator, but the
//! three line markers it must contain are part of this crate's external
//! interface, so the parser lives here. Line-oriented, whitespace-delimited;
//! unrecognised lines are ignored, so comments and blank lines around the
//! three markers are tolerated.

use std::fs;
use std::path::Path;

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub struct TerrainNode {
    pub id: u32,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct TerrainGateway {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct Terrain {
    /// Square terrain side, in meters, derived as `sqrt(terrain_m2)`.
    pub side_m: f64,
    pub nodes: Vec<TerrainNode>,
    pub gateways: Vec<TerrainGateway>,
}

pub fn load(path: &str) -> SimResult<Terrain> {
    let content = fs::read_to_string(Path::new(path)).map_err(|source| SimError::TerrainIo { path: path.to_string(), source })?;
    parse(&content)
}

pub fn parse(content: &str) -> SimResult<Terrain> {
    let mut side_m = None;
    let mut nodes = Vec::new();
    let mut gateways = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("# stats: terrain=") {
            side_m = Some(parse_terrain_area(rest)?);
        } else if let Some(rest) = line.strip_prefix("# node coords:") {
            nodes = parse_node_coords(rest)?;
        } else if let Some(rest) = line.strip_prefix("# gateway coords:") {
            gateways = parse_gateway_coords(rest)?;
        }
    }

    let side_m = side_m.unwrap_or_else(|| {
        log::warn!("terrain file has no '# stats: terrain=' marker; defaulting side to 1000 m");
        1000.0
    });

    if nodes.is_empty() {
        return Err(SimError::NoNodes);
    }
    if gateways.is_empty() {
        return Err(SimError::NoGateways);
    }

    Ok(Terrain { side_m, nodes, gateways })
}

/// Parses `<float>m^2 ...` (remainder of the stats line is ignored) and
/// returns the square side, `sqrt(terrain_m2)`.
fn parse_terrain_area(rest: &str) -> SimResult<f64> {
    let token = rest.split_whitespace().next().ok_or_else(|| SimError::TerrainParse("empty terrain stats line".to_string()))?;
    let number = token.trim_end_matches("m^2");
    let area: f64 = number.parse().map_err(|_| SimError::TerrainParse(format!("bad terrain area {token:?}")))?;
    Ok(area.sqrt())
}

/// Parses `<id> [<x> <y>] <id> [<x> <y>] ...` into a list of nodes.
fn parse_node_coords(rest: &str) -> SimResult<Vec<TerrainNode>> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut nodes = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let id: u32 = tokens[i].parse().map_err(|_| SimError::TerrainParse(format!("bad node id {:?}", tokens[i])))?;
        let (x, y, consumed) = parse_bracketed_pair(&tokens, i + 1)?;
        nodes.push(TerrainNode { id, x, y });
        i += 1 + consumed;
    }
    Ok(nodes)
}

/// Parses `<label> [<x> <y>] <label> [<x> <y>] ...` into a list of gateways.
fn parse_gateway_coords(rest: &str) -> SimResult<Vec<TerrainGateway>> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut gateways = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let label = tokens[i].to_string();
        let (x, y, consumed) = parse_bracketed_pair(&tokens, i + 1)?;
        gateways.push(TerrainGateway { label, x, y });
        i += 1 + consumed;
    }
    Ok(gateways)
}

/// Parses a `[x y]` pair starting at `tokens[start]`, tolerating the
/// brackets being glued to the numbers (`[12.3` / `45.6]`) or standalone.
/// Returns `(x, y, tokens_consumed)`.
fn parse_bracketed_pair(tokens: &[&str], start: usize) -> SimResult<(f64, f64, usize)> {
    if start + 1 >= tokens.len() {
        return Err(SimError::TerrainParse("truncated coordinate pair".to_string()));
    }
    let x_tok = tokens[start].trim_start_matches('[');
    let y_tok = tokens[start + 1].trim_end_matches(']');
    let x: f64 = x_tok.parse().map_err(|_| SimError::TerrainParse(format!("bad x coordinate {:?}", tokens[start])))?;
    let y: f64 = y_tok.parse().map_err(|_| SimError::TerrainParse(format!("bad y coordinate {:?}", tokens[start + 1])))?;
    Ok((x, y, 2))
}
