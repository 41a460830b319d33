//! Safety nodes near the accepted position.
//!
//! Nodes come from a static JSON list. Selection uses a cheap planar box in
//! degrees; the survivors are ordered by great-circle distance.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fix::{distance_m, PositionFix};

/// Planar radius (degrees) for "nearby" selection.
pub const NEARBY_RADIUS_DEG: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Perceived safety index.
    #[serde(default)]
    pub psi: Option<f64>,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyNode {
    #[serde(flatten)]
    pub node: SafetyNode,
    pub distance_m: f64,
}

/// Nodes within `radius_deg` of `fix` (euclidean in degrees), nearest first.
pub fn nearby(nodes: &[SafetyNode], fix: &PositionFix, radius_deg: f64) -> Vec<NearbyNode> {
    let (lat, lon) = fix.coordinates();
    let mut out: Vec<NearbyNode> = nodes
        .iter()
        .filter(|n| n.coordinates.lat.is_finite() && n.coordinates.lng.is_finite())
        .filter(|n| {
            let dlat = n.coordinates.lat - lat;
            let dlng = n.coordinates.lng - lon;
            (dlat * dlat + dlng * dlng).sqrt() < radius_deg
        })
        .map(|n| NearbyNode {
            distance_m: distance_m((lat, lon), (n.coordinates.lat, n.coordinates.lng)),
            node: n.clone(),
        })
        .collect();

    out.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    out
}

/// Load the node list from a JSON array file.
pub fn load_nodes(path: &Path) -> Result<Vec<SafetyNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading safety nodes from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing safety nodes {}", path.display()))
}
