// efleet: resilient simulation of electric bus fleets under disruptions
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! The persistent distance matrix over the feasible edges.
//!
//! Distances are great-circle kilometers, computed once and cached in a JSON file keyed
//! `"from|to"`. A load is only accepted if every requested edge is present; any miss or parse
//! failure triggers a full recomputation and rewrite, so the matrix handed to the optimizer is
//! always complete.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::model::haversine_km;

use super::graph::Node;

/// File name of the cache inside the configured cache directory.
pub const CACHE_FILE_NAME: &str = "distance_matrix_cache.json";

/// Distance in kilometers per directed feasible edge.
pub type DistanceMatrix = BTreeMap<(String, String), f64>;

/// Location of the cache file.
fn cache_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(CACHE_FILE_NAME)
}

/// The distance matrix for the given edges: loaded from the cache when complete, recomputed and
/// rewritten otherwise.
pub fn distance_matrix(
    nodes: &BTreeMap<String, Node>,
    edges: &BTreeSet<(String, String)>,
    cache_dir: &Path,
) -> DistanceMatrix {
    load_cached_distances(edges, cache_dir)
        .unwrap_or_else(|| compute_and_cache_distances(nodes, edges, cache_dir))
}

/// Try to load the cache. Returns `None` when the file is missing, unparsable, or lacks any of
/// the requested edges.
pub fn load_cached_distances(
    edges: &BTreeSet<(String, String)>,
    cache_dir: &Path,
) -> Option<DistanceMatrix> {
    let path = cache_path(cache_dir);
    let raw = fs::read_to_string(&path).ok()?;
    let data: BTreeMap<String, f64> = match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to parse distance cache {}: {e}", path.display());
            return None;
        }
    };

    let missing = edges
        .iter()
        .filter(|(from, to)| !data.contains_key(&format!("{from}|{to}")))
        .count();
    if missing > 0 {
        info!("Distance cache outdated: {missing} edges missing, recomputing");
        return None;
    }

    let matrix: DistanceMatrix = data
        .into_iter()
        .filter_map(|(key, km)| {
            let (from, to) = key.split_once('|')?;
            Some(((from.to_string(), to.to_string()), km))
        })
        .collect();
    info!(
        "Loaded distance matrix from cache ({} entries)",
        matrix.len()
    );
    Some(matrix)
}

/// Compute the distance of every edge and rewrite the cache file. Unknown endpoints yield a zero
/// distance; a failing write is logged and otherwise ignored (the in-memory matrix is complete
/// either way).
pub fn compute_and_cache_distances(
    nodes: &BTreeMap<String, Node>,
    edges: &BTreeSet<(String, String)>,
    cache_dir: &Path,
) -> DistanceMatrix {
    info!("Precomputing {} edge distances", edges.len());
    let mut matrix = DistanceMatrix::new();
    for (from, to) in edges {
        let km = if from == to {
            0.0
        } else {
            match (nodes.get(from), nodes.get(to)) {
                (Some(a), Some(b)) => haversine_km(a.location(), b.location()),
                _ => {
                    warn!("Distance failed {from}->{to}: unknown endpoint");
                    0.0
                }
            }
        };
        matrix.insert((from.clone(), to.clone()), km);
    }

    let serializable: BTreeMap<String, f64> = matrix
        .iter()
        .map(|((from, to), km)| (format!("{from}|{to}"), *km))
        .collect();
    let path = cache_path(cache_dir);
    match serde_json::to_string(&serializable) {
        Ok(json) => match fs::write(&path, json) {
            Ok(()) => info!("Distance matrix cached to {}", path.display()),
            Err(e) => warn!("Cannot write distance cache {}: {e}", path.display()),
        },
        Err(e) => warn!("Cannot serialize distance cache: {e}"),
    }
    matrix
}
