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

//! The flood hazard map: a georeferenced depth raster with simple time-varying dynamics.
//!
//! The raster is a single-band ESRI ASCII grid holding water depth in centimeters. On top of the
//! static base depth, a precipitation and a recession rate (cm/h) move the effective depth up or
//! down over simulated time. Any load failure disables the map: every query then reports zero
//! depth, and the rest of the simulation proceeds without flood hazards.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::{info, warn};
use thiserror::Error;

use crate::config::FloodConfig;

/// Error raised while loading the depth raster.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The raster file could not be read.
    #[error("Cannot read the raster file: {0}")]
    Io(#[from] std::io::Error),
    /// The raster header is malformed.
    #[error("Malformed raster header: {0}")]
    Header(String),
    /// The raster body is malformed.
    #[error("Malformed raster body: {0}")]
    Body(String),
}

/// A single-band georeferenced grid in ESRI ASCII format (`ncols`/`nrows`/`xllcorner`/
/// `yllcorner`/`cellsize`/`NODATA_value` header followed by row-major values, north row first).
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiGrid {
    /// Number of columns.
    ncols: usize,
    /// Number of rows.
    nrows: usize,
    /// Longitude of the lower-left corner.
    xllcorner: f64,
    /// Latitude of the lower-left corner.
    yllcorner: f64,
    /// Cell edge length in degrees.
    cellsize: f64,
    /// Sentinel marking cells without data.
    nodata: f64,
    /// Cell values, row-major with the northernmost row first. Negative values (other than the
    /// nodata sentinel) are clamped to zero at load time.
    values: Vec<f64>,
}

impl AsciiGrid {
    /// Load a grid from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RasterError> {
        Self::parse(BufReader::new(File::open(path)?))
    }

    /// Parse a grid from a reader.
    pub fn parse(reader: impl BufRead) -> Result<Self, RasterError> {
        let mut ncols = None;
        let mut nrows = None;
        let mut xllcorner = None;
        let mut yllcorner = None;
        let mut cellsize = None;
        let mut nodata = -9999.0;
        let mut values = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            if first.chars().next().is_some_and(char::is_alphabetic) {
                let value = tokens
                    .next()
                    .ok_or_else(|| RasterError::Header(format!("missing value for {first}")))?;
                let parse = |v: &str| {
                    v.parse::<f64>()
                        .map_err(|_| RasterError::Header(format!("{first}: invalid number {v}")))
                };
                match first.to_ascii_lowercase().as_str() {
                    "ncols" => ncols = Some(parse(value)? as usize),
                    "nrows" => nrows = Some(parse(value)? as usize),
                    "xllcorner" => xllcorner = Some(parse(value)?),
                    "yllcorner" => yllcorner = Some(parse(value)?),
                    "cellsize" => cellsize = Some(parse(value)?),
                    "nodata_value" => nodata = parse(value)?,
                    other => return Err(RasterError::Header(format!("unknown key {other}"))),
                }
            } else {
                for token in std::iter::once(first).chain(tokens) {
                    let v = token.parse::<f64>().map_err(|_| {
                        RasterError::Body(format!("invalid cell value {token}"))
                    })?;
                    values.push(if v == nodata { v } else { v.max(0.0) });
                }
            }
        }

        let header = |field: &str| RasterError::Header(format!("missing key {field}"));
        let grid = Self {
            ncols: ncols.ok_or_else(|| header("ncols"))?,
            nrows: nrows.ok_or_else(|| header("nrows"))?,
            xllcorner: xllcorner.ok_or_else(|| header("xllcorner"))?,
            yllcorner: yllcorner.ok_or_else(|| header("yllcorner"))?,
            cellsize: cellsize.ok_or_else(|| header("cellsize"))?,
            nodata,
            values,
        };
        if grid.cellsize <= 0.0 {
            return Err(RasterError::Header("cellsize must be positive".to_string()));
        }
        if grid.values.len() != grid.ncols * grid.nrows {
            return Err(RasterError::Body(format!(
                "expected {} cells, found {}",
                grid.ncols * grid.nrows,
                grid.values.len()
            )));
        }
        Ok(grid)
    }

    /// The base value at `(lon, lat)`. `None` if the position falls outside the grid or onto a
    /// nodata or NaN cell.
    pub fn sample(&self, lon: f64, lat: f64) -> Option<f64> {
        let col = ((lon - self.xllcorner) / self.cellsize).floor();
        let top = self.yllcorner + self.nrows as f64 * self.cellsize;
        let row = ((top - lat) / self.cellsize).floor();
        if col < 0.0 || row < 0.0 || col >= self.ncols as f64 || row >= self.nrows as f64 {
            return None;
        }
        let v = self.values[row as usize * self.ncols + col as usize];
        (v != self.nodata && !v.is_nan()).then_some(v)
    }
}

/// The flood hazard map with its depth dynamics.
#[derive(Debug)]
pub struct FloodHazardMap {
    /// Flood settings (rates, threshold, category switches).
    config: FloodConfig,
    /// The loaded raster; `None` when the map is disabled.
    grid: Option<AsciiGrid>,
    /// Simulation time of the first depth query, the anchor of the depth dynamics.
    t0: Option<f64>,
}

impl FloodHazardMap {
    /// Load the map described by `config`. A missing or unreadable raster disables the map: a
    /// warning is logged and every later query reports zero depth.
    pub fn new(config: &FloodConfig) -> Self {
        let grid = match (config.enabled, &config.raster_file) {
            (false, _) => None,
            (true, None) => {
                info!("No flood raster configured, flood hazards disabled");
                None
            }
            (true, Some(path)) => match AsciiGrid::from_file(path) {
                Ok(grid) => {
                    info!("Loaded flood raster from {}", path.display());
                    Some(grid)
                }
                Err(e) => {
                    warn!(
                        "Cannot load flood raster {}: {e}; flood hazards disabled",
                        path.display()
                    );
                    None
                }
            },
        };
        Self {
            config: config.clone(),
            grid,
            t0: None,
        }
    }

    /// Whether a raster is loaded and depth queries can report non-zero values.
    pub fn is_loaded(&self) -> bool {
        self.grid.is_some()
    }

    /// Effective water depth in meters at `(lon, lat)` at simulation time `now`.
    ///
    /// The first call anchors the dynamics: from then on the base depth read from the raster is
    /// shifted by `(precipitation - recession) * elapsed_hours` centimeters, floored at zero.
    pub fn effective_depth_m(&mut self, lon: f64, lat: f64, now: f64) -> f64 {
        let Some(grid) = &self.grid else {
            return 0.0;
        };
        let t0 = *self.t0.get_or_insert(now);
        let Some(base_cm) = grid.sample(lon, lat) else {
            return 0.0;
        };
        let hours = ((now - t0) / 3600.0).max(0.0);
        let rate = self.config.precipitation_cm_per_hr - self.config.recession_cm_per_hr;
        (base_cm + rate * hours).max(0.0) / 100.0
    }
}
