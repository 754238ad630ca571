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

//! The CBC parameter block. `good_lp` is the backend abstraction (variables, constraints,
//! objective, solve, value extraction); this module only owns how the open solver is configured
//! for the per-tick solves.

use std::time::Duration;

use good_lp::solvers::coin_cbc::CoinCbcProblem;

use crate::config::MipConfig;

/// Solver limits for one rolling-horizon solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CbcSettings {
    /// Wall-clock budget for the solve.
    pub time_limit: Duration,
    /// Relative MIP gap at which the solver may stop.
    pub gap_rel: f64,
}

impl CbcSettings {
    /// Take the limits from the optimizer configuration.
    pub fn from_config(config: &MipConfig) -> Self {
        Self {
            time_limit: Duration::from_secs(config.time_limit_seconds),
            gap_rel: config.gap_rel,
        }
    }

    /// Apply the limits to a CBC problem.
    pub fn apply(&self, problem: &mut CoinCbcProblem) {
        problem.set_parameter("seconds", &self.time_limit.as_secs().to_string());
        problem.set_parameter("ratioGap", &self.gap_rel.to_string());

        // more than 8 cbc threads hits diminishing returns quickly
        problem.set_parameter("threads", &num_cpus::get().min(8).to_string());

        // disable logging during tests
        #[cfg(any(test, feature = "hide-cbc-output"))]
        problem.set_parameter("logLevel", "0");
    }
}
