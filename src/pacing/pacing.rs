// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fairness-aware acknowledgment pacing for flows sharing a bottleneck.
//!
//! A `PacingController` periodically compares the throughput of every member
//! of a `Cohort` against a target fair share. Members over the headroom bound
//! get their acknowledgments spaced by an interval derived from a
//! `RateToIntervalModel`, the others run unpaced.

use core::str::FromStr;
use std::fmt;
use std::path::PathBuf;

use crate::Error;
use crate::Result;
pub use cohort::Cohort;
pub use cohort::FlowMember;
pub use cohort::PacingHandler;
pub use cohort::PacingState;
pub use controller::PacingController;
pub use controller::PacingControllerState;
pub use linear::LinearModel;
pub use scale::AffineRange;
pub use scale::ScaleParams;
pub use table::TableModel;

/// Mapping from a normalized target rate to a normalized pacing rate.
///
/// Implementations only ever see values inside the calibrated domain; the
/// controller takes care of the scaling on both sides.
pub trait RateToIntervalModel {
    /// Name of the model.
    fn name(&self) -> &str;

    /// Evaluate the model at the given normalized target rate.
    fn evaluate(&self, normalized_rate: f64) -> f64;
}

impl fmt::Debug for dyn RateToIntervalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate model {}", self.name())
    }
}

/// Available rate-to-interval models.
#[derive(Debug, Clone, PartialEq)]
pub enum RateModelKind {
    /// Closed-form `slope * x + intercept`.
    Linear { slope: f64, intercept: f64 },

    /// Piecewise-linear lookup table loaded from a JSON file.
    Table(PathBuf),
}

impl Default for RateModelKind {
    fn default() -> Self {
        RateModelKind::Linear {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl FromStr for RateModelKind {
    type Err = Error;

    /// Accepts `linear`, `linear:<slope>,<intercept>` or `table:<path>`.
    fn from_str(model: &str) -> Result<RateModelKind> {
        let (name, arg) = match model.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (model.trim(), None),
        };

        if name.eq_ignore_ascii_case("linear") {
            let arg = match arg {
                Some(arg) => arg,
                None => return Ok(RateModelKind::default()),
            };
            let (slope, intercept) = arg
                .split_once(',')
                .and_then(|(s, i)| Some((s.trim().parse().ok()?, i.trim().parse().ok()?)))
                .ok_or_else(|| Error::InvalidConfig(format!("bad linear model {}", arg)))?;
            Ok(RateModelKind::Linear { slope, intercept })
        } else if name.eq_ignore_ascii_case("table") {
            match arg {
                Some(path) if !path.is_empty() => Ok(RateModelKind::Table(PathBuf::from(path))),
                _ => Err(Error::InvalidConfig("table model needs a path".into())),
            }
        } else {
            Err(Error::InvalidConfig(format!("unknown rate model {}", name)))
        }
    }
}

/// Build a rate-to-interval model.
pub fn build_rate_model(kind: &RateModelKind) -> Result<Box<dyn RateToIntervalModel>> {
    match kind {
        RateModelKind::Linear { slope, intercept } => {
            Ok(Box::new(LinearModel::new(*slope, *intercept)?))
        }
        RateModelKind::Table(path) => Ok(Box::new(TableModel::from_file(path)?)),
    }
}


mod cohort;
mod controller;
mod linear;
mod scale;
mod table;
