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

use core::str::FromStr;
use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::pacing::RateToIntervalModel;
use crate::Error;
use crate::Result;

/// On-disk layout of a lookup table model.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableFile {
    points: Vec<[f64; 2]>,
}

/// Piecewise-linear model over calibrated `(input, output)` points.
///
/// Inputs between two points are interpolated linearly. Inputs outside the
/// table are clamped to the first or last output.
#[derive(Debug, Clone, PartialEq)]
pub struct TableModel {
    points: Vec<(f64, f64)>,
}

impl TableModel {
    /// Build a model from points sorted by strictly increasing input.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::InvalidModel(format!(
                "table needs at least 2 points, got {}",
                points.len()
            )));
        }
        let non_finite = points
            .iter()
            .find(|(x, y)| !x.is_finite() || !y.is_finite());
        if let Some(&(x, y)) = non_finite {
            return Err(Error::InvalidModel(format!(
                "non-finite point ({}, {})",
                x, y
            )));
        }
        if let Some(w) = points.windows(2).find(|w| w[0].0 >= w[1].0) {
            return Err(Error::InvalidModel(format!(
                "points not sorted at input {}",
                w[1].0
            )));
        }

        Ok(Self { points })
    }

    /// Load a model from a JSON file of the form `{"points": [[x, y], ...]}`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let model = content.parse::<TableModel>()?;
        debug!(
            "table model loaded from {}: {} points",
            path.as_ref().display(),
            model.points.len()
        );
        Ok(model)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl FromStr for TableModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<TableModel> {
        let file: TableFile = serde_json::from_str(s)?;
        TableModel::new(file.points.into_iter().map(|[x, y]| (x, y)).collect())
    }
}

impl RateToIntervalModel for TableModel {
    fn name(&self) -> &str {
        "table"
    }

    fn evaluate(&self, normalized_rate: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return f64::NAN,
        };
        if normalized_rate.is_nan() {
            return f64::NAN;
        }
        if normalized_rate <= first.0 {
            return first.1;
        }
        if normalized_rate >= last.0 {
            return last.1;
        }

        // First point strictly above the input; both neighbours exist here.
        let i = self.points.partition_point(|&(x, _)| x <= normalized_rate);
        let (x0, y0) = self.points[i - 1];
        let (x1, y1) = self.points[i];
        y0 + (y1 - y0) * (normalized_rate - x0) / (x1 - x0)
    }
}
