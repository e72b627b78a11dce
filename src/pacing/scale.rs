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
use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;

use crate::Error;
use crate::Result;

/// Number of bounds in a calibration file.
const CALIBRATION_FIELDS: usize = 4;

/// A calibrated range mapped affinely onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineRange {
    lo: f64,
    hi: f64,
}

impl AffineRange {
    fn new(lo: f64, hi: f64) -> Result<Self> {
        if !lo.is_finite() || !hi.is_finite() {
            return Err(Error::InvalidCalibration(format!(
                "non-finite bound in [{}, {}]",
                lo, hi
            )));
        }
        if lo == hi {
            return Err(Error::InvalidCalibration(format!(
                "degenerate range [{}, {}]",
                lo, hi
            )));
        }
        Ok(Self { lo, hi })
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// Map `x` from `[lo, hi]` onto `[0, 1]`.
    pub fn normalize(&self, x: f64) -> f64 {
        (x - self.lo) / (self.hi - self.lo)
    }

    /// Map `y` from `[0, 1]` back onto `[lo, hi]`.
    pub fn denormalize(&self, y: f64) -> f64 {
        y * (self.hi - self.lo) + self.lo
    }
}

/// Normalization bounds of a rate-to-interval model.
///
/// The model is trained on a normalized input and output. `scale` maps a raw
/// target rate in bits per second into the model input domain, and `unscale`
/// maps the model output back into acknowledgments per microsecond.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParams {
    input: AffineRange,
    output: AffineRange,
}

impl ScaleParams {
    pub fn new(f_min: f64, f_max: f64, o_min: f64, o_max: f64) -> Result<Self> {
        Ok(Self {
            input: AffineRange::new(f_min, f_max)?,
            output: AffineRange::new(o_min, o_max)?,
        })
    }

    /// Load the bounds from a calibration file holding `f_min,f_max,o_min,o_max`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let params = content.parse::<ScaleParams>()?;
        debug!(
            "calibration loaded from {}: {}",
            path.as_ref().display(),
            params
        );
        Ok(params)
    }

    /// Normalize a raw target rate into the model input domain.
    pub fn scale(&self, rate: f64) -> f64 {
        self.input.normalize(rate)
    }

    /// De-normalize a model output into the calibrated output domain.
    pub fn unscale(&self, output: f64) -> f64 {
        self.output.denormalize(output)
    }

    /// Bounds of the model input.
    pub fn input(&self) -> &AffineRange {
        &self.input
    }

    /// Bounds of the model output.
    pub fn output(&self) -> &AffineRange {
        &self.output
    }
}

impl FromStr for ScaleParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<ScaleParams> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        if fields.len() != CALIBRATION_FIELDS {
            return Err(Error::InvalidCalibration(format!(
                "expect {} comma-separated bounds, got {}",
                CALIBRATION_FIELDS,
                fields.len()
            )));
        }

        let mut bounds = [0.0; CALIBRATION_FIELDS];
        for (bound, field) in bounds.iter_mut().zip(fields) {
            *bound = field.parse::<f64>().map_err(|_| {
                Error::InvalidCalibration(format!("malformed bound {:?}", field))
            })?;
        }

        ScaleParams::new(bounds[0], bounds[1], bounds[2], bounds[3])
    }
}

impl fmt::Display for ScaleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "f=[{}, {}] o=[{}, {}]",
            self.input.lo, self.input.hi, self.output.lo, self.output.hi
        )
    }
}
