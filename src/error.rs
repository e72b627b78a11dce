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

//! Error type for rate sampling and pacing operations.

use strum_macros::EnumIter;

/// Errors reported by the pacing core.
///
/// Only configuration and wire-format problems are errors. Measurement
/// conditions such as an empty statistics window or an invalid rate sample
/// are reported through sentinel values instead.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// There is no more work to do.
    #[default]
    Done,

    /// The provided buffer is too short.
    BufferTooShort,

    /// The provided packet metadata cannot be parsed.
    InvalidPacket,

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The configuration is invalid.
    InvalidConfig(String),

    /// The calibration bounds of the rate-to-interval model are missing or
    /// malformed.
    InvalidCalibration(String),

    /// The rate-to-interval model cannot be loaded.
    InvalidModel(String),

    /// The flow is not a member of the cohort.
    UnknownFlow(u64),

    /// The flow is already a member of the cohort.
    DuplicateFlow(u64),

    /// I/O error.
    IoError(String),
}

impl Error {
    /// Return the error number, suitable as a process exit code.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Done => -1,
            Error::BufferTooShort => -2,
            Error::InvalidPacket => -3,
            Error::InvalidState(_) => -4,
            Error::InvalidConfig(_) => -5,
            Error::InvalidCalibration(_) => -6,
            Error::InvalidModel(_) => -7,
            Error::UnknownFlow(_) => -8,
            Error::DuplicateFlow(_) => -9,
            Error::IoError(_) => -10,
        }
    }

    /// Whether the error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::InvalidCalibration(_)
                | Error::InvalidModel(_)
                | Error::IoError(_)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidModel(format!("{}", err))
    }
}
