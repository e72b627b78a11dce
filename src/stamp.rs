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

//! Origination stamp carried end-to-end on every data packet.

use core::str::FromStr;
use std::fmt;

use crate::codec::Decoder;
use crate::codec::Encoder;
use crate::time::Timestamp;
use crate::Error;
use crate::Result;

/// Serialized size of a `PacketStamp`: 8-byte timestamp and 1-byte class.
pub const PACKET_STAMP_LEN: usize = 9;

/// The class of the flow a packet belongs to.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Hash)]
pub enum FlowClass {
    /// Flows driven by the rate-based sender whose acknowledgments are paced.
    Primary,

    /// Competing flows sharing the bottleneck.
    #[default]
    Other,
}

impl FlowClass {
    fn to_wire(self) -> u8 {
        match self {
            FlowClass::Primary => 1,
            FlowClass::Other => 0,
        }
    }

    fn from_wire(v: u8) -> Result<Self> {
        match v {
            1 => Ok(FlowClass::Primary),
            0 => Ok(FlowClass::Other),
            _ => Err(Error::InvalidPacket),
        }
    }
}

impl FromStr for FlowClass {
    type Err = Error;

    fn from_str(class: &str) -> Result<FlowClass> {
        if class.eq_ignore_ascii_case("primary") {
            Ok(FlowClass::Primary)
        } else if class.eq_ignore_ascii_case("other") {
            Ok(FlowClass::Other)
        } else {
            Err(Error::InvalidConfig(format!("unknown flow class {}", class)))
        }
    }
}

impl fmt::Display for FlowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowClass::Primary => write!(f, "primary"),
            FlowClass::Other => write!(f, "other"),
        }
    }
}

/// Immutable tag attached once to a packet at origination.
///
/// The receiver reads it back to attribute the delivered bytes to a flow
/// class and to measure one-way latency.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Hash)]
pub struct PacketStamp {
    send_time: Timestamp,
    flow_class: FlowClass,
}

impl PacketStamp {
    pub fn new(send_time: Timestamp, flow_class: FlowClass) -> Self {
        Self {
            send_time,
            flow_class,
        }
    }

    /// Time the packet was originated.
    pub fn send_time(&self) -> Timestamp {
        self.send_time
    }

    /// Class of the originating flow.
    pub fn flow_class(&self) -> FlowClass {
        self.flow_class
    }

    /// Write the stamp into the packet metadata slot.
    pub fn encode(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.len() < PACKET_STAMP_LEN {
            return Err(Error::BufferTooShort);
        }
        let mut len = buf.write_u64(self.send_time.as_nanos())?;
        len += buf.write_u8(self.flow_class.to_wire())?;
        Ok(len)
    }

    /// Read a stamp back from the packet metadata slot.
    pub fn decode(mut buf: &[u8]) -> Result<PacketStamp> {
        let send_time = Timestamp::from_nanos(buf.read_u64()?);
        let flow_class = FlowClass::from_wire(buf.read_u8()?)?;
        Ok(PacketStamp {
            send_time,
            flow_class,
        })
    }

    /// Serialize the stamp into a standalone array.
    pub fn to_bytes(&self) -> [u8; PACKET_STAMP_LEN] {
        let mut out = [0; PACKET_STAMP_LEN];
        // The array is exactly one stamp long, so encoding cannot fail.
        let written = self.encode(&mut out[..]).unwrap_or(0);
        debug_assert_eq!(written, PACKET_STAMP_LEN);
        out
    }
}

impl fmt::Display for PacketStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send_time={} class={}", self.send_time, self.flow_class)
    }
}
