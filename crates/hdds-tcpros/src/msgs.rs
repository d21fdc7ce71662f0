// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bundled message and service types.

use crate::message::{CodecError, RosMessage, RosService, WireReader, WireWriter};

/// `std_msgs/String`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringMsg {
    pub data: String,
}

impl StringMsg {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl RosMessage for StringMsg {
    const TYPE_NAME: &'static str = "std_msgs/String";
    const DEFINITION: &'static str = "string data\n";

    fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    fn encode(&self, out: &mut WireWriter) {
        out.put_string(&self.data);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            data: reader.read_string()?,
        })
    }
}

/// `rospy_tutorials/AddTwoInts` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddTwoIntsRequest {
    pub a: i64,
    pub b: i64,
}

impl RosMessage for AddTwoIntsRequest {
    const TYPE_NAME: &'static str = "rospy_tutorials/AddTwoIntsRequest";
    const DEFINITION: &'static str = "int64 a\nint64 b\n";

    fn encoded_len(&self) -> usize {
        16
    }

    fn encode(&self, out: &mut WireWriter) {
        out.put_i64(self.a);
        out.put_i64(self.b);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            a: reader.read_i64()?,
            b: reader.read_i64()?,
        })
    }
}

/// `rospy_tutorials/AddTwoInts` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddTwoIntsResponse {
    pub sum: i64,
}

impl RosMessage for AddTwoIntsResponse {
    const TYPE_NAME: &'static str = "rospy_tutorials/AddTwoIntsResponse";
    const DEFINITION: &'static str = "int64 sum\n";

    fn encoded_len(&self) -> usize {
        8
    }

    fn encode(&self, out: &mut WireWriter) {
        out.put_i64(self.sum);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sum: reader.read_i64()?,
        })
    }
}

/// `rospy_tutorials/AddTwoInts`.
pub struct AddTwoInts;

impl RosService for AddTwoInts {
    const TYPE_NAME: &'static str = "rospy_tutorials/AddTwoInts";
    type Request = AddTwoIntsRequest;
    type Response = AddTwoIntsResponse;
}
