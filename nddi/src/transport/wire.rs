//! Request/reply encoding and the server-side dispatcher.
//!
//! A request is one command record in the canonical framing of
//! [`Command::write_record`]; a reply is a fixed `{u32 status, u64 value}`
//! pair. Queries return their answer in `value`, every other command returns
//! zero. Any implementation that produces the same tags and payloads is
//! wire-conformant.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::command::Command;
use crate::error::{NddiError, Result};
use crate::interface::NddiDisplay;

pub const STATUS_OK: u32 = 0;
pub const STATUS_INVALID_ARGUMENT: u32 = 1;
pub const STATUS_OUT_OF_RANGE: u32 = 2;
pub const STATUS_NOT_INITIALISED: u32 = 3;
pub const STATUS_INTERNAL: u32 = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Reply {
    pub status: u32,
    pub value: u64,
}

impl Reply {
    #[must_use]
    pub const fn ok(value: u64) -> Self {
        Self {
            status: STATUS_OK,
            value,
        }
    }

    pub fn write(self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.status)?;
        w.write_u64::<LittleEndian>(self.value)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self> {
        Ok(Self {
            status: r.read_u32::<LittleEndian>()?,
            value: r.read_u64::<LittleEndian>()?,
        })
    }

    /// Converts a non-OK status back into the error the server raised.
    pub fn into_result(self, command: &'static str) -> Result<u64> {
        match self.status {
            STATUS_OK => Ok(self.value),
            STATUS_OUT_OF_RANGE => Err(NddiError::OutOfRange {
                start: vec![],
                end: vec![],
                size: vec![],
            }),
            STATUS_NOT_INITIALISED => Err(NddiError::NotInitialised),
            status => Err(NddiError::InvalidArgument(format!(
                "server rejected {command} with status {status}"
            ))),
        }
    }
}

fn status_of(error: &NddiError) -> u32 {
    match error {
        NddiError::InvalidArgument(_) | NddiError::InvalidSignMode(_) => STATUS_INVALID_ARGUMENT,
        NddiError::OutOfRange { .. } => STATUS_OUT_OF_RANGE,
        NddiError::NotInitialised => STATUS_NOT_INITIALISED,
        _ => STATUS_INTERNAL,
    }
}

/// Executes one encoded request against `display` and returns the encoded
/// reply. Malformed requests are reported as errors rather than replies so a
/// server can drop the connection.
pub fn dispatch(request: &[u8], display: &mut dyn NddiDisplay) -> Result<Vec<u8>> {
    let mut cursor = request;
    let command = Command::read_record(&mut cursor)?
        .ok_or(NddiError::ProtocolViolation(crate::command::TAG_EOT))?;

    let outcome = match &command {
        Command::DisplayWidth => display.display_width().map(u64::from),
        Command::DisplayHeight => display.display_height().map(u64::from),
        Command::NumCoefficientPlanes => display.num_coefficient_planes().map(u64::from),
        Command::GetFullScaler => display.get_full_scaler().map(u64::from),
        other => other.apply(display).map(|()| 0),
    };

    let reply = match outcome {
        Ok(value) => Reply::ok(value),
        Err(error) => {
            tracing::warn!(command = command.name(), %error, "command rejected");
            Reply {
                status: status_of(&error),
                value: 0,
            }
        }
    };
    let mut buf = Vec::with_capacity(12);
    reply.write(&mut buf)?;
    Ok(buf)
}
