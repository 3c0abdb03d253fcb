//! The n-dimensional display interface (nDDI).
//!
//! An nDDI display is an abstract device built from three memories: an input
//! vector, a stack of coefficient planes and a frame volume. Their product
//! defines every output pixel, and a client drives the device purely through
//! the command surface in [`interface::NddiDisplay`]. This crate provides the
//! command types with their binary framing, an in-process software model, a
//! command recorder/player pair, and the request/response transport client.

pub mod command;
pub mod display;
pub mod error;
pub mod interface;
pub mod pixel;
pub mod recorder;
pub mod region;
pub mod transport;

pub use command::Command;
pub use display::SimNddiDisplay;
pub use error::{NddiError, Result};
pub use interface::{DisplayConfig, NddiDisplay, SubRegion};
pub use pixel::{Pixel, Scaler, SignMode};
pub use region::Region;
