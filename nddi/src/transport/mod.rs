//! The transport client: every display command becomes one synchronous
//! request/response exchange.
//!
//! [`RemoteDisplay`] maps each [`NddiDisplay`] method onto a request carried
//! by a [`Channel`]. Because every call waits for its reply, command ordering
//! on the server matches emission order exactly, and a `Latch` cannot
//! overtake the writes of the frame it presents.
//!
//! Two channels are provided: [`TcpChannel`], a length-prefixed framing over
//! a TCP stream to a wall server, and [`LoopbackChannel`], which dispatches
//! requests straight into an in-process display model. The loopback path
//! exercises the full encode/dispatch/decode cycle and backs the headless
//! driver mode.

pub mod wire;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::command::Command;
use crate::display::SimNddiDisplay;
use crate::error::Result;
use crate::interface::{DisplayConfig, NddiDisplay, SubRegion};
use crate::pixel::{Pixel, Scaler, SignMode};
use wire::Reply;

/// One blocking request/response exchange.
pub trait Channel: Send {
    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// Length-prefixed request/reply frames over a TCP stream.
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Channel for TcpChannel {
    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.stream
            .write_u32::<LittleEndian>(request.len() as u32)?;
        self.stream.write_all(request)?;
        self.stream.flush()?;

        let len = self.stream.read_u32::<LittleEndian>()? as usize;
        let mut reply = vec![0u8; len];
        self.stream.read_exact(&mut reply)?;
        Ok(reply)
    }
}

/// Serves one client connection: reads request frames, dispatches them to
/// the shared display and writes reply frames until the peer disconnects.
/// This is the receive loop a wall server runs per accepted connection.
pub fn serve_connection(
    mut stream: TcpStream,
    display: &Arc<Mutex<SimNddiDisplay>>,
) -> Result<()> {
    loop {
        let len = match stream.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            // A closed connection ends the session.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut request = vec![0u8; len];
        stream.read_exact(&mut request)?;

        let mut guard = display.lock().unwrap_or_else(PoisonError::into_inner);
        let reply = wire::dispatch(&request, &mut *guard)?;
        drop(guard);

        stream.write_u32::<LittleEndian>(reply.len() as u32)?;
        stream.write_all(&reply)?;
        stream.flush()?;
    }
}

/// Dispatches requests into an in-process display model.
pub struct LoopbackChannel {
    display: Arc<Mutex<SimNddiDisplay>>,
}

impl LoopbackChannel {
    #[must_use]
    pub fn new(display: Arc<Mutex<SimNddiDisplay>>) -> Self {
        Self { display }
    }
}

impl Channel for LoopbackChannel {
    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.display.lock().unwrap_or_else(PoisonError::into_inner);
        wire::dispatch(request, &mut *guard)
    }
}

/// An `NddiDisplay` whose commands travel over a [`Channel`].
pub struct RemoteDisplay {
    channel: Box<dyn Channel>,
}

impl RemoteDisplay {
    #[must_use]
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self { channel }
    }

    fn call(&mut self, command: &Command) -> Result<u64> {
        let mut request = Vec::new();
        command.write_record(&mut request)?;
        let reply = self.channel.call(&request)?;
        Reply::read(&mut reply.as_slice())?.into_result(command.name())
    }
}

impl NddiDisplay for RemoteDisplay {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()> {
        self.call(&Command::Initialize(config.clone())).map(|_| ())
    }

    fn display_width(&mut self) -> Result<u32> {
        self.call(&Command::DisplayWidth).map(|v| v as u32)
    }

    fn display_height(&mut self) -> Result<u32> {
        self.call(&Command::DisplayHeight).map(|v| v as u32)
    }

    fn num_coefficient_planes(&mut self) -> Result<u32> {
        self.call(&Command::NumCoefficientPlanes).map(|v| v as u32)
    }

    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        self.call(&Command::PutPixel {
            pixel,
            location: location.to_vec(),
        })
        .map(|_| ())
    }

    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        self.call(&Command::CopyPixelStrip {
            pixels: pixels.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        self.call(&Command::CopyPixels {
            pixels: pixels.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.call(&Command::CopyPixelTiles {
            tiles: tiles.to_vec(),
            starts: starts.to_vec(),
            size,
        })
        .map(|_| ())
    }

    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()> {
        self.call(&Command::FillPixel {
            pixel,
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()> {
        self.call(&Command::CopyFrameVolume {
            start: start.to_vec(),
            end: end.to_vec(),
            dest: dest.to_vec(),
        })
        .map(|_| ())
    }

    fn update_input_vector(&mut self, values: &[i32]) -> Result<()> {
        self.call(&Command::UpdateInputVector {
            values: values.to_vec(),
        })
        .map(|_| ())
    }

    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()> {
        self.call(&Command::PutCoefficientMatrix {
            matrix: matrix.to_vec(),
            location: location.to_vec(),
        })
        .map(|_| ())
    }

    fn fill_coefficient_matrix(
        &mut self,
        matrix: &[i32],
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        self.call(&Command::FillCoefficientMatrix {
            matrix: matrix.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        self.call(&Command::FillCoefficient {
            coefficient,
            row,
            col,
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.call(&Command::FillCoefficientTiles {
            coefficients: coefficients.to_vec(),
            positions: positions.to_vec(),
            starts: starts.to_vec(),
            size,
        })
        .map(|_| ())
    }

    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()> {
        self.call(&Command::FillScaler {
            scaler,
            start: start.to_vec(),
            end: end.to_vec(),
        })
        .map(|_| ())
    }

    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.call(&Command::FillScalerTiles {
            scalers: scalers.to_vec(),
            starts: starts.to_vec(),
            size,
        })
        .map(|_| ())
    }

    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()> {
        self.call(&Command::FillScalerTileStack {
            scalers: scalers.to_vec(),
            start: start.to_vec(),
            size,
        })
        .map(|_| ())
    }

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()> {
        self.call(&Command::SetPixelByteSignMode(mode)).map(|_| ())
    }

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()> {
        self.call(&Command::SetFullScaler(scaler)).map(|_| ())
    }

    fn get_full_scaler(&mut self) -> Result<u16> {
        self.call(&Command::GetFullScaler).map(|v| v as u16)
    }

    fn latch(&mut self, sub: SubRegion) -> Result<()> {
        self.call(&Command::Latch(sub)).map(|_| ())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.call(&Command::Shutdown).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::TcpListener;
    use std::thread;

    fn config() -> DisplayConfig {
        DisplayConfig::new(vec![4, 4, 1], 4, 4, 1, 3)
    }

    #[test]
    fn loopback_round_trip_reaches_the_model() {
        let shared = Arc::new(Mutex::new(SimNddiDisplay::new()));
        let mut remote =
            RemoteDisplay::new(Box::new(LoopbackChannel::new(Arc::clone(&shared))));

        remote.initialize(&config()).unwrap();
        assert_eq!(remote.display_width().unwrap(), 4);
        remote.put_pixel(Pixel::from_rgb(9, 8, 7), &[1, 2, 0]).unwrap();
        assert!(remote.put_pixel(Pixel::default(), &[9, 9, 9]).is_err());

        let model = shared.lock().unwrap();
        assert_eq!(
            model.frame_volume().unwrap().sample(&[1, 2, 0]),
            Some(Pixel::from_rgb(9, 8, 7))
        );
    }

    #[test]
    fn tcp_channel_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(SimNddiDisplay::new()));
        let server_display = Arc::clone(&shared);
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_connection(stream, &server_display).unwrap();
        });

        let mut remote =
            RemoteDisplay::new(Box::new(TcpChannel::connect(addr).unwrap()));
        remote.initialize(&config()).unwrap();
        remote
            .fill_pixel(Pixel::splat(5), &[0, 0, 0], &[3, 3, 0])
            .unwrap();
        remote.latch(SubRegion::full(4, 4)).unwrap();
        assert_eq!(remote.num_coefficient_planes().unwrap(), 1);
        drop(remote);
        server.join().unwrap();

        let model = shared.lock().unwrap();
        assert_eq!(
            model.frame_volume().unwrap().sample(&[3, 3, 0]),
            Some(Pixel::splat(5))
        );
    }
}
