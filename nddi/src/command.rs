//! The typed command surface and its binary framing.
//!
//! Every interaction with a display is one [`Command`]: an immutable record
//! carrying only its parameters. The same canonical little-endian encoding is
//! used for the recorder's log records and for transport request payloads; a
//! stream is a sequence of `{u32 tag, payload}` records terminated by the
//! [`TAG_EOT`] sentinel.
//!
//! Pixels and scalers travel as packed words (one `u32`/`u64` per value), so
//! payload cost stays proportional to the data, never to a per-channel
//! serialisation.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{NddiError, Result};
use crate::interface::{DisplayConfig, NddiDisplay, SubRegion};
use crate::pixel::{Pixel, Scaler, SignMode};

/// End-of-transmission sentinel tag closing every stream.
pub const TAG_EOT: u32 = 0;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Command {
    Initialize(DisplayConfig),
    DisplayWidth,
    DisplayHeight,
    NumCoefficientPlanes,
    PutPixel {
        pixel: Pixel,
        location: Vec<u32>,
    },
    CopyPixelStrip {
        pixels: Vec<Pixel>,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    CopyPixels {
        pixels: Vec<Pixel>,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    CopyPixelTiles {
        tiles: Vec<Vec<Pixel>>,
        starts: Vec<Vec<u32>>,
        size: [u32; 2],
    },
    FillPixel {
        pixel: Pixel,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    CopyFrameVolume {
        start: Vec<u32>,
        end: Vec<u32>,
        dest: Vec<u32>,
    },
    UpdateInputVector {
        values: Vec<i32>,
    },
    PutCoefficientMatrix {
        matrix: Vec<i32>,
        location: Vec<u32>,
    },
    FillCoefficientMatrix {
        matrix: Vec<i32>,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    FillCoefficient {
        coefficient: i32,
        row: u32,
        col: u32,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    FillCoefficientTiles {
        coefficients: Vec<i32>,
        positions: Vec<[u32; 2]>,
        starts: Vec<Vec<u32>>,
        size: [u32; 2],
    },
    FillScaler {
        scaler: Scaler,
        start: Vec<u32>,
        end: Vec<u32>,
    },
    FillScalerTiles {
        scalers: Vec<Scaler>,
        starts: Vec<Vec<u32>>,
        size: [u32; 2],
    },
    FillScalerTileStack {
        scalers: Vec<Scaler>,
        start: Vec<u32>,
        size: [u32; 2],
    },
    SetPixelByteSignMode(SignMode),
    SetFullScaler(u16),
    GetFullScaler,
    Latch(SubRegion),
    Shutdown,
}

impl Command {
    #[must_use]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::Initialize(_) => 1,
            Self::DisplayWidth => 2,
            Self::DisplayHeight => 3,
            Self::NumCoefficientPlanes => 4,
            Self::PutPixel { .. } => 5,
            Self::CopyPixelStrip { .. } => 6,
            Self::CopyPixels { .. } => 7,
            Self::CopyPixelTiles { .. } => 8,
            Self::FillPixel { .. } => 9,
            Self::CopyFrameVolume { .. } => 10,
            Self::UpdateInputVector { .. } => 11,
            Self::PutCoefficientMatrix { .. } => 12,
            Self::FillCoefficientMatrix { .. } => 13,
            Self::FillCoefficient { .. } => 14,
            Self::FillCoefficientTiles { .. } => 15,
            Self::FillScaler { .. } => 16,
            Self::FillScalerTiles { .. } => 17,
            Self::FillScalerTileStack { .. } => 18,
            Self::SetPixelByteSignMode(_) => 19,
            Self::SetFullScaler(_) => 20,
            Self::GetFullScaler => 21,
            Self::Latch(_) => 22,
            Self::Shutdown => 23,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "Initialize",
            Self::DisplayWidth => "DisplayWidth",
            Self::DisplayHeight => "DisplayHeight",
            Self::NumCoefficientPlanes => "NumCoefficientPlanes",
            Self::PutPixel { .. } => "PutPixel",
            Self::CopyPixelStrip { .. } => "CopyPixelStrip",
            Self::CopyPixels { .. } => "CopyPixels",
            Self::CopyPixelTiles { .. } => "CopyPixelTiles",
            Self::FillPixel { .. } => "FillPixel",
            Self::CopyFrameVolume { .. } => "CopyFrameVolume",
            Self::UpdateInputVector { .. } => "UpdateInputVector",
            Self::PutCoefficientMatrix { .. } => "PutCoefficientMatrix",
            Self::FillCoefficientMatrix { .. } => "FillCoefficientMatrix",
            Self::FillCoefficient { .. } => "FillCoefficient",
            Self::FillCoefficientTiles { .. } => "FillCoefficientTiles",
            Self::FillScaler { .. } => "FillScaler",
            Self::FillScalerTiles { .. } => "FillScalerTiles",
            Self::FillScalerTileStack { .. } => "FillScalerTileStack",
            Self::SetPixelByteSignMode(_) => "SetPixelByteSignMode",
            Self::SetFullScaler(_) => "SetFullScaler",
            Self::GetFullScaler => "GetFullScaler",
            Self::Latch(_) => "Latch",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Executes this command against a display, discarding query replies.
    pub fn apply(&self, display: &mut dyn NddiDisplay) -> Result<()> {
        match self {
            Self::Initialize(config) => display.initialize(config),
            Self::DisplayWidth => display.display_width().map(|_| ()),
            Self::DisplayHeight => display.display_height().map(|_| ()),
            Self::NumCoefficientPlanes => display.num_coefficient_planes().map(|_| ()),
            Self::PutPixel { pixel, location } => display.put_pixel(*pixel, location),
            Self::CopyPixelStrip { pixels, start, end } => {
                display.copy_pixel_strip(pixels, start, end)
            }
            Self::CopyPixels { pixels, start, end } => display.copy_pixels(pixels, start, end),
            Self::CopyPixelTiles {
                tiles,
                starts,
                size,
            } => display.copy_pixel_tiles(tiles, starts, *size),
            Self::FillPixel { pixel, start, end } => display.fill_pixel(*pixel, start, end),
            Self::CopyFrameVolume { start, end, dest } => {
                display.copy_frame_volume(start, end, dest)
            }
            Self::UpdateInputVector { values } => display.update_input_vector(values),
            Self::PutCoefficientMatrix { matrix, location } => {
                display.put_coefficient_matrix(matrix, location)
            }
            Self::FillCoefficientMatrix { matrix, start, end } => {
                display.fill_coefficient_matrix(matrix, start, end)
            }
            Self::FillCoefficient {
                coefficient,
                row,
                col,
                start,
                end,
            } => display.fill_coefficient(*coefficient, *row, *col, start, end),
            Self::FillCoefficientTiles {
                coefficients,
                positions,
                starts,
                size,
            } => display.fill_coefficient_tiles(coefficients, positions, starts, *size),
            Self::FillScaler { scaler, start, end } => display.fill_scaler(*scaler, start, end),
            Self::FillScalerTiles {
                scalers,
                starts,
                size,
            } => display.fill_scaler_tiles(scalers, starts, *size),
            Self::FillScalerTileStack {
                scalers,
                start,
                size,
            } => display.fill_scaler_tile_stack(scalers, start, *size),
            Self::SetPixelByteSignMode(mode) => display.set_pixel_byte_sign_mode(*mode),
            Self::SetFullScaler(value) => display.set_full_scaler(*value),
            Self::GetFullScaler => display.get_full_scaler().map(|_| ()),
            Self::Latch(sub) => display.latch(*sub),
            Self::Shutdown => display.shutdown(),
        }
    }

    /// Writes the `{tag, payload}` record for this command.
    pub fn write_record(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.tag())?;
        match self {
            Self::Initialize(config) => {
                write_u32s(w, &config.frame_volume_dimensions)?;
                w.write_u32::<LittleEndian>(config.display_width)?;
                w.write_u32::<LittleEndian>(config.display_height)?;
                w.write_u32::<LittleEndian>(config.num_coefficient_planes)?;
                w.write_u32::<LittleEndian>(config.input_vector_size)?;
                w.write_u8(config.fixed_8x8_macroblocks.into())?;
                w.write_u8(config.single_coefficient_plane.into())?;
            }
            Self::DisplayWidth
            | Self::DisplayHeight
            | Self::NumCoefficientPlanes
            | Self::GetFullScaler
            | Self::Shutdown => {}
            Self::PutPixel { pixel, location } => {
                w.write_u32::<LittleEndian>(pixel.0)?;
                write_u32s(w, location)?;
            }
            Self::CopyPixelStrip { pixels, start, end }
            | Self::CopyPixels { pixels, start, end } => {
                write_pixels(w, pixels)?;
                write_u32s(w, start)?;
                write_u32s(w, end)?;
            }
            Self::CopyPixelTiles {
                tiles,
                starts,
                size,
            } => {
                w.write_u32::<LittleEndian>(tiles.len() as u32)?;
                for tile in tiles {
                    write_pixels(w, tile)?;
                }
                write_coords(w, starts)?;
                write_size(w, *size)?;
            }
            Self::FillPixel { pixel, start, end } => {
                w.write_u32::<LittleEndian>(pixel.0)?;
                write_u32s(w, start)?;
                write_u32s(w, end)?;
            }
            Self::CopyFrameVolume { start, end, dest } => {
                write_u32s(w, start)?;
                write_u32s(w, end)?;
                write_u32s(w, dest)?;
            }
            Self::UpdateInputVector { values } => write_i32s(w, values)?,
            Self::PutCoefficientMatrix { matrix, location } => {
                write_i32s(w, matrix)?;
                write_u32s(w, location)?;
            }
            Self::FillCoefficientMatrix { matrix, start, end } => {
                write_i32s(w, matrix)?;
                write_u32s(w, start)?;
                write_u32s(w, end)?;
            }
            Self::FillCoefficient {
                coefficient,
                row,
                col,
                start,
                end,
            } => {
                w.write_i32::<LittleEndian>(*coefficient)?;
                w.write_u32::<LittleEndian>(*row)?;
                w.write_u32::<LittleEndian>(*col)?;
                write_u32s(w, start)?;
                write_u32s(w, end)?;
            }
            Self::FillCoefficientTiles {
                coefficients,
                positions,
                starts,
                size,
            } => {
                write_i32s(w, coefficients)?;
                w.write_u32::<LittleEndian>(positions.len() as u32)?;
                for &[row, col] in positions {
                    w.write_u32::<LittleEndian>(row)?;
                    w.write_u32::<LittleEndian>(col)?;
                }
                write_coords(w, starts)?;
                write_size(w, *size)?;
            }
            Self::FillScaler { scaler, start, end } => {
                w.write_u64::<LittleEndian>(scaler.0)?;
                write_u32s(w, start)?;
                write_u32s(w, end)?;
            }
            Self::FillScalerTiles {
                scalers,
                starts,
                size,
            } => {
                write_scalers(w, scalers)?;
                write_coords(w, starts)?;
                write_size(w, *size)?;
            }
            Self::FillScalerTileStack {
                scalers,
                start,
                size,
            } => {
                write_scalers(w, scalers)?;
                write_u32s(w, start)?;
                write_size(w, *size)?;
            }
            Self::SetPixelByteSignMode(mode) => w.write_u32::<LittleEndian>(mode.as_u32())?,
            Self::SetFullScaler(value) => w.write_u16::<LittleEndian>(*value)?,
            Self::Latch(sub) => {
                w.write_u32::<LittleEndian>(sub.x)?;
                w.write_u32::<LittleEndian>(sub.y)?;
                w.write_u32::<LittleEndian>(sub.w)?;
                w.write_u32::<LittleEndian>(sub.h)?;
            }
        }
        Ok(())
    }

    /// Writes the stream terminator.
    pub fn write_eot(w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(TAG_EOT)?;
        Ok(())
    }

    /// Reads the next record, returning `None` on the EOT sentinel. Unknown
    /// tags fail with `ProtocolViolation`.
    pub fn read_record(r: &mut impl Read) -> Result<Option<Self>> {
        let tag = r.read_u32::<LittleEndian>()?;
        let command = match tag {
            TAG_EOT => return Ok(None),
            1 => {
                let frame_volume_dimensions = read_u32s(r)?;
                let display_width = r.read_u32::<LittleEndian>()?;
                let display_height = r.read_u32::<LittleEndian>()?;
                let num_coefficient_planes = r.read_u32::<LittleEndian>()?;
                let input_vector_size = r.read_u32::<LittleEndian>()?;
                let fixed_8x8_macroblocks = r.read_u8()? != 0;
                let single_coefficient_plane = r.read_u8()? != 0;
                Self::Initialize(DisplayConfig {
                    frame_volume_dimensions,
                    display_width,
                    display_height,
                    num_coefficient_planes,
                    input_vector_size,
                    fixed_8x8_macroblocks,
                    single_coefficient_plane,
                })
            }
            2 => Self::DisplayWidth,
            3 => Self::DisplayHeight,
            4 => Self::NumCoefficientPlanes,
            5 => Self::PutPixel {
                pixel: Pixel(r.read_u32::<LittleEndian>()?),
                location: read_u32s(r)?,
            },
            6 => Self::CopyPixelStrip {
                pixels: read_pixels(r)?,
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            7 => Self::CopyPixels {
                pixels: read_pixels(r)?,
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            8 => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                let mut tiles = Vec::with_capacity(count);
                for _ in 0..count {
                    tiles.push(read_pixels(r)?);
                }
                Self::CopyPixelTiles {
                    tiles,
                    starts: read_coords(r)?,
                    size: read_size(r)?,
                }
            }
            9 => Self::FillPixel {
                pixel: Pixel(r.read_u32::<LittleEndian>()?),
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            10 => Self::CopyFrameVolume {
                start: read_u32s(r)?,
                end: read_u32s(r)?,
                dest: read_u32s(r)?,
            },
            11 => Self::UpdateInputVector {
                values: read_i32s(r)?,
            },
            12 => Self::PutCoefficientMatrix {
                matrix: read_i32s(r)?,
                location: read_u32s(r)?,
            },
            13 => Self::FillCoefficientMatrix {
                matrix: read_i32s(r)?,
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            14 => Self::FillCoefficient {
                coefficient: r.read_i32::<LittleEndian>()?,
                row: r.read_u32::<LittleEndian>()?,
                col: r.read_u32::<LittleEndian>()?,
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            15 => {
                let coefficients = read_i32s(r)?;
                let count = r.read_u32::<LittleEndian>()? as usize;
                let mut positions = Vec::with_capacity(count);
                for _ in 0..count {
                    let row = r.read_u32::<LittleEndian>()?;
                    let col = r.read_u32::<LittleEndian>()?;
                    positions.push([row, col]);
                }
                Self::FillCoefficientTiles {
                    coefficients,
                    positions,
                    starts: read_coords(r)?,
                    size: read_size(r)?,
                }
            }
            16 => Self::FillScaler {
                scaler: Scaler(r.read_u64::<LittleEndian>()?),
                start: read_u32s(r)?,
                end: read_u32s(r)?,
            },
            17 => Self::FillScalerTiles {
                scalers: read_scalers(r)?,
                starts: read_coords(r)?,
                size: read_size(r)?,
            },
            18 => Self::FillScalerTileStack {
                scalers: read_scalers(r)?,
                start: read_u32s(r)?,
                size: read_size(r)?,
            },
            19 => Self::SetPixelByteSignMode(SignMode::from_u32(r.read_u32::<LittleEndian>()?)?),
            20 => Self::SetFullScaler(r.read_u16::<LittleEndian>()?),
            21 => Self::GetFullScaler,
            22 => Self::Latch(SubRegion::new(
                r.read_u32::<LittleEndian>()?,
                r.read_u32::<LittleEndian>()?,
                r.read_u32::<LittleEndian>()?,
                r.read_u32::<LittleEndian>()?,
            )),
            23 => Self::Shutdown,
            unknown => return Err(NddiError::ProtocolViolation(unknown)),
        };
        Ok(Some(command))
    }
}

fn write_u32s(w: &mut impl Write, values: &[u32]) -> Result<()> {
    w.write_u32::<LittleEndian>(values.len() as u32)?;
    for &v in values {
        w.write_u32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_u32s(r: &mut impl Read) -> Result<Vec<u32>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(r.read_u32::<LittleEndian>()?);
    }
    Ok(values)
}

fn write_i32s(w: &mut impl Write, values: &[i32]) -> Result<()> {
    w.write_u32::<LittleEndian>(values.len() as u32)?;
    for &v in values {
        w.write_i32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_i32s(r: &mut impl Read) -> Result<Vec<i32>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(r.read_i32::<LittleEndian>()?);
    }
    Ok(values)
}

fn write_pixels(w: &mut impl Write, pixels: &[Pixel]) -> Result<()> {
    w.write_u32::<LittleEndian>(pixels.len() as u32)?;
    for p in pixels {
        w.write_u32::<LittleEndian>(p.0)?;
    }
    Ok(())
}

fn read_pixels(r: &mut impl Read) -> Result<Vec<Pixel>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut pixels = Vec::with_capacity(len);
    for _ in 0..len {
        pixels.push(Pixel(r.read_u32::<LittleEndian>()?));
    }
    Ok(pixels)
}

fn write_scalers(w: &mut impl Write, scalers: &[Scaler]) -> Result<()> {
    w.write_u32::<LittleEndian>(scalers.len() as u32)?;
    for s in scalers {
        w.write_u64::<LittleEndian>(s.0)?;
    }
    Ok(())
}

fn read_scalers(r: &mut impl Read) -> Result<Vec<Scaler>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut scalers = Vec::with_capacity(len);
    for _ in 0..len {
        scalers.push(Scaler(r.read_u64::<LittleEndian>()?));
    }
    Ok(scalers)
}

fn write_coords(w: &mut impl Write, coords: &[Vec<u32>]) -> Result<()> {
    w.write_u32::<LittleEndian>(coords.len() as u32)?;
    for c in coords {
        write_u32s(w, c)?;
    }
    Ok(())
}

fn read_coords(r: &mut impl Read) -> Result<Vec<Vec<u32>>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut coords = Vec::with_capacity(len);
    for _ in 0..len {
        coords.push(read_u32s(r)?);
    }
    Ok(coords)
}

fn write_size(w: &mut impl Write, size: [u32; 2]) -> Result<()> {
    w.write_u32::<LittleEndian>(size[0])?;
    w.write_u32::<LittleEndian>(size[1])?;
    Ok(())
}

fn read_size(r: &mut impl Read) -> Result<[u32; 2]> {
    Ok([r.read_u32::<LittleEndian>()?, r.read_u32::<LittleEndian>()?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(command: &Command) -> Command {
        let mut buf = Vec::new();
        command.write_record(&mut buf).unwrap();
        Command::read_record(&mut buf.as_slice())
            .unwrap()
            .expect("record, not EOT")
    }

    #[test]
    fn every_tag_is_unique_and_stable() {
        let commands = [
            Command::Initialize(DisplayConfig::new(vec![8, 8, 2], 16, 16, 1, 3)),
            Command::DisplayWidth,
            Command::DisplayHeight,
            Command::NumCoefficientPlanes,
            Command::PutPixel {
                pixel: Pixel::splat(1),
                location: vec![0, 0, 0],
            },
            Command::CopyPixelStrip {
                pixels: vec![],
                start: vec![],
                end: vec![],
            },
            Command::CopyPixels {
                pixels: vec![],
                start: vec![],
                end: vec![],
            },
            Command::CopyPixelTiles {
                tiles: vec![],
                starts: vec![],
                size: [8, 8],
            },
            Command::FillPixel {
                pixel: Pixel::splat(1),
                start: vec![],
                end: vec![],
            },
            Command::CopyFrameVolume {
                start: vec![],
                end: vec![],
                dest: vec![],
            },
            Command::UpdateInputVector { values: vec![] },
            Command::PutCoefficientMatrix {
                matrix: vec![],
                location: vec![],
            },
            Command::FillCoefficientMatrix {
                matrix: vec![],
                start: vec![],
                end: vec![],
            },
            Command::FillCoefficient {
                coefficient: 0,
                row: 0,
                col: 0,
                start: vec![],
                end: vec![],
            },
            Command::FillCoefficientTiles {
                coefficients: vec![],
                positions: vec![],
                starts: vec![],
                size: [8, 8],
            },
            Command::FillScaler {
                scaler: Scaler::default(),
                start: vec![],
                end: vec![],
            },
            Command::FillScalerTiles {
                scalers: vec![],
                starts: vec![],
                size: [8, 8],
            },
            Command::FillScalerTileStack {
                scalers: vec![],
                start: vec![],
                size: [8, 8],
            },
            Command::SetPixelByteSignMode(SignMode::Signed),
            Command::SetFullScaler(256),
            Command::GetFullScaler,
            Command::Latch(SubRegion::new(0, 0, 1, 1)),
            Command::Shutdown,
        ];
        let mut tags: Vec<u32> = commands.iter().map(Command::tag).collect();
        assert_eq!(tags, (1..=23).collect::<Vec<u32>>());
        tags.dedup();
        assert_eq!(tags.len(), 23);
    }

    #[test]
    fn records_roundtrip() {
        let commands = [
            Command::Initialize(DisplayConfig {
                frame_volume_dimensions: vec![8, 8, 193],
                display_width: 64,
                display_height: 48,
                num_coefficient_planes: 64,
                input_vector_size: 3,
                fixed_8x8_macroblocks: true,
                single_coefficient_plane: false,
            }),
            Command::PutPixel {
                pixel: Pixel::from_rgba(1, 2, 3, 4),
                location: vec![7, 6, 5],
            },
            Command::CopyPixelTiles {
                tiles: vec![vec![Pixel::splat(9); 4], vec![Pixel::splat(3); 4]],
                starts: vec![vec![0, 0, 0], vec![0, 0, 1]],
                size: [2, 2],
            },
            Command::FillCoefficientTiles {
                coefficients: vec![3, -1],
                positions: vec![[2, 2], [0, 1]],
                starts: vec![vec![0, 0, 0], vec![8, 0, 0]],
                size: [8, 8],
            },
            Command::FillScalerTileStack {
                scalers: vec![Scaler::from_rgb(-5, 10, 1024)],
                start: vec![8, 16, 0],
                size: [8, 8],
            },
            Command::SetPixelByteSignMode(SignMode::Signed),
            Command::Latch(SubRegion::new(1, 2, 3, 4)),
            Command::Shutdown,
        ];
        for command in &commands {
            assert_eq!(&roundtrip(command), command);
        }
    }

    #[test]
    fn random_scaler_payloads_roundtrip() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..32 {
            let scalers: Vec<Scaler> = (0..rng.random_range(1..=64))
                .map(|_| Scaler(rng.random()))
                .collect();
            let command = Command::FillScalerTileStack {
                scalers,
                start: vec![rng.random_range(0..512), rng.random_range(0..512), 0],
                size: [8, 8],
            };
            assert_eq!(roundtrip(&command), command);
        }
    }

    #[test]
    fn eot_terminates_a_stream() {
        let mut buf = Vec::new();
        Command::Shutdown.write_record(&mut buf).unwrap();
        Command::write_eot(&mut buf).unwrap();
        let mut r = buf.as_slice();
        assert_eq!(Command::read_record(&mut r).unwrap(), Some(Command::Shutdown));
        assert_eq!(Command::read_record(&mut r).unwrap(), None);
    }

    #[test]
    fn unknown_tag_is_a_protocol_violation() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(99).unwrap();
        assert!(matches!(
            Command::read_record(&mut buf.as_slice()),
            Err(NddiError::ProtocolViolation(99))
        ));
    }
}
