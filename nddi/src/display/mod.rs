//! The in-process display model.
//!
//! [`SimNddiDisplay`] owns the three memories of the abstract display device
//! and executes the full command surface against them:
//!
//! - **Input Vector** - an ordered sequence of integers whose first two
//!   positions always evaluate to the pixel's x and y;
//! - **Coefficient Plane stack** - a width x height x planes grid of
//!   coefficient matrices and packed scalers;
//! - **Frame Volume** - an n-dimensional grid of pixels.
//!
//! # Reconstruction
//!
//! The output at screen pixel (x, y) is the sum over planes p of
//!
//! ```text
//! fv_coordinate = M[x,y,p] . input_vector     (one row per FV dimension)
//! sample        = frame_volume[fv_coordinate]
//! contribution  = sample_channel * scaler_channel
//! ```
//!
//! accumulated per channel in wide integers, divided once by the full-scaler
//! constant and clamped to the channel range of the current sign mode. The
//! sentinels `COEFFICIENT_MATRIX_X/Y/P` substitute the pixel's x, y or the
//! plane index into a matrix entry at evaluation time. Planes whose scaler is
//! packed zero are skipped outright.
//!
//! A `Latch` renders the named sub-rectangle into a presented front buffer;
//! this stands in for the display-wall compositor and is what the tests
//! observe.

mod coefficient_plane;
mod frame_volume;
mod input_vector;

pub use coefficient_plane::CoefficientPlanes;
pub use frame_volume::FrameVolume;
pub use input_vector::InputVector;

use crate::error::{NddiError, Result};
use crate::interface::{DisplayConfig, NddiDisplay, SubRegion};
use crate::pixel::{
    COEFFICIENT_MATRIX_P, COEFFICIENT_MATRIX_X, COEFFICIENT_MATRIX_Y, DEFAULT_FULL_SCALER, Pixel,
    Scaler, SignMode,
};
use crate::region::Region;

struct DisplayState {
    config: DisplayConfig,
    input_vector: InputVector,
    planes: CoefficientPlanes,
    frame_volume: FrameVolume,
    sign_mode: SignMode,
    full_scaler: u16,
    front_buffer: Vec<Pixel>,
}

/// Software display device. Starts empty; `initialize` allocates the
/// memories and every other command fails with `NotInitialised` before that.
#[derive(Default)]
pub struct SimNddiDisplay {
    state: Option<DisplayState>,
    shut_down: bool,
}

impl SimNddiDisplay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&DisplayState> {
        self.state.as_ref().ok_or(NddiError::NotInitialised)
    }

    fn state_mut(&mut self) -> Result<&mut DisplayState> {
        self.state.as_mut().ok_or(NddiError::NotInitialised)
    }

    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.state.is_some()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn config(&self) -> Result<&DisplayConfig> {
        Ok(&self.state()?.config)
    }

    pub fn frame_volume(&self) -> Result<&FrameVolume> {
        Ok(&self.state()?.frame_volume)
    }

    pub fn coefficient_planes(&self) -> Result<&CoefficientPlanes> {
        Ok(&self.state()?.planes)
    }

    /// The frame as of the most recent `latch`, row-major.
    pub fn presented(&self) -> Result<&[Pixel]> {
        Ok(&self.state()?.front_buffer)
    }

    /// Evaluates the reconstruction equation at one screen pixel against the
    /// current state of the memories.
    pub fn compute_pixel(&self, x: u32, y: u32) -> Result<Pixel> {
        let state = self.state()?;
        Ok(state.compute_pixel(x, y))
    }

    /// Renders the whole current frame without latching it.
    pub fn render(&self) -> Result<Vec<Pixel>> {
        let state = self.state()?;
        let (w, h) = (state.config.display_width, state.config.display_height);
        let mut out = Vec::with_capacity(w as usize * h as usize);
        for y in 0..h {
            for x in 0..w {
                out.push(state.compute_pixel(x, y));
            }
        }
        Ok(out)
    }
}

impl DisplayState {
    fn compute_pixel(&self, x: u32, y: u32) -> Pixel {
        let [_, _, plane_count] = self.planes.dims();
        let rows = self.config.frame_volume_dimensionality();
        let cols = self.input_vector.len();
        let mut acc = [0i64; 3];
        let mut coord = vec![0i64; rows];

        for p in 0..plane_count {
            let scaler = self.planes.scaler_at(x, y, p);
            if scaler.is_zero() {
                continue;
            }
            let matrix = self.planes.matrix_at(x, y, p);
            for (d, out) in coord.iter_mut().enumerate() {
                let mut sum = 0i64;
                for i in 0..cols {
                    let coefficient = match matrix[d * cols + i] {
                        COEFFICIENT_MATRIX_X => i64::from(x),
                        COEFFICIENT_MATRIX_Y => i64::from(y),
                        COEFFICIENT_MATRIX_P => i64::from(p),
                        literal => i64::from(literal),
                    };
                    sum += coefficient * self.input_vector.value(i, x, y);
                }
                *out = sum;
            }
            let Some(sample) = self.frame_volume.sample(&coord) else {
                continue;
            };
            for (ch, a) in acc.iter_mut().enumerate() {
                *a += self.sign_mode.widen(sample.channel(ch)) * i64::from(scaler.channel(ch));
            }
        }

        let full = i64::from(self.full_scaler.max(1));
        Pixel::from_rgb(
            self.sign_mode.clamp(acc[0] / full),
            self.sign_mode.clamp(acc[1] / full),
            self.sign_mode.clamp(acc[2] / full),
        )
    }
}

impl NddiDisplay for SimNddiDisplay {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()> {
        if self.state.is_some() {
            return Err(NddiError::InvalidArgument(
                "display is already initialised".into(),
            ));
        }
        if config.display_width == 0 || config.display_height == 0 {
            return Err(NddiError::InvalidArgument(format!(
                "display size {}x{} must be non-zero",
                config.display_width, config.display_height
            )));
        }
        if config.num_coefficient_planes == 0 {
            return Err(NddiError::InvalidArgument(
                "at least one coefficient plane is required".into(),
            ));
        }
        let frame_volume = FrameVolume::new(&config.frame_volume_dimensions)?;
        let input_vector = InputVector::new(config.input_vector_size)?;
        let planes = CoefficientPlanes::new(
            config.display_width,
            config.display_height,
            config.num_coefficient_planes,
            config.frame_volume_dimensionality(),
            config.input_vector_size as usize,
        )?;
        let pixels = config.display_width as usize * config.display_height as usize;
        self.state = Some(DisplayState {
            config: config.clone(),
            input_vector,
            planes,
            frame_volume,
            sign_mode: SignMode::Unsigned,
            full_scaler: DEFAULT_FULL_SCALER,
            front_buffer: vec![Pixel::default(); pixels],
        });
        tracing::info!(
            width = config.display_width,
            height = config.display_height,
            planes = config.num_coefficient_planes,
            fv_dims = ?config.frame_volume_dimensions,
            "display initialised"
        );
        Ok(())
    }

    fn display_width(&mut self) -> Result<u32> {
        Ok(self.state()?.config.display_width)
    }

    fn display_height(&mut self) -> Result<u32> {
        Ok(self.state()?.config.display_height)
    }

    fn num_coefficient_planes(&mut self) -> Result<u32> {
        Ok(self.state()?.config.num_coefficient_planes)
    }

    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        self.state_mut()?.frame_volume.put(pixel, location)
    }

    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        let axis = region.strip_axis()?;
        let len = (end[axis] - start[axis] + 1) as usize;
        if pixels.len() < len {
            return Err(NddiError::InvalidArgument(format!(
                "strip payload holds {} pixels, strip needs {len}",
                pixels.len()
            )));
        }
        state.frame_volume.copy(&pixels[..len], &region)
    }

    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.frame_volume.copy(pixels, &region)
    }

    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        let state = self.state_mut()?;
        if tiles.len() != starts.len() {
            return Err(NddiError::InvalidArgument(format!(
                "{} tiles but {} start coordinates",
                tiles.len(),
                starts.len()
            )));
        }
        for (tile, start) in tiles.iter().zip(starts) {
            let mut end = start.clone();
            if end.len() < 2 {
                return Err(NddiError::InvalidArgument(
                    "tile start must have at least two dimensions".into(),
                ));
            }
            end[0] += size[0] - 1;
            end[1] += size[1] - 1;
            let region = Region::new(start.clone(), end)?;
            state.frame_volume.copy(tile, &region)?;
        }
        Ok(())
    }

    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.frame_volume.fill(pixel, &region)
    }

    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.frame_volume.copy_within(&region, dest)
    }

    fn update_input_vector(&mut self, values: &[i32]) -> Result<()> {
        self.state_mut()?.input_vector.update(values)
    }

    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()> {
        self.state_mut()?.planes.put_matrix(matrix, location)
    }

    fn fill_coefficient_matrix(
        &mut self,
        matrix: &[i32],
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.planes.fill_matrix(matrix, &region)
    }

    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.planes.fill_coefficient(coefficient, row, col, &region)
    }

    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        let state = self.state_mut()?;
        if coefficients.len() != positions.len() || coefficients.len() != starts.len() {
            return Err(NddiError::InvalidArgument(format!(
                "{} coefficients, {} positions, {} starts",
                coefficients.len(),
                positions.len(),
                starts.len()
            )));
        }
        let [w, h, _] = state.planes.dims();
        for ((&coefficient, &[row, col]), start) in
            coefficients.iter().zip(positions).zip(starts)
        {
            if start.len() != 3 {
                return Err(NddiError::InvalidArgument(
                    "coefficient tile start must be (x, y, plane)".into(),
                ));
            }
            // Tiles on the right and bottom edges may hang off the display.
            let end = vec![
                (start[0] + size[0] - 1).min(w - 1),
                (start[1] + size[1] - 1).min(h - 1),
                start[2],
            ];
            let region = Region::new(start.clone(), end)?;
            state.planes.fill_coefficient(coefficient, row, col, &region)?;
        }
        Ok(())
    }

    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()> {
        let state = self.state_mut()?;
        let region = Region::new(start.to_vec(), end.to_vec())?;
        state.planes.fill_scaler(scaler, &region)
    }

    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        let state = self.state_mut()?;
        if scalers.len() != starts.len() {
            return Err(NddiError::InvalidArgument(format!(
                "{} scalers but {} start coordinates",
                scalers.len(),
                starts.len()
            )));
        }
        let [w, h, _] = state.planes.dims();
        for (&scaler, start) in scalers.iter().zip(starts) {
            if start.len() != 3 {
                return Err(NddiError::InvalidArgument(
                    "scaler tile start must be (x, y, plane)".into(),
                ));
            }
            let end = vec![
                (start[0] + size[0] - 1).min(w - 1),
                (start[1] + size[1] - 1).min(h - 1),
                start[2],
            ];
            let region = Region::new(start.clone(), end)?;
            state.planes.fill_scaler(scaler, &region)?;
        }
        Ok(())
    }

    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()> {
        let state = self.state_mut()?;
        if start.len() != 3 {
            return Err(NddiError::InvalidArgument(
                "scaler tile stack start must be (x, y, plane)".into(),
            ));
        }
        let [w, h, _] = state.planes.dims();
        for (i, &scaler) in scalers.iter().enumerate() {
            let plane = start[2] + i as u32;
            let end = vec![
                (start[0] + size[0] - 1).min(w - 1),
                (start[1] + size[1] - 1).min(h - 1),
                plane,
            ];
            let region = Region::new(vec![start[0], start[1], plane], end)?;
            state.planes.fill_scaler(scaler, &region)?;
        }
        Ok(())
    }

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()> {
        self.state_mut()?.sign_mode = mode;
        Ok(())
    }

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()> {
        if scaler == 0 {
            return Err(NddiError::InvalidArgument(
                "full scaler must be non-zero".into(),
            ));
        }
        self.state_mut()?.full_scaler = scaler;
        Ok(())
    }

    fn get_full_scaler(&mut self) -> Result<u16> {
        Ok(self.state()?.full_scaler)
    }

    fn latch(&mut self, sub: SubRegion) -> Result<()> {
        let state = self.state_mut()?;
        let (w, h) = (state.config.display_width, state.config.display_height);
        let within = |origin: u32, extent: u32, size: u32| {
            origin.checked_add(extent).is_some_and(|end| end <= size)
        };
        if sub.w == 0 || sub.h == 0 || !within(sub.x, sub.w, w) || !within(sub.y, sub.h, h) {
            return Err(NddiError::InvalidArgument(format!(
                "latch sub-rectangle ({}, {}) {}x{} outside the {w}x{h} display",
                sub.x, sub.y, sub.w, sub.h
            )));
        }
        for y in sub.y..sub.y + sub.h {
            for x in sub.x..sub.x + sub.w {
                let pixel = state.compute_pixel(x, y);
                state.front_buffer[(y * w + x) as usize] = pixel;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shut_down = true;
        tracing::info!("display shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// 4x4 display over a 4x4x2 frame volume with identity coefficients on
    /// plane 0 at full scale.
    fn identity_display() -> SimNddiDisplay {
        let mut display = SimNddiDisplay::new();
        display
            .initialize(&DisplayConfig::new(vec![4, 4, 2], 4, 4, 2, 3))
            .unwrap();
        display.update_input_vector(&[1]).unwrap();
        display
            .fill_coefficient_matrix(
                &[1, 0, 0, 0, 1, 0, 0, 0, 0],
                &[0, 0, 0],
                &[3, 3, 1],
            )
            .unwrap();
        display
            .fill_scaler(Scaler::default(), &[0, 0, 0], &[3, 3, 1])
            .unwrap();
        display
            .fill_scaler(Scaler::splat_rgb(256), &[0, 0, 0], &[3, 3, 0])
            .unwrap();
        display
    }

    #[test]
    fn commands_before_initialise_fail() {
        let mut display = SimNddiDisplay::new();
        assert!(matches!(
            display.put_pixel(Pixel::default(), &[0, 0, 0]),
            Err(NddiError::NotInitialised)
        ));
        assert!(matches!(
            display.latch(SubRegion::new(0, 0, 1, 1)),
            Err(NddiError::NotInitialised)
        ));
    }

    #[test]
    fn identity_reconstruction_returns_the_source() {
        let mut display = identity_display();
        let src: Vec<Pixel> = (0..16).map(|i| Pixel::splat(i as u8 * 16)).collect();
        display.copy_pixels(&src, &[0, 0, 0], &[3, 3, 0]).unwrap();
        display.latch(SubRegion::full(4, 4)).unwrap();
        assert_eq!(display.presented().unwrap(), &src[..]);
    }

    #[test]
    fn latch_presents_only_the_sub_rectangle() {
        let mut display = identity_display();
        display
            .fill_pixel(Pixel::from_rgb(9, 9, 9), &[0, 0, 0], &[3, 3, 0])
            .unwrap();
        display.latch(SubRegion::new(1, 1, 2, 2)).unwrap();
        let frame = display.presented().unwrap();
        assert_eq!(frame[0], Pixel::default());
        assert_eq!(frame[5], Pixel::from_rgb(9, 9, 9));
        assert!(display.latch(SubRegion::new(3, 3, 2, 2)).is_err());
    }

    #[test]
    fn latch_observes_all_prior_writes() {
        let mut display = identity_display();
        display.put_pixel(Pixel::from_rgb(1, 0, 0), &[0, 0, 0]).unwrap();
        display.put_pixel(Pixel::from_rgb(0, 2, 0), &[1, 0, 0]).unwrap();
        display.latch(SubRegion::full(4, 4)).unwrap();
        let frame = display.presented().unwrap();
        assert_eq!(frame[0], Pixel::from_rgb(1, 0, 0));
        assert_eq!(frame[1], Pixel::from_rgb(0, 2, 0));
    }

    #[test]
    fn sign_mode_flips_the_contribution_of_0x80() {
        let mut display = identity_display();
        display.put_pixel(Pixel::splat(0x80), &[0, 0, 0]).unwrap();

        let unsigned = display.compute_pixel(0, 0).unwrap();
        assert_eq!(unsigned.r(), 128);

        display.set_pixel_byte_sign_mode(SignMode::Signed).unwrap();
        let signed = display.compute_pixel(0, 0).unwrap();
        assert_eq!(signed.r() as i8, -128);
    }

    #[test]
    fn scaler_halves_and_negates_contributions() {
        let mut display = identity_display();
        display.put_pixel(Pixel::splat(100), &[0, 0, 0]).unwrap();
        display
            .fill_scaler(Scaler::splat_rgb(128), &[0, 0, 0], &[0, 0, 0])
            .unwrap();
        assert_eq!(display.compute_pixel(0, 0).unwrap().r(), 50);

        // A negative scaler clamps at zero under unsigned mode.
        display
            .fill_scaler(Scaler::splat_rgb(-256), &[0, 0, 0], &[0, 0, 0])
            .unwrap();
        assert_eq!(display.compute_pixel(0, 0).unwrap().r(), 0);
    }

    #[test]
    fn planes_accumulate_and_clamp() {
        let mut display = identity_display();
        display.put_pixel(Pixel::splat(200), &[0, 0, 0]).unwrap();
        // Second plane selects the same pixel at full scale: 200 + 200 clamps.
        display
            .fill_coefficient_matrix(
                &[1, 0, 0, 0, 1, 0, 0, 0, 0],
                &[0, 0, 1],
                &[0, 0, 1],
            )
            .unwrap();
        display
            .fill_scaler(Scaler::splat_rgb(256), &[0, 0, 1], &[0, 0, 1])
            .unwrap();
        assert_eq!(display.compute_pixel(0, 0).unwrap().r(), 255);
    }

    #[test]
    fn plane_sentinel_selects_by_plane_index() {
        let mut display = identity_display();
        display.put_pixel(Pixel::splat(10), &[0, 0, 0]).unwrap();
        display.put_pixel(Pixel::splat(20), &[0, 0, 1]).unwrap();
        // Route the z coordinate through the plane sentinel on both planes.
        display
            .fill_coefficient(COEFFICIENT_MATRIX_P, 2, 2, &[0, 0, 0], &[0, 0, 1])
            .unwrap();
        display
            .fill_scaler(Scaler::splat_rgb(256), &[0, 0, 1], &[0, 0, 1])
            .unwrap();
        assert_eq!(display.compute_pixel(0, 0).unwrap().r(), 30);
    }

    #[test]
    fn x_y_sentinels_substitute_pixel_coordinates() {
        let mut display = identity_display();
        for x in 0..4 {
            for y in 0..4 {
                display
                    .put_pixel(Pixel::splat((x * 4 + y) as u8), &[x, y, 0])
                    .unwrap();
            }
        }
        // Swap the axes: the sentinels ride on input-vector position 2,
        // which holds the constant 1, so row 0 evaluates to y and row 1 to x.
        display
            .fill_coefficient_matrix(
                &[0, 0, COEFFICIENT_MATRIX_Y, 0, 0, COEFFICIENT_MATRIX_X, 0, 0, 0],
                &[0, 0, 0],
                &[3, 3, 0],
            )
            .unwrap();
        // Pixel (3, 1) now samples frame-volume cell (1, 3).
        assert_eq!(display.compute_pixel(3, 1).unwrap().r(), 7);
    }

    #[test]
    fn out_of_range_slices_are_rejected() {
        let mut display = identity_display();
        assert!(matches!(
            display.fill_pixel(Pixel::default(), &[0, 0, 0], &[4, 3, 0]),
            Err(NddiError::OutOfRange { .. })
        ));
        assert!(matches!(
            display.fill_scaler(Scaler::default(), &[0, 0, 0], &[3, 3, 2]),
            Err(NddiError::OutOfRange { .. })
        ));
    }

    #[test]
    fn copy_strip_requires_one_axis() {
        let mut display = identity_display();
        let pixels = vec![Pixel::splat(1); 4];
        display
            .copy_pixel_strip(&pixels, &[0, 2, 0], &[3, 2, 0])
            .unwrap();
        assert_eq!(
            display.frame_volume().unwrap().sample(&[3, 2, 0]),
            Some(Pixel::splat(1))
        );
        assert!(
            display
                .copy_pixel_strip(&pixels, &[0, 0, 0], &[3, 2, 0])
                .is_err()
        );
    }

    #[test]
    fn scaler_tile_stack_writes_a_z_column() {
        let mut display = identity_display();
        let scalers = [Scaler::splat_rgb(7), Scaler::splat_rgb(8)];
        display
            .fill_scaler_tile_stack(&scalers, &[0, 0, 0], [2, 2])
            .unwrap();
        let planes = display.coefficient_planes().unwrap();
        assert_eq!(planes.scaler_at(1, 1, 0), Scaler::splat_rgb(7));
        assert_eq!(planes.scaler_at(0, 0, 1), Scaler::splat_rgb(8));
        assert_eq!(planes.scaler_at(2, 0, 0), Scaler::splat_rgb(256));
    }
}
