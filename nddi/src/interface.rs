//! The command surface of the n-dimensional display interface.
//!
//! [`NddiDisplay`] is the seam between the tilers and whatever consumes their
//! commands: the in-process model ([`SimNddiDisplay`]), the command recorder
//! ([`RecorderDisplay`]) and the wire client ([`RemoteDisplay`]). Every method
//! corresponds to exactly one command of the protocol; implementations must
//! preserve the order in which methods are called, and `latch` acts as a
//! barrier between frames.
//!
//! [`SimNddiDisplay`]: crate::display::SimNddiDisplay
//! [`RecorderDisplay`]: crate::recorder::RecorderDisplay
//! [`RemoteDisplay`]: crate::transport::RemoteDisplay

use crate::error::Result;
use crate::pixel::{Pixel, Scaler, SignMode};

/// Everything needed to allocate the three display memories.
///
/// The two flags are server-side memory-footprint options carried through the
/// protocol; they do not change the reconstruction equation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DisplayConfig {
    /// Size of each frame-volume dimension.
    pub frame_volume_dimensions: Vec<u32>,
    pub display_width: u32,
    pub display_height: u32,
    pub num_coefficient_planes: u32,
    /// Length of the input vector, including the two fixed x/y positions.
    pub input_vector_size: u32,
    pub fixed_8x8_macroblocks: bool,
    pub single_coefficient_plane: bool,
}

impl DisplayConfig {
    #[must_use]
    pub fn new(
        frame_volume_dimensions: Vec<u32>,
        display_width: u32,
        display_height: u32,
        num_coefficient_planes: u32,
        input_vector_size: u32,
    ) -> Self {
        Self {
            frame_volume_dimensions,
            display_width,
            display_height,
            num_coefficient_planes,
            input_vector_size,
            fixed_8x8_macroblocks: false,
            single_coefficient_plane: false,
        }
    }

    /// Frame-volume dimensionality, i.e. the row count of every coefficient
    /// matrix.
    #[must_use]
    pub fn frame_volume_dimensionality(&self) -> usize {
        self.frame_volume_dimensions.len()
    }
}

/// Sub-rectangle of the computed frame named by a `Latch`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl SubRegion {
    #[must_use]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole of a `w` x `h` display.
    #[must_use]
    pub const fn full(w: u32, h: u32) -> Self {
        Self::new(0, 0, w, h)
    }
}

/// One display implementation: the in-process model, a recorder, or a client
/// for a remote wall. Methods take `&mut self` because even the query calls
/// are commands that recorders must observe in order.
pub trait NddiDisplay {
    /// Allocates the display memories. Must be the first call on a session.
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()>;

    fn display_width(&mut self) -> Result<u32>;

    fn display_height(&mut self) -> Result<u32>;

    fn num_coefficient_planes(&mut self) -> Result<u32>;

    /// Writes one pixel at `location` in the frame volume.
    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()>;

    /// Copies a run of pixels along the single axis on which `start` and
    /// `end` differ.
    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()>;

    /// Copies pixels into the hyper-rectangle `start..=end`; the source is
    /// laid out with dimension 0 varying fastest.
    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()>;

    /// Copies one `size[0]` x `size[1]` tile per entry of `tiles`, each to
    /// its own start coordinate.
    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()>;

    /// Fills the hyper-rectangle `start..=end` with one pixel.
    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()>;

    /// Copies the region `start..=end` of the frame volume to `dest`. The
    /// destination is written from a snapshot of the source, so overlapping
    /// regions behave as if copied through an intermediate buffer.
    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()>;

    /// Writes positions 2.. of the input vector; `values` must hold exactly
    /// `input_vector_size - 2` entries. Atomic with respect to `latch`.
    fn update_input_vector(&mut self, values: &[i32]) -> Result<()>;

    /// Writes one coefficient matrix (row-major, one row per frame-volume
    /// dimension) at `location` in the coefficient planes.
    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()>;

    /// Writes one coefficient matrix across `start..=end`. Entries equal to
    /// [`COEFFICIENT_UNCHANGED`](crate::pixel::COEFFICIENT_UNCHANGED) leave
    /// the existing value in place.
    fn fill_coefficient_matrix(&mut self, matrix: &[i32], start: &[u32], end: &[u32])
    -> Result<()>;

    /// Writes a single matrix entry `(row, col)` across `start..=end`.
    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()>;

    /// For each `i`, writes `coefficients[i]` at matrix position
    /// `positions[i]` in every matrix of the 2-D tile at `starts[i]`.
    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()>;

    /// Writes one scaler across `start..=end` of the coefficient planes.
    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()>;

    /// For each `i`, writes `scalers[i]` across the 2-D tile at `starts[i]`.
    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()>;

    /// Writes a Z-column of tiles at `(start[0], start[1])` beginning on
    /// plane `start[2]`; one scaler per plane, height = `scalers.len()`.
    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()>;

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()>;

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()>;

    fn get_full_scaler(&mut self) -> Result<u16>;

    /// Presents the named sub-rectangle of the current computed frame. All
    /// writes issued before the latch are visible in the presented frame.
    fn latch(&mut self, sub: SubRegion) -> Result<()>;

    fn shutdown(&mut self) -> Result<()>;
}

/// A display shared between threads, e.g. a transport dispatcher writing
/// while a compositor reads. Every command takes the lock for its duration,
/// which also makes `update_input_vector` atomic with respect to `latch`.
impl<D: NddiDisplay> NddiDisplay for std::sync::Arc<std::sync::Mutex<D>> {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()> {
        lock_shared(self).initialize(config)
    }

    fn display_width(&mut self) -> Result<u32> {
        lock_shared(self).display_width()
    }

    fn display_height(&mut self) -> Result<u32> {
        lock_shared(self).display_height()
    }

    fn num_coefficient_planes(&mut self) -> Result<u32> {
        lock_shared(self).num_coefficient_planes()
    }

    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        lock_shared(self).put_pixel(pixel, location)
    }

    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        lock_shared(self).copy_pixel_strip(pixels, start, end)
    }

    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        lock_shared(self).copy_pixels(pixels, start, end)
    }

    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        lock_shared(self).copy_pixel_tiles(tiles, starts, size)
    }

    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()> {
        lock_shared(self).fill_pixel(pixel, start, end)
    }

    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()> {
        lock_shared(self).copy_frame_volume(start, end, dest)
    }

    fn update_input_vector(&mut self, values: &[i32]) -> Result<()> {
        lock_shared(self).update_input_vector(values)
    }

    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()> {
        lock_shared(self).put_coefficient_matrix(matrix, location)
    }

    fn fill_coefficient_matrix(
        &mut self,
        matrix: &[i32],
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        lock_shared(self).fill_coefficient_matrix(matrix, start, end)
    }

    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        lock_shared(self).fill_coefficient(coefficient, row, col, start, end)
    }

    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        lock_shared(self).fill_coefficient_tiles(coefficients, positions, starts, size)
    }

    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()> {
        lock_shared(self).fill_scaler(scaler, start, end)
    }

    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        lock_shared(self).fill_scaler_tiles(scalers, starts, size)
    }

    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()> {
        lock_shared(self).fill_scaler_tile_stack(scalers, start, size)
    }

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()> {
        lock_shared(self).set_pixel_byte_sign_mode(mode)
    }

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()> {
        lock_shared(self).set_full_scaler(scaler)
    }

    fn get_full_scaler(&mut self) -> Result<u16> {
        lock_shared(self).get_full_scaler()
    }

    fn latch(&mut self, sub: SubRegion) -> Result<()> {
        lock_shared(self).latch(sub)
    }

    fn shutdown(&mut self) -> Result<()> {
        lock_shared(self).shutdown()
    }
}

fn lock_shared<D>(
    shared: &std::sync::Arc<std::sync::Mutex<D>>,
) -> std::sync::MutexGuard<'_, D> {
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<D: NddiDisplay + ?Sized> NddiDisplay for Box<D> {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()> {
        (**self).initialize(config)
    }

    fn display_width(&mut self) -> Result<u32> {
        (**self).display_width()
    }

    fn display_height(&mut self) -> Result<u32> {
        (**self).display_height()
    }

    fn num_coefficient_planes(&mut self) -> Result<u32> {
        (**self).num_coefficient_planes()
    }

    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        (**self).put_pixel(pixel, location)
    }

    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        (**self).copy_pixel_strip(pixels, start, end)
    }

    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        (**self).copy_pixels(pixels, start, end)
    }

    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        (**self).copy_pixel_tiles(tiles, starts, size)
    }

    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()> {
        (**self).fill_pixel(pixel, start, end)
    }

    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()> {
        (**self).copy_frame_volume(start, end, dest)
    }

    fn update_input_vector(&mut self, values: &[i32]) -> Result<()> {
        (**self).update_input_vector(values)
    }

    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()> {
        (**self).put_coefficient_matrix(matrix, location)
    }

    fn fill_coefficient_matrix(
        &mut self,
        matrix: &[i32],
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        (**self).fill_coefficient_matrix(matrix, start, end)
    }

    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        (**self).fill_coefficient(coefficient, row, col, start, end)
    }

    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        (**self).fill_coefficient_tiles(coefficients, positions, starts, size)
    }

    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()> {
        (**self).fill_scaler(scaler, start, end)
    }

    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        (**self).fill_scaler_tiles(scalers, starts, size)
    }

    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()> {
        (**self).fill_scaler_tile_stack(scalers, start, size)
    }

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()> {
        (**self).set_pixel_byte_sign_mode(mode)
    }

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()> {
        (**self).set_full_scaler(scaler)
    }

    fn get_full_scaler(&mut self) -> Result<u16> {
        (**self).get_full_scaler()
    }

    fn latch(&mut self, sub: SubRegion) -> Result<()> {
        (**self).latch(sub)
    }

    fn shutdown(&mut self) -> Result<()> {
        (**self).shutdown()
    }
}
