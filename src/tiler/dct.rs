//! DCT transform tiling.
//!
//! The frame volume holds pre-rendered DCT basis functions: for each of the
//! 64 frequencies of an 8x8 block there is one plane per colour channel,
//! stored as groups of three in zig-zag order, plus a final uniform mid-grey
//! plane (depth 3 * 64 + 1 = 193). The coefficient plane stack is 64 deep:
//! plane k selects the basis whose zig-zag index is k (the three channel
//! renderings are identical by construction, so the red one stands for all),
//! and the last plane selects the grey, which re-adds the 128 DC offset that
//! encoding subtracts. With the display in signed mode and the full scaler
//! set to [`MAX_DCT_COEFF`], writing a macroblock's quantised coefficients as
//! packed scalers down the plane stack makes the device itself perform the
//! inverse DCT.
//!
//! Per frame each macroblock is transformed, quantised and de-quantised
//! (the lossy step), and its scalers are sent with one `FillScalerTileStack`
//! covering only as many planes as carry non-zero coefficients now or did in
//! the previous update.

use nddi::{DisplayConfig, NddiDisplay, NddiError, Pixel, Result, Scaler, SignMode};
use rayon::prelude::*;

use super::Tiler;

pub(crate) const BLOCK: usize = 8;
pub(crate) const BLOCK_SIZE: usize = BLOCK * BLOCK;

/// Basis planes (64 frequencies x 3 channels) plus the grey plane.
pub(crate) const FRAME_VOLUME_DEPTH: u32 = 193;
pub(crate) const GREY_FV_PLANE: u32 = FRAME_VOLUME_DEPTH - 1;

/// Height of the coefficient plane stack; the last plane carries the grey.
pub(crate) const STACK_PLANES: u32 = 64;
pub(crate) const GREY_STACK_PLANE: u32 = STACK_PLANES - 1;

/// Full-scaler value during DCT sessions. The DC coefficient of an 8x8 block
/// of +-128 samples peaks at 1024, and a basis rendered from a coefficient of
/// 1024 peaks at 127, the signed-byte clamp.
pub(crate) const MAX_DCT_COEFF: u16 = 1024;

const SQRT_125: f64 = 0.353_553_391;
const SQRT_250: f64 = 0.5;
const PI_8: f64 = 0.392_699_081;

const fn alpha(frequency: usize) -> f64 {
    if frequency == 0 { SQRT_125 } else { SQRT_250 }
}

/// Tables shared by the forward transform, the basis rendering and the
/// client-side reconstruction used for multi-scale residuals.
pub(crate) struct DctContext {
    /// Position `(v * 8 + u)` to zig-zag order.
    zigzag: [usize; BLOCK_SIZE],
    /// Zig-zag order back to `(u, v)`.
    frequency_of: [(usize, usize); BLOCK_SIZE],
    /// Quantisation matrix, indexed `(v * 8 + u)`.
    quant: [i32; BLOCK_SIZE],
    /// `cos(pi/8 * (x + 0.5) * u)`, indexed `[x][u]`.
    cos: [[f64; BLOCK]; BLOCK],
    /// Rendered basis bytes per zig-zag order, row-major 8x8.
    basis: Vec<[i8; BLOCK_SIZE]>,
}

impl DctContext {
    pub(crate) fn new(quality: u32) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(NddiError::InvalidArgument(format!(
                "quality {quality} must be within 1..=100"
            )));
        }

        // The classic diagonal scan, walked exactly once over the block.
        let mut zigzag = [0usize; BLOCK_SIZE];
        let (mut x, mut y) = (0usize, 0usize);
        let mut up = true;
        for order in 0..BLOCK_SIZE {
            zigzag[y * BLOCK + x] = order;
            if up {
                if x < BLOCK - 1 {
                    x += 1;
                    if y > 0 {
                        y -= 1;
                    } else {
                        up = false;
                    }
                } else {
                    y += 1;
                    up = false;
                }
            } else if y < BLOCK - 1 {
                y += 1;
                if x > 0 {
                    x -= 1;
                } else {
                    up = true;
                }
            } else {
                x += 1;
                up = true;
            }
        }
        let mut frequency_of = [(0usize, 0usize); BLOCK_SIZE];
        for v in 0..BLOCK {
            for u in 0..BLOCK {
                frequency_of[zigzag[v * BLOCK + u]] = (u, v);
            }
        }

        // Nelson's linear quantisation ramp.
        let mut quant = [0i32; BLOCK_SIZE];
        for v in 0..BLOCK {
            for u in 0..BLOCK {
                quant[v * BLOCK + u] = 1 + (1 + u + v) as i32 * quality as i32;
            }
        }

        let mut cos = [[0f64; BLOCK]; BLOCK];
        for (px, row) in cos.iter_mut().enumerate() {
            for (f, value) in row.iter_mut().enumerate() {
                *value = (PI_8 * (px as f64 + 0.5) * f as f64).cos();
            }
        }

        let mut ctx = Self {
            zigzag,
            frequency_of,
            quant,
            cos,
            basis: Vec::with_capacity(BLOCK_SIZE),
        };
        for order in 0..BLOCK_SIZE {
            ctx.basis.push(ctx.render_basis(order));
        }
        Ok(ctx)
    }

    /// Renders one basis function as signed bytes: the inverse transform of
    /// a lone coefficient of `MAX_DCT_COEFF`, magnitude clamped to 127.
    fn render_basis(&self, order: usize) -> [i8; BLOCK_SIZE] {
        let (u, v) = self.frequency_of[order];
        let mut plane = [0i8; BLOCK_SIZE];
        for y in 0..BLOCK {
            for x in 0..BLOCK {
                let m = alpha(u)
                    * alpha(v)
                    * f64::from(MAX_DCT_COEFF)
                    * self.cos[x][u]
                    * self.cos[y][v];
                let magnitude = m.abs().min(127.0) as i8;
                plane[y * BLOCK + x] = if m < 0.0 { -magnitude } else { magnitude };
            }
        }
        plane
    }

    pub(crate) fn basis_byte(&self, order: usize, x: usize, y: usize) -> i8 {
        self.basis[order][y * BLOCK + x]
    }

    /// The `(u, v)` frequency a zig-zag order denotes.
    pub(crate) fn frequency(&self, order: usize) -> (usize, usize) {
        self.frequency_of[order]
    }

    /// Forward DCT, quantise, de-quantise; coefficients packed as scalers in
    /// zig-zag order. The last order is left zero: its stack slot belongs to
    /// the grey plane.
    pub(crate) fn forward_block(&self, block: &[[i16; 3]; BLOCK_SIZE]) -> [Scaler; BLOCK_SIZE] {
        let mut out = [Scaler::default(); BLOCK_SIZE];
        for v in 0..BLOCK {
            for u in 0..BLOCK {
                let order = self.zigzag[v * BLOCK + u];
                if order == BLOCK_SIZE - 1 {
                    continue;
                }
                let mut c = [0f64; 3];
                for y in 0..BLOCK {
                    for x in 0..BLOCK {
                        let p = alpha(u) * alpha(v) * self.cos[x][u] * self.cos[y][v];
                        let sample = block[y * BLOCK + x];
                        c[0] += p * f64::from(sample[0]);
                        c[1] += p * f64::from(sample[1]);
                        c[2] += p * f64::from(sample[2]);
                    }
                }
                let q = self.quant[v * BLOCK + u];
                let dequantised = |value: f64| -> i16 {
                    let quantised = (value / f64::from(q) + 0.5) as i32;
                    (quantised * q).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
                };
                out[order] = Scaler::from_rgb(
                    dequantised(c[0]),
                    dequantised(c[1]),
                    dequantised(c[2]),
                );
            }
        }
        out
    }

    /// What the display will render for these zig-zag-ordered scalers,
    /// before the grey offset: the same basis bytes, wide accumulation and
    /// single divide the device applies.
    pub(crate) fn render_block(&self, coefficients: &[Scaler]) -> [[i16; 3]; BLOCK_SIZE] {
        let mut acc = [[0i64; 3]; BLOCK_SIZE];
        for (order, scaler) in coefficients.iter().enumerate() {
            if scaler.is_zero() || order == BLOCK_SIZE - 1 {
                continue;
            }
            let basis = &self.basis[order];
            for (pixel, a) in acc.iter_mut().enumerate() {
                let b = i64::from(basis[pixel]);
                a[0] += b * i64::from(scaler.r());
                a[1] += b * i64::from(scaler.g());
                a[2] += b * i64::from(scaler.b());
            }
        }
        let mut out = [[0i16; 3]; BLOCK_SIZE];
        for (pixel, a) in acc.iter().enumerate() {
            for ch in 0..3 {
                out[pixel][ch] = (a[ch] / i64::from(MAX_DCT_COEFF))
                    .clamp(i64::from(i16::MIN), i64::from(i16::MAX))
                    as i16;
            }
        }
        out
    }

    /// Frame-volume pixels for the full 193-plane basis stack, stretched by
    /// `scale`, region-ordered with x varying fastest.
    pub(crate) fn frame_volume_pixels(&self, scale: u32) -> Vec<Pixel> {
        let (bw, bh) = ((BLOCK as u32 * scale) as usize, (BLOCK as u32 * scale) as usize);
        let mut pixels = Vec::with_capacity(bw * bh * FRAME_VOLUME_DEPTH as usize);
        for z in 0..FRAME_VOLUME_DEPTH {
            for y in 0..bh {
                for x in 0..bw {
                    let byte = if z == GREY_FV_PLANE {
                        0x7f
                    } else {
                        // Three identical channel renderings per frequency.
                        let order = (z / 3) as usize;
                        self.basis_byte(order, x / scale as usize, y / scale as usize) as u8
                    };
                    pixels.push(Pixel::from_rgb(byte, byte, byte));
                }
            }
        }
        pixels
    }
}

/// Planes to write for one macroblock update: enough to carry every
/// non-zero coefficient of this update and to overwrite every plane the
/// previous update left non-zero.
pub(crate) fn required_stack_height(coefficients: &[Scaler], previous: &mut u8) -> usize {
    let current = coefficients
        .iter()
        .rposition(|s| !s.is_zero())
        .map_or(0, |index| index + 1);
    let send = current.max(usize::from(*previous));
    *previous = current as u8;
    send
}

pub struct DctTiler<D> {
    display: D,
    ctx: DctContext,
    display_width: u32,
    display_height: u32,
    scale: u32,
    block_width: u32,
    block_height: u32,
    fv_x_offset: u32,
    tiles_wide: u32,
    tiles_high: u32,
    stack_heights: Vec<u8>,
}

impl<D: NddiDisplay> DctTiler<D> {
    /// `width` and `height` are the source frame dimensions; the display is
    /// `scale` times larger in each direction, with the basis functions
    /// stretched to match.
    pub fn new(mut display: D, width: u32, height: u32, quality: u32, scale: u32) -> Result<Self> {
        if scale == 0 || !scale.is_power_of_two() {
            return Err(NddiError::InvalidArgument(format!(
                "scale {scale} must be a power of two"
            )));
        }
        let ctx = DctContext::new(quality)?;
        let display_width = width * scale;
        let display_height = height * scale;
        let block_width = BLOCK as u32 * scale;
        let block_height = BLOCK as u32 * scale;

        // Scaled stacks live side by side along x at their canonical offset.
        let mut fv_x_offset = 0;
        let mut s = 1;
        while s < scale {
            fv_x_offset += BLOCK as u32 * s;
            s <<= 1;
        }

        let tiles_wide = width.div_ceil(BLOCK as u32);
        let tiles_high = height.div_ceil(BLOCK as u32);

        let mut config = DisplayConfig::new(
            vec![fv_x_offset + block_width, block_height, FRAME_VOLUME_DEPTH],
            display_width,
            display_height,
            STACK_PLANES,
            3,
        );
        config.fixed_8x8_macroblocks = true;
        display.initialize(&config)?;
        display.set_full_scaler(MAX_DCT_COEFF)?;
        display.set_pixel_byte_sign_mode(SignMode::Signed)?;
        display.update_input_vector(&[1])?;

        let mut tiler = Self {
            display,
            ctx,
            display_width,
            display_height,
            scale,
            block_width,
            block_height,
            fv_x_offset,
            tiles_wide,
            tiles_high,
            stack_heights: vec![0; (tiles_wide * tiles_high) as usize],
        };
        tiler.initialize_coefficient_planes()?;
        tiler.initialize_frame_volume()?;
        Ok(tiler)
    }

    fn initialize_coefficient_planes(&mut self) -> Result<()> {
        // Translate each macroblock onto the basis stack.
        for j in 0..self.tiles_high {
            for i in 0..self.tiles_wide {
                let matrix = [
                    1,
                    0,
                    self.fv_x_offset as i32 - (i * self.block_width) as i32,
                    0,
                    1,
                    -((j * self.block_height) as i32),
                    0,
                    0,
                    0,
                ];
                let start = [i * self.block_width, j * self.block_height, 0];
                let end = [
                    ((i + 1) * self.block_width - 1).min(self.display_width - 1),
                    ((j + 1) * self.block_height - 1).min(self.display_height - 1),
                    STACK_PLANES - 1,
                ];
                self.display.fill_coefficient_matrix(&matrix, &start, &end)?;
            }
        }

        // Plane k picks the red rendering of zig-zag frequency k; the final
        // plane picks the grey.
        let full = [self.display_width - 1, self.display_height - 1, 0];
        for k in 0..GREY_STACK_PLANE {
            self.display.fill_coefficient(
                (k * 3) as i32,
                2,
                2,
                &[0, 0, k],
                &[full[0], full[1], k],
            )?;
        }
        self.display.fill_coefficient(
            GREY_FV_PLANE as i32,
            2,
            2,
            &[0, 0, GREY_STACK_PLANE],
            &[full[0], full[1], GREY_STACK_PLANE],
        )?;

        // All scalers off, then the grey plane fully on.
        self.display.fill_scaler(
            Scaler::default(),
            &[0, 0, 0],
            &[full[0], full[1], STACK_PLANES - 1],
        )?;
        self.display.fill_scaler(
            Scaler::full(MAX_DCT_COEFF),
            &[0, 0, GREY_STACK_PLANE],
            &[full[0], full[1], GREY_STACK_PLANE],
        )?;
        Ok(())
    }

    fn initialize_frame_volume(&mut self) -> Result<()> {
        let pixels = self.ctx.frame_volume_pixels(self.scale);
        self.display.copy_pixels(
            &pixels,
            &[self.fv_x_offset, 0, 0],
            &[
                self.fv_x_offset + self.block_width - 1,
                self.block_height - 1,
                FRAME_VOLUME_DEPTH - 1,
            ],
        )
    }

    #[cfg(test)]
    fn display(&self) -> &D {
        &self.display
    }

    #[cfg(test)]
    fn stack_height(&self, i: u32, j: u32) -> u8 {
        self.stack_heights[(j * self.tiles_wide + i) as usize]
    }
}

/// Shifted 8x8 block at macroblock (i, j); samples beyond the buffer act as
/// mid-grey, i.e. zero after the shift.
pub(crate) fn extract_block(
    buffer: &[u8],
    width: usize,
    height: usize,
    i: u32,
    j: u32,
) -> [[i16; 3]; BLOCK_SIZE] {
    let mut block = [[0i16; 3]; BLOCK_SIZE];
    for y in 0..BLOCK {
        let sy = j as usize * BLOCK + y;
        for x in 0..BLOCK {
            let sx = i as usize * BLOCK + x;
            if sx < width && sy < height {
                let offset = (sy * width + sx) * 3;
                block[y * BLOCK + x] = [
                    i16::from(buffer[offset]) - 128,
                    i16::from(buffer[offset + 1]) - 128,
                    i16::from(buffer[offset + 2]) - 128,
                ];
            }
        }
    }
    block
}

impl<D: NddiDisplay> Tiler for DctTiler<D> {
    fn update_display(&mut self, buffer: &[u8], width: usize, height: usize) -> Result<()> {
        if (width as u32) * self.scale < self.display_width
            || (height as u32) * self.scale < self.display_height
        {
            return Err(NddiError::InvalidArgument(format!(
                "{width}x{height} frame cannot cover a {}x{} display",
                self.display_width, self.display_height
            )));
        }

        // Transform every macroblock in parallel, then emit sequentially so
        // the command order is deterministic. Only the shared tables cross
        // the thread boundary, never the display handle.
        let ctx = &self.ctx;
        let tiles_wide = self.tiles_wide;
        let blocks: Vec<[Scaler; BLOCK_SIZE]> = (0..self.stack_heights.len())
            .into_par_iter()
            .map(|t| {
                let i = t as u32 % tiles_wide;
                let j = t as u32 / tiles_wide;
                ctx.forward_block(&extract_block(buffer, width, height, i, j))
            })
            .collect();

        let mut planes_sent = 0usize;
        for (t, coefficients) in blocks.iter().enumerate() {
            let send = required_stack_height(coefficients, &mut self.stack_heights[t]);
            if send == 0 {
                continue;
            }
            let i = t as u32 % self.tiles_wide;
            let j = t as u32 / self.tiles_wide;
            self.display.fill_scaler_tile_stack(
                &coefficients[..send],
                &[i * self.block_width, j * self.block_height, 0],
                [self.block_width, self.block_height],
            )?;
            planes_sent += send;
        }
        tracing::debug!(
            macroblocks = self.stack_heights.len(),
            planes_sent,
            "dct frame complete"
        );
        Ok(())
    }

    fn display_mut(&mut self) -> &mut dyn NddiDisplay {
        &mut self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nddi::{SimNddiDisplay, SubRegion};
    use pretty_assertions::assert_eq;

    #[test]
    fn zigzag_follows_the_classic_scan() {
        let ctx = DctContext::new(10).unwrap();
        // (u, v) -> order, spot-checked against the JPEG scan.
        assert_eq!(ctx.zigzag[0], 0);
        assert_eq!(ctx.zigzag[1], 1); // (1, 0)
        assert_eq!(ctx.zigzag[BLOCK], 2); // (0, 1)
        assert_eq!(ctx.zigzag[2 * BLOCK], 3); // (0, 2)
        assert_eq!(ctx.zigzag[BLOCK + 1], 4); // (1, 1)
        assert_eq!(ctx.zigzag[2], 5); // (2, 0)
        assert_eq!(ctx.zigzag[BLOCK_SIZE - 1], 63); // (7, 7)
        assert_eq!(ctx.frequency_of[63], (7, 7));
    }

    #[test]
    fn quantisation_ramp_grows_with_frequency_and_quality() {
        let ctx = DctContext::new(10).unwrap();
        assert_eq!(ctx.quant[0], 11);
        assert_eq!(ctx.quant[1], 21); // (1, 0)
        assert_eq!(ctx.quant[BLOCK_SIZE - 1], 151); // (7, 7)
        assert!(DctContext::new(0).is_err());
        assert!(DctContext::new(101).is_err());
    }

    #[test]
    fn dc_basis_is_nearly_flat_positive() {
        let ctx = DctContext::new(10).unwrap();
        for pixel in 0..BLOCK_SIZE {
            assert_eq!(ctx.basis[0][pixel], 127);
        }
        // An AC basis oscillates in sign.
        let ac = &ctx.basis[1];
        assert!(ac.iter().any(|&b| b > 0) && ac.iter().any(|&b| b < 0));
    }

    #[test]
    fn uniform_grey_frame_emits_no_scaler_stacks() {
        let mut tiler = DctTiler::new(SimNddiDisplay::new(), 8, 8, 10, 1).unwrap();
        let frame = vec![128u8; 8 * 8 * 3];
        tiler.update_display(&frame, 8, 8).unwrap();
        assert_eq!(tiler.stack_height(0, 0), 0);

        // Only the grey plane contributes: the display shows 127.
        tiler.display_mut().latch(SubRegion::full(8, 8)).unwrap();
        for pixel in tiler.display().presented().unwrap() {
            assert_eq!(pixel.r(), 127);
        }
    }

    #[test]
    fn grey_session_records_no_scaler_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.nddi");
        let recorder = nddi::recorder::RecorderDisplay::create(&path).unwrap();
        let mut tiler = DctTiler::new(recorder, 8, 8, 10, 1).unwrap();
        tiler.update_display(&vec![128u8; 8 * 8 * 3], 8, 8).unwrap();
        drop(tiler); // closes the log

        let mut reader = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
        let mut stacks = 0;
        while let Some(command) = nddi::Command::read_record(&mut reader).unwrap() {
            if matches!(command, nddi::Command::FillScalerTileStack { .. }) {
                stacks += 1;
            }
        }
        assert_eq!(stacks, 0);
    }

    #[test]
    fn stack_height_covers_previous_non_zero_planes() {
        let mut previous = 0u8;
        let mut coefficients = [Scaler::default(); BLOCK_SIZE];
        coefficients[4] = Scaler::splat_rgb(100);
        assert_eq!(required_stack_height(&coefficients, &mut previous), 5);
        assert_eq!(previous, 5);

        // All-zero update must still overwrite the five stale planes.
        let zeroes = [Scaler::default(); BLOCK_SIZE];
        assert_eq!(required_stack_height(&zeroes, &mut previous), 5);
        assert_eq!(previous, 0);
        assert_eq!(required_stack_height(&zeroes, &mut previous), 0);
    }

    #[test]
    fn flat_frame_reconstructs_within_one_quantisation_step() {
        let mut tiler = DctTiler::new(SimNddiDisplay::new(), 8, 8, 10, 1).unwrap();
        let frame = vec![160u8; 8 * 8 * 3];
        tiler.update_display(&frame, 8, 8).unwrap();
        assert_eq!(tiler.stack_height(0, 0), 1, "DC only");

        tiler.display_mut().latch(SubRegion::full(8, 8)).unwrap();
        for pixel in tiler.display().presented().unwrap() {
            let err = (i32::from(pixel.r()) - 160).abs();
            assert!(err <= 6, "reconstructed {} for 160", pixel.r());
        }
    }

    #[test]
    fn planes_above_the_stack_height_hold_zero_scalers() {
        let mut tiler = DctTiler::new(SimNddiDisplay::new(), 16, 8, 25, 1).unwrap();
        let mut frame = vec![128u8; 16 * 8 * 3];
        // Horizontal edge in the left macroblock only.
        for y in 0..8 {
            for x in 0..4 {
                let offset = (y * 16 + x) * 3;
                frame[offset] = 250;
                frame[offset + 1] = 250;
                frame[offset + 2] = 250;
            }
        }
        tiler.update_display(&frame, 16, 8).unwrap();

        let h = u32::from(tiler.stack_height(0, 0));
        assert!(h > 0);
        let planes = tiler.display().coefficient_planes().unwrap();
        for k in h..GREY_STACK_PLANE {
            assert!(
                planes.scaler_at(0, 0, k).is_zero(),
                "plane {k} above stack height {h} is non-zero"
            );
        }
        // The right macroblock is pure grey and was never written.
        assert_eq!(tiler.stack_height(1, 0), 0);
    }

    #[test]
    fn gradient_survives_low_quantisation() {
        let mut tiler = DctTiler::new(SimNddiDisplay::new(), 8, 8, 1, 1).unwrap();
        let mut frame = vec![0u8; 8 * 8 * 3];
        for y in 0..8 {
            for x in 0..8 {
                let v = (x * 20 + y * 10 + 40) as u8;
                let offset = (y * 8 + x) * 3;
                frame[offset] = v;
                frame[offset + 1] = v;
                frame[offset + 2] = v;
            }
        }
        tiler.update_display(&frame, 8, 8).unwrap();
        tiler.display_mut().latch(SubRegion::full(8, 8)).unwrap();

        let presented = tiler.display().presented().unwrap();
        for y in 0..8usize {
            for x in 0..8usize {
                let want = i32::from(frame[(y * 8 + x) * 3]);
                let got = i32::from(presented[y * 8 + x].r());
                assert!(
                    (want - got).abs() <= 16,
                    "({x}, {y}): wanted {want}, reconstructed {got}"
                );
            }
        }
    }
}
