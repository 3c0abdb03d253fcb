//! Multi-resolution DCT tiling.
//!
//! Several scale layers share one display. Each layer owns a slice of the
//! 64-deep coefficient plane stack and one basis stack in the frame volume,
//! arranged side by side along x at the scale's canonical offset. A layer
//! encodes the frame down-sampled by its scale factor using only the
//! low-frequency square of coefficients its `edge` selects; the layer's
//! reconstruction is then up-sampled and subtracted so the next (finer)
//! layer encodes only the residual.
//!
//! Three coefficient-zeroing strategies bound the per-frame stream cost:
//! snap-to-zero drops coefficients at or below a magnitude delta, trim drops
//! every plane past a count, and a byte budget binary-searches the delta or
//! plane count per layer until the estimate fits.

use nddi::{DisplayConfig, NddiDisplay, NddiError, Result, Scaler, SignMode};
use rayon::prelude::*;

use super::Tiler;
use super::dct::{
    BLOCK, BLOCK_SIZE, DctContext, FRAME_VOLUME_DEPTH, GREY_FV_PLANE, GREY_STACK_PLANE,
    MAX_DCT_COEFF, STACK_PLANES, required_stack_height,
};

/// One entry of `--dctscales`: encode at `scale`, keeping the `edge` x
/// `edge` square of lowest frequencies.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScaleLayerConfig {
    pub scale: u32,
    pub edge: u32,
}

/// Coefficient-zeroing configuration shared by every layer.
#[derive(Default, Clone, Copy, Debug)]
pub struct ZeroingOptions {
    pub snap: bool,
    pub trim: bool,
    /// Snap threshold; zero means derive it from the budget.
    pub delta: u16,
    /// Trim plane count; zero means derive it from the budget.
    pub planes: u32,
    /// Per-frame transmission budget in bytes; zero disables it.
    pub budget: usize,
}

struct Layer {
    scale: u32,
    first_plane: u32,
    /// Zig-zag orders inside the edge square, ascending; one stack plane per
    /// entry starting at `first_plane`.
    selected_orders: Vec<usize>,
    fv_x_offset: u32,
    block_span: u32,
    tiles_wide: u32,
    tiles_high: u32,
    down_width: u32,
    down_height: u32,
    stack_heights: Vec<u8>,
}

pub struct ScaledDctTiler<D> {
    display: D,
    ctx: DctContext,
    display_width: u32,
    display_height: u32,
    layers: Vec<Layer>,
    options: ZeroingOptions,
}

const fn canonical_fv_offset(scale: u32) -> u32 {
    let mut offset = 0;
    let mut s = 1;
    while s < scale {
        offset += BLOCK as u32 * s;
        s <<= 1;
    }
    offset
}

impl<D: NddiDisplay> ScaledDctTiler<D> {
    pub fn new(
        mut display: D,
        width: u32,
        height: u32,
        quality: u32,
        configs: &[ScaleLayerConfig],
        options: ZeroingOptions,
    ) -> Result<Self> {
        if configs.is_empty() {
            return Err(NddiError::InvalidArgument(
                "at least one scale layer is required".into(),
            ));
        }
        let ctx = DctContext::new(quality)?;

        let mut layers = Vec::with_capacity(configs.len());
        let mut first_plane = 0u32;
        let mut fv_width = 0u32;
        let mut fv_height = 0u32;
        for config in configs {
            if config.scale == 0 || !config.scale.is_power_of_two() {
                return Err(NddiError::InvalidArgument(format!(
                    "layer scale {} must be a power of two",
                    config.scale
                )));
            }
            if !(1..=BLOCK as u32).contains(&config.edge) {
                return Err(NddiError::InvalidArgument(format!(
                    "layer edge {} must be within 1..=8",
                    config.edge
                )));
            }
            if layers.iter().any(|l: &Layer| l.scale == config.scale) {
                return Err(NddiError::InvalidArgument(format!(
                    "duplicate scale layer {}", config.scale
                )));
            }

            // Orders inside the edge square, naturally ascending.
            let mut selected_orders: Vec<usize> = (0..BLOCK_SIZE - 1)
                .filter(|&order| {
                    let (u, v) = ctx.frequency(order);
                    u < config.edge as usize && v < config.edge as usize
                })
                .collect();
            let available = (GREY_STACK_PLANE - first_plane) as usize;
            if available == 0 {
                return Err(NddiError::InvalidArgument(
                    "scale layers exhausted the 63 coefficient planes".into(),
                ));
            }
            selected_orders.truncate(available);

            let block_span = BLOCK as u32 * config.scale;
            let layer = Layer {
                scale: config.scale,
                first_plane,
                fv_x_offset: canonical_fv_offset(config.scale),
                block_span,
                tiles_wide: width.div_ceil(block_span),
                tiles_high: height.div_ceil(block_span),
                down_width: width.div_ceil(config.scale),
                down_height: height.div_ceil(config.scale),
                stack_heights: vec![
                    0;
                    (width.div_ceil(block_span) * height.div_ceil(block_span))
                        as usize
                ],
                selected_orders,
            };
            first_plane += layer.selected_orders.len() as u32;
            fv_width = fv_width.max(layer.fv_x_offset + block_span);
            fv_height = fv_height.max(block_span);
            layers.push(layer);
        }

        let mut config = DisplayConfig::new(
            vec![fv_width, fv_height, FRAME_VOLUME_DEPTH],
            width,
            height,
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
            display_width: width,
            display_height: height,
            layers,
            options,
        };
        tiler.initialize_planes()?;
        tiler.initialize_frame_volume()?;
        Ok(tiler)
    }

    fn initialize_planes(&mut self) -> Result<()> {
        let full = [self.display_width - 1, self.display_height - 1];

        for layer in &self.layers {
            if layer.selected_orders.is_empty() {
                continue;
            }
            let last_plane = layer.first_plane + layer.selected_orders.len() as u32 - 1;
            for j in 0..layer.tiles_high {
                for i in 0..layer.tiles_wide {
                    let matrix = [
                        1,
                        0,
                        layer.fv_x_offset as i32 - (i * layer.block_span) as i32,
                        0,
                        1,
                        -((j * layer.block_span) as i32),
                        0,
                        0,
                        0,
                    ];
                    let start = [i * layer.block_span, j * layer.block_span, layer.first_plane];
                    let end = [
                        ((i + 1) * layer.block_span - 1).min(full[0]),
                        ((j + 1) * layer.block_span - 1).min(full[1]),
                        last_plane,
                    ];
                    self.display.fill_coefficient_matrix(&matrix, &start, &end)?;
                }
            }
            for (index, &order) in layer.selected_orders.iter().enumerate() {
                let plane = layer.first_plane + index as u32;
                self.display.fill_coefficient(
                    (order * 3) as i32,
                    2,
                    2,
                    &[0, 0, plane],
                    &[full[0], full[1], plane],
                )?;
            }
        }

        // The grey plane rides on the coarsest layer's translation.
        let grey_layer = &self.layers[0];
        for j in 0..grey_layer.tiles_high {
            for i in 0..grey_layer.tiles_wide {
                let matrix = [
                    1,
                    0,
                    grey_layer.fv_x_offset as i32 - (i * grey_layer.block_span) as i32,
                    0,
                    1,
                    -((j * grey_layer.block_span) as i32),
                    0,
                    0,
                    0,
                ];
                let start = [
                    i * grey_layer.block_span,
                    j * grey_layer.block_span,
                    GREY_STACK_PLANE,
                ];
                let end = [
                    ((i + 1) * grey_layer.block_span - 1).min(full[0]),
                    ((j + 1) * grey_layer.block_span - 1).min(full[1]),
                    GREY_STACK_PLANE,
                ];
                self.display.fill_coefficient_matrix(&matrix, &start, &end)?;
            }
        }
        self.display.fill_coefficient(
            GREY_FV_PLANE as i32,
            2,
            2,
            &[0, 0, GREY_STACK_PLANE],
            &[full[0], full[1], GREY_STACK_PLANE],
        )?;

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
        for layer in &self.layers {
            let pixels = self.ctx.frame_volume_pixels(layer.scale);
            self.display.copy_pixels(
                &pixels,
                &[layer.fv_x_offset, 0, 0],
                &[
                    layer.fv_x_offset + layer.block_span - 1,
                    layer.block_span - 1,
                    FRAME_VOLUME_DEPTH - 1,
                ],
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn display(&self) -> &D {
        &self.display
    }

    #[cfg(test)]
    fn layer_heights(&self, layer: usize) -> &[u8] {
        &self.layers[layer].stack_heights
    }
}

/// Box-filtered down-sampling by an integer factor, edge cells averaging
/// whatever source pixels they cover.
fn downsample(
    source: &[[i16; 3]],
    width: u32,
    height: u32,
    factor: u32,
) -> Vec<[i16; 3]> {
    if factor == 1 {
        return source.to_vec();
    }
    let down_width = width.div_ceil(factor);
    let down_height = height.div_ceil(factor);
    let mut out = Vec::with_capacity((down_width * down_height) as usize);
    for dy in 0..down_height {
        for dx in 0..down_width {
            let mut acc = [0i32; 3];
            let mut count = 0i32;
            for y in dy * factor..((dy + 1) * factor).min(height) {
                for x in dx * factor..((dx + 1) * factor).min(width) {
                    let sample = source[(y * width + x) as usize];
                    acc[0] += i32::from(sample[0]);
                    acc[1] += i32::from(sample[1]);
                    acc[2] += i32::from(sample[2]);
                    count += 1;
                }
            }
            out.push([
                (acc[0] / count) as i16,
                (acc[1] / count) as i16,
                (acc[2] / count) as i16,
            ]);
        }
    }
    out
}

/// 8x8 block at (i, j) of a signed buffer, zero-padded past the edges.
fn extract_signed_block(
    buffer: &[[i16; 3]],
    width: u32,
    height: u32,
    i: u32,
    j: u32,
) -> [[i16; 3]; BLOCK_SIZE] {
    let mut block = [[0i16; 3]; BLOCK_SIZE];
    for y in 0..BLOCK {
        let sy = j as usize * BLOCK + y;
        for x in 0..BLOCK {
            let sx = i as usize * BLOCK + x;
            if sx < width as usize && sy < height as usize {
                block[y * BLOCK + x] = buffer[sy * width as usize + sx];
            }
        }
    }
    block
}

/// Estimated wire bytes for one layer's blocks: record overhead plus eight
/// bytes per scaler actually sent.
fn estimate_cost(blocks: &[Vec<Scaler>]) -> usize {
    blocks
        .iter()
        .map(|coefficients| {
            let send = coefficients
                .iter()
                .rposition(|s| !s.is_zero())
                .map_or(0, |index| index + 1);
            if send == 0 { 0 } else { 28 + send * 8 }
        })
        .sum()
}

fn snapped(coefficients: &[Scaler], delta: u16) -> Vec<Scaler> {
    coefficients
        .iter()
        .map(|s| {
            let magnitude = s.r().unsigned_abs().max(s.g().unsigned_abs()).max(s.b().unsigned_abs());
            if magnitude <= delta { Scaler::default() } else { *s }
        })
        .collect()
}

fn trimmed(coefficients: &[Scaler], planes: u32) -> Vec<Scaler> {
    coefficients
        .iter()
        .enumerate()
        .map(|(index, s)| {
            if index as u32 >= planes { Scaler::default() } else { *s }
        })
        .collect()
}

impl<D: NddiDisplay> ScaledDctTiler<D> {
    /// Smallest snap delta whose estimated cost fits the budget.
    fn search_delta(blocks: &[Vec<Scaler>], budget: usize) -> u16 {
        let (mut lo, mut hi) = (0u16, MAX_DCT_COEFF);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let cost = estimate_cost(&blocks.iter().map(|c| snapped(c, mid)).collect::<Vec<_>>());
            if cost <= budget {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Largest trim plane count whose estimated cost fits the budget.
    fn search_planes(blocks: &[Vec<Scaler>], max_planes: u32, budget: usize) -> u32 {
        let (mut lo, mut hi) = (0u32, max_planes);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            let cost = estimate_cost(&blocks.iter().map(|c| trimmed(c, mid)).collect::<Vec<_>>());
            if cost <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }
}

impl<D: NddiDisplay> Tiler for ScaledDctTiler<D> {
    fn update_display(&mut self, buffer: &[u8], width: usize, height: usize) -> Result<()> {
        if (width as u32) < self.display_width || (height as u32) < self.display_height {
            return Err(NddiError::InvalidArgument(format!(
                "{width}x{height} frame cannot cover a {}x{} display",
                self.display_width, self.display_height
            )));
        }
        let (w, h) = (self.display_width, self.display_height);

        // The working signal: source shifted to signed, with each encoded
        // layer's reconstruction subtracted before the next layer runs.
        let mut working: Vec<[i16; 3]> = Vec::with_capacity((w * h) as usize);
        for y in 0..h as usize {
            for x in 0..w as usize {
                let offset = (y * width + x) * 3;
                working.push([
                    i16::from(buffer[offset]) - 128,
                    i16::from(buffer[offset + 1]) - 128,
                    i16::from(buffer[offset + 2]) - 128,
                ]);
            }
        }

        let layer_budget = if self.options.budget > 0 {
            self.options.budget / self.layers.len()
        } else {
            0
        };

        let last = self.layers.len() - 1;
        for index in 0..self.layers.len() {
            let layer = &self.layers[index];
            let down = downsample(&working, w, h, layer.scale);

            let ctx = &self.ctx;
            let (dw, dh, tiles_wide) = (layer.down_width, layer.down_height, layer.tiles_wide);
            let orders = &layer.selected_orders;
            let mut blocks: Vec<Vec<Scaler>> = (0..layer.stack_heights.len())
                .into_par_iter()
                .map(|t| {
                    let i = t as u32 % tiles_wide;
                    let j = t as u32 / tiles_wide;
                    let full = ctx.forward_block(&extract_signed_block(&down, dw, dh, i, j));
                    orders.iter().map(|&order| full[order]).collect()
                })
                .collect();

            if self.options.snap {
                let delta = if self.options.delta == 0 && layer_budget > 0 {
                    Self::search_delta(&blocks, layer_budget)
                } else {
                    self.options.delta
                };
                for coefficients in &mut blocks {
                    *coefficients = snapped(coefficients, delta);
                }
            }
            if self.options.trim {
                let planes = if self.options.planes == 0 && layer_budget > 0 {
                    Self::search_planes(&blocks, orders.len() as u32, layer_budget)
                } else {
                    self.options.planes
                };
                for coefficients in &mut blocks {
                    *coefficients = trimmed(coefficients, planes);
                }
            }

            // Emit the scaler stacks in block order.
            let layer = &mut self.layers[index];
            let mut planes_sent = 0usize;
            for (t, coefficients) in blocks.iter().enumerate() {
                let send = required_stack_height(coefficients, &mut layer.stack_heights[t]);
                if send == 0 {
                    continue;
                }
                let i = t as u32 % layer.tiles_wide;
                let j = t as u32 / layer.tiles_wide;
                self.display.fill_scaler_tile_stack(
                    &coefficients[..send],
                    &[
                        i * layer.block_span,
                        j * layer.block_span,
                        layer.first_plane,
                    ],
                    [layer.block_span, layer.block_span],
                )?;
                planes_sent += send;
            }
            tracing::debug!(scale = layer.scale, planes_sent, "scale layer encoded");

            // Subtract this layer's reconstruction so the next layer encodes
            // only the residual.
            if index < last {
                let layer = &self.layers[index];
                let (dw, dh) = (layer.down_width as usize, layer.down_height as usize);
                let mut rendered = vec![[0i16; 3]; dw * dh];
                for (t, coefficients) in blocks.iter().enumerate() {
                    let mut full = [Scaler::default(); BLOCK_SIZE];
                    for (slot, &order) in layer.selected_orders.iter().enumerate() {
                        full[order] = coefficients[slot];
                    }
                    let block = self.ctx.render_block(&full);
                    let i = t as u32 % layer.tiles_wide;
                    let j = t as u32 / layer.tiles_wide;
                    for y in 0..BLOCK {
                        let dy = j as usize * BLOCK + y;
                        if dy >= dh {
                            break;
                        }
                        for x in 0..BLOCK {
                            let dx = i as usize * BLOCK + x;
                            if dx >= dw {
                                break;
                            }
                            rendered[dy * dw + dx] = block[y * BLOCK + x];
                        }
                    }
                }
                let scale = layer.scale as usize;
                for y in 0..h as usize {
                    for x in 0..w as usize {
                        let r = rendered[(y / scale) * dw + x / scale];
                        let target = &mut working[y * w as usize + x];
                        for ch in 0..3 {
                            target[ch] = target[ch].saturating_sub(r[ch]);
                        }
                    }
                }
            }
        }
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

    const LAYERS: [ScaleLayerConfig; 2] = [
        ScaleLayerConfig { scale: 2, edge: 4 },
        ScaleLayerConfig { scale: 1, edge: 6 },
    ];

    fn tiler(options: ZeroingOptions) -> ScaledDctTiler<SimNddiDisplay> {
        ScaledDctTiler::new(SimNddiDisplay::new(), 16, 16, 4, &LAYERS, options).unwrap()
    }

    #[test]
    fn layer_planes_partition_the_stack() {
        let t = tiler(ZeroingOptions::default());
        assert_eq!(t.layers[0].first_plane, 0);
        assert_eq!(t.layers[0].selected_orders.len(), 16);
        assert_eq!(t.layers[1].first_plane, 16);
        assert_eq!(t.layers[1].selected_orders.len(), 36);
        // Both stacks fit the frame volume side by side.
        assert_eq!(t.layers[0].fv_x_offset, 8);
        assert_eq!(t.layers[1].fv_x_offset, 0);
    }

    #[test]
    fn rejects_bad_layer_configurations() {
        let bad_scale = [ScaleLayerConfig { scale: 3, edge: 4 }];
        assert!(
            ScaledDctTiler::new(
                SimNddiDisplay::new(), 16, 16, 4, &bad_scale, ZeroingOptions::default()
            )
            .is_err()
        );
        let duplicate = [
            ScaleLayerConfig { scale: 2, edge: 2 },
            ScaleLayerConfig { scale: 2, edge: 4 },
        ];
        assert!(
            ScaledDctTiler::new(
                SimNddiDisplay::new(), 16, 16, 4, &duplicate, ZeroingOptions::default()
            )
            .is_err()
        );
    }

    #[test]
    fn uniform_grey_emits_nothing_on_any_layer() {
        let mut t = tiler(ZeroingOptions::default());
        let frame = vec![128u8; 16 * 16 * 3];
        t.update_display(&frame, 16, 16).unwrap();
        assert!(t.layer_heights(0).iter().all(|&h| h == 0));
        assert!(t.layer_heights(1).iter().all(|&h| h == 0));
    }

    #[test]
    fn flat_frame_lands_in_the_coarse_layer_and_reconstructs() {
        let mut t = tiler(ZeroingOptions::default());
        let frame = vec![200u8; 16 * 16 * 3];
        t.update_display(&frame, 16, 16).unwrap();

        // The coarse layer carries the DC; the fine layer sees only the
        // small quantisation residual.
        assert!(t.layer_heights(0).iter().any(|&h| h > 0));

        t.display_mut().latch(SubRegion::full(16, 16)).unwrap();
        for pixel in t.display().presented().unwrap() {
            let err = (i32::from(pixel.r()) - 200).abs();
            assert!(err <= 8, "reconstructed {} for 200", pixel.r());
        }
    }

    #[test]
    fn snap_zeroes_small_coefficients() {
        let mut noisy = vec![128u8; 16 * 16 * 3];
        for (i, value) in noisy.iter_mut().enumerate() {
            *value = 128 + (i % 3) as u8;
        }

        let mut plain = tiler(ZeroingOptions::default());
        plain.update_display(&noisy, 16, 16).unwrap();
        let baseline: u32 = plain.layer_heights(1).iter().map(|&h| u32::from(h)).sum();

        let mut snapping = tiler(ZeroingOptions {
            snap: true,
            delta: 64,
            ..ZeroingOptions::default()
        });
        snapping.update_display(&noisy, 16, 16).unwrap();
        let snapped_total: u32 =
            snapping.layer_heights(1).iter().map(|&h| u32::from(h)).sum();
        assert!(
            snapped_total <= baseline,
            "snap sent more planes ({snapped_total}) than baseline ({baseline})"
        );
    }

    #[test]
    fn trim_bounds_every_stack_height() {
        let mut frame = vec![0u8; 16 * 16 * 3];
        for (i, value) in frame.iter_mut().enumerate() {
            *value = (i * 7 % 256) as u8;
        }
        let mut t = tiler(ZeroingOptions {
            trim: true,
            planes: 2,
            ..ZeroingOptions::default()
        });
        t.update_display(&frame, 16, 16).unwrap();
        assert!(t.layer_heights(0).iter().all(|&h| h <= 2));
        assert!(t.layer_heights(1).iter().all(|&h| h <= 2));
    }

    #[test]
    fn budget_search_caps_the_estimated_cost() {
        let blocks: Vec<Vec<Scaler>> = (0..4)
            .map(|_| (1..=8).map(|v| Scaler::splat_rgb(v * 30)).collect())
            .collect();
        let unbounded = estimate_cost(&blocks);
        assert!(unbounded > 100);

        let budget = unbounded / 2;
        let delta = ScaledDctTiler::<SimNddiDisplay>::search_delta(&blocks, budget);
        let snapped_blocks: Vec<Vec<Scaler>> =
            blocks.iter().map(|c| snapped(c, delta)).collect();
        assert!(estimate_cost(&snapped_blocks) <= budget);

        let planes = ScaledDctTiler::<SimNddiDisplay>::search_planes(&blocks, 8, budget);
        let trimmed_blocks: Vec<Vec<Scaler>> =
            blocks.iter().map(|c| trimmed(c, planes)).collect();
        assert!(estimate_cost(&trimmed_blocks) <= budget);
    }
}
