//! Flat tiling: every tile-map cell owns a fixed frame-volume slot, bound to
//! the coefficient planes once at start-up. Per frame only the pixel data is
//! recopied, batched into a single `CopyPixelTiles`, so the coefficient
//! planes never change after initialisation.

use nddi::{DisplayConfig, NddiDisplay, Pixel, Result, Scaler};

use super::{Tiler, rgb_at};

pub struct FlatTiler<D> {
    display: D,
    display_width: u32,
    display_height: u32,
    tile_width: u32,
    tile_height: u32,
    map_width: u32,
    map_height: u32,
}

impl<D: NddiDisplay> FlatTiler<D> {
    pub fn new(
        mut display: D,
        display_width: u32,
        display_height: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self> {
        let map_width = display_width.div_ceil(tile_width);
        let map_height = display_height.div_ceil(tile_height);
        let tile_count = map_width * map_height;

        display.initialize(&DisplayConfig::new(
            vec![tile_width, tile_height, tile_count],
            display_width,
            display_height,
            1,
            3,
        ))?;
        display.update_input_vector(&[1])?;

        // Bind each screen tile to its slot once; the z row never changes.
        for j in 0..map_height {
            for i in 0..map_width {
                let z = j * map_width + i;
                let matrix = [
                    1,
                    0,
                    -((i * tile_width) as i32),
                    0,
                    1,
                    -((j * tile_height) as i32),
                    0,
                    0,
                    z as i32,
                ];
                let start = [i * tile_width, j * tile_height, 0];
                let end = [
                    ((i + 1) * tile_width - 1).min(display_width - 1),
                    ((j + 1) * tile_height - 1).min(display_height - 1),
                    0,
                ];
                display.fill_coefficient_matrix(&matrix, &start, &end)?;
            }
        }
        display.fill_scaler(
            Scaler::full(nddi::pixel::DEFAULT_FULL_SCALER),
            &[0, 0, 0],
            &[display_width - 1, display_height - 1, 0],
        )?;

        Ok(Self {
            display,
            display_width,
            display_height,
            tile_width,
            tile_height,
            map_width,
            map_height,
        })
    }

    #[cfg(test)]
    fn display(&self) -> &D {
        &self.display
    }
}

impl<D: NddiDisplay> Tiler for FlatTiler<D> {
    fn update_display(&mut self, buffer: &[u8], width: usize, height: usize) -> Result<()> {
        let mut tiles = Vec::with_capacity((self.map_width * self.map_height) as usize);
        let mut starts = Vec::with_capacity(tiles.capacity());

        for j in 0..self.map_height {
            for i in 0..self.map_width {
                let mut pixels =
                    Vec::with_capacity((self.tile_width * self.tile_height) as usize);
                for ty in 0..self.tile_height {
                    for tx in 0..self.tile_width {
                        let x = (i * self.tile_width + tx) as usize;
                        let y = (j * self.tile_height + ty) as usize;
                        let [r, g, b] = if x < self.display_width as usize
                            && y < self.display_height as usize
                        {
                            rgb_at(buffer, width, height, x, y)
                        } else {
                            [0, 0, 0]
                        };
                        pixels.push(Pixel::from_rgb(r, g, b));
                    }
                }
                tiles.push(pixels);
                starts.push(vec![0, 0, j * self.map_width + i]);
            }
        }
        self.display
            .copy_pixel_tiles(&tiles, &starts, [self.tile_width, self.tile_height])
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
    fn tiles_land_in_their_slots_and_reassemble() {
        let mut tiler = FlatTiler::new(SimNddiDisplay::new(), 8, 8, 4, 4).unwrap();
        let mut frame = vec![0u8; 8 * 8 * 3];
        // A distinct value per quadrant.
        for y in 0..8 {
            for x in 0..8 {
                let v = (x / 4 + (y / 4) * 2 + 1) as u8 * 40;
                frame[(y * 8 + x) * 3] = v;
            }
        }
        tiler.update_display(&frame, 8, 8).unwrap();
        tiler.display_mut().latch(SubRegion::full(8, 8)).unwrap();

        let presented = tiler.display().presented().unwrap();
        assert_eq!(presented[0].r(), 40);
        assert_eq!(presented[7].r(), 80);
        assert_eq!(presented[63].r(), 160);
        // Quadrant pixels went to distinct frame-volume slots.
        let fv = tiler.display().frame_volume().unwrap();
        assert_eq!(fv.sample(&[0, 0, 0]).unwrap().r(), 40);
        assert_eq!(fv.sample(&[0, 0, 3]).unwrap().r(), 160);
    }
}
