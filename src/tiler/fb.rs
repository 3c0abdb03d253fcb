//! Framebuffer mode: the simplest possible use of the display. The frame
//! volume is a 2-D image the size of the display, the single coefficient
//! plane is the identity, and every frame is one whole-image `CopyPixels`.

use nddi::{DisplayConfig, NddiDisplay, Pixel, Result, Scaler};

use super::{Tiler, rgb_at};

pub struct FbTiler<D> {
    display: D,
    width: u32,
    height: u32,
    staging: Vec<Pixel>,
}

impl<D: NddiDisplay> FbTiler<D> {
    pub fn new(mut display: D, width: u32, height: u32) -> Result<Self> {
        display.initialize(&DisplayConfig::new(vec![width, height], width, height, 1, 3))?;
        display.update_input_vector(&[1])?;
        display.fill_coefficient_matrix(
            &[1, 0, 0, 0, 1, 0],
            &[0, 0, 0],
            &[width - 1, height - 1, 0],
        )?;
        display.fill_scaler(
            Scaler::full(nddi::pixel::DEFAULT_FULL_SCALER),
            &[0, 0, 0],
            &[width - 1, height - 1, 0],
        )?;
        Ok(Self {
            display,
            width,
            height,
            staging: Vec::with_capacity(width as usize * height as usize),
        })
    }

    #[cfg(test)]
    fn display(&self) -> &D {
        &self.display
    }
}

impl<D: NddiDisplay> Tiler for FbTiler<D> {
    fn update_display(&mut self, buffer: &[u8], width: usize, height: usize) -> Result<()> {
        self.staging.clear();
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                let [r, g, b] = rgb_at(buffer, width, height, x, y);
                self.staging.push(Pixel::from_rgb(r, g, b));
            }
        }
        self.display
            .copy_pixels(&self.staging, &[0, 0], &[self.width - 1, self.height - 1])
    }

    fn display_mut(&mut self) -> &mut dyn NddiDisplay {
        &mut self.display
    }
}
