//! The frame volume: an n-dimensional grid of pixels addressed by the
//! coordinates the coefficient matrices produce.

use crate::error::{NddiError, Result};
use crate::pixel::Pixel;
use crate::region::Region;

pub struct FrameVolume {
    dims: Vec<u32>,
    strides: Vec<usize>,
    pixels: Vec<Pixel>,
}

impl FrameVolume {
    pub fn new(dims: &[u32]) -> Result<Self> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(NddiError::InvalidArgument(format!(
                "frame volume dimensions {dims:?} must be non-empty and non-zero"
            )));
        }
        let mut strides = Vec::with_capacity(dims.len());
        let mut stride = 1usize;
        for d in dims {
            strides.push(stride);
            stride *= *d as usize;
        }
        Ok(Self {
            dims: dims.to_vec(),
            strides,
            pixels: vec![Pixel::default(); stride],
        })
    }

    #[must_use]
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dims.len()
    }

    fn index(&self, location: &[u32]) -> usize {
        location
            .iter()
            .zip(&self.strides)
            .map(|(c, s)| *c as usize * s)
            .sum()
    }

    /// Pixel at a signed coordinate, `None` when any axis is out of range.
    /// The blend loop uses this for coordinates computed from coefficient
    /// matrices, which may be arbitrary integers.
    #[must_use]
    pub fn sample(&self, location: &[i64]) -> Option<Pixel> {
        if location.len() != self.dims.len() {
            return None;
        }
        let mut index = 0usize;
        for ((&c, &d), &s) in location.iter().zip(&self.dims).zip(&self.strides) {
            if c < 0 || c >= i64::from(d) {
                return None;
            }
            index += c as usize * s;
        }
        Some(self.pixels[index])
    }

    pub fn put(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        let point = Region::point(location.to_vec())?;
        point.check_within(&self.dims)?;
        let index = self.index(location);
        self.pixels[index] = pixel;
        Ok(())
    }

    pub fn fill(&mut self, pixel: Pixel, region: &Region) -> Result<()> {
        region.check_within(&self.dims)?;
        for coord in region.iter() {
            let index = self.index(&coord);
            self.pixels[index] = pixel;
        }
        Ok(())
    }

    /// Copies `pixels` into `region`, source laid out with dimension 0
    /// varying fastest.
    pub fn copy(&mut self, pixels: &[Pixel], region: &Region) -> Result<()> {
        region.check_within(&self.dims)?;
        if pixels.len() < region.len() {
            return Err(NddiError::InvalidArgument(format!(
                "pixel payload holds {} pixels, region needs {}",
                pixels.len(),
                region.len()
            )));
        }
        for (coord, pixel) in region.iter().zip(pixels) {
            let index = self.index(&coord);
            self.pixels[index] = *pixel;
        }
        Ok(())
    }

    /// Copies the source region to `dest` through a snapshot, so overlapping
    /// source and destination are well defined.
    pub fn copy_within(&mut self, source: &Region, dest: &[u32]) -> Result<()> {
        source.check_within(&self.dims)?;
        let extent: Vec<u32> = source
            .start()
            .iter()
            .zip(source.end())
            .map(|(s, e)| e - s)
            .collect();
        let dest_end: Vec<u32> = dest.iter().zip(&extent).map(|(d, e)| d + e).collect();
        let dest_region = Region::new(dest.to_vec(), dest_end)?;
        dest_region.check_within(&self.dims)?;

        let snapshot: Vec<Pixel> = source
            .iter()
            .map(|coord| self.pixels[self.index(&coord)])
            .collect();
        for (coord, pixel) in dest_region.iter().zip(snapshot) {
            let index = self.index(&coord);
            self.pixels[index] = pixel;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn volume() -> FrameVolume {
        FrameVolume::new(&[4, 4, 2]).unwrap()
    }

    #[test]
    fn put_and_sample() {
        let mut fv = volume();
        fv.put(Pixel::from_rgb(1, 2, 3), &[3, 0, 1]).unwrap();
        assert_eq!(fv.sample(&[3, 0, 1]), Some(Pixel::from_rgb(1, 2, 3)));
        assert_eq!(fv.sample(&[0, 0, 0]), Some(Pixel::default()));
        assert_eq!(fv.sample(&[4, 0, 0]), None);
        assert_eq!(fv.sample(&[-1, 0, 0]), None);
    }

    #[test]
    fn put_out_of_range_fails() {
        let mut fv = volume();
        assert!(fv.put(Pixel::default(), &[0, 4, 0]).is_err());
        assert!(fv.put(Pixel::default(), &[0, 0]).is_err());
    }

    #[test]
    fn copy_lays_out_dimension_zero_fastest() {
        let mut fv = volume();
        let src = [
            Pixel::splat(1),
            Pixel::splat(2),
            Pixel::splat(3),
            Pixel::splat(4),
        ];
        let region = Region::new(vec![1, 1, 0], vec![2, 2, 0]).unwrap();
        fv.copy(&src, &region).unwrap();
        assert_eq!(fv.sample(&[1, 1, 0]), Some(Pixel::splat(1)));
        assert_eq!(fv.sample(&[2, 1, 0]), Some(Pixel::splat(2)));
        assert_eq!(fv.sample(&[1, 2, 0]), Some(Pixel::splat(3)));
        assert_eq!(fv.sample(&[2, 2, 0]), Some(Pixel::splat(4)));
    }

    #[test]
    fn copy_within_overlapping_uses_snapshot() {
        let mut fv = FrameVolume::new(&[4]).unwrap();
        for i in 0..4 {
            fv.put(Pixel::splat(i as u8 + 1), &[i]).unwrap();
        }
        // Shift [1,2,3,4] right by one: destination overlaps the source.
        let src = Region::new(vec![0], vec![2]).unwrap();
        fv.copy_within(&src, &[1]).unwrap();
        let got: Vec<u8> = (0..4)
            .map(|i| fv.sample(&[i]).unwrap().r())
            .collect();
        assert_eq!(got, vec![1, 1, 2, 3]);
    }

    #[test]
    fn copy_within_rejects_clipped_destination() {
        let mut fv = volume();
        let src = Region::new(vec![0, 0, 0], vec![1, 1, 0]).unwrap();
        assert!(fv.copy_within(&src, &[3, 3, 0]).is_err());
    }
}
