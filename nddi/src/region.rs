//! Axis-aligned hyper-rectangles over the display memories.
//!
//! Every bulk command addresses its target memory through a [`Region`], an
//! inclusive `start..=end` box of arbitrary dimensionality. Validation is
//! performed once against the addressed memory's size; iteration yields
//! coordinates with dimension 0 varying fastest, the layout every pixel and
//! coefficient payload uses.

use crate::error::{NddiError, Result};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Region {
    start: Vec<u32>,
    end: Vec<u32>,
}

impl Region {
    /// A region covering `start..=end`. Fails when dimensionalities differ or
    /// any `start[i] > end[i]`.
    pub fn new(start: Vec<u32>, end: Vec<u32>) -> Result<Self> {
        if start.len() != end.len() || start.is_empty() {
            return Err(NddiError::InvalidArgument(format!(
                "region endpoints have mismatched dimensionality ({} vs {})",
                start.len(),
                end.len()
            )));
        }
        if start.iter().zip(&end).any(|(s, e)| s > e) {
            return Err(NddiError::InvalidArgument(format!(
                "region start {start:?} exceeds end {end:?}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A single coordinate as a degenerate region.
    pub fn point(location: Vec<u32>) -> Result<Self> {
        Self::new(location.clone(), location)
    }

    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    #[must_use]
    pub fn start(&self) -> &[u32] {
        &self.start
    }

    #[must_use]
    pub fn end(&self) -> &[u32] {
        &self.end
    }

    /// Number of cells covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.start
            .iter()
            .zip(&self.end)
            .map(|(s, e)| (e - s + 1) as usize)
            .product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // start <= end is checked at construction, so at least one cell
    }

    /// Ensures the region lies within a memory of the given dimensional sizes.
    pub fn check_within(&self, size: &[u32]) -> Result<()> {
        let in_range = self.start.len() == size.len()
            && self.end.iter().zip(size).all(|(e, s)| e < s);
        if in_range {
            Ok(())
        } else {
            Err(NddiError::OutOfRange {
                start: self.start.clone(),
                end: self.end.clone(),
                size: size.to_vec(),
            })
        }
    }

    /// The single axis along which `start` and `end` differ, for strip copies.
    /// Fails unless exactly one axis differs (a degenerate strip of one pixel
    /// is allowed and reports axis 0).
    pub fn strip_axis(&self) -> Result<usize> {
        let mut axes = self
            .start
            .iter()
            .zip(&self.end)
            .enumerate()
            .filter(|(_, (s, e))| s != e)
            .map(|(i, _)| i);
        let axis = axes.next().unwrap_or(0);
        if axes.next().is_some() {
            return Err(NddiError::InvalidArgument(format!(
                "strip {:?}..={:?} varies along more than one axis",
                self.start, self.end
            )));
        }
        Ok(axis)
    }

    /// Iterates every coordinate, dimension 0 varying fastest.
    pub fn iter(&self) -> RegionIter<'_> {
        RegionIter {
            region: self,
            next: Some(self.start.clone()),
        }
    }
}

pub struct RegionIter<'a> {
    region: &'a Region,
    next: Option<Vec<u32>>,
}

impl Iterator for RegionIter<'_> {
    type Item = Vec<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut following = current.clone();
        let mut dim = 0;
        loop {
            if dim == following.len() {
                // Wrapped past the last dimension; iteration is done.
                break;
            }
            if following[dim] < self.region.end[dim] {
                following[dim] += 1;
                self.next = Some(following);
                break;
            }
            following[dim] = self.region.start[dim];
            dim += 1;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_inverted_bounds() {
        assert!(Region::new(vec![2, 0], vec![1, 5]).is_err());
        assert!(Region::new(vec![0], vec![0, 1]).is_err());
    }

    #[test]
    fn len_counts_inclusive_cells() {
        let r = Region::new(vec![1, 1, 0], vec![2, 3, 0]).unwrap();
        assert_eq!(r.len(), 6);
        assert_eq!(Region::point(vec![4, 4]).unwrap().len(), 1);
    }

    #[test]
    fn bounds_check_is_exclusive_of_size() {
        let r = Region::new(vec![0, 0], vec![7, 7]).unwrap();
        assert!(r.check_within(&[8, 8]).is_ok());
        assert!(r.check_within(&[8, 7]).is_err());
        assert!(r.check_within(&[8, 8, 1]).is_err());
    }

    #[test]
    fn iteration_varies_dimension_zero_fastest() {
        let r = Region::new(vec![0, 0, 1], vec![1, 1, 1]).unwrap();
        let coords: Vec<_> = r.iter().collect();
        assert_eq!(
            coords,
            vec![vec![0, 0, 1], vec![1, 0, 1], vec![0, 1, 1], vec![1, 1, 1]]
        );
    }

    #[test]
    fn strip_axis_requires_single_varying_dimension() {
        let strip = Region::new(vec![0, 3, 2], vec![0, 6, 2]).unwrap();
        assert_eq!(strip.strip_axis().unwrap(), 1);
        let block = Region::new(vec![0, 0, 0], vec![1, 1, 0]).unwrap();
        assert!(block.strip_axis().is_err());
    }
}
