//! Content-addressed tile caching.
//!
//! Each tile-map cell's pixels are fingerprinted with a quality-masked
//! checksum; tiles whose fingerprint is already resident in the frame volume
//! are re-displayed by retargeting one coefficient instead of resending
//! pixels. The fingerprint is scoped to the cell, so the cache deduplicates a
//! cell's content across frames while every cell owns its own entries.
//!
//! The cache body is a slab of entries with two co-indexed views -
//! fingerprint to entry and age to entry - plus a display map of weak
//! (index) references recording which entry each cell currently shows.
//! Eviction is LRU by age, except that an entry the display map still shows
//! at the cell being replaced is reused in place when it has expired, which
//! saves the coefficient update.

use std::collections::{BTreeMap, HashMap};

use nddi::{DisplayConfig, NddiDisplay, NddiError, Pixel, Result, Scaler};
use rayon::prelude::*;

use super::{Tiler, rgb_at};

/// How tile fingerprints are computed from the masked pixels.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
pub enum Checksum {
    #[default]
    Crc32,
    Adler32,
    /// First and last pixel packed together. Debugging only.
    Trivial,
}

impl Checksum {
    fn digest(self, pixels: &[Pixel]) -> u64 {
        match self {
            Self::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                for p in pixels {
                    hasher.update(&p.0.to_le_bytes());
                }
                u64::from(hasher.finalize())
            }
            Self::Adler32 => {
                let (mut a, mut b) = (1u32, 0u32);
                for byte in pixels.iter().flat_map(|p| p.0.to_le_bytes()) {
                    a = (a + u32::from(byte)) % 65_521;
                    b = (b + a) % 65_521;
                }
                u64::from(b << 16 | a)
            }
            Self::Trivial => {
                u64::from(pixels[0].0) << 32 | u64::from(pixels[pixels.len() - 1].0)
            }
        }
    }
}

struct TileEntry {
    fingerprint: u64,
    z_index: u32,
    age: u64,
}

/// The owning container plus its two lookup views.
struct TileCache {
    entries: Vec<TileEntry>,
    by_fingerprint: HashMap<u64, usize>,
    by_age: BTreeMap<u64, usize>,
}

impl TileCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            by_fingerprint: HashMap::with_capacity(capacity),
            by_age: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, fingerprint: u64) -> Option<usize> {
        self.by_fingerprint.get(&fingerprint).copied()
    }

    fn age_of(&self, index: usize) -> u64 {
        self.entries[index].age
    }

    fn z_of(&self, index: usize) -> u32 {
        self.entries[index].z_index
    }

    fn refresh_age(&mut self, index: usize, age: u64) -> Result<()> {
        let old = self.entries[index].age;
        self.by_age.remove(&old);
        self.entries[index].age = age;
        if self.by_age.insert(age, index).is_some() {
            return Err(NddiError::CacheConsistency(format!(
                "age {age} assigned twice"
            )));
        }
        Ok(())
    }

    /// Adds a fresh entry whose z index is the next free frame-volume slot.
    fn insert(&mut self, fingerprint: u64, age: u64) -> Result<usize> {
        let index = self.entries.len();
        self.entries.push(TileEntry {
            fingerprint,
            z_index: index as u32,
            age,
        });
        if self.by_fingerprint.insert(fingerprint, index).is_some() {
            return Err(NddiError::CacheConsistency(format!(
                "fingerprint {fingerprint:#018x} inserted twice"
            )));
        }
        if self.by_age.insert(age, index).is_some() {
            return Err(NddiError::CacheConsistency(format!(
                "age {age} assigned twice"
            )));
        }
        Ok(index)
    }

    /// Re-keys an existing entry for new content; its frame-volume slot is
    /// reused in place.
    fn rekey(&mut self, index: usize, fingerprint: u64, age: u64) -> Result<()> {
        let entry = &mut self.entries[index];
        self.by_fingerprint.remove(&entry.fingerprint);
        self.by_age.remove(&entry.age);
        entry.fingerprint = fingerprint;
        entry.age = age;
        if self.by_fingerprint.insert(fingerprint, index).is_some() {
            return Err(NddiError::CacheConsistency(format!(
                "fingerprint {fingerprint:#018x} inserted twice"
            )));
        }
        if self.by_age.insert(age, index).is_some() {
            return Err(NddiError::CacheConsistency(format!(
                "age {age} assigned twice"
            )));
        }
        Ok(())
    }

    /// The least-recently-used entry. The cache is never empty when this is
    /// called: eviction only happens once it has filled.
    fn min_age(&self) -> Result<usize> {
        self.by_age
            .values()
            .next()
            .copied()
            .ok_or_else(|| NddiError::CacheConsistency("eviction from an empty cache".into()))
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct CacheStats {
    pub unchanged: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct CachedTiler<D> {
    display: D,
    display_width: u32,
    display_height: u32,
    tile_width: u32,
    tile_height: u32,
    max_tiles: usize,
    bits: u32,
    checksum: Checksum,
    map_width: u32,
    map_height: u32,
    cache: TileCache,
    /// Weak references: which cache entry each tile-map cell currently shows.
    display_map: Vec<Option<usize>>,
    age_counter: u64,
    stats: CacheStats,
}

impl<D: NddiDisplay> CachedTiler<D> {
    pub fn new(
        mut display: D,
        display_width: u32,
        display_height: u32,
        tile_width: u32,
        tile_height: u32,
        max_tiles: usize,
        bits: u32,
    ) -> Result<Self> {
        if !(1..=8).contains(&bits) {
            return Err(NddiError::InvalidArgument(format!(
                "significant bits {bits} must be within 1..=8"
            )));
        }
        if max_tiles == 0 {
            return Err(NddiError::InvalidArgument(
                "tile cache needs room for at least one tile".into(),
            ));
        }
        let map_width = display_width.div_ceil(tile_width);
        let map_height = display_height.div_ceil(tile_height);

        display.initialize(&DisplayConfig::new(
            vec![tile_width, tile_height, max_tiles as u32],
            display_width,
            display_height,
            1,
            3,
        ))?;
        display.update_input_vector(&[1])?;
        display.fill_pixel(
            Pixel::splat(0xff),
            &[0, 0, 0],
            &[tile_width - 1, tile_height - 1, max_tiles as u32 - 1],
        )?;

        // Near-identity matrices translating each screen tile to the tile
        // origin; the z row starts at zero and is retargeted per frame.
        for j in 0..map_height {
            for i in 0..map_width {
                let matrix = [
                    1,
                    0,
                    -((i * tile_width) as i32),
                    0,
                    1,
                    -((j * tile_height) as i32),
                    0,
                    0,
                    0,
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
        let full = [display_width - 1, display_height - 1, 0];
        display.fill_scaler(Scaler::default(), &[0, 0, 0], &full)?;
        display.fill_scaler(
            Scaler::full(nddi::pixel::DEFAULT_FULL_SCALER),
            &[0, 0, 0],
            &full,
        )?;

        Ok(Self {
            display,
            display_width,
            display_height,
            tile_width,
            tile_height,
            max_tiles,
            bits,
            checksum: Checksum::default(),
            map_width,
            map_height,
            cache: TileCache::new(max_tiles),
            display_map: vec![None; (map_width * map_height) as usize],
            age_counter: 0,
            stats: CacheStats::default(),
        })
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }

    #[cfg(test)]
    fn display(&self) -> &D {
        &self.display
    }

    #[cfg(test)]
    fn stats(&self) -> CacheStats {
        self.stats
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// An entry younger than one full tile-map period is likely still shown
    /// somewhere and must not be reused in place.
    fn in_use(&self, age: u64) -> bool {
        let period = u64::from(self.map_width) * u64::from(self.map_height);
        age.saturating_add(period) >= self.age_counter
    }

    /// Verifies the cache invariants; a breach means a tiler bug.
    fn check_consistency(&self) -> Result<()> {
        if self.cache.by_fingerprint.len() != self.cache.len()
            || self.cache.by_age.len() != self.cache.len()
            || self.cache.len() > self.max_tiles
        {
            return Err(NddiError::CacheConsistency(format!(
                "{} entries, {} fingerprints, {} ages, capacity {}",
                self.cache.len(),
                self.cache.by_fingerprint.len(),
                self.cache.by_age.len(),
                self.max_tiles
            )));
        }
        for resident in self.display_map.iter().flatten() {
            if *resident >= self.cache.len() {
                return Err(NddiError::CacheConsistency(format!(
                    "display map references missing entry {resident}"
                )));
            }
        }
        Ok(())
    }
}

/// Pulls one tile out of the frame, returning the pixels and their
/// quality-masked counterparts. Pixels beyond the display edge are black.
fn extract_tile(
    buffer: &[u8],
    (frame_w, frame_h): (usize, usize),
    (display_w, display_h): (u32, u32),
    (tile_w, tile_h): (u32, u32),
    (i, j): (u32, u32),
    bits: u32,
) -> (Vec<Pixel>, Vec<Pixel>) {
    let mut pixels = Vec::with_capacity((tile_w * tile_h) as usize);
    let mut masked = Vec::with_capacity(pixels.capacity());
    for ty in 0..tile_h {
        for tx in 0..tile_w {
            let x = i * tile_w + tx;
            let y = j * tile_h + ty;
            let pixel = if x < display_w && y < display_h {
                let [r, g, b] = rgb_at(buffer, frame_w, frame_h, x as usize, y as usize);
                Pixel::from_rgb(r, g, b)
            } else {
                Pixel::from_rgb(0, 0, 0)
            };
            pixels.push(pixel);
            masked.push(pixel.masked(bits));
        }
    }
    (pixels, masked)
}

impl<D: NddiDisplay> Tiler for CachedTiler<D> {
    fn update_display(&mut self, buffer: &[u8], width: usize, height: usize) -> Result<()> {
        let (mut unchanged, mut hits, mut misses) = (0u64, 0u64, 0u64);

        // Staging for the two once-per-frame bulk commands.
        let mut tile_pixels: Vec<Vec<Pixel>> = Vec::new();
        let mut tile_starts: Vec<Vec<u32>> = Vec::new();
        let mut coefficients: Vec<i32> = Vec::new();
        let mut coefficient_positions: Vec<[u32; 2]> = Vec::new();
        let mut coefficient_starts: Vec<Vec<u32>> = Vec::new();

        // Tile extraction and fingerprinting are pure; compute them for all
        // cells in parallel, then walk the cells in order for the cache
        // bookkeeping, which is sequential by nature (ages, eviction). Only
        // the frame buffer and geometry cross the thread boundary.
        let (display, tile) = (
            (self.display_width, self.display_height),
            (self.tile_width, self.tile_height),
        );
        let (bits, checksum, map_width) = (self.bits, self.checksum, self.map_width);
        let extracted: Vec<(Vec<Pixel>, u64)> = (0..self.display_map.len())
            .into_par_iter()
            .map(|cell| {
                let i = cell as u32 % map_width;
                let j = cell as u32 / map_width;
                let (pixels, masked) =
                    extract_tile(buffer, (width, height), display, tile, (i, j), bits);
                // Cell-scoped fingerprint over the quality-masked tile.
                let fingerprint = (cell as u64) << 32 ^ checksum.digest(&masked);
                (pixels, fingerprint)
            })
            .collect();

        for (cell, (pixels, fingerprint)) in extracted.into_iter().enumerate() {
            let i = cell as u32 % self.map_width;
            let j = cell as u32 / self.map_width;
            self.age_counter += 1;

            let (tw, th) = (self.tile_width, self.tile_height);
            let retarget = |entry_z: u32,
                            coefficients: &mut Vec<i32>,
                            positions: &mut Vec<[u32; 2]>,
                            starts: &mut Vec<Vec<u32>>| {
                coefficients.push(entry_z as i32);
                positions.push([2, 2]);
                starts.push(vec![i * tw, j * th, 0]);
            };

            if let Some(index) = self.cache.lookup(fingerprint) {
                self.cache.refresh_age(index, self.age_counter)?;
                if self.display_map[cell] == Some(index) {
                    unchanged += 1;
                } else {
                    hits += 1;
                    self.display_map[cell] = Some(index);
                    retarget(
                        self.cache.z_of(index),
                        &mut coefficients,
                        &mut coefficient_positions,
                        &mut coefficient_starts,
                    );
                }
                continue;
            }

            misses += 1;
            if self.cache.len() < self.max_tiles {
                let index = self.cache.insert(fingerprint, self.age_counter)?;
                self.display_map[cell] = Some(index);
                tile_pixels.push(pixels);
                tile_starts.push(vec![0, 0, self.cache.z_of(index)]);
                retarget(
                    self.cache.z_of(index),
                    &mut coefficients,
                    &mut coefficient_positions,
                    &mut coefficient_starts,
                );
            } else {
                // Prefer the entry this cell already shows: overwriting
                // it in place keeps the coefficient planes untouched.
                let resident = self.display_map[cell];
                let (victim, keep_coefficients) = match resident {
                    Some(index) if !self.in_use(self.cache.age_of(index)) => (index, true),
                    _ => (self.cache.min_age()?, false),
                };
                self.cache.rekey(victim, fingerprint, self.age_counter)?;
                self.display_map[cell] = Some(victim);
                tile_pixels.push(pixels);
                tile_starts.push(vec![0, 0, self.cache.z_of(victim)]);
                if !keep_coefficients {
                    retarget(
                        self.cache.z_of(victim),
                        &mut coefficients,
                        &mut coefficient_positions,
                        &mut coefficient_starts,
                    );
                }
            }
        }

        let size = [self.tile_width, self.tile_height];
        if !tile_pixels.is_empty() {
            self.display.copy_pixel_tiles(&tile_pixels, &tile_starts, size)?;
        }
        if !coefficients.is_empty() {
            self.display.fill_coefficient_tiles(
                &coefficients,
                &coefficient_positions,
                &coefficient_starts,
                size,
            )?;
        }

        self.stats.unchanged += unchanged;
        self.stats.hits += hits;
        self.stats.misses += misses;
        tracing::debug!(
            unchanged = self.stats.unchanged,
            hits = self.stats.hits,
            misses = self.stats.misses,
            cache_size = self.cache.len(),
            "cached tiling frame complete"
        );
        self.check_consistency()
    }

    fn display_mut(&mut self) -> &mut dyn NddiDisplay {
        &mut self.display
    }
}
