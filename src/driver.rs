//! The per-frame loop: pull a decoded frame, hand it to the active tiler,
//! latch the sub-region. Optionally a window of frames is buffered so
//! playback can rewind through it before resuming the decoder.

use anyhow::{Context, Result};
use nddi::SubRegion;

use crate::rewinder::Rewinder;
use crate::source::FrameSource;
use crate::tiler::Tiler;

#[derive(Default)]
pub struct DriverOptions {
    /// Decoded frames to discard before the first display.
    pub start_frame: u64,
    /// Stop after this many displayed frames.
    pub max_frames: Option<u64>,
    /// `(start, count)`: after displaying frame `start - 1`, replay the
    /// previous `count` frames backwards and forwards before resuming.
    pub rewind: Option<(u64, u64)>,
    /// Sub-rectangle latched each frame; the whole display when absent.
    pub sub_region: Option<SubRegion>,
}

pub struct Driver {
    tiler: Box<dyn Tiler>,
    options: DriverOptions,
    sub: SubRegion,
}

impl Driver {
    pub fn new(mut tiler: Box<dyn Tiler>, options: DriverOptions) -> Result<Self> {
        let width = tiler.display_mut().display_width()?;
        let height = tiler.display_mut().display_height()?;
        let sub = options.sub_region.unwrap_or(SubRegion::full(width, height));
        Ok(Self {
            tiler,
            options,
            sub,
        })
    }

    fn present(&mut self, frame: &[u8], width: usize, height: usize) -> Result<()> {
        self.tiler.update_display(frame, width, height)?;
        self.tiler.display_mut().latch(self.sub)?;
        Ok(())
    }

    /// Runs the session to the end of the source (or the frame limit) and
    /// shuts the display down. Returns the number of frames presented.
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<u64> {
        let (width, height) = (source.width() as usize, source.height() as usize);
        let mut rewinder = self
            .options
            .rewind
            .map(|(start, count)| (Rewinder::new(count as usize), start, count));

        let mut displayed = 0u64;
        let mut skipped = 0u64;
        'frames: loop {
            if let Some(max) = self.options.max_frames {
                if displayed >= max {
                    break;
                }
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };
            if skipped < self.options.start_frame {
                skipped += 1;
                continue;
            }

            self.present(&frame, width, height)
                .with_context(|| format!("presenting frame {displayed}"))?;
            displayed += 1;

            let mut window_full = false;
            if let Some((store, start, count)) = &mut rewinder {
                let index = displayed - 1; // display order of the frame just shown
                let window_start = start.saturating_sub(*count);
                if index >= window_start && index < *start {
                    store.store((index - window_start) as usize, frame)?;
                }
                window_full = index + 1 == *start && *count > 1;
            }

            if !window_full {
                continue;
            }
            // One rewind per session, matching the configuration.
            if let Some((store, start, count)) = rewinder.take() {
                tracing::info!(start, count, "rewinding");
                // Backwards over the stored window, then forwards again.
                for slot in (0..count - 1).rev().chain(1..count) {
                    if let Some(max) = self.options.max_frames {
                        if displayed >= max {
                            break 'frames;
                        }
                    }
                    let stored = store.frame(slot as usize)?.to_vec();
                    self.present(&stored, width, height)
                        .with_context(|| format!("replaying rewind slot {slot}"))?;
                    displayed += 1;
                }
            }
        }

        self.tiler.display_mut().shutdown()?;
        tracing::info!(frames = displayed, "session finished");
        Ok(displayed)
    }
}
