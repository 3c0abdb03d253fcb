//! Command recording and deterministic playback.
//!
//! The recorder end pairs a [`RecorderDisplay`] (an [`NddiDisplay`] whose
//! every method enqueues one command) with a background worker that drains
//! the queue into an append-only binary log, closed by the EOT sentinel. The
//! player end is symmetric: a reader thread parses records into the queue
//! while the foreground loop applies them to a live display. Producer and
//! consumer share one mutex-guarded FIFO and the consumer yields
//! cooperatively when it runs dry; nothing ever blocks on a condition
//! variable.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::command::Command;
use crate::error::{NddiError, Result};
use crate::interface::{DisplayConfig, NddiDisplay, SubRegion};
use crate::pixel::{DEFAULT_FULL_SCALER, Pixel, Scaler, SignMode};

type CommandQueue = Arc<Mutex<VecDeque<Command>>>;

fn lock(queue: &Mutex<VecDeque<Command>>) -> MutexGuard<'_, VecDeque<Command>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streams commands to a binary log from a dedicated worker thread.
pub struct CommandRecorder {
    queue: CommandQueue,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl CommandRecorder {
    /// Opens `path` for writing and starts the drain worker.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let queue: CommandQueue = Arc::default();
        let finished = Arc::new(AtomicBool::new(false));

        let worker_queue = Arc::clone(&queue);
        let worker_finished = Arc::clone(&finished);
        let worker = thread::spawn(move || {
            let mut writer = BufWriter::new(file);
            loop {
                let next = lock(&worker_queue).pop_front();
                match next {
                    Some(command) => command.write_record(&mut writer)?,
                    None if worker_finished.load(Ordering::Acquire) => break,
                    None => thread::yield_now(),
                }
            }
            Command::write_eot(&mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            Ok(())
        });

        tracing::info!(path = %path.display(), "recording commands");
        Ok(Self {
            queue,
            finished,
            worker: Some(worker),
        })
    }

    pub fn record(&self, command: Command) {
        lock(&self.queue).push_back(command);
    }

    /// Signals the end of the session, waits for the log to drain and
    /// returns the worker's write result.
    pub fn finish(mut self) -> Result<()> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| NddiError::InvalidArgument("recorder worker panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if let Err(error) = self.join_worker() {
            tracing::warn!(%error, "command log truncated");
        }
    }
}

/// An `NddiDisplay` that records every command instead of executing it.
/// Query methods answer from the configuration cached at `initialize`, as a
/// session's configuration cannot change afterwards.
pub struct RecorderDisplay {
    recorder: CommandRecorder,
    config: Option<DisplayConfig>,
    full_scaler: u16,
}

impl RecorderDisplay {
    /// Starts a recording session at `path`. The `Initialize` command is
    /// recorded when the tiler initialises the display.
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            recorder: CommandRecorder::create(path)?,
            config: None,
            full_scaler: DEFAULT_FULL_SCALER,
        })
    }

    /// Closes the log, writing the EOT sentinel. Dropping the display closes
    /// the log as well; this form surfaces write errors.
    pub fn finish(self) -> Result<()> {
        self.recorder.finish()
    }

    fn config(&self) -> Result<&DisplayConfig> {
        self.config.as_ref().ok_or(NddiError::NotInitialised)
    }
}

impl NddiDisplay for RecorderDisplay {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<()> {
        if self.config.is_some() {
            return Err(NddiError::InvalidArgument(
                "recording session is already initialised".into(),
            ));
        }
        self.config = Some(config.clone());
        self.recorder.record(Command::Initialize(config.clone()));
        Ok(())
    }

    fn display_width(&mut self) -> Result<u32> {
        self.recorder.record(Command::DisplayWidth);
        Ok(self.config()?.display_width)
    }

    fn display_height(&mut self) -> Result<u32> {
        self.recorder.record(Command::DisplayHeight);
        Ok(self.config()?.display_height)
    }

    fn num_coefficient_planes(&mut self) -> Result<u32> {
        self.recorder.record(Command::NumCoefficientPlanes);
        Ok(self.config()?.num_coefficient_planes)
    }

    fn put_pixel(&mut self, pixel: Pixel, location: &[u32]) -> Result<()> {
        self.recorder.record(Command::PutPixel {
            pixel,
            location: location.to_vec(),
        });
        Ok(())
    }

    fn copy_pixel_strip(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        self.recorder.record(Command::CopyPixelStrip {
            pixels: pixels.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn copy_pixels(&mut self, pixels: &[Pixel], start: &[u32], end: &[u32]) -> Result<()> {
        self.recorder.record(Command::CopyPixels {
            pixels: pixels.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn copy_pixel_tiles(
        &mut self,
        tiles: &[Vec<Pixel>],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.recorder.record(Command::CopyPixelTiles {
            tiles: tiles.to_vec(),
            starts: starts.to_vec(),
            size,
        });
        Ok(())
    }

    fn fill_pixel(&mut self, pixel: Pixel, start: &[u32], end: &[u32]) -> Result<()> {
        self.recorder.record(Command::FillPixel {
            pixel,
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn copy_frame_volume(&mut self, start: &[u32], end: &[u32], dest: &[u32]) -> Result<()> {
        self.recorder.record(Command::CopyFrameVolume {
            start: start.to_vec(),
            end: end.to_vec(),
            dest: dest.to_vec(),
        });
        Ok(())
    }

    fn update_input_vector(&mut self, values: &[i32]) -> Result<()> {
        self.recorder.record(Command::UpdateInputVector {
            values: values.to_vec(),
        });
        Ok(())
    }

    fn put_coefficient_matrix(&mut self, matrix: &[i32], location: &[u32]) -> Result<()> {
        self.recorder.record(Command::PutCoefficientMatrix {
            matrix: matrix.to_vec(),
            location: location.to_vec(),
        });
        Ok(())
    }

    fn fill_coefficient_matrix(
        &mut self,
        matrix: &[i32],
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        self.recorder.record(Command::FillCoefficientMatrix {
            matrix: matrix.to_vec(),
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn fill_coefficient(
        &mut self,
        coefficient: i32,
        row: u32,
        col: u32,
        start: &[u32],
        end: &[u32],
    ) -> Result<()> {
        self.recorder.record(Command::FillCoefficient {
            coefficient,
            row,
            col,
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn fill_coefficient_tiles(
        &mut self,
        coefficients: &[i32],
        positions: &[[u32; 2]],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.recorder.record(Command::FillCoefficientTiles {
            coefficients: coefficients.to_vec(),
            positions: positions.to_vec(),
            starts: starts.to_vec(),
            size,
        });
        Ok(())
    }

    fn fill_scaler(&mut self, scaler: Scaler, start: &[u32], end: &[u32]) -> Result<()> {
        self.recorder.record(Command::FillScaler {
            scaler,
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn fill_scaler_tiles(
        &mut self,
        scalers: &[Scaler],
        starts: &[Vec<u32>],
        size: [u32; 2],
    ) -> Result<()> {
        self.recorder.record(Command::FillScalerTiles {
            scalers: scalers.to_vec(),
            starts: starts.to_vec(),
            size,
        });
        Ok(())
    }

    fn fill_scaler_tile_stack(
        &mut self,
        scalers: &[Scaler],
        start: &[u32],
        size: [u32; 2],
    ) -> Result<()> {
        self.recorder.record(Command::FillScalerTileStack {
            scalers: scalers.to_vec(),
            start: start.to_vec(),
            size,
        });
        Ok(())
    }

    fn set_pixel_byte_sign_mode(&mut self, mode: SignMode) -> Result<()> {
        self.recorder.record(Command::SetPixelByteSignMode(mode));
        Ok(())
    }

    fn set_full_scaler(&mut self, scaler: u16) -> Result<()> {
        self.full_scaler = scaler;
        self.recorder.record(Command::SetFullScaler(scaler));
        Ok(())
    }

    fn get_full_scaler(&mut self) -> Result<u16> {
        self.recorder.record(Command::GetFullScaler);
        Ok(self.full_scaler)
    }

    fn latch(&mut self, sub: SubRegion) -> Result<()> {
        self.recorder.record(Command::Latch(sub));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.recorder.record(Command::Shutdown);
        Ok(())
    }
}

/// Replays a command log against a live display.
pub struct CommandPlayer {
    path: PathBuf,
}

impl CommandPlayer {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses the log on a reader thread and applies every command in order
    /// on the calling thread. The display is created by `create_display`
    /// from the logged `Initialize` parameters. On end-of-stream a final
    /// `Latch(0, 0, 1, 1)` flushes any renderer that batches output, and the
    /// display is dropped.
    pub fn play<F>(&self, mut create_display: F) -> Result<()>
    where
        F: FnMut(&DisplayConfig) -> Result<Box<dyn NddiDisplay>>,
    {
        let queue: CommandQueue = Arc::default();
        let finished = Arc::new(AtomicBool::new(false));

        let reader_queue = Arc::clone(&queue);
        let reader_finished = Arc::clone(&finished);
        let path = self.path.clone();
        let reader = thread::spawn(move || {
            let result = Self::read_log(&path, &reader_queue);
            reader_finished.store(true, Ordering::Release);
            result
        });

        let mut display: Option<Box<dyn NddiDisplay>> = None;
        let mut played = 0usize;
        let apply_result = loop {
            let next = lock(&queue).pop_front();
            match next {
                Some(Command::Initialize(config)) => match create_display(&config) {
                    Ok(created) => display = Some(created),
                    Err(error) => break Err(error),
                },
                Some(command) => {
                    let Some(target) = display.as_mut() else {
                        break Err(NddiError::NotInitialised);
                    };
                    if let Err(error) = command.apply(target.as_mut()) {
                        break Err(error);
                    }
                    played += 1;
                }
                None if finished.load(Ordering::Acquire) => break Ok(()),
                None => thread::yield_now(),
            }
        };

        let read_result = reader
            .join()
            .map_err(|_| NddiError::InvalidArgument("player reader panicked".into()))?;
        read_result?;
        apply_result?;

        tracing::info!(commands = played, "playback complete");
        if let Some(mut target) = display {
            target.latch(SubRegion::new(0, 0, 1, 1))?;
        }
        Ok(())
    }

    fn read_log(path: &Path, queue: &Mutex<VecDeque<Command>>) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        while let Some(command) = Command::read_record(&mut reader)? {
            lock(queue).push_back(command);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SimNddiDisplay;
    use pretty_assertions::assert_eq;

    fn config() -> DisplayConfig {
        DisplayConfig::new(vec![4, 4, 1], 4, 4, 1, 3)
    }

    fn read_all(path: &Path) -> Vec<Command> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let mut commands = Vec::new();
        while let Some(command) = Command::read_record(&mut reader).unwrap() {
            commands.push(command);
        }
        commands
    }

    #[test]
    fn recorder_writes_commands_in_order_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.nddi");

        let mut display = RecorderDisplay::create(&path).unwrap();
        display.initialize(&config()).unwrap();
        display.put_pixel(Pixel::splat(3), &[1, 1, 0]).unwrap();
        display.latch(SubRegion::full(4, 4)).unwrap();
        display.shutdown().unwrap();
        display.finish().unwrap();

        let commands = read_all(&path);
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0], Command::Initialize(config()));
        assert_eq!(
            commands[1],
            Command::PutPixel {
                pixel: Pixel::splat(3),
                location: vec![1, 1, 0],
            }
        );
        assert_eq!(commands[3], Command::Shutdown);
    }

    #[test]
    fn recorder_queries_answer_from_cached_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.nddi");
        let mut display = RecorderDisplay::create(&path).unwrap();
        display.initialize(&config()).unwrap();
        assert_eq!(display.display_width().unwrap(), 4);
        assert_eq!(display.num_coefficient_planes().unwrap(), 1);
        display.set_full_scaler(1024).unwrap();
        assert_eq!(display.get_full_scaler().unwrap(), 1024);
        display.finish().unwrap();
        // The queries were still recorded.
        assert_eq!(read_all(&path).len(), 5);
    }

    #[test]
    fn playback_reproduces_direct_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.nddi");

        let mut recording = RecorderDisplay::create(&path).unwrap();
    recording.initialize(&config()).unwrap();
        recording
            .fill_pixel(Pixel::splat(0xff), &[0, 0, 0], &[3, 3, 0])
            .unwrap();
        recording
            .put_pixel(Pixel::from_rgb(0, 0, 0xff), &[2, 2, 0])
            .unwrap();
        recording.latch(SubRegion::full(4, 4)).unwrap();
        recording.shutdown().unwrap();
        recording.finish().unwrap();

        // Play against a shared model so the memories survive the player
        // dropping its handle.
        let shared = Arc::new(Mutex::new(SimNddiDisplay::new()));
        let handle = Arc::clone(&shared);
        CommandPlayer::new(&path)
            .play(move |logged| {
                assert_eq!(logged, &config());
                let mut created = Arc::clone(&handle);
                created.initialize(logged)?;
                Ok(Box::new(created))
            })
            .unwrap();

        let mut direct = SimNddiDisplay::new();
        direct.initialize(&config()).unwrap();
        direct
            .fill_pixel(Pixel::splat(0xff), &[0, 0, 0], &[3, 3, 0])
            .unwrap();
        direct
            .put_pixel(Pixel::from_rgb(0, 0, 0xff), &[2, 2, 0])
            .unwrap();

        let replayed = shared.lock().unwrap();
        for i in 0..16u32 {
            let at = [i64::from(i % 4), i64::from(i / 4), 0];
            assert_eq!(
                replayed.frame_volume().unwrap().sample(&at),
                direct.frame_volume().unwrap().sample(&at),
            );
        }
    }

    #[test]
    fn playback_of_garbage_is_a_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nddi");
        std::fs::write(&path, 77u32.to_le_bytes()).unwrap();
        let result = CommandPlayer::new(&path).play(|_| Ok(Box::new(SimNddiDisplay::new())));
        assert!(matches!(result, Err(NddiError::ProtocolViolation(77))));
    }
}
