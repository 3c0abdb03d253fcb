//! End-to-end log round-trips: a recorded session replayed into a fresh
//! display must leave the device in the same state as direct execution.

use std::sync::{Arc, Mutex};

use nddi::display::SimNddiDisplay;
use nddi::pixel::{Pixel, Scaler, SignMode};
use nddi::recorder::{CommandPlayer, RecorderDisplay};
use nddi::{DisplayConfig, NddiDisplay, SubRegion};
use pretty_assertions::assert_eq;

const W: u32 = 16;
const H: u32 = 16;

fn config() -> DisplayConfig {
    DisplayConfig::new(vec![W, H, 2], W, H, 2, 3)
}

/// Runs the same session against any display implementation.
fn run_session(display: &mut impl NddiDisplay) {
    display.update_input_vector(&[1]).unwrap();
    display
        .fill_coefficient_matrix(&[1, 0, 0, 0, 1, 0, 0, 0, 0], &[0, 0, 0], &[15, 15, 1])
        .unwrap();
    display
        .fill_scaler(Scaler::splat_rgb(256), &[0, 0, 0], &[15, 15, 0])
        .unwrap();
    display
        .fill_pixel(Pixel::splat(0xff), &[0, 0, 0], &[15, 15, 0])
        .unwrap();
    display
        .put_pixel(Pixel::from_rgb(0, 0, 0xff), &[10, 10, 0])
        .unwrap();
    display
        .copy_pixel_strip(&[Pixel::splat(1); 16], &[0, 4, 0], &[15, 4, 0])
        .unwrap();
    display
        .copy_pixel_tiles(
            &[vec![Pixel::splat(2); 16], vec![Pixel::splat(3); 16]],
            &[vec![0, 0, 1], vec![4, 0, 1]],
            [4, 4],
        )
        .unwrap();
    display.copy_frame_volume(&[0, 0, 1], &[3, 3, 1], &[8, 8, 1]).unwrap();
    display.set_pixel_byte_sign_mode(SignMode::Unsigned).unwrap();
    display.latch(SubRegion::full(W, H)).unwrap();
    display.shutdown().unwrap();
}

#[test]
fn replayed_log_matches_direct_execution() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.nddi");

    let mut recording = RecorderDisplay::create(&path).unwrap();
    recording.initialize(&config()).unwrap();
    run_session(&mut recording);
    recording.finish().unwrap();

    let shared = Arc::new(Mutex::new(SimNddiDisplay::new()));
    let handle = Arc::clone(&shared);
    CommandPlayer::new(&path)
        .play(move |logged| {
            let mut created = Arc::clone(&handle);
            created.initialize(logged)?;
            Ok(Box::new(created))
        })
        .unwrap();

    let mut direct = SimNddiDisplay::new();
    direct.initialize(&config()).unwrap();
    run_session(&mut direct);

    let replayed = shared.lock().unwrap();
    let replayed_fv = replayed.frame_volume().unwrap();
    let direct_fv = direct.frame_volume().unwrap();
    for z in 0..2i64 {
        for y in 0..i64::from(H) {
            for x in 0..i64::from(W) {
                assert_eq!(
                    replayed_fv.sample(&[x, y, z]),
                    direct_fv.sample(&[x, y, z]),
                    "frame volume diverged at ({x}, {y}, {z})"
                );
            }
        }
    }
    // The presented frames agree as well; the player's trailing (0,0,1,1)
    // latch only re-renders a pixel that is already up to date.
    assert_eq!(replayed.presented().unwrap(), direct.presented().unwrap());
}

#[test]
fn truncated_log_surfaces_a_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.nddi");

    let mut recording = RecorderDisplay::create(&path).unwrap();
    recording.initialize(&config()).unwrap();
    run_session(&mut recording);
    recording.finish().unwrap();

    // Drop the EOT sentinel and half of the final record.
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();

    let result = CommandPlayer::new(&path).play(|logged| {
        let mut display = SimNddiDisplay::new();
        display.initialize(logged)?;
        Ok(Box::new(display))
    });
    assert!(matches!(result, Err(nddi::NddiError::TransportFailed(_))));
}
