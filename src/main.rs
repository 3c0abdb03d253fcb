//! pixelbridge: encodes video into nDDI display commands.
//!
//! A session decodes frames from a YUV4MPEG2 file, runs them through one of
//! the tiling engines and drives a display: a wall server over TCP, a
//! command log on disk, or the in-process software model when neither is
//! given. `--play` replays a previously recorded log instead.

mod driver;
mod rewinder;
mod source;
mod tiler;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use nddi::recorder::{CommandPlayer, RecorderDisplay};
use nddi::transport::{Channel, LoopbackChannel, RemoteDisplay, TcpChannel};
use nddi::{NddiDisplay, SimNddiDisplay, SubRegion};
use tracing_subscriber::EnvFilter;

use driver::{Driver, DriverOptions};
use source::{FrameSource, Y4mReader};
use tiler::{
    CachedTiler, Checksum, DctTiler, FbTiler, FlatTiler, ScaleLayerConfig, ScaledDctTiler,
    Tiler, ZeroingOptions,
};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Whole-frame copies into a screen-sized frame volume.
    Fb,
    /// Fixed tile array, every tile recopied per frame.
    Flat,
    /// Fingerprint-keyed tile cache.
    Cache,
    /// DCT macroblock coefficients as coefficient-plane scalers.
    Dct,
    /// Integer-transform tiling (not built).
    It,
    /// Changed-pixel counting (analysis only, not built).
    Count,
    /// Optical flow (analysis only, not built).
    Flow,
}

#[derive(Parser)]
#[command(name = "pixelbridge", version, about = "nDDI display wall client")]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Fb)]
    mode: Mode,

    /// Tile size for flat and cache modes.
    #[arg(long = "ts", num_args = 2, value_names = ["W", "H"])]
    tile_size: Option<Vec<u32>>,

    /// Tile cache capacity.
    #[arg(long = "tc", default_value_t = 1000)]
    tile_count: usize,

    /// Significant bits per channel for tile fingerprints.
    #[arg(long, default_value_t = 8)]
    bits: u32,

    /// Fingerprint function for cache mode.
    #[arg(long, value_enum)]
    checksum: Option<Checksum>,

    /// Scale layers as scale:edge[,scale:edge...]; enables the
    /// multi-resolution DCT tiler.
    #[arg(long)]
    dctscales: Option<String>,

    /// Snap-to-zero threshold; 0 derives it from the budget.
    #[arg(long, default_value_t = 0)]
    dctdelta: u16,

    /// Planes kept when trimming; 0 derives it from the budget.
    #[arg(long, default_value_t = 0)]
    dctplanes: u32,

    /// Per-frame transmission budget in bytes.
    #[arg(long, default_value_t = 0)]
    dctbudget: usize,

    #[arg(long)]
    dctsnap: bool,

    #[arg(long)]
    dcttrim: bool,

    /// DCT quality factor.
    #[arg(long, default_value_t = 4)]
    quality: u32,

    /// Skip this many decoded frames before displaying.
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Stop after this many displayed frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Rewind point and window: START COUNT.
    #[arg(long, num_args = 2, value_names = ["START", "COUNT"])]
    rewind: Option<Vec<u64>>,

    /// Record the command stream to this file instead of executing it.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Replay a recorded command stream and exit.
    #[arg(long, conflicts_with = "record")]
    play: Option<PathBuf>,

    /// Wall server address; without it the in-process software display runs
    /// behind the loopback transport.
    #[arg(long)]
    server: Option<String>,

    /// Sub-rectangle to latch each frame: X Y W H.
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"])]
    subregion: Option<Vec<u32>>,

    /// Upscale factor for DCT mode.
    #[arg(long, default_value_t = 1)]
    scale: u32,

    /// Per-frame statistics on stderr.
    #[arg(long)]
    verbose: bool,

    /// YUV4MPEG2 input.
    video: Option<PathBuf>,
}

fn parse_scales(spec: &str) -> Result<Vec<ScaleLayerConfig>> {
    spec.split(',')
        .map(|entry| {
            let (scale, edge) = entry
                .split_once(':')
                .with_context(|| format!("scale entry {entry:?} is not scale:edge"))?;
            Ok(ScaleLayerConfig {
                scale: scale.trim().parse().context("scale")?,
                edge: edge.trim().parse().context("edge")?,
            })
        })
        .collect()
}

fn make_display(args: &Args) -> Result<Box<dyn NddiDisplay>> {
    if let Some(path) = &args.record {
        return Ok(Box::new(RecorderDisplay::create(path)?));
    }
    let channel: Box<dyn Channel> = match &args.server {
        Some(addr) => Box::new(
            TcpChannel::connect(addr.as_str())
                .with_context(|| format!("connecting to wall server {addr}"))?,
        ),
        None => {
            tracing::info!("no wall server given, running the software display");
            Box::new(LoopbackChannel::new(Arc::new(Mutex::new(
                SimNddiDisplay::new(),
            ))))
        }
    };
    Ok(Box::new(RemoteDisplay::new(channel)))
}

fn make_tiler(args: &Args, width: u32, height: u32) -> Result<Box<dyn Tiler>> {
    let display = make_display(args)?;
    let (tile_w, tile_h) = match &args.tile_size {
        Some(ts) => (ts[0], ts[1]),
        None => (8, 8),
    };
    Ok(match args.mode {
        Mode::Fb => Box::new(FbTiler::new(display, width, height)?),
        Mode::Flat => Box::new(FlatTiler::new(display, width, height, tile_w, tile_h)?),
        Mode::Cache => Box::new(
            CachedTiler::new(
                display,
                width,
                height,
                tile_w,
                tile_h,
                args.tile_count,
                args.bits,
            )?
            .with_checksum(args.checksum.unwrap_or_default()),
        ),
        Mode::Dct => match &args.dctscales {
            None => Box::new(DctTiler::new(
                display,
                width,
                height,
                args.quality,
                args.scale,
            )?),
            Some(spec) => {
                let layers = parse_scales(spec)?;
                let options = ZeroingOptions {
                    snap: args.dctsnap,
                    trim: args.dcttrim,
                    delta: args.dctdelta,
                    planes: args.dctplanes,
                    budget: args.dctbudget,
                };
                Box::new(ScaledDctTiler::new(
                    display,
                    width,
                    height,
                    args.quality,
                    &layers,
                    options,
                )?)
            }
        },
        Mode::It => bail!("the integer-transform tiler is not part of this build"),
        Mode::Count | Mode::Flow => {
            bail!("analysis modes observe the decoder and drive no display")
        }
    })
}

fn play(args: &Args, log: &Path) -> Result<()> {
    let server = args.server.clone();
    CommandPlayer::new(log).play(move |config| {
        let mut display: Box<dyn NddiDisplay> = match &server {
            Some(addr) => Box::new(RemoteDisplay::new(Box::new(TcpChannel::connect(
                addr.as_str(),
            )?))),
            None => Box::new(SimNddiDisplay::new()),
        };
        display.initialize(config)?;
        Ok(display)
    })?;
    Ok(())
}

fn run(args: &Args) -> Result<u64> {
    if let Some(log) = &args.play {
        play(args, log)?;
        return Ok(0);
    }

    let video = args
        .video
        .as_ref()
        .context("a video file is required unless --play is given")?;
    let file = File::open(video).with_context(|| format!("opening {}", video.display()))?;
    let mut source = Y4mReader::new(BufReader::new(file))?;
    tracing::info!(
        width = source.width(),
        height = source.height(),
        "decoding {}",
        video.display()
    );

    let tiler = make_tiler(args, source.width(), source.height())?;
    let sub_region = args
        .subregion
        .as_ref()
        .map(|s| SubRegion::new(s[0], s[1], s[2], s[3]));
    let rewind = args.rewind.as_ref().map(|r| (r[0], r[1]));
    let mut driver = Driver::new(
        tiler,
        DriverOptions {
            start_frame: args.start,
            max_frames: args.frames,
            rewind,
            sub_region,
        },
    )?;
    driver.run(&mut source)
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let default = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(_) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
