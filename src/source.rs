//! Decoded-frame input.
//!
//! Video decoding proper is an upstream concern; the driver only needs a
//! blocking stream of RGB24 buffers. [`Y4mReader`] covers the uncompressed
//! YUV4MPEG2 files every decoder can emit, converting 4:2:0 frames to
//! packed RGB.

use std::io::Read;

use anyhow::{Context, Result, bail};
use byteorder::ReadBytesExt;

/// A blocking producer of RGB24 frames.
pub trait FrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// The next decoded frame as packed RGB24, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

const FILE_MAGIC: &[u8] = b"YUV4MPEG2 ";
const FRAME_MAGIC: &[u8] = b"FRAME";

pub struct Y4mReader<R> {
    inner: R,
    width: u32,
    height: u32,
}

fn read_decimal(r: &mut impl Read) -> Result<(u32, u8)> {
    let mut value = 0u32;
    loop {
        let byte = r.read_u8()?;
        match byte {
            b'0'..=b'9' => value = value * 10 + u32::from(byte - b'0'),
            _ => return Ok((value, byte)),
        }
    }
}

impl<R: Read> Y4mReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; FILE_MAGIC.len()];
        inner
            .read_exact(&mut magic)
            .context("reading YUV4MPEG2 signature")?;
        if magic != *FILE_MAGIC {
            bail!("not a YUV4MPEG2 stream");
        }

        let (mut width, mut height) = (0u32, 0u32);
        loop {
            let byte = inner.read_u8()?;
            match byte {
                b'\n' => break,
                b' ' | b'\t' => continue,
                b'W' => {
                    let (value, stop) = read_decimal(&mut inner)?;
                    width = value;
                    if stop == b'\n' {
                        break;
                    }
                }
                b'H' => {
                    let (value, stop) = read_decimal(&mut inner)?;
                    height = value;
                    if stop == b'\n' {
                        break;
                    }
                }
                b'C' => {
                    // Only 4:2:0 chroma layouts are handled.
                    let mut tag = Vec::new();
                    loop {
                        let c = inner.read_u8()?;
                        if c == b' ' || c == b'\t' || c == b'\n' {
                            if !tag.starts_with(b"420") {
                                bail!(
                                    "unsupported chroma layout C{}",
                                    String::from_utf8_lossy(&tag)
                                );
                            }
                            if c == b'\n' {
                                return Self::with_dimensions(inner, width, height);
                            }
                            break;
                        }
                        tag.push(c);
                    }
                }
                _ => {
                    // Skip parameters we do not interpret (frame rate,
                    // interlacing, aspect).
                    loop {
                        let c = inner.read_u8()?;
                        if c == b'\n' {
                            return Self::with_dimensions(inner, width, height);
                        }
                        if c == b' ' || c == b'\t' {
                            break;
                        }
                    }
                }
            }
        }
        Self::with_dimensions(inner, width, height)
    }

    fn with_dimensions(inner: R, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("stream header carries no frame dimensions");
        }
        Ok(Self {
            inner,
            width,
            height,
        })
    }
}

/// BT.601 full-range YCbCr to RGB in 16.16 fixed point.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = i32::from(y) << 16;
    let cb = i32::from(cb) - 128;
    let cr = i32::from(cr) - 128;
    let clamp = |v: i32| (v >> 16).clamp(0, 255) as u8;
    [
        clamp(y + 91_881 * cr),
        clamp(y - 22_554 * cb - 46_802 * cr),
        clamp(y + 116_130 * cb),
    ]
}

impl<R: Read> FrameSource for Y4mReader<R> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut magic = [0u8; FRAME_MAGIC.len()];
        match self.inner.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if magic != *FRAME_MAGIC {
            bail!("malformed frame marker");
        }
        // Frame parameters up to the newline are ignored.
        loop {
            if self.inner.read_u8()? == b'\n' {
                break;
            }
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut luma = vec![0u8; w * h];
        let mut cb = vec![0u8; cw * ch];
        let mut cr = vec![0u8; cw * ch];
        self.inner.read_exact(&mut luma).context("luma plane")?;
        self.inner.read_exact(&mut cb).context("cb plane")?;
        self.inner.read_exact(&mut cr).context("cr plane")?;

        let mut rgb = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let chroma = (y / 2) * cw + x / 2;
                rgb.extend(ycbcr_to_rgb(luma[y * w + x], cb[chroma], cr[chroma]));
            }
        }
        Ok(Some(rgb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn y4m(header: &str, frames: &[(&[u8], &[u8], &[u8])]) -> Vec<u8> {
        let mut data = header.as_bytes().to_vec();
        for (y, cb, cr) in frames {
            data.extend(b"FRAME\n");
            data.extend(*y);
            data.extend(*cb);
            data.extend(*cr);
        }
        data
    }

    #[test]
    fn parses_dimensions_and_yields_frames() {
        let y = [128u8; 8];
        let c = [128u8; 2];
        let data = y4m("YUV4MPEG2 W4 H2 F25:1 Ip A1:1 C420jpeg\n", &[(&y, &c, &c)]);
        let mut reader = Y4mReader::new(data.as_slice()).unwrap();
        assert_eq!((reader.width(), reader.height()), (4, 2));

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.len(), 4 * 2 * 3);
        // Mid-grey YCbCr maps back to mid-grey RGB.
        assert!(frame.iter().all(|&v| v == 128));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn pure_red_converts_within_rounding() {
        // Full-range BT.601 for red: Y=76, Cb=84, Cr=255.
        let y = [76u8; 4];
        let cb = [84u8; 1];
        let cr = [255u8; 1];
        let data = y4m("YUV4MPEG2 W2 H2\n", &[(&y, &cb, &cr)]);
        let mut reader = Y4mReader::new(data.as_slice()).unwrap();
        let frame = reader.next_frame().unwrap().unwrap();
        assert!(frame[0] >= 250, "red channel was {}", frame[0]);
        assert!(frame[1] <= 10 && frame[2] <= 10);
    }

    #[test]
    fn rejects_non_420_chroma() {
        let data = y4m("YUV4MPEG2 W2 H2 C444\n", &[]);
        assert!(Y4mReader::new(data.as_slice()).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(Y4mReader::new(&b"RIFF...."[..]).is_err());
    }

    #[test]
    fn truncated_frame_is_an_error_not_a_frame() {
        let mut data = y4m("YUV4MPEG2 W4 H2\n", &[]);
        data.extend(b"FRAME\n");
        data.extend([128u8; 3]); // far short of a full frame
        let mut reader = Y4mReader::new(data.as_slice()).unwrap();
        assert!(reader.next_frame().is_err());
    }
}
