//! PCM sample source abstraction over ALSA (spec.md §1 Non-goals list the
//! ALSA capture plumbing itself as an external collaborator; this module
//! is that collaborator plus the sample-conditioning math the spec ties
//! to it, spec.md §4.5 "Sampling").

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use log::warn;

use super::variants::SampleFormat;

pub const SAMPLING_RATE: u32 = 8000;

#[derive(Debug)]
pub enum PcmError {
  /// ALSA buffer overrun (`EPIPE`); the stream has been re-prepared.
  Overrun,
  /// Read returned fewer frames than requested.
  ShortRead,
  Other(String),
}

/// A source of mono, already-conditioned PCM samples, one block per call.
pub trait PcmSource {
  /// Read exactly `n_frames` frames and return them conditioned to the
  /// range the Goertzel filter expects (spec.md §4.5 "Sampling").
  fn read_block(&mut self, n_frames: usize) -> Result<Vec<f64>, PcmError>;

  /// Discard any buffered audio (spec.md §4.5 `clear_buffer`).
  fn clear_buffer(&mut self);

  /// Release the device (spec.md §4.5 `close`).
  fn close(&mut self);
}

pub struct AlsaPcmSource {
  pcm: PCM,
  format: SampleFormat,
}

impl AlsaPcmSource {
  pub fn open(device: &str, format: SampleFormat) -> Result<AlsaPcmSource, String> {
    let pcm = PCM::new(device, Direction::Capture, false)
      .map_err(|e| format!("PCM::new({}): {}", device, e))?;
    {
      let hwp = HwParams::any(&pcm).map_err(|e| e.to_string())?;
      match format {
        SampleFormat::Signed8Mono => {
          hwp.set_channels(1).map_err(|e| e.to_string())?;
          hwp.set_format(Format::S8).map_err(|e| e.to_string())?;
        }
        SampleFormat::Signed16StereoLeft => {
          hwp.set_channels(2).map_err(|e| e.to_string())?;
          hwp.set_format(Format::s16()).map_err(|e| e.to_string())?;
        }
      }
      hwp
        .set_rate(SAMPLING_RATE, ValueOr::Nearest)
        .map_err(|e| e.to_string())?;
      hwp
        .set_access(Access::RWInterleaved)
        .map_err(|e| e.to_string())?;
      pcm.hw_params(&hwp).map_err(|e| e.to_string())?;
    }
    pcm.prepare().map_err(|e| e.to_string())?;
    Ok(AlsaPcmSource { pcm, format })
  }

  fn recover(&mut self, err: &alsa::Error) -> PcmError {
    if err.errno() == nix::errno::Errno::EPIPE {
      warn!("DTMF: ALSA overrun, snd_pcm_prepare()");
      if let Err(e) = self.pcm.prepare() {
        warn!("DTMF: snd_pcm_prepare() nach Overrun fehlgeschlagen: {}", e);
      }
      PcmError::Overrun
    } else {
      PcmError::Other(err.to_string())
    }
  }
}

impl PcmSource for AlsaPcmSource {
  fn read_block(&mut self, n_frames: usize) -> Result<Vec<f64>, PcmError> {
    match self.format {
      SampleFormat::Signed8Mono => {
        let io = self
          .pcm
          .io_i8()
          .map_err(|e| PcmError::Other(e.to_string()))?;
        let mut buf = vec![0i8; n_frames];
        match io.readi(&mut buf) {
          Ok(n) if n == n_frames => Ok(
            buf
              .iter()
              .map(|&s| condition_8bit(s))
              .collect(),
          ),
          Ok(_) => Err(PcmError::ShortRead),
          Err(e) => Err(self.recover(&e)),
        }
      }
      SampleFormat::Signed16StereoLeft => {
        let io = self
          .pcm
          .io_i16()
          .map_err(|e| PcmError::Other(e.to_string()))?;
        let mut buf = vec![0i16; n_frames * 2];
        match io.readi(&mut buf) {
          Ok(n) if n == n_frames => Ok(
            (0..n_frames)
              .map(|i| condition_16bit_left(buf[i * 2]))
              .collect(),
          ),
          Ok(_) => Err(PcmError::ShortRead),
          Err(e) => Err(self.recover(&e)),
        }
      }
    }
  }

  fn clear_buffer(&mut self) {
    let _ = self.pcm.drop();
    let _ = self.pcm.prepare();
  }

  fn close(&mut self) {
    let _ = self.pcm.drain();
  }
}

/// 8-bit signed sample -> the unsigned-ish range the original's Goertzel
/// loop runs over (spec.md §4.5; grounded in `tones.c`:
/// `(buffer[i] * 100)/256 + 100`).
fn condition_8bit(s: i8) -> f64 {
  (s as f64 * 100.0 / 256.0) + 100.0
}

/// 16-bit signed left-channel sample scaled to `[-1, 1]` (spec.md §4.5;
/// grounded in `tonesRPi.c`: `lSample / 32768.0`).
fn condition_16bit_left(s: i16) -> f64 {
  s as f64 / 32768.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn condition_8bit_midpoint() {
    assert_eq!(condition_8bit(0), 100.0);
  }

  #[test]
  fn condition_16bit_extremes() {
    assert!((condition_16bit_left(32767) - 0.99996948).abs() < 1e-4);
    assert_eq!(condition_16bit_left(-32768), -1.0);
  }
}
