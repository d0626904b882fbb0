//! Two-tone Goertzel DTMF detector (spec.md §4.5).
//!
//! `Detector` is the uniform `init`/`poll`/`clear_buffer`/`close`
//! interface spec.md §4.5 describes; `pcm` supplies the conditioned
//! samples it runs over and `variants` supplies the per-hardware
//! parameter sets.

pub mod goertzel;
pub mod pcm;
pub mod variants;

use goertzel::Goertzel;
use pcm::{PcmError, PcmSource, SAMPLING_RATE};
use variants::{DetectionPolicy, DtmfVariant, VariantParams};

pub struct Detector {
  params: VariantParams,
  low: Goertzel,
  high: Goertzel,
  avg_window_count: usize,
  low_sum: f64,
  high_sum: f64,
  num_det_lo: u32,
  num_det_hi: u32,
  num_det_lo_was: u32,
  num_det_hi_was: u32,
  num_beeps: u32,
}

impl Detector {
  /// `init` (spec.md §4.5): build the Goertzel filters for this variant
  /// and zero all debounce state.
  pub fn new(variant: DtmfVariant) -> Detector {
    let params = variant.params();
    let low = Goertzel::new(params.low_freq, params.low_n, SAMPLING_RATE as f64);
    let high = Goertzel::new(params.high_freq, params.high_n, SAMPLING_RATE as f64);
    Detector {
      params,
      low,
      high,
      avg_window_count: 0,
      low_sum: 0.0,
      high_sum: 0.0,
      num_det_lo: 0,
      num_det_hi: 0,
      num_det_lo_was: 0,
      num_det_hi_was: 0,
      num_beeps: 0,
    }
  }

  fn reset_counters(&mut self) {
    self.avg_window_count = 0;
    self.low_sum = 0.0;
    self.high_sum = 0.0;
    self.num_det_lo = 0;
    self.num_det_hi = 0;
    self.num_det_lo_was = 0;
    self.num_det_hi_was = 0;
    self.num_beeps = 0;
  }

  /// `clear_buffer` (spec.md §4.5): drop anything queued in the source
  /// and reset debounce state, e.g. before opening a fresh DTMF window.
  pub fn clear_buffer(&mut self, source: &mut dyn PcmSource) {
    source.clear_buffer();
    self.reset_counters();
  }

  /// `close` (spec.md §4.5): release the audio device.
  pub fn close(&mut self, source: &mut dyn PcmSource) {
    source.close();
  }

  /// `poll` (spec.md §4.5): read exactly `N_max` samples, run the
  /// low-tone Goertzel over all of them and the high-tone Goertzel over
  /// its own (smaller) block, then apply the variant's detection policy.
  /// Any read error resets debounce state and reports no detection
  /// (spec.md §4.5 "On ALSA overrun ... Short reads and other errors
  /// also reset counters and return no-detection").
  pub fn poll(&mut self, source: &mut dyn PcmSource) -> bool {
    let n_max = self.params.n_max();
    let samples = match source.read_block(n_max) {
      Ok(samples) => samples,
      Err(PcmError::Overrun | PcmError::ShortRead | PcmError::Other(_)) => {
        self.reset_counters();
        return false;
      }
    };

    let low_mag = self.low.magnitude_of(&samples);
    let high_mag = self.high.magnitude_of(&samples);

    match self.params.policy {
      DetectionPolicy::Averaged { window, threshold } => {
        self.poll_averaged(low_mag, high_mag, window, threshold)
      }
      DetectionPolicy::ConsecutiveHit {
        det_min,
        threshold,
        beep_pairs,
      } => self.poll_consecutive(low_mag, high_mag, det_min, threshold, beep_pairs),
    }
  }

  fn poll_averaged(&mut self, low_mag: f64, high_mag: f64, window: usize, threshold: f64) -> bool {
    self.low_sum += low_mag;
    self.high_sum += high_mag;
    self.avg_window_count += 1;
    if self.avg_window_count < window {
      return false;
    }
    let low_avg = self.low_sum / window as f64;
    let high_avg = self.high_sum / window as f64;
    self.low_sum = 0.0;
    self.high_sum = 0.0;
    self.avg_window_count = 0;
    low_avg > threshold && high_avg > threshold
  }

  fn poll_consecutive(
    &mut self, low_mag: f64, high_mag: f64, det_min: u32, threshold: f64, beep_pairs: bool,
  ) -> bool {
    if low_mag > threshold {
      self.num_det_lo += 1;
    } else {
      self.num_det_lo_was = self.num_det_lo;
      self.num_det_lo = 0;
    }
    if high_mag > threshold {
      self.num_det_hi += 1;
    } else {
      self.num_det_hi_was = self.num_det_hi;
      self.num_det_hi = 0;
    }

    if self.num_det_lo >= det_min && self.num_det_hi >= det_min {
      self.reset_counters();
      return true;
    }

    if beep_pairs
      && matches!(self.num_det_lo_was, 2 | 3)
      && matches!(self.num_det_hi_was, 2 | 3)
    {
      if self.num_beeps == 0 {
        self.num_beeps = 1;
        self.num_det_lo_was = 0;
        self.num_det_hi_was = 0;
      } else {
        self.reset_counters();
        return true;
      }
    }
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::PI;

  struct FakeSource {
    blocks: Vec<Result<Vec<f64>, PcmError>>,
  }

  impl PcmSource for FakeSource {
    fn read_block(&mut self, _n_frames: usize) -> Result<Vec<f64>, PcmError> {
      if self.blocks.is_empty() {
        Ok(Vec::new())
      } else {
        self.blocks.remove(0)
      }
    }
    fn clear_buffer(&mut self) {}
    fn close(&mut self) {}
  }

  fn dual_tone_block(params: &VariantParams, amplitude: f64) -> Vec<f64> {
    let n = params.n_max();
    (0..n)
      .map(|i| {
        let t = i as f64 / SAMPLING_RATE as f64;
        amplitude
          * ((2.0 * PI * params.low_freq * t).sin() + (2.0 * PI * params.high_freq * t).sin())
      })
      .collect()
  }

  fn silence_block(params: &VariantParams) -> Vec<f64> {
    vec![0.0; params.n_max()]
  }

  #[test]
  fn consecutive_hit_needs_det_min_blocks() {
    let variant = DtmfVariant::V2bStarConsecutive;
    let params = variant.params();
    let mut detector = Detector::new(variant);
    let mut source = FakeSource {
      blocks: (0..9)
        .map(|_| Ok(dual_tone_block(&params, 50.0)))
        .collect(),
    };
    // A single isolated above-threshold block (spec.md §8 "DTMF
    // debounce") must not trigger before DET_MIN consecutive blocks.
    for _ in 0..9 {
      assert!(!detector.poll(&mut source));
    }
    let mut source2 = FakeSource {
      blocks: vec![Ok(dual_tone_block(&params, 50.0))],
    };
    assert!(detector.poll(&mut source2));
  }

  #[test]
  fn silence_never_detects() {
    let variant = DtmfVariant::V2bStarConsecutive;
    let params = variant.params();
    let mut detector = Detector::new(variant);
    let mut source = FakeSource {
      blocks: (0..20).map(|_| Ok(silence_block(&params))).collect(),
    };
    for _ in 0..20 {
      assert!(!detector.poll(&mut source));
    }
  }

  #[test]
  fn overrun_resets_counters() {
    let variant = DtmfVariant::V2bStarConsecutive;
    let params = variant.params();
    let mut detector = Detector::new(variant);
    let mut source = FakeSource {
      blocks: vec![
        Ok(dual_tone_block(&params, 50.0)),
        Ok(dual_tone_block(&params, 50.0)),
        Err(PcmError::Overrun),
      ],
    };
    assert!(!detector.poll(&mut source));
    assert!(!detector.poll(&mut source));
    assert!(!detector.poll(&mut source));
    assert_eq!(detector.num_det_lo, 0);
    assert_eq!(detector.num_det_hi, 0);
  }

  #[test]
  fn averaged_variant_requires_full_window() {
    let variant = DtmfVariant::V2aStarAveraged;
    let params = variant.params();
    let mut detector = Detector::new(variant);
    let mut source = FakeSource {
      blocks: (0..4).map(|_| Ok(dual_tone_block(&params, 50.0))).collect(),
    };
    for _ in 0..4 {
      assert!(!detector.poll(&mut source));
    }
    let mut source2 = FakeSource {
      blocks: vec![Ok(dual_tone_block(&params, 50.0))],
    };
    assert!(detector.poll(&mut source2));
  }
}
