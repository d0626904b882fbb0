//! Single-tone Goertzel filter (spec.md §4.5).
//!
//! A recursive second-order IIR tuned to one target frequency; run over a
//! block of `N` samples it yields that frequency's DFT bin magnitude in
//! O(N) time and O(1) state.

use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct Goertzel {
  coeff: f64,
  cosine: f64,
  sine: f64,
  q1: f64,
  q2: f64,
  block_size: usize,
}

impl Goertzel {
  /// `target_freq` in Hz, `block_size` in samples, `sampling_rate` in Hz.
  pub fn new(target_freq: f64, block_size: usize, sampling_rate: f64) -> Goertzel {
    let k = (0.5 + (block_size as f64 * target_freq) / sampling_rate).floor();
    let omega = 2.0 * PI * k / block_size as f64;
    let cosine = omega.cos();
    let sine = omega.sin();
    Goertzel {
      coeff: 2.0 * cosine,
      cosine,
      sine,
      q1: 0.0,
      q2: 0.0,
      block_size,
    }
  }

  pub fn block_size(&self) -> usize {
    self.block_size
  }

  fn reset(&mut self) {
    self.q1 = 0.0;
    self.q2 = 0.0;
  }

  fn process_sample(&mut self, x: f64) {
    let q0 = self.coeff * self.q1 - self.q2 + x;
    self.q2 = self.q1;
    self.q1 = q0;
  }

  fn magnitude(&self) -> f64 {
    let real = self.q1 - self.q2 * self.cosine;
    let imag = self.q2 * self.sine;
    (real * real + imag * imag).sqrt()
  }

  /// Reset the accumulator and run it over one block of samples (the
  /// first `self.block_size` of `samples`), returning the bin magnitude.
  pub fn magnitude_of(&mut self, samples: &[f64]) -> f64 {
    self.reset();
    let n = self.block_size.min(samples.len());
    for &x in &samples[..n] {
      self.process_sample(x);
    }
    self.magnitude()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLING_RATE: f64 = 8000.0;

  fn synth_tone(freq: f64, n: usize, rate: f64) -> Vec<f64> {
    (0..n)
      .map(|i| (2.0 * PI * freq * i as f64 / rate).sin())
      .collect()
  }

  #[test]
  fn detects_matching_tone_above_threshold() {
    let mut g = Goertzel::new(941.0, 259, SAMPLING_RATE);
    let samples = synth_tone(941.0, 259, SAMPLING_RATE);
    assert!(g.magnitude_of(&samples) > 10.0);
  }

  #[test]
  fn rejects_adjacent_bin() {
    let mut g = Goertzel::new(941.0, 259, SAMPLING_RATE);
    // A tone roughly one bin away from 941 Hz at N=259, 8 kHz.
    let samples = synth_tone(1100.0, 259, SAMPLING_RATE);
    let on_target = {
      let mut g2 = Goertzel::new(941.0, 259, SAMPLING_RATE);
      g2.magnitude_of(&synth_tone(941.0, 259, SAMPLING_RATE))
    };
    assert!(g.magnitude_of(&samples) < on_target);
  }
}
