//! Per-hardware DTMF parameter sets (spec.md §4.5 table, §9 Open
//! Ambiguities: "source variants differ on ... threshold values ... and
//! DTMF algorithm"). Exposed as named constants with the source-variant
//! values as defaults, selectable at runtime via config instead of a
//! recompile.

/// Which of the four documented hardware/algorithm combinations to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfVariant {
  /// `5`-key, 8-bit mono PCM, block-averaged.
  V1Key5,
  /// `*`-key, 8-bit mono PCM, block-averaged over 5 blocks.
  V2aStarAveraged,
  /// `*`-key, 8-bit mono PCM, consecutive-hit counting (grounded on
  /// `tones.c`).
  V2bStarConsecutive,
  /// `*`-key, 16-bit stereo (left channel) PCM as floats, consecutive-hit
  /// counting (grounded on `tonesRPi.c`).
  V3StarFloat,
}

impl Default for DtmfVariant {
  fn default() -> DtmfVariant {
    DtmfVariant::V2bStarConsecutive
  }
}

impl DtmfVariant {
  pub fn from_name(name: &str) -> Option<DtmfVariant> {
    match name {
      "v1" => Some(DtmfVariant::V1Key5),
      "v2a" => Some(DtmfVariant::V2aStarAveraged),
      "v2b" => Some(DtmfVariant::V2bStarConsecutive),
      "v3" => Some(DtmfVariant::V3StarFloat),
      _ => None,
    }
  }

  pub fn params(self) -> VariantParams {
    match self {
      DtmfVariant::V1Key5 => VariantParams {
        low_freq: 770.0,
        low_n: 400,
        high_freq: 1336.0,
        high_n: 200,
        sample_format: SampleFormat::Signed8Mono,
        policy: DetectionPolicy::Averaged {
          window: 5,
          threshold: 10.0,
        },
      },
      DtmfVariant::V2aStarAveraged => VariantParams {
        low_freq: 941.0,
        low_n: 259,
        high_freq: 1209.0,
        high_n: 195,
        sample_format: SampleFormat::Signed8Mono,
        policy: DetectionPolicy::Averaged {
          window: 5,
          threshold: 10.0,
        },
      },
      DtmfVariant::V2bStarConsecutive => VariantParams {
        low_freq: 941.0,
        low_n: 528,
        high_freq: 1209.0,
        high_n: 410,
        sample_format: SampleFormat::Signed8Mono,
        policy: DetectionPolicy::ConsecutiveHit {
          det_min: 10,
          threshold: 0.1,
          // `tones.c` builds with `DO_BEEPS` active by default, which
          // also accepts two fixed-duration beep pulses (common on
          // wireless and some wired phones) as a detection (spec.md
          // §4.5 "Beep variant").
          beep_pairs: true,
        },
      },
      DtmfVariant::V3StarFloat => VariantParams {
        low_freq: 941.0,
        low_n: 528,
        high_freq: 1209.0,
        high_n: 410,
        sample_format: SampleFormat::Signed16StereoLeft,
        policy: DetectionPolicy::ConsecutiveHit {
          det_min: 10,
          threshold: 0.5,
          // `tonesRPi.c` also builds with `DO_BEEPS` active by default.
          beep_pairs: true,
        },
      },
    }
  }
}

/// What shape the PCM source must hand back (spec.md §4.5 "Sampling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
  /// 8-bit signed, single channel; conditioned to `(s*100/256)+100`.
  Signed8Mono,
  /// 16-bit signed stereo; left channel only, scaled to `[-1, 1]`.
  Signed16StereoLeft,
}

/// How `poll()` turns two tone magnitudes into a detection decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionPolicy {
  /// Accumulate magnitude over `window` polls, then compare the average
  /// of each tone against `threshold`; both must clear it in the same
  /// window (spec.md §4.5 "Averaging variant").
  Averaged { window: usize, threshold: f64 },
  /// Count consecutive polls where each tone clears `threshold`, reset on
  /// any miss but remember the previous run length; detection requires
  /// both counts to reach `det_min` (spec.md §4.5 "Consecutive-hit
  /// variant"). `beep_pairs` additionally requires two fixed-duration
  /// pulses when set (spec.md §4.5 "Beep variant").
  ConsecutiveHit {
    det_min: u32,
    threshold: f64,
    beep_pairs: bool,
  },
}

#[derive(Debug, Clone, Copy)]
pub struct VariantParams {
  pub low_freq: f64,
  pub low_n: usize,
  pub high_freq: f64,
  pub high_n: usize,
  pub sample_format: SampleFormat,
  pub policy: DetectionPolicy,
}

impl VariantParams {
  /// `N_max`: every poll reads this many samples (spec.md §4.5: "`N_max
  /// := N_LO`. Each `poll()` reads exactly `N_max` samples").
  pub fn n_max(&self) -> usize {
    self.low_n
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_name_round_trips() {
    for variant in [
      DtmfVariant::V1Key5,
      DtmfVariant::V2aStarAveraged,
      DtmfVariant::V2bStarConsecutive,
      DtmfVariant::V3StarFloat,
    ] {
      let name = match variant {
        DtmfVariant::V1Key5 => "v1",
        DtmfVariant::V2aStarAveraged => "v2a",
        DtmfVariant::V2bStarConsecutive => "v2b",
        DtmfVariant::V3StarFloat => "v3",
      };
      assert_eq!(DtmfVariant::from_name(name), Some(variant));
    }
    assert_eq!(DtmfVariant::from_name("bogus"), None);
  }

  #[test]
  fn n_max_is_low_tone_block_size() {
    let params = DtmfVariant::V2bStarConsecutive.params();
    assert_eq!(params.n_max(), params.low_n);
  }
}
