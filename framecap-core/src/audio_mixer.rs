//! Per-frame PCM mixing window: figures out how many audio samples
//! belong to the frame about to be emitted, keeping the fractional leftover
//! from the fps-to-samplerate conversion and the alignment remainder so
//! neither is silently dropped.
//!
//! Grounded on `examples/original_source/src/svr_standalone/standalone_main.cpp`'s
//! `align_sample_time`/`mix_audio_for_one_frame`.

/// Rounds `value` down to the nearest multiple of 4 — the host's audio
/// engine only ever paints in 4-sample blocks.
pub fn align_sample_time(value: i64) -> i64 {
    value & !3
}

pub struct AudioMixer {
    lost_mix_time: f32,
    skipped_samples: i64,
}

impl AudioMixer {
    pub fn new() -> Self {
        Self { lost_mix_time: 0.0, skipped_samples: 0 }
    }

    /// One mixing tick. `paint_time` is the host's current audio
    /// cursor; `game_rate` is the synthetic frame rate the host is being
    /// driven at (`Profile::game_rate`); `sample_rate` is the audio stream's
    /// sample rate. Returns the aligned end time and the sample count to
    /// mix for this frame — `None` when that count is not positive, meaning
    /// no mixing (and no C3 `send_audio`) should happen this tick.
    pub fn tick(&mut self, paint_time: i64, game_rate: u32, sample_rate: u32) -> Option<(i64, i64)> {
        let time_ahead_to_mix = 1.0 / game_rate.max(1) as f32;
        let frac_samples_to_mix = time_ahead_to_mix * sample_rate as f32 + self.lost_mix_time;

        let samples_to_mix = frac_samples_to_mix as i64;
        self.lost_mix_time = frac_samples_to_mix - samples_to_mix as f32;

        let raw_end_time = paint_time + samples_to_mix + self.skipped_samples;
        let aligned_end_time = align_sample_time(raw_end_time);

        let num_samples = aligned_end_time - paint_time;
        self.skipped_samples = raw_end_time - aligned_end_time;

        if num_samples > 0 {
            Some((aligned_end_time, num_samples))
        } else {
            None
        }
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_end_is_always_a_multiple_of_four() {
        let mut mixer = AudioMixer::new();
        let mut paint_time = 0i64;

        for _ in 0..200 {
            if let Some((aligned_end, samples)) = mixer.tick(paint_time, 60, 44100) {
                assert_eq!(aligned_end % 4, 0);
                paint_time = aligned_end;
                assert!(samples > 0);
            }
        }
    }

    #[test]
    fn sample_count_matches_end_minus_paint_time() {
        let mut mixer = AudioMixer::new();
        let paint_time = 1000i64;
        let (aligned_end, samples) = mixer.tick(paint_time, 60, 44100).unwrap();
        assert_eq!(samples, aligned_end - paint_time);
    }

    #[test]
    fn over_many_frames_average_rate_converges_on_sample_rate_over_game_rate() {
        let mut mixer = AudioMixer::new();
        let mut paint_time = 0i64;
        let frames = 6000;

        for _ in 0..frames {
            if let Some((aligned_end, _)) = mixer.tick(paint_time, 60, 44100) {
                paint_time = aligned_end;
            }
        }

        let expected = 44100.0 / 60.0 * frames as f32;
        let ratio = paint_time as f32 / expected;
        assert!((ratio - 1.0).abs() < 0.01, "ratio was {ratio}");
    }

    #[test]
    fn align_sample_time_clears_low_two_bits() {
        assert_eq!(align_sample_time(7), 4);
        assert_eq!(align_sample_time(8), 8);
        assert_eq!(align_sample_time(0), 0);
        assert_eq!(align_sample_time(-1), -4);
    }
}
