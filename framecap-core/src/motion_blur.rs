//! Exposure-weighted sample accumulation. A pure state machine —
//! the caller (the scheduler) is responsible for actually dispatching the
//! `motion_sample`/downsample/clear GPU calls the returned actions name.
//!
//! Grounded on `examples/original_source/src/svr_game/proc_mosample.cpp`'s
//! `mosample_new_video_frame`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionBlurAction {
    /// Accumulate `src * weight` into the work texture.
    Accumulate(f32),
    /// Downsample the 128bpp work texture into the shared output texture.
    Downsample,
    /// Push the shared output texture through the encoder bridge as a new
    /// video frame. May be repeated for duplicate frames (step 3).
    EmitFrame,
    /// Clear the work texture to opaque black, ready for the next frame.
    Clear,
}

pub struct MotionBlur {
    remainder: f32,
    step: f32,
    exposure: f32,
}

impl MotionBlur {
    /// `multiplier` is samples per output frame; a `multiplier` of 1 should
    /// be handled by the caller as the disabled path instead (boundary
    /// behavior, the open question resolution) — this type does not special
    /// case it.
    pub fn new(multiplier: u32, exposure: f32) -> Self {
        Self {
            remainder: 0.0,
            step: 1.0 / multiplier.max(1) as f32,
            exposure: exposure.clamp(0.0, 1.0),
        }
    }

    /// One sampling tick. Returns the sequence of actions the
    /// caller must perform, in order; an empty vec means the sample fell
    /// entirely in the dead zone before the exposure window opened.
    pub fn tick(&mut self) -> Vec<MotionBlurAction> {
        let old_rem = self.remainder;
        let exposure = self.exposure;
        let mut new_remainder = self.remainder + self.step;
        let mut actions = Vec::new();

        if new_remainder <= 1.0 - exposure {
            // Dead zone: nothing accumulates.
        } else if new_remainder < 1.0 {
            let weight = weight_of(new_remainder - (1.0 - exposure).max(old_rem), exposure);
            actions.push(MotionBlurAction::Accumulate(weight));
        } else {
            let weight = weight_of(1.0 - (1.0 - exposure).max(old_rem), exposure);
            actions.push(MotionBlurAction::Accumulate(weight));
            actions.push(MotionBlurAction::Downsample);
            actions.push(MotionBlurAction::EmitFrame);

            new_remainder -= 1.0;

            let additional = new_remainder as i64;
            if additional > 0 {
                for _ in 0..additional {
                    actions.push(MotionBlurAction::EmitFrame);
                }
                new_remainder -= additional as f32;
            }

            actions.push(MotionBlurAction::Clear);

            if new_remainder > f32::EPSILON && new_remainder > 1.0 - exposure {
                let reopen_weight = weight_of(new_remainder - (1.0 - exposure), exposure);
                actions.push(MotionBlurAction::Accumulate(reopen_weight));
            }
        }

        self.remainder = new_remainder;
        actions
    }
}

/// `exposure = 0` means every weight collapses to 0 rather than dividing
/// by zero (boundary behavior).
fn weight_of(numerator: f32, exposure: f32) -> f32 {
    if exposure <= f32::EPSILON {
        0.0
    } else {
        numerator / exposure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted_frames(actions: &[MotionBlurAction]) -> usize {
        actions.iter().filter(|a| **a == MotionBlurAction::EmitFrame).count()
    }

    fn accumulated_weight(actions: &[MotionBlurAction]) -> f32 {
        actions
            .iter()
            .filter_map(|a| match a {
                MotionBlurAction::Accumulate(w) => Some(*w),
                _ => None,
            })
            .sum()
    }

    #[test]
    fn one_frame_emitted_per_multiplier_samples() {
        let mut mb = MotionBlur::new(4, 0.5);
        let mut frames = 0;
        for _ in 0..4 {
            frames += emitted_frames(&mb.tick());
        }
        assert_eq!(frames, 1);
    }

    #[test]
    fn partition_of_unity_over_one_output_frame() {
        let mut mb = MotionBlur::new(4, 0.5);
        let mut total_weight = 0.0f32;
        let mut frames = 0;

        for _ in 0..4 {
            let actions = mb.tick();
            frames += emitted_frames(&actions);
            total_weight += accumulated_weight(&actions);
        }

        assert_eq!(frames, 1);
        assert!((total_weight - 1.0).abs() < 1e-5, "total weight was {total_weight}");
    }

    #[test]
    fn exposure_zero_never_divides_by_zero() {
        let mut mb = MotionBlur::new(4, 0.0);
        for _ in 0..16 {
            let actions = mb.tick();
            for action in actions {
                if let MotionBlurAction::Accumulate(w) = action {
                    assert!(w.is_finite());
                    assert_eq!(w, 0.0);
                }
            }
        }
    }

    #[test]
    fn work_texture_cleared_exactly_once_per_emitted_frame() {
        let mut mb = MotionBlur::new(4, 0.5);
        let mut clears = 0;
        let mut frames = 0;

        for _ in 0..16 {
            let actions = mb.tick();
            clears += actions.iter().filter(|a| **a == MotionBlurAction::Clear).count();
            frames += emitted_frames(&actions);
        }

        assert_eq!(clears, frames);
    }
}
