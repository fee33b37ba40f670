//! Velocity readout overlay: the host periodically hands over a
//! velocity vector, and every output frame gets a digit string drawn over
//! it showing its rounded magnitude.
//!
//! Grounded on `examples/original_source/src/svr_game/proc_velo.cpp`'s
//! `velo_get_length`/`velo_draw`/`velo_get_pos`.

use framecap_common::Size;
use framecap_profile::{OverlaySettings, VeloAnchor, VeloLength};

/// A laid-out digit string ready to hand to the graphics backend: where to
/// place it and, since the backend owns font metrics, only an estimate of
/// how wide it will render (used solely to apply the anchor shift before
/// the real draw call).
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayout {
    pub text: String,
    pub origin: (f32, f32),
    pub estimated_width: f32,
}

pub struct Overlay {
    settings: OverlaySettings,
    velocity: (f32, f32, f32),
}

impl Overlay {
    pub fn new(settings: OverlaySettings) -> Self {
        Self { settings, velocity: (0.0, 0.0, 0.0) }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// `give_velocity` entry point.
    pub fn give_velocity(&mut self, x: f32, y: f32, z: f32) {
        self.velocity = (x, y, z);
    }

    /// Squared magnitude per the configured length mode — deliberately not
    /// square-rooted here; only `speed()` takes the root.
    pub fn length(&self) -> f32 {
        let (x, y, z) = self.velocity;
        match self.settings.length_mode {
            VeloLength::Xy => x * x + y * y,
            VeloLength::Xyz => x * x + y * y + z * z,
            VeloLength::Z => z * z,
        }
    }

    /// Rounded scalar speed drawn onto the frame.
    pub fn speed(&self) -> i64 {
        self.length().sqrt().round() as i64
    }

    /// Percentage alignment from screen center ("align is a percentage
    /// offset from the center of the frame, in tenths of a percent either
    /// side").
    fn screen_pos(&self, movie_size: Size) -> (f32, f32) {
        let (align_x, align_y) = self.settings.align;
        let x = movie_size.width as f32 / 2.0 + (align_x as f32 / 200.0) * movie_size.width as f32;
        let y = movie_size.height as f32 / 2.0 + (align_y as f32 / 200.0) * movie_size.height as f32;
        (x, y)
    }

    /// Builds the draw layout for the current speed (`velo_draw`):
    /// formats the speed as a decimal digit string, estimates its rendered
    /// width from the configured font size (tabular digits run close to
    /// 0.6em wide), and shifts the origin by anchor before handing back to
    /// the caller for the actual `draw_text` call.
    pub fn layout(&self, movie_size: Size) -> OverlayLayout {
        let text = self.speed().to_string();
        let digit_advance = self.settings.font_size as f32 * 0.6;
        let estimated_width = text.chars().count() as f32 * digit_advance;

        let (mut x, y) = self.screen_pos(movie_size);

        match self.settings.anchor {
            VeloAnchor::Left => {}
            VeloAnchor::Center => x -= estimated_width / 2.0,
            VeloAnchor::Right => x -= estimated_width,
        }

        OverlayLayout { text, origin: (x, y), estimated_width }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecap_profile::{FontStyle, FontWeight};

    fn settings(anchor: VeloAnchor, length_mode: VeloLength, align: (i32, i32)) -> OverlaySettings {
        OverlaySettings {
            enabled: true,
            font_path: String::new(),
            font_size: 24,
            color: [255, 255, 255, 255],
            border_color: [0, 0, 0, 255],
            border_size: 0,
            style: FontStyle::Normal,
            weight: FontWeight::Normal,
            align,
            anchor,
            length_mode,
        }
    }

    #[test]
    fn xy_length_ignores_z() {
        let mut overlay = Overlay::new(settings(VeloAnchor::Left, VeloLength::Xy, (0, 0)));
        overlay.give_velocity(3.0, 4.0, 1000.0);
        assert_eq!(overlay.length(), 25.0);
        assert_eq!(overlay.speed(), 5);
    }

    #[test]
    fn z_length_only_uses_z() {
        let mut overlay = Overlay::new(settings(VeloAnchor::Left, VeloLength::Z, (0, 0)));
        overlay.give_velocity(3.0, 4.0, 6.0);
        assert_eq!(overlay.length(), 36.0);
        assert_eq!(overlay.speed(), 6);
    }

    #[test]
    fn xyz_length_sums_all_three() {
        let mut overlay = Overlay::new(settings(VeloAnchor::Left, VeloLength::Xyz, (0, 0)));
        overlay.give_velocity(1.0, 2.0, 2.0);
        assert_eq!(overlay.length(), 9.0);
        assert_eq!(overlay.speed(), 3);
    }

    #[test]
    fn left_anchor_does_not_shift_origin() {
        let overlay = Overlay::new(settings(VeloAnchor::Left, VeloLength::Xy, (0, 0)));
        let size = Size::new(1920, 1080);
        let layout = overlay.layout(size);
        assert_eq!(layout.origin.0, 960.0);
    }

    #[test]
    fn center_anchor_shifts_by_half_width() {
        let overlay = Overlay::new(settings(VeloAnchor::Center, VeloLength::Xy, (0, 0)));
        let size = Size::new(1920, 1080);
        let layout = overlay.layout(size);
        assert_eq!(layout.origin.0, 960.0 - layout.estimated_width / 2.0);
    }

    #[test]
    fn right_anchor_shifts_by_full_width() {
        let overlay = Overlay::new(settings(VeloAnchor::Right, VeloLength::Xy, (0, 0)));
        let size = Size::new(1920, 1080);
        let layout = overlay.layout(size);
        assert_eq!(layout.origin.0, 960.0 - layout.estimated_width);
    }

    #[test]
    fn align_percentage_offsets_from_screen_center() {
        let overlay = Overlay::new(settings(VeloAnchor::Left, VeloLength::Xy, (50, -50)));
        let size = Size::new(1920, 1080);
        let pos = overlay.screen_pos(size);
        assert_eq!(pos.0, 960.0 + 0.25 * 1920.0);
        assert_eq!(pos.1, 540.0 - 0.25 * 1080.0);
    }
}
