//! The embedding application's side of the contract: everything the
//! core needs to pull from, or push into, the host process that it cannot
//! reasonably own itself — the game's audio paint cursor, its connection
//! lifecycle, its config/command execution, and its console.
//!
//! re-architects "virtual dispatch over host C++ vtables" into ordinary
//! trait objects; this is the one the scheduler drives every tick.

use framecap_common::WaveSample;

use crate::scheduler::SignonState;

pub trait Host {
    /// Whether this host integration reports a usable signon state at all;
    /// when `false` the scheduler never auto-starts or auto-stops a
    /// recording.
    fn supports_autostop(&self) -> bool;

    fn signon_state(&self) -> SignonState;

    /// The host's current audio paint cursor, in samples.
    fn paint_time(&self) -> i64;

    /// Pull-style mix: asks the host to mix its audio graph up to
    /// `aligned_end` and return the PCM it produced. Used
    /// internally by the scheduler's per-frame tick; hosts that generate
    /// audio independently of this pull should instead call
    /// [`crate::Core::give_audio`] directly.
    fn mix_audio(&mut self, aligned_end: i64) -> Vec<WaveSample>;

    fn has_cfg(&self, name: &str) -> bool;

    /// Runs whichever cfg files are registered for `event` (e.g. "start",
    /// "end") — `game_run_cfgs_for_event`.
    fn run_cfgs_for_event(&mut self, event: &str);

    /// `host_framerate <rate>` console command issued once recording
    /// begins, to pin the host to the synthetic rate.
    fn set_host_framerate(&mut self, rate: u32);

    fn console_msg(&mut self, message: &str);

    /// Wall-clock microseconds, used for the end-of-recording fps log line.
    fn real_time_micros(&self) -> i64;

    /// Presents the current frame to the host's own window, unless
    /// suppressed by `nowindupd=1`.
    fn update_window(&mut self);

    fn reset_window(&mut self);
}
