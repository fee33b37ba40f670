//! Recording state machine and the `startmovie` argument grammar.
//!
//! Grounded on `examples/original_source/src/svr_standalone/game_rec.cpp`.

use std::path::Path;

/// Mirrors `GAME_REC_STOPPED`/`GAME_REC_WAITING`/`GAME_REC_POSSIBLE`.
///
/// - `Stopped`: no recording in progress.
/// - `Waiting`: a recording was started but the host has not yet reached a
///   fully-connected signon state, so no frames are captured yet.
/// - `Possible`: the host is fully connected; frames are captured every
///   tick until autostop or an explicit `end_movie`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Stopped,
    Waiting,
    Possible,
}

/// The host's connection lifecycle, abstracted away from any one game's
/// signon-state integer constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignonState {
    /// Fully disconnected / at the main menu.
    None,
    /// Fully connected and simulating.
    Full,
    /// Any other transitional state (loading, handshaking, ...).
    Other,
}

pub struct RecordingScheduler {
    state: RecordingState,
    supports_autostop: bool,
    enable_autostop: bool,
    timeout_secs: u32,
    disable_window_update: bool,
    game_rate: u32,
    num_frames: i64,
    start_time_micros: i64,
}

impl RecordingScheduler {
    pub fn new(supports_autostop: bool) -> Self {
        Self {
            state: RecordingState::Stopped,
            supports_autostop,
            enable_autostop: true,
            timeout_secs: 0,
            disable_window_update: false,
            game_rate: 0,
            num_frames: 0,
            start_time_micros: 0,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn num_frames(&self) -> i64 {
        self.num_frames
    }

    /// `nowindupd=1`: whether the host should skip presenting this
    /// recording's frames to its own window.
    pub fn window_update_disabled(&self) -> bool {
        self.disable_window_update
    }

    /// Transitions to `Waiting` and resets the per-recording counters
    /// (`game_rec_start_movie`'s post-`svr_start` bookkeeping).
    pub fn begin(&mut self, args: &StartMovieArgs, game_rate: u32, now_micros: i64) {
        self.enable_autostop = args.autostop;
        self.timeout_secs = args.timeout;
        self.disable_window_update = args.disable_window_update;
        self.game_rate = game_rate;
        self.state = RecordingState::Waiting;
        self.num_frames = 0;
        self.start_time_micros = now_micros;
    }

    /// `game_rec_end_movie`'s state change; returns the elapsed time and
    /// average fps for the log line the caller should print.
    pub fn end(&mut self, now_micros: i64) -> (f32, f32) {
        self.state = RecordingState::Stopped;

        if self.num_frames <= 0 {
            return (0.0, 0.0);
        }

        let time_taken = (now_micros - self.start_time_micros) as f32 / 1_000_000.0;
        let fps = if time_taken > 0.0 { self.num_frames as f32 / time_taken } else { 0.0 };
        (time_taken, fps)
    }

    /// `game_rec_update_recording_state`. Autostart/autostop only
    /// applies when the host reports autostop capability; games without it
    /// record for as long as the recording is explicitly running.
    pub fn update_recording_state(&mut self, signon: SignonState) {
        if !self.supports_autostop {
            return;
        }

        match signon {
            SignonState::None => {
                if self.state == RecordingState::Possible {
                    self.state = if self.enable_autostop { RecordingState::Stopped } else { RecordingState::Waiting };
                }
            }
            SignonState::Full => {
                if self.state == RecordingState::Waiting {
                    self.state = RecordingState::Possible;
                }
            }
            SignonState::Other => {}
        }
    }

    /// `game_rec_update_autostop`: if we disconnected last tick and a
    /// recording is still nominally active, this tick ends it. Returns
    /// whether the caller must perform the actual teardown.
    pub fn update_autostop(&mut self, movie_active: bool) -> bool {
        self.state == RecordingState::Stopped && movie_active
    }

    /// `game_rec_run_frame`'s gate: whether this tick should capture a
    /// frame at all.
    pub fn should_run_frame(&self, movie_active: bool) -> bool {
        self.state == RecordingState::Possible && movie_active
    }

    pub fn note_frame(&mut self) {
        self.num_frames += 1;
    }

    /// `game_rec_update_timeout`: whether the elapsed frame count has
    /// reached the configured timeout. A `timeout_secs` of 0 disables this
    /// check entirely ("no timeout").
    pub fn timed_out(&self) -> bool {
        if self.timeout_secs == 0 {
            return false;
        }
        let end_frame = self.timeout_secs as i64 * self.game_rate as i64;
        self.num_frames >= end_frame
    }
}

pub const START_MOVIE_USAGE: &str = "\
Usage: startmovie <name> (<optional parameters>)
Starts to record a movie with an optional parameters.

Optional parameters are written in the following example format:

    startmovie a.mov timeout=40 profile=my_profile

The order does not matter for the optional parameters, and you can omit the ones you do not need.
The parameters are for features that are per render, and not persistent like the profile.

Optional parameters are:

    timeout=<seconds>
    Automatically stop rendering after the elapsed video time passes.
    This will add a progress bar to the task bar icon. By default, there is no timeout.

    profile=<string>
    Override which rendering profile to use.
    If omitted, the default profile is used.

    autostop=<value>
    Automatically stop the movie on demo disconnect. This can be 0 or 1. Default is 1.
    This is used to determine what happens when a demo ends, when you get kicked back to the main menu.

    nowindupd=<value>
    Disable window presentation. This can be 0 or 1. Default is 0.
    For some systems this may improve performance, however you will not be able to see anything.\
";

pub const INVALID_EXTENSION_MESSAGE: &str = "File extension is wrong or missing. You may choose between MP4, MKV, MOV";

#[derive(Debug, Clone, PartialEq)]
pub struct StartMovieArgs {
    pub profile: Option<String>,
    pub timeout: u32,
    pub autostop: bool,
    pub disable_window_update: bool,
}

impl Default for StartMovieArgs {
    fn default() -> Self {
        Self { profile: None, timeout: 0, autostop: true, disable_window_update: false }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartMovieError {
    #[error("missing movie file name")]
    MissingName,
    #[error("{}", INVALID_EXTENSION_MESSAGE)]
    InvalidExtension,
}

const VALID_EXTENSIONS: [&str; 3] = ["mp4", "mkv", "mov"];

/// Parses a `startmovie` command's trailing arguments: the
/// output file name followed by `key=value` options in any order.
pub fn parse_start_movie_args(value_args: &str) -> Result<(String, StartMovieArgs), StartMovieError> {
    let mut tokens = value_args.split_whitespace();
    let name = tokens.next().ok_or(StartMovieError::MissingName)?.to_string();

    if name.is_empty() {
        return Err(StartMovieError::MissingName);
    }

    let ext_ok = Path::new(&name)
        .extension()
        .map(|ext| VALID_EXTENSIONS.iter().any(|valid| ext.eq_ignore_ascii_case(valid)))
        .unwrap_or(false);

    if !ext_ok {
        return Err(StartMovieError::InvalidExtension);
    }

    let mut args = StartMovieArgs::default();

    for token in tokens {
        let Some((key, value)) = token.split_once('=') else { continue };
        match key {
            "profile" => args.profile = Some(value.to_string()),
            "timeout" => args.timeout = value.parse().unwrap_or(0),
            "autostop" => args.autostop = value != "0",
            "nowindupd" => args.disable_window_update = value != "0",
            _ => {}
        }
    }

    Ok((name, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_all_known_keys_in_any_order() {
        let (name, args) = parse_start_movie_args("a.mov timeout=40 profile=my_profile autostop=0 nowindupd=1").unwrap();
        assert_eq!(name, "a.mov");
        assert_eq!(args.timeout, 40);
        assert_eq!(args.profile.as_deref(), Some("my_profile"));
        assert!(!args.autostop);
        assert!(args.disable_window_update);
    }

    #[test]
    fn missing_extension_is_rejected() {
        let result = parse_start_movie_args("a");
        assert!(matches!(result, Err(StartMovieError::InvalidExtension)));
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let result = parse_start_movie_args("a.avi");
        assert!(matches!(result, Err(StartMovieError::InvalidExtension)));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let (name, _) = parse_start_movie_args("A.MP4").unwrap();
        assert_eq!(name, "A.MP4");
    }

    #[test]
    fn defaults_are_autostop_on_no_timeout_window_updates_enabled() {
        let (_, args) = parse_start_movie_args("a.mkv").unwrap();
        assert_eq!(args.timeout, 0);
        assert!(args.autostop);
        assert!(!args.disable_window_update);
        assert_eq!(args.profile, None);
    }

    #[test]
    fn waiting_transitions_to_possible_on_full_connect() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs::default(), 60, 0);
        assert_eq!(sched.state(), RecordingState::Waiting);

        sched.update_recording_state(SignonState::Full);
        assert_eq!(sched.state(), RecordingState::Possible);
    }

    #[test]
    fn possible_stops_on_disconnect_when_autostop_enabled() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs { autostop: true, ..Default::default() }, 60, 0);
        sched.update_recording_state(SignonState::Full);

        sched.update_recording_state(SignonState::None);
        assert_eq!(sched.state(), RecordingState::Stopped);
    }

    #[test]
    fn possible_waits_on_disconnect_when_autostop_disabled() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs { autostop: false, ..Default::default() }, 60, 0);
        sched.update_recording_state(SignonState::Full);

        sched.update_recording_state(SignonState::None);
        assert_eq!(sched.state(), RecordingState::Waiting);
    }

    #[test]
    fn games_without_autostop_capability_never_auto_transition() {
        let mut sched = RecordingScheduler::new(false);
        sched.begin(&StartMovieArgs::default(), 60, 0);
        sched.update_recording_state(SignonState::Full);
        assert_eq!(sched.state(), RecordingState::Waiting);
    }

    #[test]
    fn timeout_zero_never_times_out() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs::default(), 60, 0);
        for _ in 0..100_000 {
            sched.note_frame();
        }
        assert!(!sched.timed_out());
    }

    #[test]
    fn timeout_fires_once_frame_count_covers_the_configured_seconds() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs { timeout: 2, ..Default::default() }, 60, 0);
        for _ in 0..119 {
            sched.note_frame();
            assert!(!sched.timed_out());
        }
        sched.note_frame();
        assert!(sched.timed_out());
    }

    #[test]
    fn ending_before_any_frames_reports_zero_stats() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs::default(), 60, 0);
        let (time_taken, fps) = sched.end(1_000_000);
        assert_eq!(time_taken, 0.0);
        assert_eq!(fps, 0.0);
    }

    #[test]
    fn ending_after_frames_reports_nonzero_fps() {
        let mut sched = RecordingScheduler::new(true);
        sched.begin(&StartMovieArgs::default(), 60, 0);
        for _ in 0..60 {
            sched.note_frame();
        }
        let (time_taken, fps) = sched.end(1_000_000);
        assert_eq!(time_taken, 1.0);
        assert_eq!(fps, 60.0);
    }
}
