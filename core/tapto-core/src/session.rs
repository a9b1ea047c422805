//! Reader session state machine.
//!
//! [`SessionMachine`] holds the per-session bookkeeping (removal countdown,
//! loaded software, last launcher) and decides what each input means.
//! [`ScanEventProcessor`] owns the blocking loop around it: keep the reader
//! connected, wait for the next input, feed it to the machine.
//!
//! A card resting on a reader is reported over and over. The machine is
//! built so that repeats are harmless: duplicate tokens do not touch the
//! shared state, the running title's card is never relaunched, and repeated
//! removal reports only advance the exit countdown.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TaptoConfig;
use crate::connector::ReaderConnector;
use crate::error::ReaderError;
use crate::platform::Platform;
use crate::queue::LaunchQueue;
use crate::reader::ScanEvent;
use crate::state::SharedState;
use crate::token::{Fingerprint, Token};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const FAIL_SOUND_INTERVAL: Duration = Duration::from_secs(1);

/// One wake-up of the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopInput {
    Scan(ScanEvent),
    /// The platform finished loading this software.
    SoftwareLoaded(Token),
    Stop,
}

/// What the machine did with an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    SoftwareRecorded,
    ScanError { sound_played: bool },
    /// The card is absent; only removal bookkeeping ran.
    Removal,
    LauncherKilled,
    /// The scanned card belongs to the software already running.
    AlreadyLoaded,
    LauncherDisabled,
    Enqueued,
    Stopped,
}

pub struct SessionMachine {
    config: Arc<TaptoConfig>,
    state: Arc<SharedState>,
    platform: Arc<dyn Platform>,
    queue: LaunchQueue,
    candidate_for_removal: bool,
    card_removal_time: Option<Instant>,
    loaded_software: Option<Fingerprint>,
    last_launcher_name: String,
    last_error: Option<Instant>,
}

impl SessionMachine {
    pub fn new(
        config: Arc<TaptoConfig>,
        state: Arc<SharedState>,
        platform: Arc<dyn Platform>,
        queue: LaunchQueue,
    ) -> Self {
        Self {
            config,
            state,
            platform,
            queue,
            candidate_for_removal: false,
            card_removal_time: None,
            loaded_software: None,
            last_launcher_name: String::new(),
            last_error: None,
        }
    }

    pub fn candidate_for_removal(&self) -> bool {
        self.candidate_for_removal
    }

    pub fn card_removal_time(&self) -> Option<Instant> {
        self.card_removal_time
    }

    pub fn loaded_software(&self) -> Option<&Fingerprint> {
        self.loaded_software.as_ref()
    }

    pub fn handle(&mut self, input: LoopInput, now: Instant) -> ScanOutcome {
        let scanned = match input {
            LoopInput::Stop => return ScanOutcome::Stopped,
            LoopInput::SoftwareLoaded(token) => {
                debug!(token = %token, "Set software token");
                self.loaded_software = Some(token.fingerprint());
                return ScanOutcome::SoftwareRecorded;
            }
            LoopInput::Scan(ScanEvent::Error(err)) => {
                let sound_played = self.report_scan_error(&err, now);
                return ScanOutcome::ScanError { sound_played };
            }
            LoopInput::Scan(ScanEvent::Removed) => None,
            LoopInput::Scan(ScanEvent::Token(token)) if token.is_blank() => None,
            LoopInput::Scan(ScanEvent::Token(token)) => Some(token),
        };

        // One platform query per input; the command platform spawns a
        // process for each.
        let in_game = self.platform.is_launcher_active();
        let launcher_name = if in_game {
            self.platform.active_launcher_name()
        } else {
            String::new()
        };

        if self.config.tapto.exit_game {
            match &scanned {
                // Only titles this session loaded are exited; a title started
                // from the menu has no card to remove.
                None if in_game
                    && self.loaded_software.is_some()
                    && !self.candidate_for_removal =>
                {
                    debug!("Start countdown for removal");
                    self.card_removal_time = Some(now);
                    self.candidate_for_removal = true;
                }
                Some(token) if self.candidate_for_removal && self.is_loaded(token) => {
                    info!("Card was removed but inserted back");
                    self.clear_removal();
                }
                _ => {}
            }
        }

        if let Some(token) = &scanned {
            info!(token = %token, "New card scanned");
            self.state.set_active_card(token.clone());
        }

        if in_game && self.should_exit(&launcher_name, now) {
            debug!("Should exit, killing launcher");
            self.clear_removal();
            if let Err(err) = self.platform.kill_launcher() {
                warn!(error = %err, "Failed to kill launcher");
            }
            self.loaded_software = None;
            self.last_launcher_name.clear();
            return ScanOutcome::LauncherKilled;
        }

        if !in_game {
            // Nothing to count down from at the menu.
            self.clear_removal();
            if !self.last_launcher_name.is_empty() {
                debug!("Back at menu, clearing session values");
                self.loaded_software = None;
            }
        }
        self.last_launcher_name = launcher_name;

        let Some(token) = scanned else {
            return ScanOutcome::Removal;
        };

        // A card left on the reader, or put back during the exit delay,
        // must not restart the title it already launched.
        if self.is_loaded(&token) {
            info!(uid = %token.uid, "Token skipped, it is the currently loaded software");
            self.candidate_for_removal = false;
            return ScanOutcome::AlreadyLoaded;
        }

        if self.launcher_disabled() {
            debug!(uid = %token.uid, "Launcher disabled, not launching token");
            return ScanOutcome::LauncherDisabled;
        }
        self.platform.play_success_sound(&self.config);

        self.clear_removal();
        info!(
            token = %token,
            loaded = ?self.loaded_software.as_ref().map(Fingerprint::as_str),
            "About to process token"
        );
        self.queue.enqueue(token);
        ScanOutcome::Enqueued
    }

    fn report_scan_error(&mut self, err: &ReaderError, now: Instant) -> bool {
        error!(error = %err, "Error reading card");
        let sound_played = self
            .last_error
            .map(|last| now.saturating_duration_since(last) > FAIL_SOUND_INTERVAL)
            .unwrap_or(true);
        if sound_played {
            self.platform.play_fail_sound(&self.config);
        }
        self.last_error = Some(now);
        sound_played
    }

    /// Exit decision for a running title named `launcher`.
    fn should_exit(&self, launcher: &str, now: Instant) -> bool {
        if !self.candidate_for_removal || self.launched_from_api() || self.launcher_disabled()
        {
            return false;
        }

        let Some(removed_at) = self.card_removal_time else {
            return false;
        };
        let elapsed = now.saturating_duration_since(removed_at);
        let delay = self.config.exit_game_delay();
        if elapsed < delay || !self.config.tapto.exit_game {
            return false;
        }

        if self.config.in_exit_game_blocklist(launcher) {
            debug!(launcher = %launcher, "Launcher is in exit blocklist");
            return false;
        }

        info!(
            elapsed_secs = elapsed.as_secs_f64(),
            delay_secs = delay.as_secs(),
            "Exiting game after removal delay"
        );
        true
    }

    fn is_loaded(&self, token: &Token) -> bool {
        self.loaded_software.as_ref() == Some(&token.fingerprint())
    }

    /// API launches need not carry a uid, so they may only show up on the
    /// active card.
    fn launched_from_api(&self) -> bool {
        self.state.active_card().from_api || self.state.last_scanned().from_api
    }

    fn launcher_disabled(&self) -> bool {
        self.config.tapto.disable_launcher || self.state.is_launcher_disabled()
    }

    fn clear_removal(&mut self) {
        self.candidate_for_removal = false;
        self.card_removal_time = None;
    }
}

enum Wake {
    Input(LoopInput),
    SoftwareChannelClosed,
}

/// The session loop. Runs on its own thread until stop is requested.
pub struct ScanEventProcessor {
    machine: SessionMachine,
    connector: ReaderConnector,
    state: Arc<SharedState>,
    scan_sender: Sender<ScanEvent>,
    scan_receiver: Receiver<ScanEvent>,
    loaded_software: Receiver<Token>,
    reconnect_interval: Duration,
}

impl ScanEventProcessor {
    pub fn new(
        machine: SessionMachine,
        connector: ReaderConnector,
        loaded_software: Receiver<Token>,
    ) -> Self {
        let (scan_sender, scan_receiver) = crossbeam_channel::unbounded();
        let state = Arc::clone(&machine.state);
        Self {
            machine,
            connector,
            state,
            scan_sender,
            scan_receiver,
            loaded_software,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn run(mut self) {
        let stop = self.state.stop_signal();

        while !self.state.should_stop() {
            if let Err(err) = self.connector.ensure_connected(&self.state, &self.scan_sender) {
                error!(error = %err, "Error connecting reader");
                // Doubles as the retry backoff; wakes early on stop.
                let _ = stop.recv_timeout(self.reconnect_interval);
                continue;
            }

            match self.next_input(&stop) {
                Wake::Input(input) => {
                    let outcome = self.machine.handle(input, Instant::now());
                    debug!(outcome = ?outcome, "Processed loop input");
                }
                Wake::SoftwareChannelClosed => {
                    warn!("Loaded software channel closed; ignoring further notifications");
                    self.loaded_software = crossbeam_channel::never();
                }
            }
        }

        self.close_reader();
        info!("Reader session stopped");
    }

    fn next_input(&self, stop: &Receiver<()>) -> Wake {
        crossbeam_channel::select! {
            recv(self.scan_receiver) -> event => match event {
                Ok(event) => Wake::Input(LoopInput::Scan(event)),
                Err(_) => Wake::Input(LoopInput::Stop),
            },
            recv(self.loaded_software) -> token => match token {
                Ok(token) => Wake::Input(LoopInput::SoftwareLoaded(token)),
                Err(_) => Wake::SoftwareChannelClosed,
            },
            recv(stop) -> _ => Wake::Input(LoopInput::Stop),
        }
    }

    fn close_reader(&self) {
        if let Some(reader) = self.state.reader() {
            if let Err(err) = reader.close() {
                warn!(error = %err, "Error closing device");
            }
            self.state.set_reader_disconnected();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::token::TokenKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlatform {
        in_game: AtomicBool,
        launcher_name: Mutex<String>,
        kills: AtomicUsize,
        success_sounds: AtomicUsize,
        fail_sounds: AtomicUsize,
        queries: AtomicUsize,
    }

    impl FakePlatform {
        fn start(&self, name: &str) {
            self.in_game.store(true, Ordering::SeqCst);
            *self.launcher_name.lock().expect("name lock") = name.to_string();
        }

        fn back_to_menu(&self) {
            self.in_game.store(false, Ordering::SeqCst);
            self.launcher_name.lock().expect("name lock").clear();
        }
    }

    impl Platform for FakePlatform {
        fn is_launcher_active(&self) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.in_game.load(Ordering::SeqCst)
        }

        fn kill_launcher(&self) -> Result<(), PlatformError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.back_to_menu();
            Ok(())
        }

        fn active_launcher_name(&self) -> String {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.launcher_name.lock().expect("name lock").clone()
        }

        fn play_success_sound(&self, _config: &TaptoConfig) {
            self.success_sounds.fetch_add(1, Ordering::SeqCst);
        }

        fn play_fail_sound(&self, _config: &TaptoConfig) {
            self.fail_sounds.fetch_add(1, Ordering::SeqCst);
        }

        fn launch(&self, _token: &Token, _text: &str) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        machine: SessionMachine,
        platform: Arc<FakePlatform>,
        state: Arc<SharedState>,
        launches: Receiver<Token>,
        t0: Instant,
    }

    impl Harness {
        fn new(configure: impl FnOnce(&mut TaptoConfig)) -> Self {
            let dir = tempfile::tempdir().expect("temp dir");
            let mut config = TaptoConfig::default();
            configure(&mut config);
            let state = Arc::new(SharedState::new(dir.path().join("disable_launch")));
            let platform = Arc::new(FakePlatform::default());
            let (queue, launches) = LaunchQueue::new();
            let machine = SessionMachine::new(
                Arc::new(config),
                Arc::clone(&state),
                Arc::clone(&platform) as Arc<dyn Platform>,
                queue,
            );
            Self {
                _dir: dir,
                machine,
                platform,
                state,
                launches,
                t0: Instant::now(),
            }
        }

        fn at(&self, millis: u64) -> Instant {
            self.t0 + Duration::from_millis(millis)
        }

        fn scan(&mut self, token: &Token, millis: u64) -> ScanOutcome {
            let now = self.at(millis);
            self.machine
                .handle(LoopInput::Scan(ScanEvent::Token(token.clone())), now)
        }

        fn remove(&mut self, millis: u64) -> ScanOutcome {
            let now = self.at(millis);
            self.machine.handle(LoopInput::Scan(ScanEvent::Removed), now)
        }

        fn loaded(&mut self, token: &Token, millis: u64) -> ScanOutcome {
            let now = self.at(millis);
            self.machine
                .handle(LoopInput::SoftwareLoaded(token.clone()), now)
        }

        fn launched(&self) -> Vec<Token> {
            self.launches.try_iter().collect()
        }

        fn kills(&self) -> usize {
            self.platform.kills.load(Ordering::SeqCst)
        }
    }

    fn exit_game(delay: u64) -> impl FnOnce(&mut TaptoConfig) {
        move |config| {
            config.tapto.exit_game = true;
            config.tapto.exit_game_delay = delay;
        }
    }

    fn card(uid: &str, text: &str) -> Token {
        Token::new(TokenKind::Pn532, uid, text)
    }

    #[test]
    fn scanned_token_is_enqueued_with_success_sound() {
        let mut h = Harness::new(|_| {});
        let mario = card("04aa", "snes/mario.sfc");

        assert_eq!(h.scan(&mario, 0), ScanOutcome::Enqueued);
        assert_eq!(h.launched(), vec![mario.clone()]);
        assert_eq!(h.state.active_card(), mario);
        assert_eq!(h.platform.success_sounds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loaded_software_card_is_not_relaunched() {
        let mut h = Harness::new(exit_game(5));
        let mario = card("04aa", "snes/mario.sfc");
        h.scan(&mario, 0);
        h.launched();
        h.loaded(&mario, 100);
        h.platform.start("SNES");

        let mut resting = mario.clone();
        resting.scan_time = mario.scan_time.map(|t| t + chrono::Duration::milliseconds(250));
        assert_eq!(h.scan(&resting, 250), ScanOutcome::AlreadyLoaded);
        assert!(h.launched().is_empty());
        assert!(!h.machine.candidate_for_removal());
    }

    #[test]
    fn reinserted_card_cancels_countdown() {
        let mut h = Harness::new(exit_game(5));
        let mario = card("04aa", "snes/mario.sfc");
        h.scan(&mario, 0);
        h.loaded(&mario, 100);
        h.platform.start("SNES");

        assert_eq!(h.remove(1_000), ScanOutcome::Removal);
        assert!(h.machine.candidate_for_removal());
        assert_eq!(h.machine.card_removal_time(), Some(h.at(1_000)));

        assert_eq!(h.scan(&mario, 3_000), ScanOutcome::AlreadyLoaded);
        assert!(!h.machine.candidate_for_removal());
        assert_eq!(h.machine.card_removal_time(), None);

        h.remove(3_500);
        assert_eq!(h.machine.card_removal_time(), Some(h.at(3_500)));
        h.scan(&mario, 6_100);
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn removal_kills_after_delay_only_once() {
        let mut h = Harness::new(exit_game(3));
        let a = card("04aa", "snes/mario.sfc");
        assert_eq!(h.scan(&a, 0), ScanOutcome::Enqueued);
        assert_eq!(h.launched(), vec![a.clone()]);
        h.loaded(&a, 100);
        h.platform.start("SNES");

        assert_eq!(h.remove(1_000), ScanOutcome::Removal);
        assert_eq!(h.remove(2_000), ScanOutcome::Removal);
        assert_eq!(h.remove(3_999), ScanOutcome::Removal);
        assert_eq!(h.kills(), 0);

        assert_eq!(h.remove(4_500), ScanOutcome::LauncherKilled);
        assert_eq!(h.kills(), 1);
        assert!(h.machine.loaded_software().is_none());
        assert!(!h.machine.candidate_for_removal());

        for millis in [5_000, 9_000, 20_000] {
            h.remove(millis);
        }
        assert_eq!(h.kills(), 1);
    }

    #[test]
    fn removal_at_menu_never_kills() {
        let mut h = Harness::new(exit_game(1));
        let a = card("04aa", "snes/mario.sfc");
        h.scan(&a, 0);
        h.loaded(&a, 100);

        h.remove(1_000);
        assert_eq!(h.remove(10_000), ScanOutcome::Removal);
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn exit_disabled_keeps_no_countdown() {
        let mut h = Harness::new(|_| {});
        let a = card("04aa", "snes/mario.sfc");
        h.scan(&a, 0);
        h.loaded(&a, 100);
        h.platform.start("SNES");

        h.remove(1_000);
        assert!(!h.machine.candidate_for_removal());
        h.remove(60_000);
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn blocklisted_launcher_is_not_killed() {
        let mut h = Harness::new(|config| {
            config.tapto.exit_game = true;
            config.tapto.exit_game_delay = 0;
            config.tapto.exit_game_blocklist = vec!["ao486".to_string()];
        });
        let a = card("04aa", "ao486/win95.vhd");
        h.scan(&a, 0);
        h.loaded(&a, 100);
        h.platform.start("AO486");

        h.remove(1_000);
        assert_eq!(h.remove(2_000), ScanOutcome::Removal);
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn api_token_is_not_exited_on_removal() {
        let mut h = Harness::new(exit_game(0));
        let a = Token::from_api("04aa", "snes/mario.sfc");
        h.state.set_active_card(a.clone());
        h.loaded(&a, 100);
        h.platform.start("SNES");

        h.remove(1_000);
        assert_eq!(h.remove(5_000), ScanOutcome::Removal);
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn returning_to_menu_clears_session() {
        let mut h = Harness::new(exit_game(30));
        let a = card("04aa", "snes/mario.sfc");
        h.scan(&a, 0);
        h.loaded(&a, 100);
        h.platform.start("SNES");
        h.remove(1_000);
        assert!(h.machine.candidate_for_removal());
        assert!(h.machine.loaded_software().is_some());

        h.platform.back_to_menu();
        h.remove(2_000);
        assert!(!h.machine.candidate_for_removal());
        assert_eq!(h.machine.card_removal_time(), None);
        assert!(h.machine.loaded_software().is_none());

        // The same card launches again from the menu.
        assert_eq!(h.scan(&a, 3_000), ScanOutcome::Enqueued);
    }

    #[test]
    fn disabled_launcher_updates_state_without_enqueue() {
        let mut h = Harness::new(|_| {});
        h.state.disable_launcher();
        let a = card("04aa", "snes/mario.sfc");

        assert_eq!(h.scan(&a, 0), ScanOutcome::LauncherDisabled);
        assert_eq!(h.state.active_card(), a);
        assert!(h.launched().is_empty());
        assert_eq!(h.platform.success_sounds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn config_override_disables_launcher() {
        let mut h = Harness::new(|config| config.tapto.disable_launcher = true);
        let a = card("04aa", "snes/mario.sfc");
        assert_eq!(h.scan(&a, 0), ScanOutcome::LauncherDisabled);
        assert!(h.launched().is_empty());
    }

    #[test]
    fn fail_sound_is_throttled() {
        let mut h = Harness::new(|_| {});
        let error = || LoopInput::Scan(ScanEvent::Error(ReaderError::ReadFailed("crc".into())));

        let (t0, t400, t2000) = (h.at(0), h.at(400), h.at(2_000));
        let first = h.machine.handle(error(), t0);
        let second = h.machine.handle(error(), t400);
        assert_eq!(first, ScanOutcome::ScanError { sound_played: true });
        assert_eq!(second, ScanOutcome::ScanError { sound_played: false });
        assert_eq!(h.platform.fail_sounds.load(Ordering::SeqCst), 1);

        let third = h.machine.handle(error(), t2000);
        assert_eq!(third, ScanOutcome::ScanError { sound_played: true });
    }

    #[test]
    fn blank_token_counts_as_removal() {
        let mut h = Harness::new(exit_game(5));
        let a = card("04aa", "snes/mario.sfc");
        h.loaded(&a, 0);
        h.platform.start("SNES");
        let now = h.at(0);
        let outcome = h
            .machine
            .handle(LoopInput::Scan(ScanEvent::Token(Token::default())), now);
        assert_eq!(outcome, ScanOutcome::Removal);
        assert!(h.machine.candidate_for_removal());
        assert_eq!(h.state.active_card(), Token::default());
    }

    #[test]
    fn removals_at_menu_do_not_arm_countdown() {
        let mut h = Harness::new(exit_game(5));
        let a = card("04aa", "snes/mario.sfc");
        h.scan(&a, 0);
        h.loaded(&a, 100);

        h.remove(1_000);
        h.remove(2_000);
        assert!(!h.machine.candidate_for_removal());
        assert_eq!(h.machine.card_removal_time(), None);

        h.platform.start("NES");
        assert_eq!(h.remove(600_250), ScanOutcome::Removal);
        assert_eq!(h.machine.card_removal_time(), Some(h.at(600_250)));
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn title_started_from_menu_is_not_exited() {
        let mut h = Harness::new(exit_game(0));
        h.platform.start("NES");

        for millis in [1_000, 2_000, 30_000] {
            assert_eq!(h.remove(millis), ScanOutcome::Removal);
        }
        assert!(!h.machine.candidate_for_removal());
        assert_eq!(h.kills(), 0);
    }

    #[test]
    fn api_launch_without_uid_survives_removal_after_kill() {
        let mut h = Harness::new(exit_game(0));
        let a = card("04aa", "snes/mario.sfc");
        h.scan(&a, 0);
        h.loaded(&a, 100);
        h.platform.start("SNES");
        assert_eq!(h.remove(1_000), ScanOutcome::LauncherKilled);
        h.remove(2_000);

        let zelda = Token::from_api("", "nes/zelda.nes");
        h.state.set_active_card(zelda.clone());
        h.loaded(&zelda, 60_000);
        h.platform.start("NES");

        assert_eq!(h.remove(60_250), ScanOutcome::Removal);
        assert_eq!(h.remove(61_000), ScanOutcome::Removal);
        assert_eq!(h.kills(), 1);
    }

    #[test]
    fn platform_is_queried_once_per_removal_at_menu() {
        let mut h = Harness::new(exit_game(5));
        for millis in [0, 250, 500, 750] {
            h.remove(millis);
        }
        assert_eq!(h.platform.queries.load(Ordering::SeqCst), 4);

        h.platform.start("SNES");
        h.remove(1_000);
        assert_eq!(h.platform.queries.load(Ordering::SeqCst), 6);
    }
}
