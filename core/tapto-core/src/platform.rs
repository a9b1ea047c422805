//! Host platform capabilities consumed by the session loop.

use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{PlatformConfig, TaptoConfig};
use crate::error::PlatformError;
use crate::token::Token;

pub trait Platform: Send + Sync {
    /// True while a title is running, false when the platform sits at its
    /// menu.
    fn is_launcher_active(&self) -> bool;

    fn kill_launcher(&self) -> Result<(), PlatformError>;

    /// Name of the running launcher (core, system, emulator). Empty at the
    /// menu.
    fn active_launcher_name(&self) -> String;

    fn play_success_sound(&self, config: &TaptoConfig);

    fn play_fail_sound(&self, config: &TaptoConfig);

    /// Executes an accepted token. Called by the launch worker, never by
    /// the session loop.
    fn launch(&self, token: &Token, text: &str) -> Result<(), PlatformError>;
}

/// Platform whose capabilities are external commands from the config file.
#[derive(Debug)]
pub struct CommandPlatform {
    config: PlatformConfig,
    active_launcher: Mutex<String>,
}

impl CommandPlatform {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            config,
            active_launcher: Mutex::new(String::new()),
        }
    }

    fn remembered_launcher(&self) -> String {
        self.active_launcher
            .lock()
            .map(|name| name.clone())
            .unwrap_or_default()
    }

    fn remember_launcher(&self, name: &str) {
        if let Ok(mut active) = self.active_launcher.lock() {
            *active = name.to_string();
        }
    }

    fn play_sound(&self, config: &TaptoConfig, sound: Option<&std::path::Path>) {
        if config.tapto.disable_sounds {
            return;
        }
        let Some(sound) = sound else {
            return;
        };
        let sound = sound.to_string_lossy().to_string();
        if let Err(err) = run_command(&self.config.sound_command, "sound", &[sound.as_str()]) {
            warn!(error = %err, "Failed to play sound");
        }
    }
}

impl Platform for CommandPlatform {
    fn is_launcher_active(&self) -> bool {
        !self.active_launcher_name().is_empty()
    }

    fn kill_launcher(&self) -> Result<(), PlatformError> {
        run_command(&self.config.kill_command, "kill", &[])?;
        self.remember_launcher("");
        info!("Launcher killed");
        Ok(())
    }

    fn active_launcher_name(&self) -> String {
        if self.config.active_launcher_command.is_empty() {
            return self.remembered_launcher();
        }
        match capture_command(&self.config.active_launcher_command) {
            Ok(name) => name,
            Err(err) => {
                debug!(error = %err, "Active launcher query failed");
                String::new()
            }
        }
    }

    fn play_success_sound(&self, config: &TaptoConfig) {
        self.play_sound(config, self.config.success_sound.as_deref());
    }

    fn play_fail_sound(&self, config: &TaptoConfig) {
        self.play_sound(config, self.config.fail_sound.as_deref());
    }

    fn launch(&self, token: &Token, text: &str) -> Result<(), PlatformError> {
        run_command(&self.config.launch_command, "launch", &[text])?;
        self.remember_launcher(text);
        info!(uid = %token.uid, text = %text, "Launched token");
        Ok(())
    }
}

fn run_command(argv: &[String], name: &'static str, extra: &[&str]) -> Result<(), PlatformError> {
    let (program, args) = argv.split_first().ok_or(PlatformError::NotConfigured(name))?;
    let status = Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| PlatformError::CommandFailed {
            command: program.clone(),
            details: err.to_string(),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandFailed {
            command: program.clone(),
            details: format!("exited with {}", status),
        })
    }
}

fn capture_command(argv: &[String]) -> Result<String, PlatformError> {
    let (program, args) = argv
        .split_first()
        .ok_or(PlatformError::NotConfigured("active launcher"))?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| PlatformError::CommandFailed {
            command: program.clone(),
            details: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(PlatformError::CommandFailed {
            command: program.clone(),
            details: format!("exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
