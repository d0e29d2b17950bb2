//! Operating-mode gate.
//!
//! The device accepts configuration writes only in Configuration mode and
//! drives outputs only in Mission mode. Every driver operation is classified
//! here and checked before any SPI traffic is generated.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    Configuration,
    Mission,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Configuration => write!(f, "configuration"),
            DeviceMode::Mission => write!(f, "mission"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ConfigureGlobal,
    ConfigureChannel,
    ConfigureParallel,
    SetCurrent,
    EnableChannels,
    ReadStatus,
    ReadDiagnostics,
    ClearFaults,
    ReloadWatchdog,
    RegisterAccess,
    ModeTransition,
}

impl Operation {
    /// `None` means the operation is allowed in either mode.
    pub fn required_mode(self) -> Option<DeviceMode> {
        match self {
            Operation::ConfigureGlobal
            | Operation::ConfigureChannel
            | Operation::ConfigureParallel => Some(DeviceMode::Configuration),
            Operation::SetCurrent | Operation::EnableChannels => Some(DeviceMode::Mission),
            Operation::ReadStatus
            | Operation::ReadDiagnostics
            | Operation::ClearFaults
            | Operation::ReloadWatchdog
            | Operation::RegisterAccess
            | Operation::ModeTransition => None,
        }
    }
}

/// Outcome of a requested mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DeviceMode,
    pub to: DeviceMode,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Leaving Mission mode switches every output off on the device.
    pub fn disables_outputs(&self) -> bool {
        self.from == DeviceMode::Mission && self.to == DeviceMode::Configuration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    initialized: bool,
    mode: DeviceMode,
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeState {
    /// Devices come out of reset in Configuration mode.
    pub fn new() -> Self {
        Self {
            initialized: false,
            mode: DeviceMode::Configuration,
        }
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn check(&self, op: Operation) -> Result<()> {
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        match op.required_mode() {
            Some(required) if required != self.mode => Err(DriverError::WrongMode {
                required,
                current: self.mode,
            }),
            _ => Ok(()),
        }
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        self.mode = DeviceMode::Configuration;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Plan a transition without committing it.
    pub fn plan(&self, target: DeviceMode) -> Transition {
        Transition {
            from: self.mode,
            to: target,
        }
    }

    /// Commit a transition once the device has acknowledged it.
    pub fn commit(&mut self, transition: Transition) {
        self.mode = transition.to;
    }
}
