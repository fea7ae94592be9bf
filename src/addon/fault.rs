/*
 *  addon/fault.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Containment of faults raised by addon code
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use log::error;
use thiserror::Error;

/// A fault raised inside addon code
///
/// Addons report faults through the `AddonFault` out parameter; a panic
/// unwinding out of an entry point is mapped onto the same three shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Addon signalled a status code
    Status(i32),

    /// Addon signalled a structured fault with a message
    Message(String),

    /// Anything else
    Unknown,
}

impl Fault {
    /// Classify a panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(fault) = payload.downcast_ref::<Fault>() {
            fault.clone()
        } else if let Some(code) = payload.downcast_ref::<i32>() {
            Fault::Status(*code)
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            Fault::Message(s.to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Fault::Message(s.clone())
        } else {
            Fault::Unknown
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Status(code) => write!(f, "status fault {}", code),
            Fault::Message(message) => write!(f, "{}", message),
            Fault::Unknown => write!(f, "unknown fault"),
        }
    }
}

/// Whether a faulting call happened in steady state or during teardown
///
/// Teardown faults only trip the bridge; they never re-enter teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Active,
    Teardown,
}

/// Failure of a host call into an addon
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("addon is not initialized")]
    Detached,

    #[error("addon was disabled after a fault")]
    Tripped,

    #[error("addon fault: {0}")]
    Fault(Fault),

    #[error("addon does not provide {0}")]
    MissingEntry(&'static str),

    #[error("no instance with id {0}")]
    UnknownInstance(String),
}

impl From<Fault> for CallError {
    fn from(fault: Fault) -> Self {
        CallError::Fault(fault)
    }
}

/// Run one call into addon code, catching every fault it can raise
///
/// Both a reported fault (`Err`) and a panic unwinding out of the call are
/// logged against the addon and function and returned as `Err(Fault)`.
pub fn isolate<T, F>(addon_id: &str, function: &str, f: F) -> Result<T, Fault>
where
    F: FnOnce() -> Result<T, Fault>,
{
    let fault = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(fault)) => fault,
        Err(payload) => Fault::from_panic(payload),
    };

    match &fault {
        Fault::Status(code) => error!("{} - {}: addon raised status {}", addon_id, function, code),
        Fault::Message(message) => error!("{} - {}: addon raised \"{}\"", addon_id, function, message),
        Fault::Unknown => error!("{} - {}: addon raised an unknown fault", addon_id, function),
    }

    Err(fault)
}
