//! Workflow orchestration.
//!
//! This module owns the command queue state machine and the controller task that drives it
//! one invocation at a time. UI/CLI layers send commands in and receive events out, which
//! keeps process lifecycle out of the presentation code.

mod controller;
pub mod session;

pub(crate) use controller::{run_controller, UiCommand};
