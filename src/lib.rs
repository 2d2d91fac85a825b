//! Peak-shaving controller library
//!
//! This module exposes the control loop and its collaborators for use in
//! the binaries and in tests.

pub mod control;
pub mod core;
pub mod daemon;
pub mod db;
pub mod refinement;
