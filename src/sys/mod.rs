//! Ports to the outside world: the window service CLI, the application
//! launcher and the accessibility positioner.

pub mod aerospace;
pub mod command;
pub mod geometry;
pub mod launch;
pub mod modifiers;
pub mod osascript;
pub mod positioner;
pub mod window_service;
