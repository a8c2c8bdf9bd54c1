//! `arbiter` - session coordinator for timed multiplayer competitions
//!
//! This library drives the lifecycle of a competition hosted inside a
//! multiplayer simulation: preparation, spawn selection, a countdown,
//! win-condition and discovery watchers, team assignment, and command
//! permission control. Background timers and watchers never touch the
//! host directly; they hand work to the simulation thread through a task
//! queue that the host drains once per tick.

pub mod announce;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod observability;
pub mod permission;
pub mod sandbox;
pub mod schedule;
pub mod session;
pub mod tasks;
pub mod teams;
pub mod timer;
pub mod watcher;
