//! calltest library - telephony check engine
//!
//! This module exports internal components for integration testing.

pub mod check;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dialplan;
pub mod dtmf;
pub mod endpoint;
pub mod error;
pub mod lock;
pub mod mode;
pub mod orchestrator;
pub mod scheduler;
pub mod status;
