//! # Metrics Module
//!
//! Device health metrics attached to every published measurement.
//!
//! This module handles:
//! - CPU temperature from the internal sensor or a thermal zone
//! - Battery voltage and charge estimate
//! - Uptime since boot
//! - Device identity (hardware unique id, MAC rendering)
//! - Free memory, free flash and CPU frequency

pub mod battery;
pub mod identity;
pub mod system;
pub mod temperature;
pub mod uptime;
