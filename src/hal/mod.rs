//! # Hardware Abstraction Module
//!
//! Board-level primitives the telemetry agent depends on.
//!
//! This module handles:
//! - Analog inputs (internal temperature, battery voltage)
//! - Output lines (status LED, peripheral control, power-down pins)
//! - Hardware watchdog
//! - Deep sleep and full device reset
//!
//! Each primitive is a trait with a Linux sysfs implementation, so the
//! pipeline can run against fakes in tests.

pub mod adc;
pub mod gpio;
pub mod power;
pub mod watchdog;
