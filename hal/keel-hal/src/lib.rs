//! Keel Hardware Abstraction Layer
//!
//! This crate defines the hardware traits that chip-specific HALs
//! implement so that the Keel driver framework can run on different
//! parts (ESP32 today, anything with a shift-register SPI block tomorrow).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application / boot glue                │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  keel-drivers (SPI, GPIO)               │
//! │  keel-core (registry, locks, errors)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  keel-hal (this crate - traits)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`spi::SpiController`] - SPI shift engine and chip-select lines

#![no_std]
#![deny(unsafe_code)]

pub mod spi;

pub use spi::{BusConfig, HwError, Mode, SpiController};
