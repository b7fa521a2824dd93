//! Hardware-independent core library for zen-motion
//!
//! This crate contains all platform-agnostic logic of the zen-motion
//! stillness meter: IMU signal conditioning and calibration, stability
//! scoring and break detection, practice sessions, daily statistics with
//! history rollover, settings, power handling, the system state machine and
//! record persistence.
//!
//! It is `#![no_std]` and never touches hardware. Platforms supply a
//! [`clock::ClockPort`], a [`sensors::ImuSensor`] and a
//! [`storage::PersistencePort`], call [`device::ZenDevice::tick`] from their
//! main loop and execute the returned [`state_machine::Intent`]s. The same
//! code runs on the device, in the desktop simulator and in tests.

#![no_std]

pub mod app_state;
pub mod clock;
pub mod config;
pub mod device;
pub mod input;
pub mod power;
pub mod sensors;
pub mod session;
pub mod settings;
pub mod stability;
pub mod state_machine;
pub mod stats;
pub mod storage;
