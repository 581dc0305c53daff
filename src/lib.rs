//! Diverts the solar surplus into switchable loads before it is exported to the grid.
//!
//! The control loop samples one grid cycle, computes the powers, and once every decide
//! period switches at most one load on or off through its relay and its remote switch.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod actuator;
pub mod controller;
pub mod error;
pub mod loads;
pub mod pins;
pub mod quantity;
pub mod radio;
pub mod sampler;
pub mod schedule;
pub mod time;

pub use error::Error;
