//! `formation-hal` – vehicle devices and station keeping.
//!
//! Everything that touches a vehicle's blocks goes through the traits in this
//! crate, so the formation roles run unchanged against real drivers or the
//! in-process simulation.
//!
//! # Modules
//!
//! - [`controller`] – [`VehicleController`][controller::VehicleController]:
//!   the cockpit or remote control that supplies the vehicle frame.
//! - [`actuator`] – thruster, gyro and wheel-suspension traits.
//! - [`camera`] – raycast cameras and detection sensors.
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry]: the drivers
//!   found on one vehicle.
//! - [`pid`] – scalar PID controller with tick-rate-scaled gains.
//! - [`station`] – [`StationKeeper`][station::StationKeeper] and
//!   [`station_keeper`][station::station_keeper], which picks between
//!   [`flight`] and [`wheels`] once per vehicle.
//! - [`sim`] / [`sim_world`] – simulated bodies and device drivers.

pub mod actuator;
pub mod camera;
pub mod controller;
pub mod flight;
pub mod pid;
pub mod registry;
pub mod sim;
pub mod sim_world;
pub mod station;
pub mod wheels;

pub use registry::DeviceRegistry;
pub use station::{ActuatorCommand, StationGoal, StationKeeper, station_keeper};
