//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! A closed-loop telescope auto-guiding control engine: worker-thread
//! orchestration between image capture, star measurement, calibration
//! and correction dispatch; per-axis guide algorithms; the calibration
//! state machine; and the settle/dither/lock-shift controller exposed
//! over a JSON-RPC control surface.
//!
//! Concrete camera/mount drivers beyond the bundled simulators are
//! external collaborators: implement [`camera::Camera`]/[`mount::Mount`]
//! against real hardware and hand the boxed trait object to
//! [`session::Session::connect`].

pub mod algorithm;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod guider;
pub mod image;
pub mod mount;
pub mod server;
pub mod session;
pub mod sim_link;
pub mod worker;

pub use error::PhdError;
