//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `Session`: the context object every thread shares a handle to,
//! replacing the original's global `pFrame`/`pMount`/`pCamera` pointers
//! with an explicit, lockable struct. Also hosts the guide loop: the
//! single thread that turns worker-thread exposure completions into
//! guider/calibration steps and mount moves, per the data flow in
//! `Camera -> WorkerThread(Expose) -> Guider -> Mount -> WorkerThread(Move)
//! -> EventServer`.
//!

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::{json, Value};

use crate::camera::Camera;
use crate::config::Profile;
use crate::controller::{ControllerEvent, PhdController, SettleParams};
use crate::error::RpcError;
use crate::geometry::Point;
use crate::guider::{Guider, State as GuiderState, StepOutcome};
use crate::image::{FindResult, GuideImage};
use crate::mount::Mount;
use crate::server::event::Event;
use crate::server::rpc::RpcHandler;
use crate::server::EventBroadcaster;
use crate::worker::{self, Completion, MoveRequest, Request, Stats, WorkerHandle};

struct Equipment {
    worker: WorkerHandle,
    mount_name: String,
    camera_pixel_size_um: f64,
    _join: std::thread::JoinHandle<()>,
}

struct State {
    profile: Profile,
    equipment: Option<Equipment>,
    guider: Guider,
    controller: PhdController,
    connected: bool,
    /// Declination sampled once at the start of a calibration run and
    /// held for the duration of that run, mirroring the original's
    /// single `m_declination` snapshot rather than a per-step query.
    calibration_declination: Option<f64>,
    /// Whether the capture loop is currently pumping exposures, set by
    /// `loop_exposures`/`guide` and cleared by `stop_capture`.
    looping: bool,
    /// Last `AppState` broadcast, so `tick` only sends one when it changes.
    last_app_state: Option<String>,
}

/// Shared session state plus the event broadcaster used to notify RPC
/// clients of state changes. Cloned cheaply (an `Arc` internally) so
/// both the network thread and the guide loop thread can hold a handle.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<State>>,
    broadcaster: EventBroadcaster,
    stats: Arc<Mutex<Stats>>,
}

impl Session {
    pub fn new(profile: Profile, broadcaster: EventBroadcaster) -> Session {
        let guider = Guider::new(profile.primary_algorithm.build(), profile.secondary_algorithm.build());
        Session {
            state: Arc::new(Mutex::new(State {
                profile,
                equipment: None,
                guider,
                controller: PhdController::new(),
                connected: false,
                calibration_declination: None,
                looping: false,
                last_app_state: None,
            })),
            broadcaster,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    pub fn connect(&self, mount: Box<dyn Mount>, camera: Box<dyn Camera>) {
        let mount_name = mount.info().name;
        let camera_pixel_size_um = camera.info().pixel_size_um;
        let (worker, join) = worker::spawn(mount, camera, self.stats.clone());
        let mut state = self.state.lock().unwrap();
        state.equipment = Some(Equipment { worker, mount_name, camera_pixel_size_um, _join: join });
        state.connected = true;
        info!("session: equipment connected");
    }

    pub fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(equipment) = state.equipment.take() {
            equipment.worker.request_terminate();
        }
        state.connected = false;
        state.looping = false;
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().unwrap().clone()
    }

    fn worker_handle(&self) -> Option<WorkerHandle> {
        let state = self.state.lock().unwrap();
        if !state.connected {
            return None;
        }
        state.equipment.as_ref().map(|e| e.worker.clone())
    }

    /// Runs forever: exposes, feeds the frame through the guider (star
    /// selection / calibration / guiding, whichever the guider's state
    /// calls for), dispatches any resulting mount moves, then ticks the
    /// settle/dither controller. Intended to run on its own dedicated
    /// thread — this is the crate's single producer/consumer worker
    /// loop from the caller's side, mirroring the original's main
    /// guiding loop that lives above `WorkerThread`.
    pub fn run_guide_loop(&self) {
        let mut last_tick = Instant::now();
        loop {
            let Some(worker) = self.worker_handle() else {
                std::thread::sleep(Duration::from_millis(200));
                continue;
            };

            let (looping, exposure_ms) = {
                let state = self.state.lock().unwrap();
                (state.looping, state.profile.exposure_ms)
            };

            if looping {
                worker.enqueue(Request::Expose { exposure_ms, subframe: None });

                let timeout = Duration::from_millis(exposure_ms as u64 + 5000);
                match worker.completions.recv_timeout(timeout) {
                    Ok(Completion::ExposeComplete(Ok(image))) => self.process_frame(&worker, &image),
                    Ok(Completion::ExposeComplete(Err(e))) => {
                        warn!("session: exposure failed: {}", e);
                    }
                    Ok(_) => {}
                    Err(_) => warn!("session: exposure timed out waiting for worker"),
                }
            } else {
                std::thread::sleep(Duration::from_millis(100));
            }

            let now = Instant::now();
            let elapsed = now.saturating_duration_since(last_tick);
            last_tick = now;
            self.tick(elapsed, &worker);
        }
    }

    /// Routes one captured frame to the guider operation its current
    /// state calls for, per spec: run the star finder (auto-selecting
    /// if there's no star yet), drive calibration if a run is active,
    /// or compute and dispatch a guiding correction.
    fn process_frame(&self, worker: &WorkerHandle, image: &GuideImage) {
        let guider_state = self.state.lock().unwrap().guider.state();

        match guider_state {
            GuiderState::Uninitialized | GuiderState::Selecting => {
                let outcome = self.state.lock().unwrap().guider.select_star(image);
                if let StepOutcome::StarSelected(star) = outcome {
                    self.broadcaster.send(Event::StarSelected { x: star.position.x, y: star.position.y });
                }
            }
            GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => self.drive_calibration(worker, image),
            GuiderState::Guiding => self.drive_guiding(worker, image),
            GuiderState::Selected | GuiderState::Calibrated | GuiderState::Stop => {
                // Nothing actionable for this frame; the controller
                // decides the next step once it ticks.
            }
        }
    }

    fn drive_calibration(&self, worker: &WorkerHandle, image: &GuideImage) {
        let (outcome, mount_name) = {
            let mut state = self.state.lock().unwrap();
            let (result, star) = state.guider.locate_star(image);
            let star_pos = if result == FindResult::Ok { star.map(|s| s.position) } else { None }.unwrap_or_else(Point::invalid);
            let declination = state.calibration_declination;
            let mount_name = state.equipment.as_ref().map(|e| e.mount_name.clone()).unwrap_or_default();
            (state.guider.calibration_step(star_pos, declination, None, 1), mount_name)
        };

        match outcome {
            StepOutcome::CalibrationMoveRequested(mv) => {
                self.dispatch_move(worker, mv.axis, mv.direction, mv.duration_ms, true);
            }
            StepOutcome::CalibrationComplete { data_flipped, .. } => {
                self.broadcaster.send(Event::CalibrationComplete { mount: mount_name.clone() });
                if data_flipped {
                    self.broadcaster.send(Event::CalibrationDataFlipped { mount: mount_name });
                }
            }
            StepOutcome::CalibrationFailed(e) => {
                self.broadcaster.send(Event::CalibrationFailed { reason: e.to_string() });
            }
            _ => {}
        }
    }

    fn drive_guiding(&self, worker: &WorkerHandle, image: &GuideImage) {
        let dec_compensation_enabled = self.state.lock().unwrap().profile.dec_compensation_enabled;
        let current_declination = if dec_compensation_enabled {
            worker.enqueue(Request::QueryDeclination);
            match worker.completions.recv_timeout(Duration::from_secs(5)) {
                Ok(Completion::Declination(d)) => d,
                _ => None,
            }
        } else {
            None
        };

        let (outcome, mount_name) = {
            let mut state = self.state.lock().unwrap();
            let pulse_cap = state.profile.max_pulse_ms;
            let mount_name = state.equipment.as_ref().map(|e| e.mount_name.clone()).unwrap_or_default();
            (state.guider.guide_step(image, pulse_cap, current_declination), mount_name)
        };

        match outcome {
            StepOutcome::Guiding { info, moves } => {
                // Per-axis moves for one frame are dispatched in order
                // and awaited before the frame is considered done, so
                // the next Expose never races a still-in-flight Move.
                for mv in moves {
                    self.dispatch_move(worker, mv.axis, mv.direction, mv.duration_ms, false);
                }
                self.broadcaster.send(Event::from_guide_step(&info, &mount_name));
            }
            StepOutcome::StarLost => {
                let (frame, avg_dist, state_now) = {
                    let state = self.state.lock().unwrap();
                    (state.guider.frame_number(), state.guider.current_error(false), state.guider.state())
                };
                self.broadcaster.send(Event::StarLost { frame, avg_dist, status: "lost".to_string() });
                if state_now == GuiderState::Stop {
                    self.broadcaster.send(Event::LockPositionLost);
                }
            }
            _ => {}
        }
    }

    /// Sends `Request::Move` and blocks for its completion, the
    /// ordering the worker/mount contract requires: a calibration or
    /// guide move always finishes before the next Expose is enqueued.
    fn dispatch_move(
        &self,
        worker: &WorkerHandle,
        axis: crate::mount::Axis,
        direction: crate::mount::Direction,
        duration_ms: u32,
        is_calibration_move: bool,
    ) -> Option<crate::mount::MoveResult> {
        if duration_ms == 0 {
            return Some(crate::mount::MoveResult::Ok);
        }
        worker.enqueue(Request::Move(MoveRequest { axis, direction, duration_ms, is_calibration_move }));
        match worker.completions.recv_timeout(Duration::from_millis(duration_ms as u64 + 5000)) {
            Ok(Completion::MoveComplete(Ok(result))) => {
                if result == crate::mount::MoveResult::LimitReached {
                    warn!("session: move hit travel limit on axis {:?}", axis);
                }
                Some(result)
            }
            Ok(Completion::MoveComplete(Err(e))) => {
                warn!("session: move failed: {}", e);
                None
            }
            _ => {
                warn!("session: move timed out waiting for worker");
                None
            }
        }
    }

    /// Kicks off a calibration run at the star's last known position:
    /// samples declination once (the worker is the only thread allowed
    /// to touch the mount), then issues the first calibration move.
    fn begin_calibration(&self, worker: &WorkerHandle) {
        let (star_pos, pulse_ms, distance_px) = {
            let state = self.state.lock().unwrap();
            (state.guider.last_star_pos(), state.profile.calibration_pulse_ms, state.profile.calibration_distance_px)
        };
        let Some(star_pos) = star_pos else {
            warn!("session: cannot start calibration, no star position known");
            return;
        };

        worker.enqueue(Request::QueryDeclination);
        let declination = match worker.completions.recv_timeout(Duration::from_secs(5)) {
            Ok(Completion::Declination(d)) => d,
            _ => None,
        };

        let first_move = {
            let mut state = self.state.lock().unwrap();
            state.calibration_declination = declination;
            state.guider.start_calibration(pulse_ms, distance_px, star_pos)
        };
        self.dispatch_move(worker, first_move.axis, first_move.direction, first_move.duration_ms, true);
    }

    fn begin_guiding(&self) {
        let mut state = self.state.lock().unwrap();
        if let Err(e) = state.guider.start_guiding() {
            warn!("session: failed to start guiding: {}", e);
        }
    }

    /// Applies a pending dither request (set by [`RpcHandler::dither`]
    /// via the controller) to the guider's lock position, with a
    /// magnitude uniformly distributed up to the requested amount.
    fn apply_pending_dither(&self) {
        let mut state = self.state.lock().unwrap();
        let Some((pixels, ra_only)) = state.controller.pending_dither() else { return };
        let magnitude = pixels * rand::random::<f64>();
        let (dx, dy) = if ra_only {
            let sign = if rand::random::<bool>() { 1.0 } else { -1.0 };
            (magnitude * sign, 0.0)
        } else {
            let angle = rand::random::<f64>() * std::f64::consts::TAU;
            (magnitude * angle.cos(), magnitude * angle.sin())
        };
        state.guider.dither_lock_position(dx, dy);
        drop(state);
        self.broadcaster.send(Event::GuidingDithered { dx, dy });
    }

    /// One tick of the controller/guider state machine. Emits any
    /// events the tick produced and performs the action (start
    /// calibration, start guiding, apply dither) each transition calls
    /// for.
    fn tick(&self, tick_elapsed: Duration, worker: &WorkerHandle) {
        let mut state = self.state.lock().unwrap();
        let guider_state = state.guider.state();
        let connected = state.connected;
        let current_error = if guider_state == GuiderState::Guiding { Some(state.guider.current_error(false)) } else { None };

        let event = state.controller.update(guider_state, connected, current_error, tick_elapsed);

        let app_state = app_state_name(guider_state);
        let app_state_changed = state.last_app_state.as_deref() != Some(app_state);
        if app_state_changed {
            state.last_app_state = Some(app_state.to_string());
        }
        drop(state);

        if app_state_changed {
            self.broadcaster.send(Event::AppState { state: app_state.to_string() });
        }

        match event {
            ControllerEvent::StartCalibration => {
                let mount_name = self.state.lock().unwrap().equipment.as_ref().map(|e| e.mount_name.clone()).unwrap_or_default();
                self.broadcaster.send(Event::StartCalibration { mount: mount_name });
                self.begin_calibration(worker);
            }
            ControllerEvent::CalibrationComplete => {
                // Already broadcast from `drive_calibration` when the
                // calibration step itself completed.
            }
            ControllerEvent::StartGuiding => {
                self.begin_guiding();
                self.broadcaster.send(Event::StartGuiding);
            }
            ControllerEvent::SettleBegin => {
                self.apply_pending_dither();
                self.broadcaster.send(Event::SettleBegin);
            }
            ControllerEvent::Settling(p) => {
                self.broadcaster.send(Event::Settling { distance: p.current_error_px, time: p.time_in_range_sec, settle_time: p.settle_time_sec })
            }
            ControllerEvent::SettleDone { succeeded, error } => {
                self.broadcaster.send(Event::SettleDone { status: if succeeded { 0 } else { 1 }, error })
            }
            ControllerEvent::None => {}
        }
    }
}

impl RpcHandler for Session {
    fn get_connected(&self) -> Result<Value, RpcError> {
        Ok(json!(self.state.lock().unwrap().connected))
    }

    fn set_connected(&mut self, connected: bool) -> Result<Value, RpcError> {
        if !connected {
            self.disconnect();
        }
        Ok(Value::Null)
    }

    fn get_exposure(&self) -> Result<Value, RpcError> {
        Ok(json!(self.state.lock().unwrap().profile.exposure_ms))
    }

    fn set_exposure(&mut self, exposure_ms: u32) -> Result<Value, RpcError> {
        self.state.lock().unwrap().profile.exposure_ms = exposure_ms;
        Ok(Value::Null)
    }

    fn guide(&mut self, recalibrate: bool, settle: Value) -> Result<Value, RpcError> {
        let params = parse_settle(&settle).unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.controller.guide(recalibrate, params).map_err(|e| RpcError::Failed(e.to_string()))?;
        // Guiding needs frames flowing; start the loop if it wasn't already.
        state.looping = true;
        Ok(Value::Null)
    }

    fn dither(&mut self, pixels: f64, ra_only: bool, settle: Value) -> Result<Value, RpcError> {
        let params = parse_settle(&settle).unwrap_or_default();
        self.state.lock().unwrap().controller.dither(pixels, ra_only, params).map_err(|e| RpcError::Failed(e.to_string()))?;
        Ok(Value::Null)
    }

    fn stop_capture(&mut self) -> Result<Value, RpcError> {
        let mut state = self.state.lock().unwrap();
        let was_looping = state.looping;
        state.guider.stop_guiding();
        state.looping = false;
        if let Some(equipment) = &state.equipment {
            equipment.worker.request_stop();
        }
        drop(state);
        if was_looping {
            self.broadcaster.send(Event::LoopingExposuresStopped);
        }
        Ok(Value::Null)
    }

    fn loop_exposures(&mut self) -> Result<Value, RpcError> {
        let (frame, was_looping) = {
            let mut state = self.state.lock().unwrap();
            let was_looping = state.looping;
            state.looping = true;
            if let Some(equipment) = &state.equipment {
                equipment.worker.clear_stop();
            }
            (state.guider.frame_number(), was_looping)
        };
        if !was_looping {
            self.broadcaster.send(Event::LoopingExposures { frame });
        }
        Ok(Value::Null)
    }

    /// Captures one frame and runs star auto-selection against it,
    /// mirroring the original's "Auto-select Star" action rather than
    /// waiting for the next looping frame to land on a `Selecting` guider.
    fn find_star(&mut self) -> Result<Value, RpcError> {
        let worker = self.worker_handle().ok_or_else(|| RpcError::Failed("equipment not connected".into()))?;
        let exposure_ms = self.state.lock().unwrap().profile.exposure_ms;
        worker.enqueue(Request::Expose { exposure_ms, subframe: None });
        let image = match worker.completions.recv_timeout(Duration::from_millis(exposure_ms as u64 + 5000)) {
            Ok(Completion::ExposeComplete(Ok(image))) => image,
            Ok(Completion::ExposeComplete(Err(e))) => return Err(RpcError::Failed(e.to_string())),
            _ => return Err(RpcError::Failed("exposure timed out".into())),
        };

        let outcome = self.state.lock().unwrap().guider.select_star(&image);
        match outcome {
            StepOutcome::StarSelected(star) => {
                self.broadcaster.send(Event::StarSelected { x: star.position.x, y: star.position.y });
                Ok(json!({"lockPosition": [star.position.x, star.position.y]}))
            }
            _ => Err(RpcError::Failed("no star found".into())),
        }
    }

    fn set_paused(&mut self, paused: bool, full: bool) -> Result<Value, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.guider.pause(if !paused {
            crate::guider::PauseType::None
        } else if full {
            crate::guider::PauseType::Full
        } else {
            crate::guider::PauseType::Guiding
        });
        drop(state);
        self.broadcaster.send(if paused { Event::Paused } else { Event::Resumed });
        Ok(Value::Null)
    }

    fn get_app_state(&self) -> Result<Value, RpcError> {
        let guider_state = self.state.lock().unwrap().guider.state();
        Ok(json!(app_state_name(guider_state)))
    }

    fn get_calibrated(&self) -> Result<Value, RpcError> {
        Ok(json!(self.state.lock().unwrap().guider.calibration().is_some()))
    }

    /// Arcsec/pixel, from the camera's pixel size and the profile's
    /// configured guide scope focal length: `pixelSize_um / focalLength_mm
    /// * 206.265`.
    fn get_pixel_scale(&self) -> Result<Value, RpcError> {
        let state = self.state.lock().unwrap();
        let pixel_size_um = state.equipment.as_ref().map(|e| e.camera_pixel_size_um).unwrap_or(0.0);
        if pixel_size_um <= 0.0 || state.profile.focal_length_mm <= 0.0 {
            return Ok(json!(1.0));
        }
        Ok(json!(pixel_size_um / state.profile.focal_length_mm * 206.265))
    }

    fn get_lock_position(&self) -> Result<Value, RpcError> {
        match self.state.lock().unwrap().guider.lock_position() {
            Some(lock) => Ok(json!([lock.position.x, lock.position.y])),
            None => Ok(Value::Null),
        }
    }

    fn set_lock_position(&mut self, x: f64, y: f64) -> Result<Value, RpcError> {
        self.state.lock().unwrap().guider.set_lock_position(crate::geometry::Point::new(x, y));
        self.broadcaster.send(Event::LockPositionSet { x, y });
        Ok(Value::Null)
    }
}

/// Maps the guider's internal state to the event-server's `AppState`
/// string vocabulary, shared between `get_app_state` and `tick`'s
/// change-detected `AppState` broadcast.
fn app_state_name(guider_state: GuiderState) -> &'static str {
    match guider_state {
        GuiderState::Uninitialized => "Stopped",
        GuiderState::Selecting => "Selecting",
        GuiderState::Selected => "Selected",
        GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => "Calibrating",
        GuiderState::Calibrated => "Calibrated",
        GuiderState::Guiding => "Guiding",
        GuiderState::Stop => "Stopped",
    }
}

fn parse_settle(value: &Value) -> Option<SettleParams> {
    let obj = value.as_object()?;
    Some(SettleParams {
        tolerance_px: obj.get("pixels").and_then(Value::as_f64).unwrap_or(1.5),
        settle_time_sec: obj.get("time").and_then(Value::as_f64).unwrap_or(10.0),
        timeout_sec: obj.get("timeout").and_then(Value::as_f64).unwrap_or(60.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        // EventBroadcaster has no public constructor outside the crate;
        // tests live in-crate so this reaches the crate-private one via
        // a server bound to an ephemeral port.
        let server = crate::server::EventServer::bind("127.0.0.1:0", 1).unwrap();
        Session::new(Profile::default(), server.broadcaster())
    }

    #[test]
    fn get_app_state_reports_stopped_when_uninitialized() {
        let session = test_session();
        let value = RpcHandler::get_app_state(&session).unwrap();
        assert_eq!(value, json!("Stopped"));
    }

    #[test]
    fn set_exposure_round_trips_through_get_exposure() {
        let mut session = test_session();
        session.set_exposure(2500).unwrap();
        assert_eq!(session.get_exposure().unwrap(), json!(2500));
    }

    #[test]
    fn loop_exposures_sets_looping_flag_once() {
        let mut session = test_session();
        assert!(!session.state.lock().unwrap().looping);
        session.loop_exposures().unwrap();
        assert!(session.state.lock().unwrap().looping);
        session.stop_capture().unwrap();
        assert!(!session.state.lock().unwrap().looping);
    }

    #[test]
    fn set_paused_toggles_guider_pause_type_and_broadcasts() {
        let mut session = test_session();
        session.set_paused(true, true).unwrap();
        assert_eq!(session.state.lock().unwrap().guider.pause_type(), crate::guider::PauseType::Full);
        session.set_paused(false, false).unwrap();
        assert_eq!(session.state.lock().unwrap().guider.pause_type(), crate::guider::PauseType::None);
    }

    #[test]
    fn get_pixel_scale_without_equipment_falls_back_to_one() {
        let session = test_session();
        assert_eq!(RpcHandler::get_pixel_scale(&session).unwrap(), json!(1.0));
    }

    #[test]
    fn get_pixel_scale_derives_from_camera_and_focal_length() {
        use crate::camera::simulator::SimulatorCamera;
        use crate::mount::simulator::{SimulatorMount, SimulatorParams};
        use crate::sim_link::SharedStarField;

        let mut session = test_session();
        session.state.lock().unwrap().profile.focal_length_mm = 400.0;
        let sky = SharedStarField::new(320.0, 240.0);
        session.connect(Box::new(SimulatorMount::linked(SimulatorParams::default(), sky.clone())), Box::new(SimulatorCamera::linked(640, 480, 3.75, sky)));

        let scale = RpcHandler::get_pixel_scale(&session).unwrap().as_f64().unwrap();
        let expected = 3.75 / 400.0 * 206.265;
        assert!((scale - expected).abs() < 1e-9);
    }

    #[test]
    fn find_star_selects_a_star_from_a_live_frame() {
        use crate::camera::simulator::SimulatorCamera;
        use crate::mount::simulator::{SimulatorMount, SimulatorParams};
        use crate::sim_link::SharedStarField;

        let mut session = test_session();
        let sky = SharedStarField::new(320.0, 240.0);
        session.connect(Box::new(SimulatorMount::linked(SimulatorParams::default(), sky.clone())), Box::new(SimulatorCamera::linked(640, 480, 3.75, sky)));

        // Retry a handful of times: the simulator star wanders and may
        // occasionally land too near the frame edge to be selected.
        let mut found = false;
        for _ in 0..20 {
            if session.find_star().is_ok() {
                found = true;
                break;
            }
        }
        assert!(found, "expected find_star to eventually select a star");
        assert_eq!(session.state.lock().unwrap().guider.state(), GuiderState::Selected);
    }

    #[test]
    fn guide_loop_drives_selection_calibration_and_guiding_to_completion() {
        use crate::camera::simulator::SimulatorCamera;
        use crate::mount::simulator::{SimulatorMount, SimulatorParams};
        use crate::sim_link::SharedStarField;

        let session = test_session();
        let sky = SharedStarField::new(320.0, 240.0);
        session.connect(
            Box::new(SimulatorMount::linked(SimulatorParams::default(), sky.clone())),
            Box::new(SimulatorCamera::linked(640, 480, 3.75, sky)),
        );
        session.state.lock().unwrap().profile.calibration_pulse_ms = 200;
        session.state.lock().unwrap().profile.calibration_distance_px = 15.0;

        let worker = session.worker_handle().unwrap();

        // Drive star selection.
        for _ in 0..20 {
            if session.state.lock().unwrap().guider.state() != GuiderState::Uninitialized {
                break;
            }
            worker.enqueue(Request::Expose { exposure_ms: 50, subframe: None });
            if let Ok(Completion::ExposeComplete(Ok(image))) = worker.completions.recv_timeout(Duration::from_secs(2)) {
                session.process_frame(&worker, &image);
            }
        }
        assert_eq!(session.state.lock().unwrap().guider.state(), GuiderState::Selected);

        // Kick off calibration directly (bypassing the controller) and
        // run it to completion via process_frame.
        let first_move = {
            let mut state = session.state.lock().unwrap();
            let pos = state.guider.last_star_pos().unwrap();
            state.guider.start_calibration(200, 15.0, pos)
        };
        session.dispatch_move(&worker, first_move.axis, first_move.direction, first_move.duration_ms, true);

        for _ in 0..200 {
            let state_now = session.state.lock().unwrap().guider.state();
            if state_now == GuiderState::Calibrated {
                break;
            }
            worker.enqueue(Request::Expose { exposure_ms: 50, subframe: None });
            if let Ok(Completion::ExposeComplete(Ok(image))) = worker.completions.recv_timeout(Duration::from_secs(2)) {
                session.process_frame(&worker, &image);
            }
        }
        assert_eq!(session.state.lock().unwrap().guider.state(), GuiderState::Calibrated);

        session.begin_guiding();
        assert_eq!(session.state.lock().unwrap().guider.state(), GuiderState::Guiding);

        worker.enqueue(Request::Expose { exposure_ms: 50, subframe: None });
        if let Ok(Completion::ExposeComplete(Ok(image))) = worker.completions.recv_timeout(Duration::from_secs(2)) {
            session.process_frame(&worker, &image);
        }
        assert!(session.state.lock().unwrap().guider.frame_number() >= 1);
    }
}
