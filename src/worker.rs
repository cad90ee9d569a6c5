//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! The worker thread: the single point of contact with camera and mount
//! hardware, so capture and motion calls never race against each other.
//! Ported from the original's `WorkerThread`/`worker_thread.cpp`: a
//! two-priority request queue plus a wakeup signal, rather than a single
//! queue, so a pending `Move` can't be starved behind a backlog of
//! `Expose` requests and a `Terminate` is always serviced promptly.
//!

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::camera::FrameCapturer;
use crate::error::{CameraError, MountError};
use crate::geometry::Rect;
use crate::image::GuideImage;
use crate::mount::{Axis, Direction, Mount, MoveResult};

/// Interrupt bits, checked by [`interruptible_sleep`] during a pending
/// move or exposure so a stop/terminate request is honored promptly
/// instead of waiting for the operation to complete on its own.
pub const INT_STOP: u32 = 1 << 0;
pub const INT_TERMINATE: u32 = 1 << 1;

/// Sleeps are chopped into chunks of at most this long so the interrupt
/// flags are reread frequently, mirroring `WorkerThread::MilliSleep`'s
/// `MAX_SLEEP`.
const MAX_SLEEP_MS: u64 = 100;

/// Sleeps for `duration`, checking `interrupt_flags` every `MAX_SLEEP_MS`
/// and returning early (`false`) if any of `mask` becomes set.
pub fn interruptible_sleep(duration: Duration, interrupt_flags: &AtomicU32, mask: u32) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if interrupt_flags.load(Ordering::SeqCst) & mask != 0 {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(MAX_SLEEP_MS)));
    }
}

#[derive(Copy, Clone, Debug)]
pub struct MoveRequest {
    pub axis: Axis,
    pub direction: Direction,
    pub duration_ms: u32,
    pub is_calibration_move: bool,
}

pub enum Request {
    Expose { exposure_ms: u32, subframe: Option<Rect> },
    Move(MoveRequest),
    /// Reads the mount's current declination, the only mount-state
    /// query the session needs but cannot make directly since the
    /// worker thread is the exclusive owner of the driver call sites.
    QueryDeclination,
    Terminate,
}

pub enum Completion {
    ExposeComplete(Result<GuideImage, CameraError>),
    MoveComplete(Result<MoveResult, MountError>),
    Declination(Option<f64>),
    Terminated,
}

/// Snapshot of worker activity, the idiomatic replacement for the
/// original's scattered `Debug.Write` counters.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub frames_processed: u64,
    pub moves_processed: u64,
    pub last_dispatch_latency_ms: u64,
}

/// Handle used by callers to enqueue work and receive completions.
#[derive(Clone)]
pub struct WorkerHandle {
    queues: Arc<QueueSenders>,
    pub completions: Receiver<Completion>,
    interrupt_flags: Arc<AtomicU32>,
}

struct QueueSenders {
    high: Sender<Request>,
    low: Sender<Request>,
    wakeup: Sender<()>,
}

impl WorkerHandle {
    /// Enqueues `request`. `Expose` goes on the low-priority queue (it
    /// can always be pre-empted by a move or terminate); everything else
    /// goes on the high-priority queue. A wakeup is always posted.
    pub fn enqueue(&self, request: Request) {
        match request {
            Request::Expose { .. } => {
                let _ = self.queues.low.send(request);
            }
            _ => {
                let _ = self.queues.high.send(request);
            }
        }
        let _ = self.queues.wakeup.send(());
    }

    pub fn request_stop(&self) {
        self.interrupt_flags.fetch_or(INT_STOP, Ordering::SeqCst);
    }

    pub fn request_terminate(&self) {
        self.interrupt_flags.fetch_or(INT_STOP | INT_TERMINATE, Ordering::SeqCst);
        self.enqueue(Request::Terminate);
    }

    pub fn clear_stop(&self) {
        self.interrupt_flags.fetch_and(!INT_STOP, Ordering::SeqCst);
    }
}

/// Spawns the worker thread, returning a handle and a join handle. The
/// worker owns `mount` and a capturer built on demand from `camera`;
/// both are moved in since only the worker thread ever touches hardware.
pub fn spawn(
    mut mount: Box<dyn Mount>,
    mut camera: Box<dyn crate::camera::Camera>,
    stats: Arc<std::sync::Mutex<Stats>>,
) -> (WorkerHandle, std::thread::JoinHandle<()>) {
    let high = bounded::<Request>(64);
    let low = bounded::<Request>(4);
    let wakeup = bounded::<()>(128);
    let completions = bounded::<Completion>(64);
    let interrupt_flags = Arc::new(AtomicU32::new(0));

    let handle = WorkerHandle {
        queues: Arc::new(QueueSenders { high: high.0.clone(), low: low.0.clone(), wakeup: wakeup.0.clone() }),
        completions: completions.1,
        interrupt_flags: interrupt_flags.clone(),
    };

    let completion_tx = completions.0;
    let flags = interrupt_flags;

    let join = std::thread::spawn(move || {
        let mut capturer: Option<Box<dyn FrameCapturer>> = None;

        'outer: loop {
            if wakeup.1.recv().is_err() {
                break;
            }
            // Drain any queued-up extra wakeups; each loop iteration
            // handles exactly one request regardless.
            while wakeup.1.try_recv().is_ok() {}

            loop {
                let request = match high.1.try_recv() {
                    Ok(r) => Some(r),
                    Err(_) => match low.1.try_recv() {
                        Ok(r) => Some(r),
                        Err(_) => None,
                    },
                };
                let Some(request) = request else { break };

                match request {
                    Request::Terminate => {
                        info!("worker: terminate requested");
                        let _ = completion_tx.send(Completion::Terminated);
                        break 'outer;
                    }
                    Request::Expose { exposure_ms, subframe } => {
                        let start = Instant::now();
                        if capturer.is_none() {
                            capturer = camera.create_capturer(exposure_ms, subframe).ok();
                        }
                        let result = match capturer.as_mut() {
                            Some(c) => c.capture_frame(),
                            None => Err(CameraError::NotConnected),
                        };
                        if !interruptible_sleep(Duration::from_millis(0), &flags, INT_STOP) {
                            debug!("worker: expose interrupted");
                        }
                        stats.lock().unwrap().frames_processed += 1;
                        stats.lock().unwrap().last_dispatch_latency_ms = start.elapsed().as_millis() as u64;
                        let _ = completion_tx.send(Completion::ExposeComplete(result));
                    }
                    Request::Move(mv) => {
                        let result = dispatch_move(mount.as_mut(), &mv, &flags);
                        stats.lock().unwrap().moves_processed += 1;
                        let _ = completion_tx.send(Completion::MoveComplete(result));
                    }
                    Request::QueryDeclination => {
                        let _ = completion_tx.send(Completion::Declination(mount.declination()));
                    }
                }

                if flags.load(Ordering::SeqCst) & INT_TERMINATE != 0 {
                    break 'outer;
                }
            }
        }

        warn!("worker: thread exiting");
    });

    (handle, join)
}

fn dispatch_move(mount: &mut dyn Mount, mv: &MoveRequest, flags: &AtomicU32) -> Result<MoveResult, MountError> {
    if mv.is_calibration_move {
        debug!("worker: calibration move axis={:?} dir={:?} dur={}ms", mv.axis, mv.direction, mv.duration_ms);
    }
    if !interruptible_sleep(Duration::from_millis(0), flags, INT_STOP) {
        return Ok(MoveResult::Error);
    }
    mount.pulse_guide(mv.axis, mv.direction, mv.duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::simulator::SimulatorCamera;
    use crate::mount::simulator::{SimulatorMount, SimulatorParams};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    #[test]
    fn expose_then_move_round_trip() {
        let mount = Box::new(SimulatorMount::new(SimulatorParams::default()));
        let camera = Box::new(SimulatorCamera::new(64, 64, 3.75));
        let stats = Arc::new(Mutex::new(Stats::default()));
        let (handle, _join) = spawn(mount, camera, stats.clone());

        handle.enqueue(Request::Expose { exposure_ms: 100, subframe: None });
        let completion = handle.completions.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert!(matches!(completion, Completion::ExposeComplete(Ok(_))));

        handle.enqueue(Request::Move(MoveRequest { axis: Axis::Primary, direction: Direction::Positive, duration_ms: 50, is_calibration_move: false }));
        let completion = handle.completions.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert!(matches!(completion, Completion::MoveComplete(Ok(MoveResult::Ok))));

        assert_eq!(stats.lock().unwrap().frames_processed, 1);
        assert_eq!(stats.lock().unwrap().moves_processed, 1);

        handle.request_terminate();
        let completion = handle.completions.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert!(matches!(completion, Completion::Terminated));
    }

    #[test]
    fn interruptible_sleep_returns_early_on_stop() {
        let flags = AtomicU32::new(0);
        flags.store(INT_STOP, Ordering::SeqCst);
        let completed = interruptible_sleep(Duration::from_secs(5), &flags, INT_STOP);
        assert!(!completed);
    }
}
