//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use phd2_core::camera::simulator::SimulatorCamera;
use phd2_core::config::Profile;
use phd2_core::mount::simulator::{SimulatorMount, SimulatorParams};
use phd2_core::server::EventServer;
use phd2_core::session::Session;
use phd2_core::sim_link::SharedStarField;

fn main() {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).expect("failed to initialize logger");

    let profile = Profile::load("default").unwrap_or_default();
    info!("phd2-core starting, profile '{}'", profile.name);

    let server = EventServer::bind("127.0.0.1:4400", 1).expect("failed to bind event server");
    let session = Session::new(profile, server.broadcaster());

    let sky = SharedStarField::new(640.0, 480.0);
    session.connect(
        Box::new(SimulatorMount::linked(SimulatorParams::default(), sky.clone())),
        Box::new(SimulatorCamera::linked(1280, 960, 3.75, sky)),
    );

    let guide_loop_session = session.clone();
    std::thread::spawn(move || guide_loop_session.run_guide_loop());

    info!("listening on 127.0.0.1:4400");
    let serve_session = session;
    server.serve(move || serve_session.clone()).expect("event server stopped unexpectedly");
}
