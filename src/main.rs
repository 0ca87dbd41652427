#![forbid(unsafe_code)]

//! hwd: host warden daemon entry point.

use host_warden::core::config::Config;
use host_warden::core::errors::Result;
use host_warden::daemon::loop_main::MonitorDaemon;
use host_warden::platform::pal::detect_platform;

fn run() -> Result<()> {
    let config = Config::load_from_env()?;
    let platform = detect_platform()?;
    MonitorDaemon::init(config, platform).run()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("hwd: {e}");
        std::process::exit(1);
    }
}
