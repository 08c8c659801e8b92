use trellis_core::config::Config;

pub fn execute(config: &Config) {
    trellis_core::log::init(&config.logging);
    if let Err(e) = trellis_runtime::daemon::run(config) {
        eprintln!("Daemon error: {e}");
        std::process::exit(1);
    }
}
