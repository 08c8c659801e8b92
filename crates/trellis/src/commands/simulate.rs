use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use clap::Args;

use trellis_core::Rect;
use trellis_core::config::Config;
use trellis_runtime::observer::{DeliveryConfig, Observer, VirtualHost, WindowHost};

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of windows to open
    #[arg(long, default_value_t = 3)]
    pub windows: u32,
    /// How long to stay connected, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub hold_ms: u64,
    /// Process name reported to the daemon
    #[arg(long, default_value = "simulator")]
    pub name: String,
    /// Broker address (defaults to broker.listen from the configuration)
    #[arg(long)]
    pub broker: Option<String>,
}

/// Connects an observer backed by in-memory windows to the broker, lets
/// the daemon lay them out, then prints where they ended up.
pub fn execute(config: &Config, args: &SimulateArgs) {
    trellis_core::log::init(&config.logging);

    let host = Arc::new(VirtualHost::new(std::process::id(), args.name.as_str()));
    for i in 0..args.windows {
        let offset = 40 * i as i32;
        host.open(
            &format!("{} {}", args.name, i + 1),
            Rect::new(offset, offset, 640, 480),
        );
    }

    let addr = args
        .broker
        .clone()
        .unwrap_or_else(|| config.broker.listen.clone());
    let observer = Observer::new(
        host.clone(),
        config.relay.queue_capacity,
        DeliveryConfig::from_relay(&config.relay),
    );
    let stop = observer.stop_handle();
    let delivery = thread::spawn(move || observer.connect(&addr));

    thread::sleep(Duration::from_millis(args.hold_ms));
    stop.store(true, Ordering::Relaxed);
    let result = delivery
        .join()
        .unwrap_or_else(|_| Err(trellis_core::RelayError::invalid_state("observer panicked")));

    if let Err(e) = result {
        eprintln!("Simulation failed: {e}");
        std::process::exit(1);
    }

    println!("Simulated process {} ({})", host.pid(), args.name);
    for id in host.window_ids() {
        if let Some(w) = host.window(id) {
            let focus = if host.focused() == Some(id) { "*" } else { " " };
            println!(
                "{focus} {:<16} {:>5},{:<5} {:>5}x{:<5} {}",
                id.to_string(),
                w.rect.x,
                w.rect.y,
                w.rect.width,
                w.rect.height,
                w.title
            );
        }
    }
}
