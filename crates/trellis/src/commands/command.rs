use trellis_core::Request;
use trellis_core::config::Config;
use trellis_core::ipc::Payload;

/// Sends a window command (or a monitor change) to the running daemon.
pub fn execute(config: &Config, request: Request) {
    if let Err(reason) = request.validate() {
        eprintln!("Error: {reason}");
        std::process::exit(1);
    }

    let response = super::send(config, &request);
    if !response.is_ok() {
        super::fail(response);
    }

    match response.payload {
        Some(Payload::Dispatched {
            commands,
            undelivered,
        }) => {
            for command in &commands {
                println!("{} {}", command.kind.label(), command.target);
            }
            println!("Dispatched {} command(s).", commands.len());
            if !undelivered.is_empty() {
                for miss in &undelivered {
                    eprintln!(
                        "Not delivered: {} {} ({})",
                        miss.command.kind.label(),
                        miss.command.target,
                        miss.reason
                    );
                }
                std::process::exit(1);
            }
        }
        _ => println!("{}", response.message.unwrap_or("Done.".into())),
    }
}
