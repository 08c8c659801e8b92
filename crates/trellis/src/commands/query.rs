use trellis_core::config::Config;
use trellis_core::ipc::Payload;
use trellis_core::{Request, WorkspaceId};

pub fn execute(config: &Config, workspace: WorkspaceId, json: bool) {
    let response = super::send(config, &Request::Query { workspace });
    if !response.is_ok() {
        super::fail(response);
    }

    if json {
        match serde_json::to_string_pretty(&response) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(Payload::Windows { windows }) = response.payload else {
        eprintln!("Error: daemon sent no window list");
        std::process::exit(1);
    };
    println!("Workspace {workspace}: {} window(s)", windows.len());
    for w in windows {
        let marker = if w.focused { "*" } else { " " };
        println!(
            "{marker} {:<16} {:<9} {:>5},{:<5} {:>5}x{:<5} {}",
            w.id.to_string(),
            format!("{:?}", w.state).to_lowercase(),
            w.rect.x,
            w.rect.y,
            w.rect.width,
            w.rect.height,
            w.title
        );
    }
}
