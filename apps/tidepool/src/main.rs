use anyhow::Result;
use clap::Parser;
use url::Url;

use tidepool_client_core::client::{Console, now_ms};
use tidepool_client_core::config::Config;
use tidepool_client_core::protocol::messages::ServerEvent;
use tidepool_client_core::session::channel::{ChannelNotice, ServerChannel};
use tidepool_client_core::telemetry::logging::{self, LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "tidepool")]
struct Cli {
    /// Module to run once connected, e.g. `comp110.hello`
    module: Option<String>,

    /// Runner server address, host:port
    #[arg(long)]
    server: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::default())]
    log_level: LogLevel,

    #[arg(long, help = "Write debug logs to a file")]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(server) = cli.server {
        config.server = server;
    }
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file,
    })?;

    let url = Url::parse(&config.endpoint())?;
    let mut channel = match ServerChannel::connect(url, config.reconnect_delay).await {
        Ok(channel) => channel,
        Err(err) => {
            eprintln!("failed to connect to {}: {}", config.server, err);
            std::process::exit(1);
        }
    };
    let mut console = Console::new(&config);

    // Raw stdin lines answer the pending prompt, if any.
    let (stdin_tx, mut stdin_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if stdin_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut started = false;
    let mut last_status = None;
    let mut stdin_open = true;
    loop {
        tokio::select! {
            notice = channel.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    ChannelNotice::Connected => {
                        eprintln!("connected to {}", config.server);
                        for command in console.on_connect() {
                            channel.send(command)?;
                        }
                        if let Some(module) = cli.module.as_deref() {
                            if !started {
                                started = true;
                                for command in console.run_module(module) {
                                    channel.send(command)?;
                                }
                            }
                        }
                    }
                    ChannelNotice::Disconnected => {
                        eprintln!(
                            "connection lost; retrying in {}ms",
                            config.reconnect_delay.as_millis()
                        );
                    }
                    ChannelNotice::Event(event) => {
                        render_event(&console, &event);
                        for command in console.handle_event(event, now_ms()) {
                            channel.send(command)?;
                        }
                        let status = console.status_line();
                        if status != last_status {
                            if let Some(status) = status {
                                eprintln!("[{status}]");
                            }
                            last_status = status;
                        }
                    }
                }
            }
            line = stdin_rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                if let Some(handle) = console.pending_prompt() {
                    match console.answer_prompt(handle, &line) {
                        Ok(commands) => {
                            for command in commands {
                                channel.send(command)?;
                            }
                        }
                        Err(err) => eprintln!("{err}"),
                    }
                }
            }
        }
    }
    channel.close().await;
    Ok(())
}

/// Plain line-oriented echo of the focused session's output. The real
/// presentation layer consumes the transcript; this keeps the binary usable
/// on its own.
fn render_event(console: &Console, event: &ServerEvent) {
    let focused = console.focused_pid();
    match event {
        ServerEvent::Stdout(payload) if focused == Some(payload.pid) => {
            if payload.is_input_prompt {
                eprint!("{}", payload.data);
            } else {
                println!("{}", payload.data);
            }
        }
        ServerEvent::Stderr(payload) if focused == Some(payload.pid) => {
            eprintln!("{}", payload.data);
        }
        ServerEvent::Exit(payload) if focused == Some(payload.pid) => {
            eprintln!("process {} exited with {}", payload.pid, payload.returncode);
        }
        _ => {}
    }
}
