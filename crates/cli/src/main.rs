use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use helpdesk::client::{Disconnect, ReconnectPolicy};
use helpdesk::gateway::{ClientEnvelope, Sender, ServerEnvelope};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "helpdesk")]
#[command(about = "Website support chat relayed to Discord ticket channels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config.json, announcements.json).
    Init {
        /// Config file path (default: HELPDESK_CONFIG_PATH or ~/.helpdesk/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway: connect the Discord bot and serve the chat socket, login routes and announcement board.
    Gateway {
        /// Config file path (default: HELPDESK_CONFIG_PATH or ~/.helpdesk/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default: PORT env, then config, then 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with support from the terminal, as a logged-in website user (interactive).
    Chat {
        /// Config file path, used to find the gateway address when --url is not given
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Gateway WebSocket URL (e.g. ws://127.0.0.1:3000/ws)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Session id from a website login (the `sessionId` cookie)
        #[arg(long, value_name = "ID", env = "HELPDESK_SESSION")]
        session: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Some(Commands::Gateway { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Some(Commands::Version) => {
            println!("helpdesk {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, url, session }) => {
            if let Err(e) = run_chat(config, url, session).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(helpdesk::config::default_config_path);
    let dir = helpdesk::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = helpdesk::config::load_config(config_path)?;
    config.gateway.port = port.unwrap_or_else(|| helpdesk::config::resolve_port(&config));
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    helpdesk::gateway::run_gateway(config, path).await
}

/// What the user typed.
enum Input {
    Line(String),
    Logout,
}

/// Gateway URL from config: loopback when the gateway binds every interface.
fn url_from_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<String> {
    let (config, _) = helpdesk::config::load_config(config_path)?;
    let host = match config.gateway.bind.trim() {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" => "[::1]".to_string(),
        h => h.to_string(),
    };
    Ok(format!(
        "ws://{}:{}/ws",
        host,
        helpdesk::config::resolve_port(&config)
    ))
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
    session: String,
) -> anyhow::Result<()> {
    let url = match url {
        Some(u) => u,
        None => url_from_config(config_path)?,
    };

    // stdin is blocking; read it on its own thread for the lifetime of the chat.
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    let _ = input_tx.send(Input::Logout);
                    break;
                }
                Ok(_) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let msg = if input.eq_ignore_ascii_case("/logout")
                        || input.eq_ignore_ascii_case("/exit")
                        || input.eq_ignore_ascii_case("/quit")
                    {
                        Input::Logout
                    } else {
                        Input::Line(input.to_string())
                    };
                    let stop = matches!(msg, Input::Logout);
                    if input_tx.send(msg).is_err() || stop {
                        break;
                    }
                }
            }
        }
    });

    let policy = ReconnectPolicy::default();
    let mut attempt = 0;
    println!("connecting to {} (type /logout to leave)", url);
    loop {
        let (reason, authenticated) = chat_session(&url, &session, &mut input_rx).await;
        if authenticated {
            attempt = 0;
        }
        if reason == Disconnect::Logout {
            println!("logged out");
            return Ok(());
        }
        attempt += 1;
        match policy.next_delay(attempt, &reason) {
            Some(delay) => {
                println!(
                    "disconnected; reconnecting in {}s (attempt {}/{})",
                    delay.as_secs(),
                    attempt,
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                anyhow::bail!("disconnected from {} ({:?}); not reconnecting", url, reason);
            }
        }
    }
}

/// One connection: init, then relay stdin lines until the socket ends or the user logs out.
/// Returns why it ended and whether the gateway accepted the session.
async fn chat_session(
    url: &str,
    session: &str,
    input_rx: &mut mpsc::UnboundedReceiver<Input>,
) -> (Disconnect, bool) {
    let mut ws = match tokio_tungstenite::connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            log::warn!("connect to {} failed: {}", url, e);
            return (Disconnect::Error, false);
        }
    };
    let init = ClientEnvelope::Init {
        session_id: Some(session.to_string()),
    };
    if let Err(e) = send_envelope(&mut ws, &init).await {
        log::warn!("sending init failed: {}", e);
        return (Disconnect::Error, false);
    }

    let mut authenticated = false;
    loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(t))) => t,
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        return (Disconnect::Closed { code }, authenticated);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("websocket error: {}", e);
                        return (Disconnect::Error, authenticated);
                    }
                    None => return (Disconnect::Closed { code: None }, authenticated),
                };
                match serde_json::from_str::<ServerEnvelope>(&text) {
                    Ok(envelope) => {
                        if matches!(envelope, ServerEnvelope::Status { authenticated: Some(true), .. }) {
                            authenticated = true;
                        }
                        print_envelope(&envelope);
                    }
                    Err(e) => log::debug!("ignoring unreadable frame: {}", e),
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(Input::Line(message)) => {
                        if let Err(e) = send_envelope(&mut ws, &ClientEnvelope::Message { message }).await {
                            log::warn!("sending message failed: {}", e);
                            return (Disconnect::Error, authenticated);
                        }
                    }
                    Some(Input::Logout) | None => {
                        let _ = ws.close(None).await;
                        return (Disconnect::Logout, authenticated);
                    }
                }
            }
        }
    }
}

async fn send_envelope<S>(ws: &mut S, envelope: &ClientEnvelope) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(envelope)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

fn print_envelope(envelope: &ServerEnvelope) {
    match envelope {
        ServerEnvelope::Status { message, .. } => println!("* {}", message),
        ServerEnvelope::Message {
            message,
            sender,
            author,
        } => match sender {
            Sender::User => println!("> {}", message),
            Sender::Support | Sender::Bot => println!("< {}: {}", author, message),
        },
        ServerEnvelope::Error {
            message,
            code,
            reason,
            until,
        } => {
            let mut line = format!("! {} ({})", message, code);
            if let Some(r) = reason {
                line.push_str(&format!(" reason: {}", r));
            }
            if let Some(u) = until {
                line.push_str(&format!(" until: {}", u.to_rfc3339()));
            }
            eprintln!("{}", line);
        }
    }
}
