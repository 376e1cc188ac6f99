use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use pinus_client::{
    Client, ClientConfig, NetworkStatus, TcpParameter, TransportParameter, WebSocketParameter,
};
use serde_json::Value;

#[derive(Debug, Clone)]
struct SimConfig {
    endpoint: Option<TransportParameter>,
    config_path: Option<PathBuf>,
    route: Option<String>,
    payload: Value,
    subscribe: Vec<String>,
    duration_ms: u64,
    tick_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cfg = parse_args()?;
    let endpoint = cfg
        .endpoint
        .clone()
        .ok_or_else(|| anyhow!("--tcp or --ws is required\nUse --help to see the options."))?;

    let client_config = match &cfg.config_path {
        Some(path) => ClientConfig::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };

    println!("[sim-client] starting simulation");
    println!("[sim-client] endpoint: {}", endpoint);
    println!(
        "[sim-client] protocol version: {}",
        pinus_client::protocol::protocol_version()
    );

    let mut client = Client::new(client_config);
    client.on_status_change(|status| println!("[sim-client] status -> {}", status));
    client.on_handshake_completed(|user| println!("[sim-client] handshake user: {}", user));
    client.on_closed(|reason| println!("[sim-client] closed: {}", reason));

    for route in &cfg.subscribe {
        let label = route.clone();
        client.on(route.clone(), move |payload| {
            println!("[sim-client] push {}: {}", label, payload)
        });
    }

    client.connect(&endpoint)?;

    let tick = Duration::from_millis(cfg.tick_ms.max(1));
    let mut interval = tokio::time::interval(tick);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(cfg.duration_ms);
    let responded = Rc::new(RefCell::new(false));
    let mut ready_seen = false;

    while tokio::time::Instant::now() < deadline {
        interval.tick().await;
        client.tick(tick.as_secs_f32());

        match client.status() {
            NetworkStatus::Closed => break,
            NetworkStatus::Ready if !ready_seen => {
                if let Some(route) = &cfg.route {
                    let done = responded.clone();
                    let id = client.request(route, cfg.payload.clone(), move |result| {
                        match result {
                            Ok(body) => println!("[sim-client] response: {}", body),
                            Err(e) => println!("[sim-client] request failed: {}", e),
                        }
                        *done.borrow_mut() = true;
                    })?;
                    println!("[sim-client] request {} sent to {}", id, route);
                }
                ready_seen = true;
            }
            _ => {}
        }

        let answered = cfg.route.is_none() || *responded.borrow();
        if ready_seen && answered && cfg.subscribe.is_empty() {
            break;
        }
    }

    let status = client.status();
    client.disconnect();

    if !ready_seen {
        bail!("session never became ready (last status: {})", status);
    }
    if cfg.route.is_some() && !*responded.borrow() {
        bail!("no response before the deadline");
    }

    println!("[sim-client] simulation finished");
    Ok(())
}

fn parse_args() -> anyhow::Result<SimConfig> {
    let mut cfg = SimConfig {
        endpoint: None,
        config_path: None,
        route: None,
        payload: Value::Object(Default::default()),
        subscribe: Vec::new(),
        duration_ms: 10_000,
        tick_ms: 50,
    };

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tcp" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.endpoint = Some(TransportParameter::Tcp(parse_host_port(&value)?));
            }
            "--ws" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.endpoint = Some(TransportParameter::WebSocket(WebSocketParameter::new(value)));
            }
            "--config" => cfg.config_path = Some(PathBuf::from(next_arg_value(&mut args, &arg)?)),
            "--route" => cfg.route = Some(next_arg_value(&mut args, &arg)?),
            "--payload" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.payload = serde_json::from_str(&value)
                    .with_context(|| format!("invalid --payload JSON: {}", value))?;
            }
            "--subscribe" => cfg.subscribe.push(next_arg_value(&mut args, &arg)?),
            "--duration-ms" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.duration_ms = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --duration-ms: {}", value))?;
            }
            "--tick-ms" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.tick_ms = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --tick-ms: {}", value))?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                bail!("unknown argument: {}\nUse --help to see the options.", other);
            }
        }
    }

    Ok(cfg)
}

fn parse_host_port(value: &str) -> anyhow::Result<TcpParameter> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("--tcp expects host:port, got {}", value))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid --tcp port: {}", port))?;
    if host.is_empty() {
        bail!("--tcp expects host:port, got {}", value);
    }
    Ok(TcpParameter::new(host, port))
}

fn next_arg_value<I>(args: &mut std::iter::Peekable<I>, flag: &str) -> anyhow::Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| anyhow!("missing value for {}", flag))
}

fn print_help() {
    println!(
        "sim-client - connects to a Pinus server, handshakes, sends one request and prints pushes\n\n\
Usage:\n\
  cargo run -p pinus-client --bin sim-client -- [options]\n\n\
Options:\n\
  --tcp <host:port>            Connect over raw TCP\n\
  --ws <url>                   Connect over WebSocket (e.g. ws://127.0.0.1:3014)\n\
  --config <toml>              Client config file (default: built-in defaults)\n\
  --route <route>              Request route sent once the session is ready\n\
  --payload <json>             Request body (default: {{}})\n\
  --subscribe <route>          Print pushes on this route (repeatable)\n\
  --duration-ms <ms>           Give up after this long (default: 10000)\n\
  --tick-ms <ms>               Tick period (default: 50)\n\
  --help                       Show this help\n"
    );
}
