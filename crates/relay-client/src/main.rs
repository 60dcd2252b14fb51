use std::io::Write;

use relay_client::{ConsumeStatus, RelayClient, RenderSink, StreamConsumer};
use relay_shared::models::StreamGenerateRequest;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";
const USAGE: &str =
    "usage: relay-chat [--server URL] [--feature MODE] [--conversation ID] <input...>";

#[derive(Debug)]
struct ChatArgs {
    server: String,
    feature: Option<String>,
    conversation_id: Option<String>,
    input: String,
}

struct TerminalSink {
    printed_len: usize,
}

impl RenderSink for TerminalSink {
    fn render(&mut self, displayed: &str) {
        let Some(fresh) = displayed.get(self.printed_len..) else {
            return;
        };
        let mut stdout = std::io::stdout().lock();
        if stdout
            .write_all(fresh.as_bytes())
            .and_then(|()| stdout.flush())
            .is_ok()
        {
            self.printed_len = displayed.len();
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "relay_client=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let client = match RelayClient::new(&args.server) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let request = StreamGenerateRequest {
        feature: args.feature,
        input: args.input,
        conversation_id: args.conversation_id,
        ..StreamGenerateRequest::default()
    };
    let events = match client.stream_generate(&request).await {
        Ok(events) => events,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut consumer = StreamConsumer::new(TerminalSink { printed_len: 0 });
    let outcome = consumer.run(events, cancel).await;
    println!();

    match outcome.status {
        ConsumeStatus::Completed => {}
        ConsumeStatus::Cancelled => warn!("stream cancelled; partial answer kept"),
        ConsumeStatus::Failed(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<ChatArgs, String> {
    let mut server = DEFAULT_SERVER.to_string();
    let mut feature = None;
    let mut conversation_id = None;
    let mut words = Vec::new();

    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--server" => server = flag_value(&mut args, "--server")?,
            "--feature" => feature = Some(flag_value(&mut args, "--feature")?),
            "--conversation" => conversation_id = Some(flag_value(&mut args, "--conversation")?),
            "-h" | "--help" => return Err("relay-chat streams one answer from a relay".to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ => words.push(arg),
        }
    }

    if words.is_empty() {
        return Err("input is required".to_string());
    }

    Ok(ChatArgs {
        server,
        feature,
        conversation_id,
        input: words.join(" "),
    })
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .filter(|value| !value.starts_with("--"))
        .ok_or_else(|| format!("{flag} needs a value"))
}
