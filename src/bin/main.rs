//! Walletflow CLI - drive a wallet from the terminal
//!
//!   walletflow info                             → balance snapshot
//!   walletflow payments                         → payment history
//!   walletflow receive <amount> <method>        → lightning | bitcoin | liquid | moonpay
//!   walletflow send <destination> <amount>      → quote, confirm, send (--yes skips the prompt)
//!   walletflow buy [amount]                     → purchase checkout URL
//!   walletflow watch                            → print every snapshot until Ctrl+C
//!   walletflow mnemonic [12|24]                 → new recovery phrase
//!
//! Engine:
//!   --engine memory             in-process engine (default; --balance <sat> to fund it)
//!   --engine ws://host:port     engine daemon over JSON-RPC
//!
//! Output is JSON, pretty-printed on a tty. `--json` forces compact output.

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use std::env;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use walletflow::logging::init_logging;
use walletflow::purchase::parse_amount as parse_purchase_amount;
use walletflow::workflow::destination_kind;
use walletflow::{
    install_signal_handlers, load_env_file, MemoryEngine, Network, Node, NodeConfig, ReceiveStart, ReceiveTarget,
    RedirectHandler, Shutdown,
};

/// Secret used with the in-memory engine when none is configured.
const DEV_SECRET: &str = "memory-engine-development-secret";

fn main() {
    // before any thread exists: `.env` never overrides the real environment
    let _ = load_env_file(".env");
    init_logging();
    #[cfg(feature = "rpc")]
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }
    if opts.version {
        println!("walletflow {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    let Some(command) = opts.command.clone() else {
        print_usage();
        return;
    };

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")
        .and_then(|rt| rt.block_on(dispatch(&command, &opts)));

    match result {
        Ok(output) => println!("{}", render(&output, opts.pretty_output())),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{:#}", e)}), opts.pretty_output()));
            std::process::exit(1);
        }
    }
}

async fn dispatch(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    match command {
        "info" => cmd_info(opts).await,
        "payments" | "history" => cmd_payments(opts).await,
        "receive" => cmd_receive(opts).await,
        "send" => cmd_send(opts).await,
        "buy" => cmd_buy(opts).await,
        "watch" => cmd_watch(opts).await,
        "mnemonic" => cmd_mnemonic(opts),
        cmd => Err(anyhow!("Unknown command: {}", cmd)),
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let out = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    out.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    args: Vec<String>,
    engine: Option<String>,
    network: Option<String>,
    mnemonic: Option<String>,
    balance: Option<u64>,
    yes: bool,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--yes" | "-y" => opts.yes = true,
                "--engine" | "-e" => {
                    if i + 1 < args.len() {
                        opts.engine = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--network" | "-n" => {
                    if i + 1 < args.len() {
                        opts.network = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--mnemonic" | "-m" => {
                    if i + 1 < args.len() {
                        opts.mnemonic = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--balance" => {
                    if i + 1 < args.len() {
                        opts.balance = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') || arg.parse::<i64>().is_ok() => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        opts.args = positional;
        opts
    }

    fn arg(&self, n: usize) -> Option<&str> {
        self.args.get(n).map(String::as_str)
    }

    fn pretty_output(&self) -> bool {
        !self.json && (self.pretty || std::io::stdout().is_terminal())
    }
}

/// Logs the checkout URL; the JSON output carries it too.
struct LogRedirect;

impl RedirectHandler for LogRedirect {
    fn hand_off(&self, url: &str) -> anyhow::Result<()> {
        tracing::info!("open to complete the purchase: {}", url);
        Ok(())
    }
}

async fn open_node(opts: &ParsedArgs, shutdown: Shutdown) -> anyhow::Result<Node> {
    let mut config = NodeConfig::from_env()?;
    if let Some(ref n) = opts.network {
        config.network = Network::from_str(n).ok_or_else(|| anyhow!("unknown network: {}", n))?;
    }
    if let Some(ref m) = opts.mnemonic {
        config.mnemonic = Some(m.clone());
    }
    let redirect: Arc<dyn RedirectHandler> = Arc::new(LogRedirect);

    match opts.engine.clone().or_else(|| config.engine_url.clone()).as_deref() {
        None | Some("memory") => {
            if config.mnemonic.is_none() {
                config.mnemonic = Some(DEV_SECRET.into());
            }
            let engine = Arc::new(MemoryEngine::new().with_balance(opts.balance.unwrap_or(0)));
            Ok(Node::start_with_shutdown(engine, config, redirect, shutdown).await?)
        }
        #[cfg(feature = "rpc")]
        Some(url) => {
            let engine = Arc::new(walletflow::RpcEngine::open(url).await.with_context(|| format!("engine at {}", url))?);
            Ok(Node::start_with_shutdown(engine, config, redirect, shutdown).await?)
        }
        #[cfg(not(feature = "rpc"))]
        Some(url) => bail!("built without the `rpc` feature; cannot reach {}", url),
    }
}

async fn cmd_info(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let node = open_node(opts, Shutdown::new()).await?;
    node.refresh().await?;
    let snap = node.session().snapshot();
    let out = json!({
        "network": node.config().network.as_str(),
        "balance_sat": snap.info.balance_sat,
        "pending_receive_sat": snap.info.pending_receive_sat,
        "pending_send_sat": snap.info.pending_send_sat,
        "payments": snap.payments.len(),
        "synced_at": snap.synced_at,
    });
    node.shutdown().await;
    Ok(out)
}

async fn cmd_payments(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let node = open_node(opts, Shutdown::new()).await?;
    node.refresh().await?;
    let rows: Vec<Value> = node
        .session()
        .payments()
        .iter()
        .map(|p| json!({"line": p.to_string(), "payment": p}))
        .collect();
    node.shutdown().await;
    Ok(json!({ "payments": rows }))
}

async fn cmd_receive(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let amount = opts.arg(0).context("usage: walletflow receive <amount> <lightning|bitcoin|liquid|moonpay>")?;
    let target = ReceiveTarget::parse(opts.arg(1).unwrap_or("lightning"))
        .ok_or_else(|| anyhow!("unknown receive method: {}", opts.arg(1).unwrap_or_default()))?;

    let node = open_node(opts, Shutdown::new()).await?;
    let out = match target {
        ReceiveTarget::Engine(method) => {
            let prepared = node.receive().prepare_input(amount, method).await?;
            tracing::info!(fee_sat = prepared.fee_sat, "receive fee quoted");
            let done = node.receive().finalize().await?;
            node.receive().reset()?;
            serde_json::to_value(done)?
        }
        ReceiveTarget::External(_) => {
            let amount_sat = parse_purchase_amount(amount, node.purchase().config().default_amount_sat);
            match node.begin_receive(amount_sat, target).await? {
                ReceiveStart::Checkout { url } => json!({ "checkout_url": url, "amount_sat": amount_sat }),
                ReceiveStart::Prepared(p) => serde_json::to_value(p)?,
            }
        }
    };
    node.shutdown().await;
    Ok(out)
}

async fn cmd_send(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (Some(destination), Some(amount)) = (opts.arg(0), opts.arg(1)) else {
        bail!("usage: walletflow send <destination> <amount> [--yes]");
    };

    let node = open_node(opts, Shutdown::new()).await?;
    let prepared = node.send().prepare_input(destination, amount).await?;

    if !opts.yes && !confirm(prepared.amount_sat, prepared.fee_sat).await? {
        node.send().cancel()?;
        node.shutdown().await;
        return Ok(json!({ "sent": false, "quote": prepared, "kind": destination_kind(destination) }));
    }

    let result = node.send().confirm_and_send().await;
    node.shutdown().await;
    let receipt = result?;
    Ok(json!({ "sent": true, "receipt": receipt, "kind": destination_kind(destination) }))
}

async fn confirm(amount_sat: u64, fee_sat: u64) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to send without confirmation; pass --yes");
    }
    eprint!("Send {} sat (fee {} sat)? [y/N] ", amount_sat, fee_sat);
    std::io::stderr().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn cmd_buy(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let node = open_node(opts, Shutdown::new()).await?;
    let result = node.purchase().purchase(opts.arg(0).unwrap_or_default()).await;
    node.shutdown().await;
    Ok(json!({ "checkout_url": result? }))
}

async fn cmd_watch(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let shutdown = install_signal_handlers();
    let node = open_node(opts, shutdown.clone()).await?;
    let mut session = node.session();
    let pretty = opts.pretty_output();

    node.refresh().await?;
    println!("{}", render(&serde_json::to_value(&*session.snapshot())?, pretty));
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            snap = session.changed() => match snap {
                Some(snap) => println!("{}", render(&serde_json::to_value(&*snap)?, pretty)),
                None => break,
            },
        }
    }

    let stats = node.sync_stats();
    node.shutdown().await;
    Ok(json!({ "stopped": true, "stats": stats }))
}

#[cfg(feature = "recovery")]
fn cmd_mnemonic(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words = match opts.arg(0) {
        Some(n) => n.parse::<usize>().with_context(|| format!("invalid word count: {}", n))?,
        None => 12,
    };
    let phrase = walletflow::RecoveryPhrase::generate(words)?;
    Ok(json!({ "words": phrase.words(), "mnemonic": phrase.as_str() }))
}

#[cfg(not(feature = "recovery"))]
fn cmd_mnemonic(_opts: &ParsedArgs) -> anyhow::Result<Value> {
    bail!("built without the `recovery` feature")
}

fn print_usage() {
    eprintln!(
        r#"walletflow - payment workflows over a ledger engine

USAGE:
    walletflow <command> [args] [options]

COMMANDS:
    info                              Balance snapshot
    payments                          Payment history
    receive <amount> <method>         lightning | bitcoin | liquid | moonpay
    send <destination> <amount>       Quote, confirm and send
    buy [amount]                      Purchase checkout URL (default 25000 sat)
    watch                             Print snapshots until Ctrl+C
    mnemonic [12|24]                  Generate a recovery phrase

OPTIONS:
    -e, --engine <url|memory>         Engine daemon URL (env WALLETFLOW_ENGINE_URL)
    -n, --network <net>               mainnet | testnet | regtest (env WALLETFLOW_NETWORK)
    -m, --mnemonic <words>            Wallet secret (env WALLETFLOW_MNEMONIC)
        --balance <sat>               Starting balance of the memory engine
    -y, --yes                         Send without the confirmation prompt
        --json                        Compact JSON output
        --pretty                      Pretty JSON output
    -h, --help                        Show this help
    -V, --version                     Show version

ENVIRONMENT:
    WALLETFLOW_API_KEY, WALLETFLOW_SYNC_BUFFER, WALLETFLOW_LOG_JSON, RUST_LOG
    A .env file in the working directory is loaded first."#
    );
}
