//! `drishti` – desktop demo of a Drishti node pair.
//!
//! Runs a simulated wearer walking toward an obstacle (with one scripted
//! fall) through the real [`NodeOrchestrator`], over a lossy simulated radio,
//! into a [`ReceiverNode`] driving simulated haptic motors. Every completed
//! send is printed as a telemetry line until the demo duration elapses or
//! Ctrl-C is pressed.
//!
//! ```text
//! drishti --duration 30 --loss 0.2 --fall-at 12
//! drishti --print-config > ~/.drishti/config.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use drishti_hal::{HapticMapper, SimRegistry, haptic::HAPTIC_MOTOR_COUNT};
use drishti_kernel::FailSafeStatus;
use drishti_link::{LinkLayer, LossyTransport};
use drishti_runtime::config::{self, NodeConfig};
use drishti_runtime::{
    NodeOrchestrator, NodeSummary, PacketKind, ReceiverNode, ReceiverSummary, SimulatedWalk,
    TelemetryRecord, WalkProfile, init_tracing,
};
use drishti_types::Timestamp;
use tokio::sync::{mpsc, watch};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "drishti", version, about = "Simulated Drishti transmitter/receiver pair")]
struct Args {
    /// Demo length in seconds.
    #[arg(long, default_value_t = 20)]
    duration: u64,
    /// Probability that a single radio attempt is lost.
    #[arg(long, default_value_t = 0.1)]
    loss: f64,
    /// Seed for the walk and the radio.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Second at which the wearer falls; 0 disables the fall.
    #[arg(long, default_value_t = 8)]
    fall_at: u64,
    /// Print telemetry as JSON objects instead of text lines.
    #[arg(long)]
    json: bool,
    /// Config file; defaults to $DRISHTI_CONFIG or ~/.drishti/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_tracing("drishti");

    let cfg = match load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    if args.print_config {
        return match cfg.to_toml() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", "Config error".red());
                ExitCode::FAILURE
            }
        };
    }

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let stop_ctrlc = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping nodes …".yellow().bold());
        stop_ctrlc.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the demo runs to completion");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start runtime".red());
            return ExitCode::FAILURE;
        }
    };

    print_banner(&cfg, &args);
    match runtime.block_on(run_demo(cfg, &args, stop_tx, stop_rx)) {
        Ok((node, receiver)) => {
            print_summary(&node, &receiver);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "Demo failed".red());
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<NodeConfig, drishti_types::NodeError> {
    let loaded = match path {
        Some(p) => config::load_from(p)?,
        None => config::load()?,
    };
    match loaded {
        Some(cfg) => {
            let shown = path.map_or_else(config::config_path, PathBuf::from);
            eprintln!("  Config loaded from {}", shown.display().to_string().bold());
            Ok(cfg)
        }
        None => {
            let mut cfg = NodeConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo
// ─────────────────────────────────────────────────────────────────────────────

async fn run_demo(
    cfg: NodeConfig,
    args: &Args,
    stop_tx: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(NodeSummary, ReceiverSummary), Box<dyn std::error::Error>> {
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(
        LossyTransport::new(args.loss, args.seed)
            .with_ack_loss(args.loss / 2.0)
            .with_peer(peer_tx),
    );
    let link = LinkLayer::new(transport, cfg.retry_policy());

    let (record_tx, mut record_rx) = mpsc::unbounded_channel();
    let node = NodeOrchestrator::new(cfg.clone(), link)?
        .with_telemetry(record_tx)
        .with_local_alerts(SimRegistry::new().with_buzzer().build());
    let mut status_rx = node.status();

    let receiver = ReceiverNode::new(
        &cfg,
        HapticMapper::default(),
        SimRegistry::new()
            .with_motor_array(HAPTIC_MOTOR_COUNT)
            .with_buzzer()
            .build(),
    );

    let profile = WalkProfile {
        fall_at: (args.fall_at > 0).then(|| Timestamp::from_millis(args.fall_at * 1_000)),
        ..WalkProfile::default()
    };
    let walk = SimulatedWalk::new(profile, args.seed);

    let node_task = tokio::spawn(node.run(walk, stop_rx.clone()));
    let receiver_task = tokio::spawn(receiver.run(peer_rx, stop_rx.clone()));

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            Ok(()) = status_rx.changed() => {
                let status = *status_rx.borrow_and_update();
                print_status(&status);
            }
            Some(record) = record_rx.recv() => print_record(&record, args.json),
        }
    }

    stop_tx.send_replace(true);
    let node_summary = node_task.await?;
    let receiver_summary = receiver_task.await?;
    while let Ok(record) = record_rx.try_recv() {
        print_record(&record, args.json);
    }
    Ok((node_summary, receiver_summary))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn render_record(record: &TelemetryRecord, json: bool) -> String {
    if json {
        return record.to_json();
    }
    let line = record.to_line();
    if record.kind == PacketKind::FallAlert {
        line.red().bold().to_string()
    } else if !record.delivered {
        line.yellow().to_string()
    } else {
        line
    }
}

fn print_record(record: &TelemetryRecord, json: bool) {
    println!("{}", render_record(record, json));
}

fn print_status(status: &FailSafeStatus) {
    let mut parts = Vec::new();
    if status.link_degraded {
        parts.push("link degraded");
    }
    if status.sensor_degraded {
        parts.push("sensor degraded");
    }
    if status.low_battery {
        parts.push("battery low");
    }
    if parts.is_empty() {
        println!("{}", "  ✓ node healthy".green());
    } else {
        println!("{} {}", "  ⚠ node status:".yellow().bold(), parts.join(", "));
    }
}

fn print_banner(cfg: &NodeConfig, args: &Args) {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        Drishti node simulation       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!(
        "  node {}  every {} ms  loss {:.0}%  {} attempts/packet  {} s",
        cfg.node_id,
        cfg.sample_interval_ms,
        args.loss * 100.0,
        cfg.retry_policy().max_attempts,
        args.duration
    );
    let mapper = HapticMapper::default();
    if let Some(range) = mapper.max_range_cm() {
        println!(
            "  haptics: {} motors, first band within {range:.0} cm",
            mapper.motor_count()
        );
    }
    println!();
}

fn print_summary(node: &NodeSummary, receiver: &ReceiverSummary) {
    println!();
    println!("{}", "  Summary".bold());
    println!(
        "    ticks {}  missed reads {}  skipped routine sends {}",
        node.ticks, node.missed_reads, node.routine_skipped
    );
    let rate = node
        .link
        .success_rate()
        .map_or_else(|| "--".to_string(), |r| format!("{:.1}%", r * 100.0));
    println!(
        "    packets delivered {}  exhausted {}  attempts {}  success {}",
        node.link.delivered, node.link.exhausted, node.link.attempts, rate
    );
    println!(
        "    receiver accepted {}  duplicates {}  dropped {}",
        receiver.link.accepted, receiver.link.duplicates, receiver.link.dropped
    );
    let falls = format!(
        "    falls detected {}  fall alerts received {}",
        node.falls_detected, receiver.fall_alerts
    );
    if receiver.fall_alerts > 0 {
        println!("{}", falls.red().bold());
    } else {
        println!("{falls}");
    }
}
