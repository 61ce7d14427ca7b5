//! Binary entry point: hardware assembly, logging, and the control loop.
//!
//! Protocol events go to stdout, one per line; logs go to stderr (and
//! optionally a JSON file) so a host program can parse stdout alone.

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel as xch;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, FILE_GUARD};
use vendo_config::{Config, ConfigStore};
use vendo_core::util::period_ms;
use vendo_core::{Controller, CoinPulseInput, Event, parse_command};
use vendo_traits::{Actuator, DistanceSensor};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&cli, &config.logging)?;
    run(cli, config)
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    if !path.exists() {
        // First boot without a config file runs on the compiled-in defaults.
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    vendo_config::load_toml(&text)
        .wrap_err_with(|| format!("parsing config {}", path.display()))
}

fn init_tracing(cli: &Cli, log: &vendo_config::Logging) -> eyre::Result<()> {
    let level = log.level.clone().unwrap_or_else(|| cli.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_writer(std::io::stderr).with_ansi(false);
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(file) = &log.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "vendo.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match log.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        if cli.json {
            let file_layer = fmt::layer().json().with_writer(writer);
            registry.with(console.json()).with(file_layer).try_init()?;
        } else {
            let file_layer = fmt::layer().json().with_writer(writer);
            registry.with(console).with(file_layer).try_init()?;
        }
    } else if cli.json {
        registry.with(console.json()).try_init()?;
    } else {
        registry.with(console).try_init()?;
    }
    Ok(())
}

/// Setter hooks for the simulated rig, driven by `#`-prefixed stdin lines.
struct SimHooks {
    distance: vendo_hardware::DistanceHandle,
    coin: CoinPulseInput,
}

#[cfg(not(feature = "hardware"))]
fn run(cli: Cli, config: Config) -> eyre::Result<()> {
    use vendo_hardware::{SimulatedActuator, SimulatedDistanceSensor, SimulatedFlowSource};

    let tick_period = Duration::from_millis(period_ms(config.control.tick_hz));
    let store = cli
        .store
        .clone()
        .map_or_else(ConfigStore::ephemeral, ConfigStore::new);

    let (sensor, distance) = SimulatedDistanceSensor::new();
    let pump = SimulatedActuator::new();
    let pump_probe = pump.probe();
    let valve = SimulatedActuator::new();

    let controller = Controller::builder()
        .with_sensor(sensor)
        .with_pump(pump)
        .with_valve(valve)
        .with_config(config)
        .with_store(store)
        .build()?;

    let flow = controller.flow_input();
    let _flow_source =
        SimulatedFlowSource::spawn(pump_probe, cli.sim_flow_hz, move || flow.pulse());
    let hooks = SimHooks {
        distance,
        coin: controller.coin_input(),
    };

    tracing::info!(tick_ms = tick_period.as_millis() as u64, "simulated rig up");
    run_loop(controller, tick_period, Some(hooks), cli.max_ticks)
}

#[cfg(feature = "hardware")]
fn run(cli: Cli, config: Config) -> eyre::Result<()> {
    use vendo_hardware::gpio::{EdgeInput, HcSr04, RelayOutput};

    let tick_period = Duration::from_millis(period_ms(config.control.tick_hz));
    let store = cli
        .store
        .clone()
        .map_or_else(ConfigStore::ephemeral, ConfigStore::new);

    let sensor = HcSr04::new(cli.trig_pin, cli.echo_pin)?;
    let pump = RelayOutput::new(cli.pump_pin)?;
    let valve = RelayOutput::new(cli.valve_pin)?;

    let controller = Controller::builder()
        .with_sensor(sensor)
        .with_pump(pump)
        .with_valve(valve)
        .with_config(config)
        .with_store(store)
        .build()?;

    let coin = controller.coin_input();
    let _coin_edge = EdgeInput::new(cli.coin_pin, move || coin.pulse())?;
    let flow = controller.flow_input();
    let _flow_edge = EdgeInput::new(cli.flow_pin, move || flow.pulse())?;

    tracing::info!(tick_ms = tick_period.as_millis() as u64, "gpio rig up");
    run_loop(controller, tick_period, None, cli.max_ticks)
}

fn run_loop<S: DistanceSensor, P: Actuator, V: Actuator>(
    mut controller: Controller<S, P, V>,
    period: Duration,
    sim: Option<SimHooks>,
    max_ticks: u64,
) -> eyre::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || s.store(true, Ordering::SeqCst))
            .wrap_err("installing signal handler")?;
    }
    let lines = spawn_stdin_reader();

    let mut ticks = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested");
            break;
        }
        match lines.recv_timeout(period) {
            Ok(line) => {
                if let Some(hooks) = &sim
                    && line.starts_with('#')
                {
                    handle_sim_directive(hooks, &line);
                } else if let Some(cmd) = parse_command(&line)
                    && let Err(e) = controller.handle_command(cmd)
                {
                    tracing::error!(error = %e, "command failed");
                    println!("{}", Event::Error(e.to_string()));
                }
            }
            Err(xch::RecvTimeoutError::Timeout) => {}
            // stdin EOF: the host hung up.
            Err(xch::RecvTimeoutError::Disconnected) => break,
        }
        for event in controller.tick()? {
            println!("{event}");
        }
        ticks += 1;
        if max_ticks != 0 && ticks >= max_ticks {
            break;
        }
    }
    Ok(())
}

fn spawn_stdin_reader() -> xch::Receiver<String> {
    let (tx, rx) = xch::bounded(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Bench-test directives, never part of the host protocol:
/// `#COIN <n>` pulses the coin input n times, `#CUP <cm>` / `#CUP NONE`
/// sets the simulated distance.
fn handle_sim_directive(hooks: &SimHooks, line: &str) {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("#COIN"), Some(n)) => {
            let Ok(n) = n.parse::<u32>() else {
                tracing::warn!(line, "bad #COIN count");
                return;
            };
            let coin = hooks.coin.clone();
            // Spaced wider than the debounce window, off-thread so the
            // control loop keeps ticking while the burst plays out.
            std::thread::spawn(move || {
                for _ in 0..n {
                    coin.pulse();
                    std::thread::sleep(Duration::from_millis(60));
                }
            });
        }
        (Some("#CUP"), Some("NONE")) => hooks.distance.set(None),
        (Some("#CUP"), Some(cm)) => match cm.parse::<f32>() {
            Ok(cm) => hooks.distance.set(Some(cm)),
            Err(_) => tracing::warn!(line, "bad #CUP distance"),
        },
        _ => tracing::warn!(line, "unknown sim directive"),
    }
}
