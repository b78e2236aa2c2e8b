use anyhow::Result;
use clap::Parser;
use stonewars_core::{Faction, StonewarsConfig, World, emit_random, initial_population};
use tracing::info;

/// Run the Stonewars guard simulation without a renderer attached.
#[derive(Parser, Debug)]
#[command(name = "stonewars", version, about = "Headless Stonewars simulation runner")]
struct Cli {
    /// Number of frames to simulate.
    #[arg(long, default_value_t = 3_600)]
    frames: u32,

    /// Simulated milliseconds per frame.
    #[arg(long, default_value_t = 16.0)]
    frame_ms: f32,

    /// RNG seed for a reproducible run.
    #[arg(long, env = "STONEWARS_SEED")]
    seed: Option<u64>,

    /// Guards seeded per faction at boot (defaults to the stock roster).
    #[arg(long)]
    guards: Option<usize>,

    /// Frames between scoreboard log lines; 0 silences interim reports.
    #[arg(long, default_value_t = 600)]
    report_interval: u32,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = StonewarsConfig {
        rng_seed: cli.seed,
        ..StonewarsConfig::default()
    };
    if let Some(guards) = cli.guards {
        config.initial_guards_per_side = guards;
    }

    let mut world = World::new(config)?;
    initial_population(&mut world);
    info!(
        guards = world.guard_count(),
        stones = world.stone_count(),
        "battlefield seeded"
    );

    for frame in 0..cli.frames {
        emit_random(&mut world);
        let summary = world.process(cli.frame_ms);
        if cli.report_interval > 0 && frame % cli.report_interval == 0 {
            info!(
                tick = summary.tick.0,
                green_guards = summary.green_guards,
                red_guards = summary.red_guards,
                stones = summary.stones,
                green = summary.green_score,
                red = summary.red_score,
                "scoreboard"
            );
        }
    }

    let green = world.scoreboard().score(Faction::Green);
    let red = world.scoreboard().score(Faction::Red);
    info!(
        tick = world.tick().0,
        green,
        red,
        guards = world.guard_count(),
        stones = world.stone_count(),
        "simulation finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
