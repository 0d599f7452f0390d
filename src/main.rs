use anyhow::Context;
use clap::Parser;
use lorawan_sim::{Cli, Engine};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    cli.validate().context("invalid configuration")?;

    log::info!("loading terrain from {}", cli.terrain_file);
    let terrain = lorawan_sim::terrain::load(&cli.terrain_file).context("failed to load terrain file")?;
    log::info!("{} nodes, {} gateways, {:.0} m side", terrain.nodes.len(), terrain.gateways.len(), terrain.side_m);

    let engine = Engine::build(cli, terrain).context("failed to initialize simulation")?;
    let report = engine.run();
    report.print();

    Ok(())
}
