use clap::Parser;

use n8n_deploy::pipeline::Cli;
use n8n_deploy::{Layout, Pipeline, logging};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let pipeline = Pipeline::system(Layout::new(&cli.install_dir));
    pipeline.dispatch(&cli.command.unwrap_or_default())?;
    Ok(())
}
