use anyhow::Context;

use gx_quant::{cli, process};

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    process::process(&cfg)
}
