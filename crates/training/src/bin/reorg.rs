use clap::Parser;
use training::util::{init_tracing, run_reorg, ReorgArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    run_reorg(ReorgArgs::parse())
}
