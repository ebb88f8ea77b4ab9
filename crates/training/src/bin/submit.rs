use clap::Parser;
use training::util::{init_tracing, run_submit, SubmitArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    run_submit(SubmitArgs::parse())
}
