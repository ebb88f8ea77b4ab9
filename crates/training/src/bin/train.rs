use clap::Parser;
use training::util::{init_tracing, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    println!("{}", report.summary());
    Ok(())
}
