// src/main.rs

use procmux::{cli, logging, run};

fn main() {
    match run_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("procmux error: {err:?}");
            std::process::exit(1);
        }
    }
}

fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args)
}
