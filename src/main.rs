use clap::Parser;
use std::process::ExitCode;
use tidydesk::cli::{Cli, run};
use tidydesk::output::OutputFormatter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}
