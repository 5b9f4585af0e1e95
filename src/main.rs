use std::process::ExitCode;

use meshsplat::batch::{self, Command, USAGE};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    let parsed = match batch::parse_args(&args) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run(a)) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match batch::run(&parsed) {
        Ok(report) => {
            println!(
                "Generated {} gaussians at resolution {} ({} backend)",
                report.total, report.resolution, report.backend
            );
            println!("Successfully exported to: {}", report.output.display());
            if let Some(preview) = &report.preview {
                println!("Preview written to: {}", preview.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
