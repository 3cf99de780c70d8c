use clap::Parser;
use loadlab::cli::{self, Cli};

fn main() {
    let args = Cli::parse();

    if let Err(message) = args.validate() {
        eprintln!("Error: {}", message);
        eprintln!("Use --help for usage information.");
        std::process::exit(1);
    }

    if args.no_color {
        colored::control::set_override(false);
    }

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(error) = cli::run(&args) {
        eprintln!("{}", error.format_for_console(!args.no_color));
        std::process::exit(error.exit_code());
    }
}
