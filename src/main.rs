use clap::Parser;

mod cli;
mod commands;
mod domain;
mod services;

use cli::{Cli, Commands};
use services::context::Context;
use services::registry::Registry;

fn main() {
    let cli = Cli::parse();
    let registry = Registry::default();
    let exit = match Context::load() {
        Ok(ctx) => {
            init_logging(&ctx.cfg.log_level);
            match &cli.command {
                Commands::Api {
                    endpoint,
                    data,
                    args,
                } => commands::handle_api_command(&ctx, &registry, endpoint, data.as_deref(), args),
                _ => commands::handle_runtime_commands(&cli, &ctx, &registry),
            }
            .unwrap_or_else(|err| {
                commands::report_error(&err, cli.format, data_type(&cli.command))
            })
        }
        Err(err) => {
            init_logging("warn");
            commands::report_error(&err, cli.format, data_type(&cli.command))
        }
    };
    std::process::exit(exit);
}

/// `PRO_LOG_LEVEL` flows in through the config override, so the configured
/// level is already the effective one.
fn init_logging(filter: &str) {
    let _ = env_logger::Builder::new().parse_filters(filter).try_init();
}

fn data_type(command: &Commands) -> &'static str {
    match command {
        Commands::Enable { .. } => "EnableService",
        Commands::Disable { .. } => "DisableService",
        Commands::Attach { .. } => "FullTokenAttach",
        Commands::Detach => "Detach",
        Commands::Status => "Status",
        Commands::Api { .. } => "APIResponse",
    }
}
