use crate::services::output::OutputFormat;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pro", version, about = "Ubuntu Pro entitlement client")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        help = "Emit the machine-readable response envelope instead of text"
    )]
    pub format: Option<OutputFormat>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enable a service on this machine
    Enable {
        service: String,
        #[arg(long, help = "Service variant to enable")]
        variant: Option<String>,
        #[arg(long, help = "Configure access without installing packages")]
        access_only: bool,
    },
    /// Disable a service on this machine
    Disable {
        service: String,
        #[arg(long, help = "Also remove the packages the service installed")]
        purge: bool,
    },
    /// Attach this machine to a subscription using a contract token
    Attach {
        /// Inline machine token JSON, or a path to a token file
        token: String,
        #[arg(long, help = "Do not enable the contract's auto-enabled services")]
        no_auto_enable: bool,
    },
    /// Disable all services and discard the subscription
    Detach,
    /// Show the entitlement status of every service
    Status,
    /// Call a stable API endpoint (u.pro.*.v1)
    Api {
        endpoint: String,
        #[arg(long, help = "Endpoint arguments as a JSON object")]
        data: Option<String>,
        #[arg(long = "args", value_name = "KEY=VALUE", help = "Endpoint argument")]
        args: Vec<String>,
    },
}
