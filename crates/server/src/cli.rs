//! Command-line arguments.

use clap::Parser;

/// Farm operations notification service: background jobs, live activity
/// aggregation, and the admin API.
#[derive(Parser, Debug)]
#[command(name = "farmkonnect-server", version, about)]
pub struct Cli {
    /// Address to bind. Overrides HOST from the environment config.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind. Overrides PORT from the environment config.
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Config profile, e.g. PROD reads PROD_PORT before PORT.
    #[arg(long, env = "FARMKONNECT_PROFILE")]
    pub profile: Option<String>,

    /// Validate configuration, print the redacted summary, and exit.
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut farmkonnect_core::Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}
