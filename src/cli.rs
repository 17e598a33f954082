use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// lgtm — relay pull request approvals to connected approvers
#[derive(Parser)]
#[command(name = "lgtm", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server
    Server {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },

    /// Run an approver agent connected to a relay
    Client {
        /// Relay base url (http, https, ws or wss)
        #[arg(long, env = "LGTM_SERVER_URL")]
        server_url: String,

        /// Seconds to wait before reconnecting after a dropped connection
        #[arg(long, default_value_t = 15)]
        reconnect_interval: u64,

        /// Seconds between keep-alive pings
        #[arg(long, default_value_t = 5)]
        ping_interval: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let cli = Cli::try_parse_from(["lgtm", "server"]).unwrap();
        match cli.command {
            Commands::Server { addr } => assert_eq!(addr.to_string(), "0.0.0.0:8080"),
            _ => panic!("expected server"),
        }
    }

    #[test]
    fn test_client_flags() {
        let cli = Cli::try_parse_from([
            "lgtm",
            "client",
            "--server-url",
            "https://relay.example.com",
            "--ping-interval",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Client {
                server_url,
                reconnect_interval,
                ping_interval,
            } => {
                assert_eq!(server_url, "https://relay.example.com");
                assert_eq!(reconnect_interval, 15);
                assert_eq!(ping_interval, 2);
            }
            _ => panic!("expected client"),
        }
    }
}
