use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "maskpx", about, version, long_about = None)]
pub struct MaskpxArguments {
    #[arg(
        short = 'u',
        long = "config-url",
        env = "CONFIG_URL",
        help = "URL the domain-to-origin mapping is fetched from"
    )]
    pub config_url: String,

    #[arg(
        short = 'p',
        long = "port",
        env = "PORT",
        default_value_t = 3000,
        help = "Port to listen on"
    )]
    pub port: u16,

    #[arg(
        long = "admin-token",
        env = "ADMIN_TOKEN",
        help = "Shared secret required by the /reload endpoint; reloads are rejected when unset"
    )]
    pub admin_token: Option<String>,

    #[arg(
        long = "self-url",
        env = "SELF_URL",
        help = "External URL of this proxy, pinged periodically to keep the instance warm"
    )]
    pub self_url: Option<String>,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,
}
