use clap::Parser;

#[derive(Parser)]
#[command(name = "glimpse")]
#[command(about = "🖥️ Multi-user screen sharing server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 80)]
    pub quality: u8,

    /// Stream width
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Stream height
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Monitor index to capture
    #[arg(long, default_value_t = 0)]
    pub monitor: usize,

    /// Serve a synthetic test pattern instead of grabbing a display
    #[arg(long)]
    pub test_pattern: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
