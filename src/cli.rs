use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera device index
    #[arg(long, default_value_t = 0)]
    pub device: i32,

    /// Host to bind the stream servers to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port for the raw camera stream
    #[arg(long, default_value_t = 8000)]
    pub raw_port: u16,

    /// Port for the annotated stream
    #[arg(long, default_value_t = 8001)]
    pub processed_port: u16,

    /// Mirror frames horizontally for tracking and the raw stream
    #[arg(long)]
    pub mirror: bool,

    /// Directory containing the Haar cascade XML files
    #[arg(long, env = "FACESTREAM_CASCADE_DIR", default_value = "cascades")]
    pub cascade_dir: PathBuf,

    /// Record the raw camera feed instead of the annotated one
    #[arg(long)]
    pub record_raw: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
