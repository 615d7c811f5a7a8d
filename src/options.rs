use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(about = env!("CARGO_PKG_DESCRIPTION"), version)]
pub struct Options {
    /// The directory to write converted JPEG files into. Created if it
    /// doesn't exist yet.
    #[clap(long, short, env("DEFAULT_OUTPUT_DIR"), default_value = "converted")]
    pub output: PathBuf,

    /// JPEG quality, from 1 (smallest) to 100 (best).
    #[clap(
        long,
        short,
        env("DEFAULT_QUALITY"),
        default_value_t = 85,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub quality: u8,

    /// Images wider than this are scaled down, keeping their aspect ratio.
    #[clap(
        long,
        env("DEFAULT_MAX_WIDTH"),
        default_value_t = 1920,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_width: u32,

    /// Images taller than this are scaled down, keeping their aspect ratio.
    #[clap(
        long,
        env("DEFAULT_MAX_HEIGHT"),
        default_value_t = 1080,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_height: u32,

    /// Only convert files directly inside this Google Drive folder.
    #[clap(long)]
    pub folder_id: Option<String>,

    /// The OAuth client secrets file downloaded from the Google Cloud
    /// console. Only needed when no usable token is cached.
    #[clap(long, env("GOOGLE_CREDENTIALS_FILE"), default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Where the OAuth token is cached between runs.
    #[clap(long, env("GOOGLE_TOKEN_FILE"), default_value = "token.json")]
    pub token_file: PathBuf,

    /// Delete the original HEIC files from Google Drive after converting them,
    /// without asking first.
    #[clap(long)]
    pub auto_delete: bool,

    /// Follow continuation tokens instead of stopping after the first page of
    /// the Drive listing.
    #[clap(long)]
    pub all_pages: bool,

    /// Sets verbosity level. Can be specified multiple times to increase the verbosity
    /// of this program.
    #[clap(long = "verbose", short, action(clap::ArgAction::Count))]
    pub verbosity: u8,
}
