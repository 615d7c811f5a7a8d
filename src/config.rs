use std::path::PathBuf;

use anyhow::Result;
use resolve_path::PathResolveExt;

use crate::options::Options;
use crate::transcode::Dimensions;

/// Settings for one run, fixed once the command line has been parsed.
#[derive(Debug, Clone)]
pub struct Config {
    pub quality: u8,
    pub max_dimensions: Dimensions,
    pub output_dir: PathBuf,
    pub folder_id: Option<String>,
    pub auto_delete: bool,
    pub all_pages: bool,
    pub credentials_file: PathBuf,
    pub token_file: PathBuf,
}

impl Config {
    pub fn from_options(options: &Options) -> Result<Self> {
        Ok(Self {
            quality: options.quality,
            max_dimensions: Dimensions::new(options.max_width, options.max_height),
            output_dir: options.output.try_resolve()?.into_owned(),
            folder_id: options.folder_id.clone(),
            auto_delete: options.auto_delete,
            all_pages: options.all_pages,
            credentials_file: options.credentials.try_resolve()?.into_owned(),
            token_file: options.token_file.try_resolve()?.into_owned(),
        })
    }
}
