mod auth;
mod batch;
mod config;
mod confirm;
mod drive_api;
mod options;
mod transcode;

use std::{env, panic, process};

use anyhow::Result;
use backtrace::Backtrace;
use clap::Parser;
use reqwest::Client;
use tokio::signal;

use crate::config::Config;
use crate::confirm::StdinConfirm;
use crate::drive_api::DriveClient;
use crate::options::Options;

async fn run(options: Options) -> Result<(), anyhow::Error> {
    let config = Config::from_options(&options)?;
    log::debug!("running with {config:?}");

    let client = Client::new();
    let session = auth::authenticate(&client, &config.credentials_file, &config.token_file).await?;

    let store = DriveClient::new(client);
    let mut confirm = StdinConfirm::new();

    batch::run_batch(&store, &session, &config, &mut confirm).await?;

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    panic::set_hook(Box::new(|panic_info| {
        // PanicInfo's payload is usually a &'static str or String.
        // See: https://doc.rust-lang.org/beta/std/panic/struct.PanicInfo.html#method.payload
        let message = match panic_info.payload().downcast_ref::<&str>() {
            Some(&message) => message.to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(message) => message.clone(),
                None => "<no message>".to_string(),
            },
        };

        eprintln!("heic2jpg crashed!");
        eprintln!("This is probably a bug in heic2jpg.");
        eprintln!();
        eprintln!("If you can reproduce this crash, try adding the -v, -vv, or -vvv flags.");
        eprintln!("This might give you more information to figure out what went wrong!");
        eprintln!();
        eprintln!("Details: {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!("in file {} on line {}", location.file(), location.line());
        }

        // When using the backtrace crate, we need to check the RUST_BACKTRACE
        // environment variable ourselves.
        let should_backtrace = env::var("RUST_BACKTRACE")
            .map(|var| var == "1")
            .unwrap_or(false);

        if should_backtrace {
            eprintln!("{:?}", Backtrace::new());
        } else {
            eprintln!(
                "note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace."
            );
        }

        process::exit(1);
    }));

    // Values from a .env file act as defaults; real environment variables win.
    let _ = dotenvy::dotenv();

    let options = Options::parse();

    let log_filter = match options.verbosity {
        0 => "info",
        1 => "info,heic2jpg=debug",
        2 => "info,heic2jpg=trace",
        _ => "trace",
    };

    let log_env = env_logger::Env::default().default_filter_or(log_filter);

    env_logger::Builder::from_env(log_env)
        .format_module_path(false)
        .format_timestamp_secs()
        // Indent following lines past the timestamp and level label
        .format_indent(Some(30))
        .init();

    tokio::select! {
        result = run(options) => {
            if let Err(err) = result {
                log::error!("command exited with error {err:?}");
                process::exit(1);
            }
        },
        _ = signal::ctrl_c() => {
            log::info!("caught ctrl-c, exiting now");
            process::exit(0);
        }
    }
}
