//! usbcat
//!
//! Writes stdin to a USB OUT endpoint and prints what the IN endpoint sends
//! back. See `usbcat --help` for arguments, environment and exit statuses.

use clap::{CommandFactory, Parser};
use common::setup_logging;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{debug, error};
use usbcat::cli::Args;
use usbcat::config;
use usbcat::io::{HexdumpSink, RawSink, ResponseSink};
use usbcat::usb::RusbBackend;
use usbcat::{EnvFlags, Exit, StartupError};

fn main() -> ExitCode {
    let flags = EnvFlags::from_env();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // Help and version go to stdout and are not failures
            return if e.use_stderr() {
                Exit::Usage.into()
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let (settings, config) = match config::resolve(&args, flags) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("usbcat: {}", e);
            if let StartupError::Usage(_) = e {
                eprintln!("{}", Args::command().render_usage());
            }
            return e.exit().into();
        }
    };

    if let Err(e) = setup_logging(settings.log_level(flags)) {
        eprintln!("usbcat: {}", e);
        return Exit::Software.into();
    }
    debug!("{:?}", config);

    let backend = match RusbBackend::new() {
        Ok(backend) => backend,
        Err(e) => {
            error!("{}", e);
            return Exit::Software.into();
        }
    };

    let stdout = io::stdout().lock();
    let mut sink: Box<dyn ResponseSink> = if config.hexdump {
        Box::new(HexdumpSink::new(stdout))
    } else {
        Box::new(RawSink::new(stdout))
    };

    let exit = usbcat::run(&backend, &config, io::stdin().lock(), &mut sink);
    drop(sink);
    let _ = io::stdout().flush();

    debug!("Exit: {} ({})", exit, exit.code());
    exit.into()
}
