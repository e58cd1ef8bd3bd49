//! # Ttrpcurl CLI Entry Point
//!
//! The main executable for the ttrpcurl tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    log subscriber.
//! 2. **Schema**: Loads the proto files into a `SchemaSource`.
//! 3. **Execution**: Delegates the call to `ttrpcurl_core`, canceling it on Ctrl-C.
//! 4. **Presentation**: Prints every response to standard output and errors to standard error,
//!    exiting with a code that reflects the failure.

mod cli;
mod formatter;
mod loader;

use clap::Parser;
use cli::{CallArgs, Cli, Commands, Data, ListArgs};
use formatter::{FormattedString, GenericError, ServiceList, StatusReport};
use std::{io::Read, process};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ttrpcurl_core::client::{
    self, CallContext, CallError, CancelHandle, CancelReason, DynamicRequest, TtrpcurlClient,
    WriterSink,
};

/// Exit codes above this value carry the ttrpc status code of the failure.
const STATUS_EXIT_BASE: i32 = 64;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let code = match args.command {
        Commands::Call(call) => run_call(call).await,
        Commands::List(list) => list_services(list),
    };
    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_env("TTRPCURL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn list_services(args: ListArgs) -> i32 {
    match loader::load_schema(&args.schema) {
        Ok(source) => {
            let client = TtrpcurlClient::offline(source);
            println!("{}", FormattedString::from(ServiceList(client.list_services())));
            0
        }
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            1
        }
    }
}

async fn run_call(args: CallArgs) -> i32 {
    let config = match args.config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Invalid arguments", err)));
            return 1;
        }
    };

    let source = match loader::load_schema(&args.schema) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            return 1;
        }
    };

    let payload = match config.data {
        Data::Inline(data) => data.into_bytes(),
        Data::Stdin => {
            let mut data = Vec::new();
            if let Err(err) = std::io::stdin().read_to_end(&mut data) {
                eprintln!("{}", FormattedString::from(err));
                return 1;
            }
            data
        }
    };

    let request = DynamicRequest {
        method: config.method,
        payload,
        headers: config.headers,
    };

    let (ctx, handle) = CallContext::new();
    let ctx = match config.max_time {
        Some(max_time) => ctx.with_timeout(max_time),
        None => ctx,
    };
    tokio::spawn(cancel_on_ctrl_c(handle));

    let mut sink = WriterSink(std::io::stdout());
    match client::call(&ctx, source, &config.socket, request, &config.options, &mut sink).await {
        Ok(_) => 0,
        Err(err) => {
            match &err {
                CallError::Remote { code, message } if config.format_error => {
                    eprintln!(
                        "{}",
                        FormattedString::from(StatusReport {
                            format: config.options.format,
                            code: *code,
                            message,
                        })
                    );
                }
                err => eprintln!("{}", FormattedString::from(err)),
            }
            exit_code(&err)
        }
    }
}

/// The first Ctrl-C cancels the call, the second one exits right away.
async fn cancel_on_ctrl_c(handle: CancelHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!(
        " Signal caught. Shutting down. Press ctrl+c again to terminate the program immediately."
    );
    handle.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        process::exit(130);
    }
}

fn exit_code(err: &CallError) -> i32 {
    match err {
        CallError::Remote { code, .. } => STATUS_EXIT_BASE + *code as i32,
        CallError::Canceled(CancelReason::Canceled) => {
            STATUS_EXIT_BASE + ttrpcurl_core::tonic::Code::Cancelled as i32
        }
        CallError::Canceled(CancelReason::DeadlineExceeded) => {
            STATUS_EXIT_BASE + ttrpcurl_core::tonic::Code::DeadlineExceeded as i32
        }
        _ => 1,
    }
}
