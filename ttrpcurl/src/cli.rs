//! # CLI
//!
//! This module defines the command-line interface of `ttrpcurl` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers
//! are `key:value`). Flags are turned into a [`CallConfig`] once, through [`CallArgs::config`].
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};
use ttrpcurl_core::{
    client::{CallOptions, ConnectOptions},
    codec::{DecodeOptions, EncodeOptions, Format},
    ttrpc::frame::DEFAULT_MAX_MESSAGE_SIZE,
};

#[derive(Parser, Debug)]
#[command(
    name = "ttrpcurl",
    version,
    about = "Make ttrpc calls based on a proto file"
)]
pub struct Cli {
    /// Print debug logs to stderr (overridden by TTRPCURL_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Call a method of a ttrpc server
    ///
    /// The method is resolved in the given proto files, the request data is encoded
    /// accordingly and every response is printed to stdout as soon as it arrives.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// ttrpcurl call --proto shim.proto /run/shim.sock containerd.task.v2.Task.Connect -d '{"id": "abc"}'
    /// ```
    Call(CallArgs),

    /// List the services defined in the proto files
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Proto files defining the services (repeatable, or comma separated)
    #[arg(long = "proto", value_delimiter = ',', env = "TTRPCURL_PROTO", required = true)]
    pub protos: Vec<PathBuf>,

    /// Proto files with lower precedence, overridden by definitions of --proto files
    #[arg(long = "include", value_delimiter = ',', env = "TTRPCURL_INCLUDE")]
    pub includes: Vec<PathBuf>,

    /// Directories searched for imported proto files
    #[arg(
        short = 'I',
        long = "import-path",
        value_delimiter = ',',
        env = "TTRPCURL_IMPORT_PATH"
    )]
    pub import_paths: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    /// Unix socket of the ttrpc server
    pub socket: PathBuf,

    /// Method to call (package.Service.Method)
    pub method: String,

    /// Request data. '@' reads it from stdin. Streaming calls take several messages, one after
    /// the other
    #[arg(short = 'd', long = "data", default_value = "")]
    pub data: String,

    /// Format of the request data and of the responses (json or text)
    #[arg(long, default_value = "json", env = "TTRPCURL_FORMAT")]
    pub format: Format,

    /// Ignore request fields that are not part of the schema
    #[arg(long)]
    pub allow_unknown_fields: bool,

    /// Seconds to wait for the connection to the socket
    #[arg(long, default_value_t = 10.0, env = "TTRPCURL_CONNECT_TIMEOUT")]
    pub connect_timeout: f64,

    /// Maximum number of seconds the whole call may take
    #[arg(long, env = "TTRPCURL_MAX_TIME")]
    pub max_time: Option<f64>,

    /// Maximum size of a message, in bytes
    #[arg(long = "max-msg-sz", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_msg_sz: usize,

    /// Print fields holding their default value (json only)
    #[arg(long)]
    pub emit_defaults: bool,

    /// Print a non-OK status as a message in the --format format
    #[arg(long)]
    pub format_error: bool,

    /// Request metadata (key:value), repeatable
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

/// Where the request data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Inline(String),
    Stdin,
}

/// Validated settings of a call.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub socket: PathBuf,
    pub method: String,
    pub data: Data,
    pub headers: Vec<(String, String)>,
    pub options: CallOptions,
    pub max_time: Option<Duration>,
    pub format_error: bool,
}

impl CallArgs {
    pub fn config(&self) -> Result<CallConfig, String> {
        if self.emit_defaults && self.format != Format::Json {
            return Err("--emit-defaults is only supported with --format json".to_string());
        }
        if self.max_msg_sz == 0 {
            return Err("--max-msg-sz must be greater than zero".to_string());
        }

        let connect_timeout = seconds("--connect-timeout", self.connect_timeout)?;
        let max_time = self
            .max_time
            .map(|value| seconds("--max-time", value))
            .transpose()?;

        let data = match self.data.as_str() {
            "@" => Data::Stdin,
            inline => Data::Inline(inline.to_string()),
        };

        Ok(CallConfig {
            socket: self.socket.clone(),
            method: self.method.clone(),
            data,
            headers: self.headers.clone(),
            options: CallOptions {
                format: self.format,
                decode: DecodeOptions {
                    allow_unknown_fields: self.allow_unknown_fields,
                },
                encode: EncodeOptions {
                    multiline: true,
                    emit_defaults: self.emit_defaults,
                },
                connect: ConnectOptions {
                    timeout: Some(connect_timeout),
                    max_message_size: self.max_msg_sz,
                },
            },
            max_time,
            format_error: self.format_error,
        })
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| format!("{flag} must be a non-negative number of seconds, got {value}"))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}
