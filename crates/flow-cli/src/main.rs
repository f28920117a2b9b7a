//! Flow CLI - compile and exercise Flow configuration files outside a
//! host server
//!
//! A small builtin registry stands in for the natives a real host would
//! provide: `print` writes its arguments to stdout, `env` reads process
//! environment variables, and `consume` consumes the request.

use std::ffi::CString;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use flow_core::{FlowValue, NativeRegistry, Runtime, ValueKind};

#[derive(Parser)]
#[command(name = "flow")]
#[command(version = flow_core::VERSION)]
#[command(about = "The Flow configuration language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and compile a file, reporting every error
    Check {
        /// The Flow source file
        file: PathBuf,
    },

    /// List the handlers a file declares
    Handlers {
        /// The Flow source file
        file: PathBuf,
    },

    /// Compile a file and invoke one handler
    Run {
        /// The Flow source file
        file: PathBuf,

        /// Handler to invoke
        #[arg(long, default_value = "main")]
        handler: String,

        /// Optimization level (0-4)
        #[arg(short = 'O', long, default_value_t = 0)]
        optimize: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { file } => {
            let mut rt = runtime(0);
            if !rt.compile(&file) {
                bail!("{} failed to compile", file.display());
            }
            println!("{}: ok", file.display());
        }
        Commands::Handlers { file } => {
            let mut rt = runtime(0);
            if !rt.compile(&file) {
                bail!("{} failed to compile", file.display());
            }
            for handler in rt.list_handlers() {
                println!("{}", handler.name());
            }
        }
        Commands::Run {
            file,
            handler,
            optimize,
        } => {
            let mut rt = runtime(optimize);
            if !rt.compile(&file) {
                bail!("{} failed to compile", file.display());
            }
            let Some(target) = rt.find_handler(&handler) else {
                bail!("no handler named '{handler}'");
            };
            let consumed = rt.invoke(&target, std::ptr::null_mut());
            println!("{handler}: {}", if consumed { "consumed" } else { "declined" });
        }
    }
    Ok(())
}

/// A runtime over the builtin registry with errors on stderr
fn runtime(optimize: i32) -> Runtime {
    let mut rt = Runtime::new(builtin_registry());
    rt.set_optimization_level(optimize);
    rt.set_error_handler(|message| eprintln!("flow: {message}"));
    rt
}

/// The stand-in natives for running files without a host server
fn builtin_registry() -> NativeRegistry {
    let mut registry = NativeRegistry::new();

    registry
        .register_function("print", ValueKind::Void, |call| {
            let line: Vec<String> = call.args().iter().map(render).collect();
            println!("{}", line.join(" "));
        })
        .expect("builtin registration");

    registry
        .register_function("env", ValueKind::String, |call| {
            let name = call
                .arg(0)
                .filter(|v| v.value_kind() == Some(ValueKind::String))
                .map(|v| unsafe { v.as_str() }.to_string())
                .unwrap_or_default();
            let value = std::env::var(&name).unwrap_or_default();
            // leaked per lookup; the CLI process is short-lived
            let stored: &'static CString =
                Box::leak(Box::new(CString::new(value).unwrap_or_default()));
            call.ret().set_string(stored.as_ptr());
        })
        .expect("builtin registration");

    registry
        .register_handler("consume", |call| call.ret().set_boolean(true))
        .expect("builtin registration");

    registry
}

fn render(value: &FlowValue) -> String {
    match value.value_kind() {
        Some(ValueKind::Number) => value.as_number().to_string(),
        Some(ValueKind::Boolean) => value.as_bool().to_string(),
        Some(ValueKind::String) => unsafe { value.as_str() }.to_string(),
        Some(ValueKind::Buffer) => {
            String::from_utf8_lossy(unsafe { value.as_bytes() }).into_owned()
        }
        Some(ValueKind::Array) => "[array]".to_string(),
        Some(kind) => format!("[{kind}]"),
        None => "[invalid]".to_string(),
    }
}
