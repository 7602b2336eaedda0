use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use twosafe_command::CommandRegistry;
use twosafe_server::{serve, ServerConfig};

use crate::cmd::{parse_duration, socket_path, ServeArgs};
use crate::exit::{server_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = server_config(&args)?;
    let path = socket_path(args.socket);
    let registry = Arc::new(CommandRegistry::with_builtins());

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    serve(&path, registry, config, &running).map_err(|err| server_error("bind failed", err))?;
    Ok(SUCCESS)
}

fn server_config(args: &ServeArgs) -> CliResult<ServerConfig> {
    if args.max_message_size == 0 {
        return Err(CliError::new(USAGE, "--max-message-size must be greater than zero"));
    }
    let read_timeout = args.read_timeout.as_deref().map(parse_duration).transpose()?;
    Ok(ServerConfig {
        poll_interval: parse_duration(&args.poll_interval)?,
        max_message_size: args.max_message_size,
        read_timeout,
        shutdown_grace: parse_duration(&args.shutdown_grace)?,
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
