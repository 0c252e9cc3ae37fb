//! Command-line tool for a serial G-code gantry.
//!
//! Subcommands:
//! - `send`: Send one raw command and print the response
//! - `status`: Query and print the machine position
//! - `jog`: Jog one axis by a step
//! - `home`: Home all axes
//! - `console`: Interactive command console

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hardware::gantry::{
    GcodeCommand, JogDirection, MachineStatus, SerialLink, SerialPortOpener, DEFAULT_BAUD_RATE,
    DEFAULT_SERIAL_PORT, HOME_COMMAND, STATUS_QUERY,
};
use tracing::info;

/// Serial G-code gantry control tool
#[derive(Parser, Debug)]
#[command(name = "gantry_tool")]
#[command(about = "Send commands to a serial G-code gantry")]
#[command(version)]
struct Args {
    /// Serial device
    #[arg(long, global = true, default_value = DEFAULT_SERIAL_PORT)]
    port: String,

    /// Baud rate
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Response timeout in milliseconds
    #[arg(long, global = true, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a raw command, e.g. `send "G1 X10 F1000"`
    Send {
        /// Command text
        command: String,
    },

    /// Query current position
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Jog one axis
    Jog {
        /// Direction: x+, x-, y+, y-, z+, z-
        direction: JogDirection,

        /// Step size in mm
        #[arg(short, long, default_value = "1.0")]
        step: f64,

        /// Feed rate in mm/min
        #[arg(short, long, default_value = "1000")]
        feed: u32,
    },

    /// Home all axes (G28)
    Home,

    /// Interactive command console
    Console,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let link = SerialLink::new(Arc::new(SerialPortOpener));
    link.open(&args.port, args.baud)
        .with_context(|| format!("Failed to open {}", args.port))?;

    let result = match args.command {
        Command::Send { command } => cmd_send(&link, &command, timeout),
        Command::Status { json } => cmd_status(&link, timeout, json),
        Command::Jog {
            direction,
            step,
            feed,
        } => cmd_send(
            &link,
            GcodeCommand::jog(direction, step, feed).as_str(),
            timeout,
        ),
        Command::Home => cmd_send(&link, HOME_COMMAND, timeout),
        Command::Console => cmd_console(&link, timeout),
    };

    link.close();
    result
}

fn cmd_send(link: &SerialLink, raw: &str, timeout: Duration) -> Result<()> {
    let command = GcodeCommand::parse(raw)?;
    info!("Sending {command}");
    let response = link.request(command.as_str(), timeout)?;
    for line in response.lines() {
        println!("{line}");
    }
    Ok(())
}

fn cmd_status(link: &SerialLink, timeout: Duration, json: bool) -> Result<()> {
    let response = link.request(STATUS_QUERY, timeout)?;
    let status = MachineStatus::from_response(link.state(), &response.text());
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("State: {:?}", status.connection_state);
    println!("X: {:>10.3} mm", status.position.x);
    println!("Y: {:>10.3} mm", status.position.y);
    println!("Z: {:>10.3} mm", status.position.z);
    Ok(())
}

fn cmd_console(link: &SerialLink, timeout: Duration) -> Result<()> {
    println!("G-code console - enter commands, 'quit' to exit");
    println!("Examples: M114, G28, G1 X10 Y5 F1000");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let cmd = input.trim();
        if cmd.is_empty() {
            continue;
        }

        if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
            println!("Bye!");
            break;
        }

        if let Err(e) = cmd_send(link, cmd, timeout) {
            println!("Error: {e}");
        }
    }

    Ok(())
}
