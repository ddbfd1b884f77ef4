use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use orcano::Config;
use orcano::device;
use orcano::frontend::Frontend;
use orcano::host::stream::{Duplex, StreamHost};
use orcano::quant::{pack_paired, pack_weights};

#[derive(Parser)]
#[command(name = "orcano", version, about = "Stack-machine request interpreter")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run requests against an in-memory host
    Eval {
        #[arg(required = true)]
        requests: Vec<String>,
    },
    /// Read requests line by line
    Repl,
    /// Speak the binary host protocol
    Device {
        /// Connect to a host over TCP instead of using stdin/stdout
        #[arg(long)]
        connect: Option<String>,
    },
    /// Encode values as a paired argument (or a weight blob)
    Pack {
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        scale: i32,
        /// Int8 weights at the fixed weight scale
        #[arg(long)]
        weights: bool,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f32>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orcano=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let result = match cli.command {
        Command::Eval { requests } => eval(&requests, config),
        Command::Repl => repl(config),
        Command::Device { connect } => run_device(connect.as_deref(), &config),
        Command::Pack { scale, weights, values } => {
            if weights {
                println!("{}", pack_weights(&values));
            } else {
                println!("p{}", pack_paired(scale, &values));
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn eval(requests: &[String], config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut frontend = Frontend::new(config);
    let mut out = io::stdout().lock();
    for request in requests {
        for line in frontend.run(request) {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

fn repl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut frontend = Frontend::new(config);
    let mut out = io::stdout().lock();
    writeln!(out, "{}", frontend.config().welcome)?;

    let mut input = io::stdin().lock();
    let mut line = String::new();
    loop {
        write!(out, "{}", frontend.config().prompt)?;
        out.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        match frontend.handle_line(&line) {
            Some(lines) => {
                for l in lines {
                    writeln!(out, "{}", l)?;
                }
            }
            None => break,
        }
    }
    Ok(())
}

fn run_device(connect: Option<&str>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match connect {
        Some(addr) => {
            let stream = TcpStream::connect(addr)?;
            stream.set_read_timeout(config.host_timeout())?;
            device::serve(&mut StreamHost::new(stream), config)?;
        }
        None => {
            let stdio = Duplex::new(io::stdin().lock(), io::stdout().lock());
            device::serve(&mut StreamHost::new(stdio), config)?;
        }
    }
    Ok(())
}
