#![deny(clippy::unwrap_used)]

use byteorder::{LittleEndian, WriteBytesExt};
use clap::builder::NonEmptyStringValueParser;
use clap::{arg, command, value_parser};
use scalectrl::proto::command::Command;
use scalectrl::proto::Result;
use scalectrl::sample::FlattenSample;
use scalectrl::sim::Simulator;
use scalectrl::{
    proto, Sample, Scale, Session, Status, WeightReading, DEFAULT_BAUDRATE, DEFAULT_INTERVAL,
    DEFAULT_TIMEOUT, DEFAULT_TTY,
};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Stdout, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
            Self::Csv => f.write_str("csv"),
        }
    }
}

impl clap::ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json, Self::Csv]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Text => clap::builder::PossibleValue::new("text"),
            Self::Json => clap::builder::PossibleValue::new("json"),
            Self::Csv => clap::builder::PossibleValue::new("csv"),
        })
    }
}

#[tokio::main]
async fn main() -> tokio_serial::Result<()> {
    let matches = command!() // requires `cargo` feature
        .arg(
            arg!(
                -p --device <PORT> "Port for USB adapter"
            )
            .default_value(DEFAULT_TTY)
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baudrate"
            )
            .default_value(DEFAULT_BAUDRATE.to_string())
            .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(
                -t --timeout <MS> "Response timeout in milliseconds"
            )
            .default_value(DEFAULT_TIMEOUT.as_millis().to_string())
            .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(arg!(
            --demo "Talk to a simulated scale instead of the serial port"
        ))
        .subcommand(clap::Command::new("read").about("Read current weight"))
        .subcommand(
            clap::Command::new("send")
                .about("Send a command code and decode the answer")
                .arg(
                    arg!(<command> "Command code, e.g. Q")
                        .value_parser(NonEmptyStringValueParser::new()),
                ),
        )
        .subcommand(
            clap::Command::new("poll")
                .about("Poll weight continuously until Ctrl-C")
                .arg(
                    arg!(-i --interval <MS> "Poll interval in milliseconds")
                        .default_value(DEFAULT_INTERVAL.as_millis().to_string())
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    arg!(-n --count <N> "Stop after N samples")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(
                    arg!(--"format" <fmt> "Output format")
                        .value_parser(value_parser!(OutputFormat)),
                )
                .arg(
                    arg!(
                        --"fifo" <FIFO> "Write weights as f64 values (LE) to FIFO file, NaN if there is no value"
                    )
                    .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    init_tracing(matches.get_count("debug"));

    match handle_args(&matches).await {
        Ok(()) => {}
        Err(e) => {
            let port = || {
                matches
                    .get_one::<PathBuf>("device")
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            };
            match e {
                proto::ProtoError::Serial(err) => {
                    if err.kind() == tokio_serial::ErrorKind::NoDevice
                        || matches!(err.kind(), tokio_serial::ErrorKind::Io(ErrorKind::NotFound))
                    {
                        eprintln!("{}: File not found", port());
                    } else {
                        eprintln!("I/O Error: {} [device: {}]", err, port());
                    }
                    exit(-1);
                }
                proto::ProtoError::Io(err) => {
                    if err.kind() == ErrorKind::NotFound {
                        eprintln!("{}: File not found", port());
                    } else {
                        eprintln!("I/O Error: {} [device: {}]", err, port());
                    }
                    exit(-1);
                }
                proto::ProtoError::WriteFailed(err) => {
                    eprintln!("Failed to send command: {} [device: {}]", err, port());
                    exit(-1);
                }
                proto::ProtoError::ChannelNotOpen => {
                    eprintln!("Connection to scale lost, aborting!");
                    exit(-1);
                }
                proto::ProtoError::Timeout(t) => {
                    eprintln!("No response from scale within {:?}", t);
                    exit(-2);
                }
                proto::ProtoError::SessionActive | proto::ProtoError::Abort => {
                    eprintln!("Sampling failed: {}", e);
                    exit(-1);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(debug: u8) {
    let level = match debug {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_args(matches: &clap::ArgMatches) -> Result<()> {
    let baud_rate = matches
        .get_one::<u32>("baudrate")
        .unwrap_or(&DEFAULT_BAUDRATE);
    let timeout = matches
        .get_one::<u64>("timeout")
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(DEFAULT_TIMEOUT);

    let scale = if matches.get_flag("demo") {
        let (link, _) = Simulator::demo().spawn();
        eprintln!("Connected to: simulated scale\n");
        Scale::from_stream(link)
    } else {
        let port_path = matches.get_one::<PathBuf>("device").ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidInput, "Requires device parameter")
        })?;
        let scale = Scale::open(port_path.to_string_lossy(), *baud_rate)?;
        eprintln!("Connected to: {}\n", port_path.display());
        scale
    };
    let mut scale = scale.with_timeout(timeout);

    match matches.subcommand() {
        // Single weight query
        Some(("read", _args)) => {
            let reading = scale.read_weight().await?;
            print_reading(&reading);
        }
        // Arbitrary command code
        Some(("send", args)) => {
            let code = args.get_one::<String>("command").ok_or_else(|| {
                std::io::Error::new(ErrorKind::InvalidInput, "Requires command parameter")
            })?;
            let reading = scale.send(Command::from(code.as_str())).await?;
            print_reading(&reading);
        }
        // Continuous sampling
        Some(("poll", args)) => {
            poll(scale, args).await?;
        }
        _ => {
            return Err(std::io::Error::new(
                ErrorKind::Unsupported,
                "Unsupported command line argument",
            )
            .into());
        }
    }

    Ok(())
}

fn print_reading(reading: &WeightReading) {
    match (reading.weight(), reading.unit()) {
        (Some(weight), Some(unit)) => {
            println!("Weight: {} {} - Status: {}", weight, unit, reading.status())
        }
        _ => println!("Status: {}", reading.status()),
    }
}

async fn poll(scale: Scale, args: &clap::ArgMatches) -> Result<()> {
    let interval = args
        .get_one::<u64>("interval")
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(DEFAULT_INTERVAL);
    let count = args.get_one::<u64>("count").copied();
    let format = args
        .get_one::<OutputFormat>("format")
        .unwrap_or(&OutputFormat::Text);

    let fifo = args
        .get_one::<PathBuf>("fifo")
        .map(|path| OpenOptions::new().append(true).create(true).open(path))
        .transpose()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(scale, move |sample: Sample| {
        let _ = tx.send(sample);
    });
    let _ = session.start(Some(interval))?;

    let mut output = SampleWriter::new(*format, fifo);
    loop {
        tokio::select! {
            sample = rx.recv() => match sample {
                Some(sample) => {
                    let seq = sample.seq;
                    output.write(sample)?;
                    if count.map_or(false, |n| seq >= n) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nExiting...");
                break;
            }
        }
    }

    session.stop().await;
    Ok(())
}

struct SampleWriter {
    format: OutputFormat,
    csv: Option<csv::Writer<Stdout>>,
    fifo: Option<File>,
    last_status: Option<Status>,
}

impl SampleWriter {
    fn new(format: OutputFormat, fifo: Option<File>) -> Self {
        Self {
            format,
            csv: None,
            fifo,
            last_status: None,
        }
    }

    fn write(&mut self, sample: Sample) -> std::io::Result<()> {
        if let Some(binout) = &mut self.fifo {
            binout.write_f64::<LittleEndian>(sample.reading.weight().unwrap_or(f64::NAN))?;
        }

        match self.format {
            OutputFormat::Text => {
                let status = sample.reading.status();
                if self.last_status != Some(status) {
                    self.last_status = Some(status);
                    match status {
                        Status::Overload => eprintln!("Warning: scale overloaded!"),
                        Status::Error => eprintln!("Warning: no valid reading"),
                        Status::Stable | Status::Unstable => {}
                    }
                }
                println!("{:#}", sample);
            }
            OutputFormat::Json => {
                let mut output = std::io::stdout().lock();
                serde_json::to_writer(&mut output, &sample)?;
                output.write_all(b"\n")?;
                output.flush()?;
            }
            OutputFormat::Csv => {
                let writer = self
                    .csv
                    .get_or_insert_with(|| csv::Writer::from_writer(std::io::stdout()));
                writer.serialize(FlattenSample::from(sample))?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}
