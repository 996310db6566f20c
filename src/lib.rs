//!
//! This library reads weights from digital scales speaking the simple
//! line-based `Q` / `ST,<value> <unit>` command protocol over a serial link.
//!
//! <br>
//!
//! # Details
//!
//! - The scale is polled with `Q\r\n` and answers with one line:
//!   `ST,<value> <unit>` (stable), `US,<value> <unit>` (unstable),
//!   `I` (busy), `OL` (overload) or `?` (command rejected).
//!
//! - Single reading
//!
//!   ```no_run
//!   use scalectrl::{Scale, DEFAULT_BAUDRATE};
//!   #[tokio::main]
//!   async fn main() -> scalectrl::Result<()> {
//!       let path = "/dev/ttyUSB0".to_string();
//!       let mut scale = Scale::open(&path, DEFAULT_BAUDRATE)?;
//!       eprintln!("Weight: {}", scale.read_weight().await?);
//!       Ok(())
//!   }
//!   ```
//!
//! - Continuous sampling
//!
//!   ```no_run
//!   use scalectrl::{Sample, Scale, Session, DEFAULT_BAUDRATE};
//!   #[tokio::main]
//!   async fn main() -> scalectrl::Result<()> {
//!       let scale = Scale::open("/dev/ttyUSB0", DEFAULT_BAUDRATE)?;
//!       let mut session = Session::new(scale, |sample: Sample| println!("{}", sample));
//!       let _ = session.start(None)?;
//!       tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!       session.stop().await;
//!       Ok(())
//!   }
//!   ```
//!

use std::time::Duration;

pub mod proto;
pub mod sample;
pub mod scale;
pub mod session;
pub mod sim;

pub use proto::response::{Status, WeightReading};
pub use proto::{ProtoError, Result};
pub use sample::Sample;
pub use scale::Scale;
pub use session::{Observer, Session, SessionState, Start};

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyUSB0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

/// Default baudrate, the link runs 7E1.
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// How long an exchange waits for its response line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pause between two sampling cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
