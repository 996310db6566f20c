//! Software stand-in for the scale, serving the device side of the
//! protocol over an in-memory stream. Used by `scalecmd --demo` and tests.

use futures::{SinkExt, StreamExt};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::proto::command::QUERY_CODE;

const DEMO_UNIT: &str = "kg";

/// Demo sequence: settling around 26.45 kg with a zero reading,
/// a busy answer, an overload and a rejected command in between.
const DEMO_SEQUENCE: [(&str, Option<f64>); 12] = [
    ("ST", Some(26.456)),
    ("ST", Some(26.461)),
    ("US", Some(26.425)),
    ("US", Some(26.489)),
    ("ST", Some(26.450)),
    ("I", None),
    ("ST", Some(0.0)),
    ("US", Some(26.447)),
    ("ST", Some(26.465)),
    ("OL", None),
    ("ST", Some(26.452)),
    ("?", None),
];

/// How the simulator answers one `Q`.
#[derive(Debug, Clone)]
pub enum Reply {
    Line(String),
    /// Answer after the given delay
    Delayed(Duration, String),
    /// Never answer
    Silent,
    /// Close the link
    Hangup,
}

impl Reply {
    pub fn line(line: impl Into<String>) -> Self {
        Reply::Line(line.into())
    }

    pub fn delayed(delay: Duration, line: impl Into<String>) -> Self {
        Reply::Delayed(delay, line.into())
    }
}

/// Number of command lines the simulator has received.
#[derive(Debug, Clone, Default)]
pub struct Requests(Arc<AtomicUsize>);

impl Requests {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Simulator {
    replies: Vec<Reply>,
    repeat: bool,
}

impl Simulator {
    /// Endless demo sequence.
    pub fn demo() -> Self {
        let replies = DEMO_SEQUENCE
            .iter()
            .enumerate()
            .map(|(i, (code, weight))| match weight {
                Some(w) if *w != 0.0 => Reply::Line(weighed_line(code, w + wobble(i))),
                Some(w) => Reply::Line(weighed_line(code, *w)),
                None => Reply::line(*code),
            })
            .collect();
        Self {
            replies,
            repeat: true,
        }
    }

    /// Answer the n-th `Q` with the n-th reply, then stay silent.
    pub fn scripted(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            repeat: false,
        }
    }

    /// Run the simulator on its own task. Returns the host end of the link.
    pub fn spawn(self) -> (DuplexStream, Requests) {
        let (host, device) = tokio::io::duplex(1024);
        let requests = Requests::default();
        tokio::spawn(self.run(device, requests.clone()));
        (host, requests)
    }

    fn reply_for(&self, n: usize) -> Option<&Reply> {
        if self.repeat && !self.replies.is_empty() {
            self.replies.get(n % self.replies.len())
        } else {
            self.replies.get(n)
        }
    }

    async fn run(self, io: DuplexStream, requests: Requests) {
        let mut link = Framed::new(io, LinesCodec::new());
        let mut queries = 0;

        while let Some(Ok(line)) = link.next().await {
            requests.0.fetch_add(1, Ordering::SeqCst);
            let command = line.trim();
            debug!(command, "simulator RX");

            if command != QUERY_CODE {
                if link.send("?\r").await.is_err() {
                    break;
                }
                continue;
            }

            let reply = self.reply_for(queries).cloned();
            queries += 1;
            let answer = match reply {
                Some(Reply::Line(answer)) => answer,
                Some(Reply::Delayed(delay, answer)) => {
                    tokio::time::sleep(delay).await;
                    answer
                }
                Some(Reply::Silent) | None => continue,
                Some(Reply::Hangup) => break,
            };
            if link.send(format!("{}\r", answer)).await.is_err() {
                break;
            }
        }
        debug!("simulator link closed");
    }
}

fn weighed_line(code: &str, weight: f64) -> String {
    format!("{},{:+010.3} {}", code, weight, DEMO_UNIT)
}

// Small deterministic jitter, at most +/- 8 g
fn wobble(i: usize) -> f64 {
    ((i * 7) % 5) as f64 * 0.004 - 0.008
}
