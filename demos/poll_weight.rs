use scalectrl::{Sample, Scale, Session, DEFAULT_BAUDRATE};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> scalectrl::Result<()> {
    let path = "/dev/ttyUSB0".to_string();
    let scale = Scale::open(&path, DEFAULT_BAUDRATE)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(scale, move |sample: Sample| {
        let _ = tx.send(sample);
    });
    let _ = session.start(None)?;

    while let Some(sample) = rx.recv().await {
        match (sample.reading.weight(), sample.reading.unit()) {
            (Some(weight), Some(unit)) => println!("Weight: {} {}", weight, unit),
            _ => println!("Status: {}", sample.reading.status()),
        }
        if sample.seq >= 10 {
            break;
        }
    }

    session.stop().await;
    Ok(())
}
