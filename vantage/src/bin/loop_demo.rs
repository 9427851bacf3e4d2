//! Read a handful of samples from a Vantage console and print them.
//!
//! Usage: `loop_demo [DEVICE]` (default `/dev/ttyS0`).

use std::thread;
use std::time::Duration;
use vantage::{Error, Settings, VantagePro};

const PERIOD: Duration = Duration::from_secs(5);

fn main() {
    tracing_subscriber::fmt::init();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyS0".to_string());
    let mut console =
        VantagePro::open(&device, Settings::default()).expect("could not set up console");

    let mut samples = 0;
    println!("starting measurement...");
    while samples < 20 {
        println!("getting sample...");
        match console.parse() {
            Err(Error::NoWakeup(n)) => println!("no response after {n} wake-up attempts"),
            Ok(s) => {
                println!("{}\n", s);
                samples += 1;
            }
            Err(e) => {
                println!("error:{}", e);
                samples += 1;
            }
        }

        thread::sleep(PERIOD);
    }
}
