use std::io::Read;

use dht22m::esp::{EspDelay, EspLines, EspTimer};
use dht22m::{Dht22m, LineList, ReadSession, Timing};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::EspError;
use log::info;

/// Lines of the attached sensors, in the format accepted by [`LineList::parse`].
const LINES: &str = match option_env!("DHT22M_LINES") {
    Some(lines) => lines,
    None => "4",
};

fn main() -> Result<(), EspError> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let driver = Dht22m::new(EspLines::new()?, EspTimer, EspDelay, Timing::default());
    let lines = LineList::parse(LINES);
    driver.configure(&lines);
    info!("Reading sensors on lines {lines}");

    let mut settle = EspDelay;
    let mut message = String::new();
    loop {
        for sensor in 0..lines.len() {
            message.clear();
            let mut session = ReadSession::open(&driver, sensor, &mut settle);
            if session.read_to_string(&mut message).is_ok() {
                print!("dht22m{sensor}: {message}");
            }
        }
        // The sensor needs 2 seconds between reads
        FreeRtos::delay_ms(2500);
    }
}
