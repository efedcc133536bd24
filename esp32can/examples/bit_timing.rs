//! Prints the bit timing chosen for common bit rates on the 80 MHz APB
//! clock of the ESP32, then lists every bit rate up to 1 Mbit/s that can be
//! reached exactly.

use esp32can::config::{BitTiming, DEFAULT_TOLERANCE_PPM};
use esp32can::reg::{BusTiming0, BusTiming1};
use fugit::HertzU32;

const APB_CLOCK: HertzU32 = HertzU32::MHz(80);

fn main() {
    for kbps in [125, 250, 500, 800, 1000] {
        let timing = BitTiming::compute(APB_CLOCK, HertzU32::kHz(kbps), DEFAULT_TOLERANCE_PPM);
        println!(
            "{:>4} kbit/s: prescaler {:>3}, {:>2} TQ (1 + {:>2} + {}), SJW {}, \
             sample point {}%, triple sampling {}, {} ppm, BTR0 {:#04x}, BTR1 {:#04x}",
            kbps,
            timing.prescaler(),
            timing.time_quanta(),
            timing.segment1(),
            timing.segment2(),
            timing.sjw(),
            timing.sample_point_percent(),
            timing.triple_sampling(),
            timing.ppm_from_desired(),
            u8::from(BusTiming0::from(&timing)),
            u8::from(BusTiming1::from(&timing)),
        );
    }

    let exact: Vec<u32> = (1..=1_000_000)
        .filter(|&bitrate| {
            BitTiming::compute(APB_CLOCK, HertzU32::from_raw(bitrate), 0).ppm_from_desired() == 0
        })
        .collect();
    println!("{} exact bit rates up to 1 Mbit/s", exact.len());
    for bitrate in exact.iter().rev().take(16) {
        println!("  {} bit/s", bitrate);
    }
}
