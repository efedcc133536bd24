//! Bit timing synthesis
//!
//! A bit time is `1 + segment1 + segment2` time quanta, a time quantum being
//! `prescaler` periods of the APB clock. [`BitTiming::compute`] searches
//! prescalers in [2, 128] and time quanta counts in [3, 25] for the pair whose
//! bit rate is closest to the requested one, then splits the bit time so that
//! the sample point lands near 80 %.

use bitfield::bitfield;
use fugit::HertzU32;

/// Smallest prescaler the controller supports
pub const MIN_PRESCALER: u32 = 2;
/// Largest prescaler the controller supports
pub const MAX_PRESCALER: u32 = 128;
/// Smallest bit time, in time quanta
pub const MIN_TIME_QUANTA: u32 = 3;
/// Largest bit time, in time quanta
pub const MAX_TIME_QUANTA: u32 = 25;
/// Largest time segment 1
pub const MAX_SEGMENT1: u32 = 16;
/// Largest time segment 2
pub const MAX_SEGMENT2: u32 = 8;
/// Largest synchronization jump width
pub const MAX_SJW: u32 = 4;
/// Tolerance applied when none is configured, in parts per million
pub const DEFAULT_TOLERANCE_PPM: u32 = 1000;

/// Highest bit rate for which triple sampling is enabled
const TRIPLE_SAMPLING_LIMIT: u32 = 125_000;

/// Register level bit timing derived from an APB clock and a bit rate.
///
/// Values are *real* values; the offsets the registers expect are applied
/// when they are programmed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    clock: u32,
    desired_bitrate: u32,
    prescaler: u8,
    time_quanta: u8,
    segment1: u8,
    segment2: u8,
    sjw: u8,
    triple_sampling: bool,
    within_tolerance: bool,
}

impl BitTiming {
    /// Finds the settings closest to `bitrate` for the given `clock`.
    ///
    /// Never fails: if `bitrate` cannot be reached within `tolerance_ppm`
    /// the best effort is returned with [`Self::within_tolerance`] unset.
    pub fn compute(clock: HertzU32, bitrate: HertzU32, tolerance_ppm: u32) -> Self {
        let clock_hz = u64::from(clock.to_Hz());
        let bitrate_hz = u64::from(bitrate.to_Hz()).max(1);

        let mut tq = u64::from(MAX_TIME_QUANTA);
        let mut brp = clock_hz / (bitrate_hz * tq);
        let mut best_tq = tq;
        let mut best_brp = u64::from(MAX_PRESCALER);
        let mut smallest_error = u64::MAX;
        while tq >= u64::from(MIN_TIME_QUANTA) && brp <= u64::from(MAX_PRESCALER) {
            // Rounding the prescaler down gives a bit rate above the target
            if brp >= u64::from(MIN_PRESCALER) {
                let error = clock_hz - bitrate_hz * tq * brp;
                if error < smallest_error {
                    smallest_error = error;
                    best_tq = tq;
                    best_brp = brp;
                }
            }
            // and rounding it up one below
            if brp < u64::from(MAX_PRESCALER) && brp + 1 >= u64::from(MIN_PRESCALER) {
                let error = bitrate_hz * tq * (brp + 1) - clock_hz;
                if error < smallest_error {
                    smallest_error = error;
                    best_tq = tq;
                    best_brp = brp + 1;
                }
            }
            tq -= 1;
            brp = clock_hz / (bitrate_hz * tq);
        }

        let tq = best_tq as u32;
        let mut segment2 = (tq / 5).clamp(1, MAX_SEGMENT2);
        let mut segment1 = tq - segment2 - 1;
        if segment1 > MAX_SEGMENT1 {
            segment2 += segment1 - MAX_SEGMENT1;
            segment1 = MAX_SEGMENT1;
        }
        let sjw = if segment2 > 4 { 4 } else { 3 };
        let triple_sampling = bitrate_hz <= u64::from(TRIPLE_SAMPLING_LIMIT) && segment1 >= 2;

        let achieved = u64::from(tq) * bitrate_hz * best_brp;
        let difference = clock_hz.abs_diff(achieved);
        let within_tolerance =
            u128::from(difference) * 1_000_000 <= u128::from(achieved) * u128::from(tolerance_ppm);

        Self {
            clock: clock.to_Hz(),
            desired_bitrate: bitrate_hz as u32,
            prescaler: best_brp as u8,
            time_quanta: tq as u8,
            segment1: segment1 as u8,
            segment2: segment2 as u8,
            sjw,
            triple_sampling,
            within_tolerance,
        }
    }

    /// Clock the timing was derived from
    pub fn clock(&self) -> HertzU32 {
        HertzU32::from_raw(self.clock)
    }

    /// Bit rate that was asked for
    pub fn desired_bitrate(&self) -> HertzU32 {
        HertzU32::from_raw(self.desired_bitrate)
    }

    /// Clock periods per time quantum
    pub fn prescaler(&self) -> u8 {
        self.prescaler
    }

    /// Time quanta per bit, `1 + segment1 + segment2`
    pub fn time_quanta(&self) -> u8 {
        self.time_quanta
    }

    /// Propagation and phase segment 1, before the sample point
    pub fn segment1(&self) -> u8 {
        self.segment1
    }

    /// Phase segment 2, after the sample point
    pub fn segment2(&self) -> u8 {
        self.segment2
    }

    /// Synchronization jump width
    pub fn sjw(&self) -> u8 {
        self.sjw
    }

    /// The bus is sampled three times per bit
    pub fn triple_sampling(&self) -> bool {
        self.triple_sampling
    }

    /// The achieved bit rate is within the tolerance given to
    /// [`Self::compute`]
    pub fn within_tolerance(&self) -> bool {
        self.within_tolerance
    }

    fn achieved_clock(&self) -> u64 {
        u64::from(self.time_quanta) * u64::from(self.desired_bitrate) * u64::from(self.prescaler)
    }

    /// Bit rate the settings actually produce
    pub fn actual_bitrate(&self) -> HertzU32 {
        let divider = u32::from(self.prescaler) * u32::from(self.time_quanta);
        HertzU32::from_raw(self.clock.checked_div(divider).unwrap_or(0))
    }

    /// Deviation between the achieved and the desired bit rate, in parts
    /// per million
    pub fn ppm_from_desired(&self) -> u64 {
        let achieved = self.achieved_clock();
        if achieved == 0 {
            return u64::MAX;
        }
        let difference = u64::from(self.clock).abs_diff(achieved);
        (u128::from(difference) * 1_000_000 / u128::from(achieved)) as u64
    }

    /// Position of the sample point within the bit, in percent
    pub fn sample_point_percent(&self) -> u32 {
        if self.time_quanta == 0 {
            return 0;
        }
        let before = 1 + u32::from(self.segment1) - u32::from(self.triple_sampling);
        before * 100 / u32::from(self.time_quanta)
    }

    /// Checks every parameter against the ranges the registers can hold.
    pub fn validate(&self) -> BitTimingErrors {
        let mut errors = BitTimingErrors(0);
        let prescaler = u32::from(self.prescaler);
        if prescaler < MIN_PRESCALER {
            errors.set_prescaler_too_small(true);
        } else if prescaler > MAX_PRESCALER {
            errors.set_prescaler_too_large(true);
        }
        let segment1 = u32::from(self.segment1);
        if segment1 == 0 {
            errors.set_segment1_zero(true);
        } else if segment1 > MAX_SEGMENT1 {
            errors.set_segment1_too_large(true);
        } else if segment1 == 1 && self.triple_sampling {
            errors.set_segment1_too_short_for_triple_sampling(true);
        }
        let segment2 = u32::from(self.segment2);
        if segment2 == 0 {
            errors.set_segment2_zero(true);
        } else if segment2 > MAX_SEGMENT2 {
            errors.set_segment2_too_large(true);
        }
        let sjw = u32::from(self.sjw);
        if sjw == 0 {
            errors.set_sjw_zero(true);
        } else if sjw > MAX_SJW {
            errors.set_sjw_too_large(true);
        }
        errors
    }
}

bitfield! {
    /// Parameters of a [`BitTiming`] the registers cannot hold. Empty when
    /// the timing is consistent.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct BitTimingErrors(u16);

    /// Prescaler below 2
    pub prescaler_too_small, set_prescaler_too_small: 0;
    /// Prescaler above 128
    pub prescaler_too_large, set_prescaler_too_large: 1;
    /// Segment 1 is zero
    pub segment1_zero, set_segment1_zero: 2;
    /// Segment 1 above 16
    pub segment1_too_large, set_segment1_too_large: 3;
    /// Segment 2 is zero
    pub segment2_zero, set_segment2_zero: 4;
    /// Segment 2 above 8
    pub segment2_too_large, set_segment2_too_large: 5;
    /// Segment 1 of a single quantum leaves no room for triple sampling
    pub segment1_too_short_for_triple_sampling, set_segment1_too_short_for_triple_sampling: 6;
    /// SJW is zero
    pub sjw_zero, set_sjw_zero: 7;
    /// SJW above 4
    pub sjw_too_large, set_sjw_too_large: 8;
}

impl BitTimingErrors {
    /// `true` if no flag is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw flags
    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl core::fmt::Debug for BitTimingErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "BitTimingErrors {{ ")?;
        if self.prescaler_too_small() {
            write!(f, "PRESCALER_TOO_SMALL ")?;
        }
        if self.prescaler_too_large() {
            write!(f, "PRESCALER_TOO_LARGE ")?;
        }
        if self.segment1_zero() {
            write!(f, "SEGMENT1_ZERO ")?;
        }
        if self.segment1_too_large() {
            write!(f, "SEGMENT1_TOO_LARGE ")?;
        }
        if self.segment2_zero() {
            write!(f, "SEGMENT2_ZERO ")?;
        }
        if self.segment2_too_large() {
            write!(f, "SEGMENT2_TOO_LARGE ")?;
        }
        if self.segment1_too_short_for_triple_sampling() {
            write!(f, "SEGMENT1_TOO_SHORT_FOR_TRIPLE_SAMPLING ")?;
        }
        if self.sjw_zero() {
            write!(f, "SJW_ZERO ")?;
        }
        if self.sjw_too_large() {
            write!(f, "SJW_TOO_LARGE ")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const APB: u32 = 80_000_000;

    fn compute(clock: u32, bitrate: u32, tolerance_ppm: u32) -> BitTiming {
        BitTiming::compute(
            HertzU32::from_raw(clock),
            HertzU32::from_raw(bitrate),
            tolerance_ppm,
        )
    }

    #[test]
    fn half_megabit_at_80_mhz() {
        let timing = compute(APB, 500_000, DEFAULT_TOLERANCE_PPM);
        assert_eq!(timing.prescaler(), 8);
        assert_eq!(timing.time_quanta(), 20);
        assert_eq!(timing.segment1(), 15);
        assert_eq!(timing.segment2(), 4);
        assert_eq!(timing.sjw(), 3);
        assert!(!timing.triple_sampling());
        assert!(timing.within_tolerance());
        assert_eq!(timing.actual_bitrate().to_Hz(), 500_000);
        assert_eq!(timing.ppm_from_desired(), 0);
        assert_eq!(timing.sample_point_percent(), 80);
        assert!(timing.validate().is_empty());
    }

    #[test]
    fn common_rates_at_80_mhz_are_exact() {
        for bitrate in [125_000, 250_000, 500_000, 1_000_000] {
            let timing = compute(APB, bitrate, 0);
            assert!(timing.within_tolerance(), "{bitrate}");
            assert_eq!(timing.actual_bitrate().to_Hz(), bitrate);
            assert_eq!(
                1 + timing.segment1() + timing.segment2(),
                timing.time_quanta()
            );
        }
    }

    #[test]
    fn slow_rates_use_triple_sampling() {
        let timing = compute(APB, 125_000, DEFAULT_TOLERANCE_PPM);
        assert!(timing.triple_sampling());
        let timing = compute(APB, 125_001, DEFAULT_TOLERANCE_PPM);
        assert!(!timing.triple_sampling());
    }

    #[test]
    fn unreachable_rate_falls_back_to_slowest_setting() {
        let timing = compute(APB, 1, DEFAULT_TOLERANCE_PPM);
        assert_eq!(timing.prescaler(), 128);
        assert_eq!(timing.time_quanta(), 25);
        assert!(!timing.within_tolerance());
        assert!(timing.validate().is_empty());
    }

    #[test]
    fn compute_is_deterministic() {
        for bitrate in [1, 10_000, 33_333, 125_000, 800_000, 1_000_000] {
            assert_eq!(compute(APB, bitrate, 1000), compute(APB, bitrate, 1000));
        }
    }

    #[test]
    fn every_reachable_rate_is_consistent() {
        const CLOCK: u32 = 16_000_000;
        for bitrate in 1..=CLOCK / 6 {
            let timing = compute(CLOCK, bitrate, DEFAULT_TOLERANCE_PPM);
            assert!(timing.validate().is_empty(), "{bitrate}: {:?}", timing);
            assert_eq!(
                1 + timing.segment1() + timing.segment2(),
                timing.time_quanta()
            );
            if timing.within_tolerance() {
                assert!(timing.ppm_from_desired() <= u64::from(DEFAULT_TOLERANCE_PPM));
            }
        }
    }

    #[test]
    fn every_rate_up_to_a_megabit_is_consistent_at_80_mhz() {
        for bitrate in 1..=1_000_000 {
            let timing = compute(APB, bitrate, DEFAULT_TOLERANCE_PPM);
            assert!(timing.validate().is_empty(), "{bitrate}: {:?}", timing);
            if timing.within_tolerance() {
                assert!(timing.ppm_from_desired() <= u64::from(DEFAULT_TOLERANCE_PPM));
            }
        }
    }

    #[test]
    fn exact_rates_match_brute_force_search() {
        const LIMIT: u32 = 1_000_000;
        const PAIRS: usize =
            ((MAX_PRESCALER - MIN_PRESCALER + 1) * (MAX_TIME_QUANTA - MIN_TIME_QUANTA + 1)) as usize;

        let mut exact = [0_u32; PAIRS];
        let mut found = 0;
        for prescaler in MIN_PRESCALER..=MAX_PRESCALER {
            for tq in MIN_TIME_QUANTA..=MAX_TIME_QUANTA {
                let divider = prescaler * tq;
                if APB % divider == 0 && APB / divider <= LIMIT {
                    exact[found] = APB / divider;
                    found += 1;
                }
            }
        }
        let exact = &mut exact[..found];
        exact.sort_unstable();

        let mut accepted = 0;
        for bitrate in 1..=LIMIT {
            let timing = compute(APB, bitrate, 0);
            let expected = exact.binary_search(&bitrate).is_ok();
            assert_eq!(timing.within_tolerance(), expected, "{bitrate}");
            if timing.within_tolerance() {
                assert_eq!(timing.actual_bitrate().to_Hz(), bitrate);
                accepted += 1;
            }
        }
        assert!(accepted > 0);
    }

    #[test]
    fn validate_reports_every_violation() {
        let timing = BitTiming {
            clock: APB,
            desired_bitrate: 500_000,
            prescaler: 1,
            time_quanta: 20,
            segment1: 17,
            segment2: 0,
            sjw: 5,
            triple_sampling: false,
            within_tolerance: false,
        };
        let errors = timing.validate();
        assert!(errors.prescaler_too_small());
        assert!(errors.segment1_too_large());
        assert!(errors.segment2_zero());
        assert!(errors.sjw_too_large());
        assert_eq!(errors.bits(), 1 << 0 | 1 << 3 | 1 << 4 | 1 << 8);
    }

    #[test]
    fn validate_rejects_triple_sampling_on_single_quantum_segment() {
        let timing = BitTiming {
            clock: APB,
            desired_bitrate: 100_000,
            prescaler: 200,
            time_quanta: 3,
            segment1: 1,
            segment2: 9,
            sjw: 0,
            triple_sampling: true,
            within_tolerance: false,
        };
        let errors = timing.validate();
        assert!(errors.prescaler_too_large());
        assert!(errors.segment1_too_short_for_triple_sampling());
        assert!(errors.segment2_too_large());
        assert!(errors.sjw_zero());
        assert_eq!(errors.bits(), 1 << 1 | 1 << 5 | 1 << 6 | 1 << 7);
    }
}
