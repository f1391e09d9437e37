//! Software clock: rate estimate of the external frequency reference
//!
//! Clock ticks are fitted with a least-squares line of tick time against tick
//! count over a sliding window. The slope is the observed tick period, which
//! is compared to the nominal `divider / frequency`. Running sums keep each
//! tick O(1); times and counts are taken relative to the first tick since the
//! last reset so the sums stay well inside `i128`.
//!
//! The estimate is advisory: reference timestamps are never corrected by it.

use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClockState {
    /// Window not yet full
    Settling,
    InTolerance { ppm: f64 },
    Drifting { ppm: f64 },
}

#[derive(Default, Clone, Copy, Debug)]
struct Sums {
    k: i128,
    t: i128,
    kk: i128,
    kt: i128,
}

impl Sums {
    fn add(&mut self, k: i128, t: i128) {
        self.k += k;
        self.t += t;
        self.kk += k * k;
        self.kt += k * t;
    }

    fn remove(&mut self, k: i128, t: i128) {
        self.k -= k;
        self.t -= t;
        self.kk -= k * k;
        self.kt -= k * t;
    }
}

pub struct SoftClock {
    nominal: f64,
    tolerance_ppm: f64,
    window: usize,
    base: Option<i64>,
    next_k: i64,
    ticks: VecDeque<(i64, i64)>,
    sums: Sums,
    state: ClockState,
}

impl SoftClock {
    /// `nominal` is the expected tick period in picoseconds
    pub fn new(nominal: f64, tolerance_ppm: f64, window: usize) -> Self {
        SoftClock {
            nominal,
            tolerance_ppm,
            window: window.max(2),
            base: None,
            next_k: 0,
            ticks: VecDeque::with_capacity(window),
            sums: Sums::default(),
            state: ClockState::Settling,
        }
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Add a tick and return the new state
    pub fn on_tick(&mut self, time: i64) -> ClockState {
        let base = *self.base.get_or_insert(time);
        let k = self.next_k;
        let t = time - base;
        self.next_k += 1;
        self.ticks.push_back((k, t));
        self.sums.add(k as i128, t as i128);
        if self.ticks.len() > self.window {
            if let Some((k0, t0)) = self.ticks.pop_front() {
                self.sums.remove(k0 as i128, t0 as i128);
            }
        }
        self.state = match self.period() {
            Some(p) if self.ticks.len() == self.window => {
                let ppm = (p - self.nominal) / self.nominal * 1e6;
                if ppm.abs() > self.tolerance_ppm {
                    ClockState::Drifting { ppm }
                } else {
                    ClockState::InTolerance { ppm }
                }
            }
            _ => ClockState::Settling,
        };
        self.state
    }

    /// Forget the window, e.g. after ticks were lost
    pub fn reset(&mut self) {
        self.base = None;
        self.next_k = 0;
        self.ticks.clear();
        self.sums = Sums::default();
        self.state = ClockState::Settling;
    }

    /// Least-squares tick period over the current window, in picoseconds
    pub fn period(&self) -> Option<f64> {
        let n = self.ticks.len() as i128;
        if n < 2 {
            return None;
        }
        let num = n * self.sums.kt - self.sums.k * self.sums.t;
        let den = n * self.sums.kk - self.sums.k * self.sums.k;
        if den == 0 {
            return None;
        }
        Some(num as f64 / den as f64)
    }
}
