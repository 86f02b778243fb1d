//! Simple Moving Average (SMA).
//!
//! Rolling mean of the last `period` prices, updated one tick at a time.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl Sma {
    /// `period` of zero is treated as one
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Push a price; returns the mean once the window is full
    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(leaving) = self.window.pop_front() {
                self.sum -= leaving;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<Decimal> {
        self.is_ready()
            .then(|| self.sum / Decimal::from(self.period))
    }

    pub fn is_ready(&self) -> bool {
        self.window.len() == self.period
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = Decimal::ZERO;
    }
}
