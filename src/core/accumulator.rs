use crate::core::frequency::StoreType;
use crate::simulation_time::DateStamp;

/// Values used to prime the running minimum and maximum at the start of each window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sentinels {
    pub min: f64,
    pub max: f64,
}

pub const REAL_SENTINELS: Sentinels = Sentinels {
    min: 99999.0e20,
    max: -99999.0e20,
};

pub const INTEGER_SENTINELS: Sentinels = Sentinels {
    min: i32::MAX as f64,
    max: i32::MIN as f64,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extremes {
    pub min: f64,
    pub min_stamp: DateStamp,
    pub max: f64,
    pub max_stamp: DateStamp,
}

/// Running total for one reporting window of one variable or meter.
///
/// `value` holds the sum of contributions and `weight` the sum of their weights, so an averaged
/// quantity is `value / weight` and a summed one is `value`. Minimum and maximum track the
/// observed values that went in, each with the stamp of its first occurrence.
#[derive(Clone, Debug, PartialEq)]
pub struct Accumulator {
    sentinels: Sentinels,
    value: f64,
    weight: f64,
    count: u32,
    min: f64,
    min_stamp: DateStamp,
    max: f64,
    max_stamp: DateStamp,
}

impl Accumulator {
    pub fn new(sentinels: Sentinels) -> Self {
        Self {
            sentinels,
            value: 0.,
            weight: 0.,
            count: 0,
            min: sentinels.min,
            min_stamp: Default::default(),
            max: sentinels.max,
            max_stamp: Default::default(),
        }
    }

    /// Folds in one observation. `contribution` is what is added to the running value, which for
    /// averaged quantities is the observation already multiplied by its `weight`.
    pub fn fold(&mut self, observed: f64, contribution: f64, weight: f64, stamp: DateStamp) {
        self.value += contribution;
        self.weight += weight;
        self.count += 1;
        self.observe(observed, stamp);
    }

    /// Folds a closed lower-resolution window into this one, observing its result for the
    /// minimum and maximum.
    pub fn absorb(&mut self, lower: &Accumulator, store_type: StoreType, stamp: DateStamp) {
        if lower.is_empty() {
            return;
        }
        let observed = lower.result(store_type);
        self.fold(observed, lower.value, lower.weight, stamp);
    }

    /// Ties keep the earlier stamp.
    pub fn observe(&mut self, observed: f64, stamp: DateStamp) {
        if observed > self.max {
            self.max = observed;
            self.max_stamp = stamp;
        }
        if observed < self.min {
            self.min = observed;
            self.min_stamp = stamp;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.sentinels);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.value
    }

    pub fn result(&self, store_type: StoreType) -> f64 {
        match store_type {
            StoreType::Summed => self.value,
            StoreType::Averaged if self.weight > 0. => self.value / self.weight,
            StoreType::Averaged => 0.,
        }
    }

    pub fn extremes(&self) -> Option<Extremes> {
        (!self.is_empty()).then_some(Extremes {
            min: self.min,
            min_stamp: self.min_stamp,
            max: self.max,
            max_stamp: self.max_stamp,
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
