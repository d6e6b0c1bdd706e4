//! Typed metric handles
//!
//! Each handle wraps the id the host returned from `define_metric`. Defining
//! the same name twice returns the same id.

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::{HostError, MetricType};

fn define(metric_type: MetricType, name: &str) -> Result<u32> {
    let mut metric_id = 0;
    hostcall::host()
        .define_metric(metric_type as u32, name.as_bytes(), &mut metric_id)
        .into_result()?;
    Ok(metric_id)
}

fn value(metric_id: u32) -> Result<u64> {
    let mut value = 0;
    hostcall::host().get_metric(metric_id, &mut value).into_result()?;
    Ok(value)
}

fn increment(metric_id: u32, offset: i64) -> Result<()> {
    hostcall::host()
        .increment_metric(metric_id, offset)
        .into_result()?;
    Ok(())
}

/// Monotonic counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Counter(u32);

impl Counter {
    pub fn define(name: &str) -> Result<Self> {
        define(MetricType::Counter, name).map(Self)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn increment(self, delta: u64) -> Result<()> {
        let delta = i64::try_from(delta).map_err(|_| HostError::BadArgument)?;
        increment(self.0, delta)
    }

    pub fn value(self) -> Result<u64> {
        value(self.0)
    }
}

/// Signed value that moves up and down
///
/// The ABI carries metric values as `u64`; a gauge travels as the bit
/// pattern of its `i64` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gauge(u32);

impl Gauge {
    pub fn define(name: &str) -> Result<Self> {
        define(MetricType::Gauge, name).map(Self)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn add(self, delta: i64) -> Result<()> {
        increment(self.0, delta)
    }

    /// Set the gauge to an absolute value
    pub fn record(self, value: i64) -> Result<()> {
        hostcall::host()
            .record_metric(self.0, value as u64)
            .into_result()?;
        Ok(())
    }

    pub fn value(self) -> Result<i64> {
        value(self.0).map(|value| value as i64)
    }
}

/// Distribution of recorded samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Histogram(u32);

impl Histogram {
    pub fn define(name: &str) -> Result<Self> {
        define(MetricType::Histogram, name).map(Self)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn record(self, value: u64) -> Result<()> {
        hostcall::host().record_metric(self.0, value).into_result()?;
        Ok(())
    }

    /// Last recorded sample
    pub fn value(self) -> Result<u64> {
        value(self.0)
    }
}
