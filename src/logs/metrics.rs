use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static METRIC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        concat!(
            r"(?i)^\s*(total items|total units|total duration|new items|changed items",
            r"|failed items|total errors)\s*:\s*(\S*)\s*$",
        ),
    )
    .expect("valid metric regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Items,
    Units,
    Duration,
    NewItems,
    ChangedItems,
    FailedItems,
    Errors,
}

impl Metric {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "total items" => Some(Metric::Items),
            "total units" => Some(Metric::Units),
            "total duration" => Some(Metric::Duration),
            "new items" => Some(Metric::NewItems),
            "changed items" => Some(Metric::ChangedItems),
            "failed items" => Some(Metric::FailedItems),
            "total errors" => Some(Metric::Errors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(u64),
    Seconds(f64),
}

/// Recognise a `Label: number` metric line.
///
/// `Ok(None)` means the line is not a metric; `Err` means the label matched
/// but the value did not parse.
pub fn parse_metric(line: &str) -> Result<Option<(Metric, MetricValue)>, String> {
    let Some(caps) = METRIC_LINE.captures(line) else {
        return Ok(None);
    };
    let Some(metric) = Metric::from_label(&caps[1]) else {
        return Ok(None);
    };
    let raw = &caps[2];
    let value = match metric {
        Metric::Duration => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(MetricValue::Seconds),
        _ => raw.parse::<u64>().ok().map(MetricValue::Count),
    };
    value
        .map(|v| Some((metric, v)))
        .ok_or_else(|| format!("bad value {:?} for {}", raw, caps[1].trim()))
}

/// Running totals across every aggregated job log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub items: u64,
    pub units: u64,
    pub duration_secs: f64,
    pub new_items: u64,
    pub changed_items: u64,
    pub failed_items: u64,
    pub errors: u64,
}

impl Totals {
    pub fn record(&mut self, metric: Metric, value: MetricValue) {
        match (metric, value) {
            (Metric::Duration, MetricValue::Seconds(s)) => self.duration_secs += s,
            (Metric::Duration, MetricValue::Count(n)) => self.duration_secs += n as f64,
            (_, MetricValue::Seconds(_)) => {}
            (Metric::Items, MetricValue::Count(n)) => self.items += n,
            (Metric::Units, MetricValue::Count(n)) => self.units += n,
            (Metric::NewItems, MetricValue::Count(n)) => self.new_items += n,
            (Metric::ChangedItems, MetricValue::Count(n)) => self.changed_items += n,
            (Metric::FailedItems, MetricValue::Count(n)) => self.failed_items += n,
            (Metric::Errors, MetricValue::Count(n)) => self.errors += n,
        }
    }
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total items:     {}", self.items)?;
        writeln!(f, "Total units:     {}", self.units)?;
        writeln!(f, "Total duration:  {:.3}", self.duration_secs)?;
        writeln!(f, "New items:       {}", self.new_items)?;
        writeln!(f, "Changed items:   {}", self.changed_items)?;
        writeln!(f, "Failed items:    {}", self.failed_items)?;
        writeln!(f, "Total errors:    {}", self.errors)
    }
}
