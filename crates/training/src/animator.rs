//! Incremental plotting of training curves through pluggable sinks.

use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a sink sees after every `Animator::add`.
#[derive(Debug, Clone, Serialize)]
pub struct PlotFrame<'a> {
    pub xlabel: &'a str,
    pub xlim: Option<(f64, f64)>,
    pub legend: &'a [String],
    /// `(x, y)` points per series, in legend order.
    pub series: &'a [Vec<(f64, f64)>],
    pub x: f64,
    pub ys: &'a [Option<f64>],
}

pub trait PlotSink {
    fn draw(&mut self, frame: &PlotFrame<'_>) -> anyhow::Result<()>;
}

/// Discards every frame.
pub struct NullSink;

impl PlotSink for NullSink {
    fn draw(&mut self, _frame: &PlotFrame<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits the latest point of every series as a tracing event.
pub struct LogSink;

impl PlotSink for LogSink {
    fn draw(&mut self, frame: &PlotFrame<'_>) -> anyhow::Result<()> {
        let values: Vec<String> = frame
            .legend
            .iter()
            .zip(frame.ys)
            .filter_map(|(name, y)| y.map(|y| format!("{name}={y:.4}")))
            .collect();
        tracing::info!(target: "animator", x = frame.x, xlabel = frame.xlabel, "{}", values.join(" "));
        Ok(())
    }
}

/// Appends one JSON line per point.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PlotSink for JsonlSink {
    fn draw(&mut self, frame: &PlotFrame<'_>) -> anyhow::Result<()> {
        let values: serde_json::Map<String, serde_json::Value> = frame
            .legend
            .iter()
            .zip(frame.ys)
            .map(|(name, y)| (name.clone(), serde_json::json!(y)))
            .collect();
        let mut line = serde_json::Map::new();
        line.insert(frame.xlabel.to_string(), serde_json::json!(frame.x));
        line.insert("values".to_string(), serde_json::Value::Object(values));
        let line = serde_json::Value::Object(line);
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening metrics file {}", self.path.display()))?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub struct Animator {
    xlabel: String,
    legend: Vec<String>,
    xlim: Option<(f64, f64)>,
    series: Vec<Vec<(f64, f64)>>,
    sink: Box<dyn PlotSink>,
}

impl Animator {
    pub fn new(
        xlabel: impl Into<String>,
        legend: Vec<String>,
        xlim: Option<(f64, f64)>,
        sink: Box<dyn PlotSink>,
    ) -> Self {
        Self {
            xlabel: xlabel.into(),
            legend,
            xlim,
            series: Vec::new(),
            sink,
        }
    }

    /// Legend used by the training loop; the valid curves only when
    /// there is a validation loader.
    pub fn for_training(num_epochs: usize, with_valid: bool, sink: Box<dyn PlotSink>) -> Self {
        let mut legend = vec!["train loss".to_string(), "train acc".to_string()];
        if with_valid {
            legend.extend(["valid loss".to_string(), "valid acc".to_string()]);
        }
        Self::new("epoch", legend, Some((1.0, num_epochs as f64)), sink)
    }

    /// Append every present `y` to its series, then redraw.
    pub fn add(&mut self, x: f64, ys: &[Option<f64>]) -> anyhow::Result<()> {
        if self.series.len() < ys.len() {
            self.series.resize_with(ys.len(), Vec::new);
        }
        while self.legend.len() < self.series.len() {
            self.legend.push(format!("series{}", self.legend.len()));
        }
        for (points, y) in self.series.iter_mut().zip(ys) {
            if let Some(y) = y {
                points.push((x, *y));
            }
        }
        let frame = PlotFrame {
            xlabel: &self.xlabel,
            xlim: self.xlim,
            legend: &self.legend,
            series: &self.series,
            x,
            ys,
        };
        self.sink.draw(&frame)
    }

    pub fn series(&self) -> &[Vec<(f64, f64)>] {
        &self.series
    }

    pub fn legend(&self) -> &[String] {
        &self.legend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_skips_missing_values() -> anyhow::Result<()> {
        let mut animator = Animator::for_training(2, true, Box::new(NullSink));
        animator.add(0.5, &[Some(1.0), Some(0.2), None, None])?;
        animator.add(1.0, &[None, None, Some(0.9), Some(0.4)])?;
        let series = animator.series();
        assert_eq!(series.len(), 4);
        assert_eq!(series[0], vec![(0.5, 1.0)]);
        assert_eq!(series[2], vec![(1.0, 0.9)]);
        Ok(())
    }

    #[test]
    fn extra_values_get_generated_names() -> anyhow::Result<()> {
        let mut animator = Animator::new("x", vec!["a".into()], None, Box::new(NullSink));
        animator.add(1.0, &[Some(1.0), Some(2.0)])?;
        assert_eq!(animator.legend(), ["a", "series1"]);
        Ok(())
    }

    #[test]
    fn jsonl_sink_appends_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("metrics.jsonl");
        let mut animator = Animator::for_training(1, true, Box::new(JsonlSink::new(&path)?));
        animator.add(0.5, &[Some(2.0), Some(0.25), None, None])?;
        animator.add(1.0, &[None, None, Some(1.5), Some(0.5)])?;

        let raw = fs::read_to_string(&path)?;
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["epoch"], 0.5);
        assert_eq!(lines[0]["values"]["train loss"], 2.0);
        assert!(lines[0]["values"]["valid acc"].is_null());
        assert_eq!(lines[1]["values"]["valid acc"], 0.5);
        Ok(())
    }
}
