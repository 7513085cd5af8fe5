use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::types::Bar;

/// Bars read from a downloaded CSV file, yielded in timestamp order.
///
/// Columns: `symbol,timestamp,open,high,low,close,volume` with timestamps in
/// exchange-local ISO form (`2024-01-02T09:30:00`).
#[derive(Debug)]
pub struct CsvBarSource {
    bars: VecDeque<Bar>,
}

impl CsvBarSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open bar file {}", path.display()))?;

        let mut bars = Vec::new();
        for (row, record) in reader.deserialize::<Bar>().enumerate() {
            let bar = record.with_context(|| {
                format!("malformed bar on row {} of {}", row + 2, path.display())
            })?;
            bars.push(bar);
        }

        info!(path = %path.display(), bars = bars.len(), "bar file loaded");
        Ok(Self::from_bars(bars))
    }

    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        // Stable sort keeps file order for bars sharing a timestamp.
        bars.sort_by_key(|b| b.timestamp);
        Self { bars: bars.into() }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Distinct symbols in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for b in &self.bars {
            if !seen.contains(&b.symbol) {
                seen.push(b.symbol.clone());
            }
        }
        seen
    }
}

impl Iterator for CsvBarSource {
    type Item = Bar;

    fn next(&mut self) -> Option<Bar> {
        self.bars.pop_front()
    }
}

/// Write bars to `path` in the format `CsvBarSource::load` reads.
pub fn write_bars(path: impl AsRef<Path>, bars: &[Bar]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create bar file {}", path.display()))?;
    for bar in bars {
        writer.serialize(bar).context("failed to write bar row")?;
    }
    writer.flush().context("failed to flush bar file")?;
    info!(path = %path.display(), bars = bars.len(), "bar file written");
    Ok(())
}
