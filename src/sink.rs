use std::io::Write;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::model::snapshot::{SnapshotRecord, WindowSnapshot};

/// Receiver of engine output. Implementations must not block indefinitely.
pub trait Sink {
    fn emit(&mut self, snapshots: &[WindowSnapshot]) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Console,
    Jsonl,
}

/// Renders each emitted batch as a text table.
pub struct ConsoleSink<W: Write> {
    out: W,
    max_rows: usize,
    batch: u64,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, max_rows: usize) -> Self {
        Self {
            out,
            max_rows: max_rows.max(1),
            batch: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

const HEADERS: [&str; 5] = ["window", "symbol", "avg_price", "volume", "msg_count"];

fn table_row(record: &SnapshotRecord) -> [String; 5] {
    [
        format!(
            "{{{}, {}}}",
            record.window_start.format("%Y-%m-%d %H:%M:%S"),
            record.window_end.format("%Y-%m-%d %H:%M:%S")
        ),
        record.symbol.clone(),
        format!("{:.2}", record.avg_price),
        record.volume.to_string(),
        record.msg_count.to_string(),
    ]
}

impl<W: Write> Sink for ConsoleSink<W> {
    fn emit(&mut self, snapshots: &[WindowSnapshot]) -> Result<(), PipelineError> {
        let rows: Vec<[String; 5]> = snapshots
            .iter()
            .take(self.max_rows)
            .map(|s| table_row(&s.to_record()))
            .collect();

        let mut widths = HEADERS.map(str::len);
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row.iter()) {
                *w = (*w).max(cell.len());
            }
        }
        let border: String = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("+");

        writeln!(self.out, "-------------------------------------------")?;
        writeln!(self.out, "Batch: {}", self.batch)?;
        writeln!(self.out, "-------------------------------------------")?;
        writeln!(self.out, "+{}+", border)?;
        let header: Vec<String> = HEADERS
            .iter()
            .zip(widths.iter())
            .map(|(h, w)| format!("{:<w$}", h, w = *w))
            .collect();
        writeln!(self.out, "|{}|", header.join("|"))?;
        writeln!(self.out, "+{}+", border)?;
        for row in &rows {
            let cells: Vec<String> = row
                .iter()
                .zip(widths.iter())
                .map(|(c, w)| format!("{:<w$}", c, w = *w))
                .collect();
            writeln!(self.out, "|{}|", cells.join("|"))?;
        }
        writeln!(self.out, "+{}+", border)?;
        if snapshots.len() > self.max_rows {
            writeln!(self.out, "only showing top {} rows", self.max_rows)?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        self.batch += 1;
        Ok(())
    }
}

/// One JSON `SnapshotRecord` per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for JsonLinesSink<W> {
    fn emit(&mut self, snapshots: &[WindowSnapshot]) -> Result<(), PipelineError> {
        for snapshot in snapshots {
            serde_json::to_writer(&mut self.out, &snapshot.to_record())?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Bounded hand-off to another task. When the buffer is full the newest
/// snapshot is dropped and counted, so the engine never waits on a consumer.
pub struct ChannelSink {
    tx: mpsc::Sender<WindowSnapshot>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<WindowSnapshot>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Sink for ChannelSink {
    fn emit(&mut self, snapshots: &[WindowSnapshot]) -> Result<(), PipelineError> {
        for snapshot in snapshots {
            if self.tx.try_send(snapshot.clone()).is_err() {
                self.dropped += 1;
                tracing::warn!(
                    symbol = %snapshot.symbol,
                    dropped = self.dropped,
                    "Snapshot channel full, dropping snapshot"
                );
            }
        }
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn emit(&mut self, snapshots: &[WindowSnapshot]) -> Result<(), PipelineError> {
        (**self).emit(snapshots)
    }
}
