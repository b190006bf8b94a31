use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;

use crate::config::ValMetric;
use crate::error::Result;
use crate::loss::LossTerm;

/// Periodic in-epoch progress line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub epoch: usize,
    pub epochs: usize,
    pub iter: usize,
    pub iters: usize,
    pub terms: Vec<LossTerm>,
    /// Total loss of the current batch.
    pub loss: f64,
    /// Running average of the total loss this epoch.
    pub loss_avg: f64,
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch[{}/{}] Iter[{}/{}] Train Loss: ", self.epoch, self.epochs, self.iter, self.iters)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:.3}", term.name, term.value)?;
        }
        write!(f, ", Loss_total: {:.3} ({:.3})", self.loss, self.loss_avg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub epochs: usize,
    pub loss_avg: f64,
    pub lr: f64,
}

impl fmt::Display for EpochSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@==Final== Epoch[{}/{}]  Train Loss: {:.3}  lr: {:e}",
            self.epoch, self.epochs, self.loss_avg, self.lr
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    pub epoch: usize,
    pub testset: String,
    pub metric: ValMetric,
    pub value: f64,
    pub best_epoch: usize,
    pub best_value: f64,
}

impl fmt::Display for ValidationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Validation: {m} on {} for epoch-{} is {:.4}. Best epoch is epoch-{} with {m} {:.4}",
            self.testset,
            self.epoch,
            self.value,
            self.best_epoch,
            self.best_value,
            m = self.metric
        )
    }
}

/// Everything the engine writes to the run log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Info { message: String },
    Progress(ProgressRecord),
    EpochSummary(EpochSummary),
    Validation(ValidationRecord),
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::Info { message } => f.write_str(message),
            RunEvent::Progress(r) => write!(f, "{}", r),
            RunEvent::EpochSummary(r) => write!(f, "{}", r),
            RunEvent::Validation(r) => write!(f, "{}", r),
        }
    }
}

/// Destination of run-log events.
pub trait RunSink {
    fn emit(&mut self, event: RunEvent) -> Result<()>;

    fn info(&mut self, message: &str) -> Result<()> {
        self.emit(RunEvent::Info { message: message.to_string() })
    }
}

/// Appends one line per event to `<dir>/log.txt` and mirrors it to the
/// console logger.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn open(dir: &Path) -> Result<FileSink> {
        fs::create_dir_all(dir)?;
        let path = dir.join("log.txt");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileSink { path, writer: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunSink for FileSink {
    fn emit(&mut self, event: RunEvent) -> Result<()> {
        let line = event.to_string();
        log::info!("{}", line);
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<RunEvent>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events.borrow().iter().map(ToString::to_string).collect()
    }
}

impl RunSink for MemorySink {
    fn emit(&mut self, event: RunEvent) -> Result<()> {
        log::debug!("{}", event);
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::TermName;

    #[test]
    fn progress_line_lists_terms_in_order() {
        let record = ProgressRecord {
            epoch: 2,
            epochs: 30,
            iter: 40,
            iters: 100,
            terms: vec![
                LossTerm { name: TermName::Sal, weight: 1.0, value: 0.51234 },
                LossTerm { name: TermName::Cls, weight: 3.0, value: 2.0 },
            ],
            loss: 2.51234,
            loss_avg: 2.7,
        };
        assert_eq!(
            record.to_string(),
            "Epoch[2/30] Iter[40/100] Train Loss: loss_sal: 0.512, loss_cls: 2.000, Loss_total: 2.512 (2.700)"
        );
    }

    #[test]
    fn validation_line_names_metric_and_best_epoch() {
        let record = ValidationRecord {
            epoch: 4,
            testset: "CoCA".into(),
            metric: ValMetric::SMeasure,
            value: 0.61,
            best_epoch: 2,
            best_value: 0.65,
        };
        assert_eq!(
            record.to_string(),
            "Validation: S_measure on CoCA for epoch-4 is 0.6100. Best epoch is epoch-2 with S_measure 0.6500"
        );
    }

    #[test]
    fn file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = FileSink::open(dir.path()).unwrap();
            sink.info("first").unwrap();
        }
        let mut sink = FileSink::open(dir.path()).unwrap();
        sink.info("second").unwrap();
        let text = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
