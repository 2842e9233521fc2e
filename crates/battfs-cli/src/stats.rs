use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use battfs::metrics::{FlashOp, FlashOpKind, MetricsSink, install_metrics_sink};

/// Counts device calls per kind for the `--stats` summary.
#[derive(Default)]
pub struct CountingSink {
    reads: AtomicU64,
    loads: AtomicU64,
    saves: AtomicU64,
    erases: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl MetricsSink for CountingSink {
    fn record_flash_op(&self, op: FlashOp) {
        let counter = match op.kind {
            FlashOpKind::Read => &self.reads,
            FlashOpKind::Load => &self.loads,
            FlashOpKind::Save => &self.saves,
            FlashOpKind::Erase => &self.erases,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(op.bytes as u64, Ordering::Relaxed);
        if op.error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl CountingSink {
    pub fn install() -> Arc<Self> {
        let sink = Arc::new(Self::default());
        if !install_metrics_sink(sink.clone()) {
            tracing::warn!("metrics sink already installed; stats will stay empty");
        }
        sink
    }

    pub fn summary(&self) -> String {
        format!(
            "reads={} loads={} saves={} erases={} bytes={} errors={}",
            self.reads.load(Ordering::Relaxed),
            self.loads.load(Ordering::Relaxed),
            self.saves.load(Ordering::Relaxed),
            self.erases.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}
