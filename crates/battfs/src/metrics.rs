use std::sync::{Arc, OnceLock};

use crate::PageId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashOpKind {
    Read,
    Load,
    Save,
    Erase,
}

#[derive(Copy, Clone, Debug)]
pub struct FlashOp {
    pub page: PageId,
    pub kind: FlashOpKind,
    pub bytes: usize,
    pub error: bool,
}

pub trait MetricsSink: Send + Sync + 'static {
    fn record_flash_op(&self, op: FlashOp);
}

static METRICS_SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

pub fn install_metrics_sink(sink: Arc<dyn MetricsSink>) -> bool {
    METRICS_SINK.set(sink).is_ok()
}

pub fn is_enabled() -> bool {
    METRICS_SINK.get().is_some()
}

pub fn record_flash_op(op: FlashOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_flash_op(op);
    }
}

pub(crate) fn record<T, E>(
    page: PageId,
    kind: FlashOpKind,
    bytes: usize,
    res: &std::result::Result<T, E>,
) {
    if is_enabled() {
        record_flash_op(FlashOp {
            page,
            kind,
            bytes,
            error: res.is_err(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Other tests drive real devices while this sink is installed, so only ops on this
    // page number are inspected.
    const MARKER_PAGE: PageId = 0xBEEF;

    struct TestSink {
        ops: Mutex<Vec<FlashOp>>,
    }

    impl MetricsSink for TestSink {
        fn record_flash_op(&self, op: FlashOp) {
            if op.page == MARKER_PAGE {
                self.ops.lock().unwrap().push(op);
            }
        }
    }

    #[test]
    fn metrics_sink_records_ops_when_enabled() {
        let sink = Arc::new(TestSink {
            ops: Mutex::new(Vec::new()),
        });

        assert!(install_metrics_sink(sink.clone()));
        assert!(is_enabled());

        record_flash_op(FlashOp {
            page: MARKER_PAGE,
            kind: FlashOpKind::Save,
            bytes: 128,
            error: false,
        });
        let failed: std::result::Result<(), ()> = Err(());
        record(MARKER_PAGE, FlashOpKind::Erase, 128, &failed);

        let ops = sink.ops.lock().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, FlashOpKind::Save);
        assert_eq!(ops[0].bytes, 128);
        assert!(!ops[0].error);
        assert_eq!(ops[1].kind, FlashOpKind::Erase);
        assert!(ops[1].error);
    }
}
