//! # Breadcrumb Buffer
//!
//! A bounded ring of recent log records, dumped when an internal error
//! surfaces. Records are truncated to a byte cap BEFORE they enter the
//! buffer; a runaway payload in a log line must not become a runaway
//! allocation in the crash path.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded breadcrumb ring. Cheap to clone; clones share the ring.
#[derive(Clone)]
pub struct BreadcrumbBuffer {
    inner: std::sync::Arc<Mutex<Inner>>,
}

struct Inner {
    records: VecDeque<String>,
    capacity: usize,
    max_bytes: usize,
}

impl BreadcrumbBuffer {
    /// Ring holding `capacity` records of at most `max_bytes` each.
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                max_bytes: max_bytes.max(64),
            })),
        }
    }

    /// Append a record, truncating it to the byte cap first.
    pub fn push(&self, record: &str) {
        let mut inner = self.inner.lock();
        let truncated = if record.len() > inner.max_bytes {
            let mut cut = inner.max_bytes;
            // Do not split a UTF-8 sequence.
            while cut > 0 && !record.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}…[truncated {} bytes]", &record[..cut], record.len() - cut)
        } else {
            record.to_string()
        };
        if inner.records.len() == inner.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(truncated);
    }

    /// The current trail, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest() {
        let buffer = BreadcrumbBuffer::new(2, 1024);
        buffer.push("one");
        buffer.push("two");
        buffer.push("three");
        assert_eq!(buffer.snapshot(), vec!["two", "three"]);
    }

    #[test]
    fn records_are_truncated_before_buffering() {
        let buffer = BreadcrumbBuffer::new(4, 64);
        let big = "x".repeat(500);
        buffer.push(&big);
        let snapshot = buffer.snapshot();
        assert!(snapshot[0].starts_with(&"x".repeat(64)));
        assert!(snapshot[0].contains("truncated"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let buffer = BreadcrumbBuffer::new(1, 65);
        let mut record = "x".repeat(64);
        record.push('é'); // Two bytes, straddling the cap.
        buffer.push(&record);
        // Snapshot is valid UTF-8 by construction; reaching here is the
        // assertion (a split sequence would have panicked).
        assert!(buffer.snapshot()[0].contains("truncated"));
    }
}
