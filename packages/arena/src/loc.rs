use std::sync::atomic::{AtomicU32, Ordering};

/// Last-diagnostic-position record
///
/// A process-wide `(file, line, column)` triple guarded by a seqlock: the
/// writer bumps the version to odd, stores the fields, then bumps it to
/// even. Readers retry on a torn read and give up after a bounded number of
/// attempts. The record is advisory only and never influences semantics.
static VERSION: AtomicU32 = AtomicU32::new(0);
static FILE: AtomicU32 = AtomicU32::new(0);
static LINE: AtomicU32 = AtomicU32::new(0);
static COL: AtomicU32 = AtomicU32::new(0);

const READ_RETRIES: usize = 64;

/// Record the position of the token currently being processed
pub fn record(file: u16, line: u32, col: u32) {
    VERSION.fetch_add(1, Ordering::Release);
    FILE.store(file as u32, Ordering::Relaxed);
    LINE.store(line, Ordering::Relaxed);
    COL.store(col, Ordering::Relaxed);
    VERSION.fetch_add(1, Ordering::Release);
}

/// Read the last recorded position. None if the record was never written
/// or every retry hit a concurrent write.
pub fn last() -> Option<(u16, u32, u32)> {
    for _ in 0..READ_RETRIES {
        let v1 = VERSION.load(Ordering::Acquire);
        if v1 == 0 {
            return None;
        }
        if v1 % 2 != 0 {
            continue;
        }
        let file = FILE.load(Ordering::Relaxed);
        let line = LINE.load(Ordering::Relaxed);
        let col = COL.load(Ordering::Relaxed);
        let v2 = VERSION.load(Ordering::Acquire);
        if v1 == v2 {
            return Some((file as u16, line, col));
        }
    }
    None
}

/// Format the last position for an error message
pub fn format_last() -> String {
    match last() {
        Some((_, line, col)) => format!("{line}:{col}"),
        None => "<unknown>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read() {
        record(1, 10, 4);
        assert_eq!(last(), Some((1, 10, 4)));
        record(1, 11, 1);
        assert_eq!(last(), Some((1, 11, 1)));
        assert_eq!(format_last(), "11:1");
    }
}
