use buslog::builder::ContainerBuilder;
use buslog::container::CompressedContainer;
use buslog::io::OrderedWriter;
use buslog::pool::{Completion, compress_container};
use buslog::{BuslogError, Event, LogInspector, LogReader, NoCompression};

/// Builds `count` compressed containers of one event each.
fn containers(count: u64) -> Vec<CompressedContainer> {
    let mut builder = ContainerBuilder::new(1, 0);
    (0..count)
        .map(|seq| {
            let sealed = builder
                .append(&Event::new(seq, seq * 10, vec![seq as u8; 4]))
                .expect("threshold of one byte seals every event");
            match compress_container(sealed, &NoCompression) {
                Completion::Done(c) => c,
                Completion::Failed { error, .. } => panic!("compression failed: {error}"),
            }
        })
        .collect()
}

#[test]
fn test_out_of_order_arrivals_are_written_in_order() -> buslog::Result<()> {
    let mut writer = OrderedWriter::new(Vec::new());
    let mut batch = containers(5);
    let c4 = batch.pop().expect("five");
    let c3 = batch.pop().expect("four");
    let c2 = batch.pop().expect("three");
    let c1 = batch.pop().expect("two");
    let c0 = batch.pop().expect("one");

    assert_eq!(writer.accept(c2)?, 0);
    assert_eq!(writer.accept(c4)?, 0);
    assert_eq!(writer.pending_len(), 2);
    assert_eq!(writer.next_expected(), 0);

    writer.accept(c1)?;
    assert_eq!(writer.next_expected(), 0);

    // Releases 0, 1 and 2.
    let written = writer.accept(c0)?;
    assert!(written > 0);
    assert_eq!(writer.next_expected(), 3);
    assert_eq!(writer.pending_len(), 1);

    writer.accept(c3)?;
    assert_eq!(writer.next_expected(), 5);
    assert_eq!(writer.pending_len(), 0);

    let (bytes, stats) = writer.finish(5)?;
    assert_eq!(stats.container_count, 5);
    assert_eq!(stats.event_count, 5);

    let reader = LogReader::from_bytes(bytes)?;
    assert!(reader.is_complete());
    let seqs: Vec<u64> = reader.containers().map(|c| c.header().container_sequence).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    let timestamps: Vec<u64> = reader.events()?.iter().map(Event::timestamp).collect();
    assert_eq!(timestamps, vec![0, 10, 20, 30, 40]);
    Ok(())
}

#[test]
fn test_duplicate_sequence_is_an_internal_error() -> buslog::Result<()> {
    let mut writer = OrderedWriter::new(Vec::new());
    let mut first = containers(3);
    let mut second = containers(3);

    // Parked twice.
    writer.accept(first.remove(2))?;
    let err = writer.accept(second.remove(2)).unwrap_err();
    assert!(matches!(err, BuslogError::Internal(_)));

    // Already written.
    writer.accept(first.remove(0))?;
    let err = writer.accept(second.remove(0)).unwrap_err();
    assert!(matches!(err, BuslogError::Internal(_)));
    Ok(())
}

#[test]
fn test_finish_with_a_gap_reports_drain_incomplete() -> buslog::Result<()> {
    let mut writer = OrderedWriter::new(Vec::new());
    let mut batch = containers(3);
    writer.accept(batch.remove(2))?;
    writer.accept(batch.remove(0))?;

    match writer.finish(3) {
        Err(BuslogError::DrainIncomplete {
            written,
            sealed,
            pending,
        }) => {
            assert_eq!(written, 1);
            assert_eq!(sealed, 3);
            assert_eq!(pending, 1);
        }
        other => panic!("expected DrainIncomplete, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_truncated_footer_drops_parked_containers() -> buslog::Result<()> {
    let mut writer = OrderedWriter::new(Vec::new());
    let mut batch = containers(3);
    writer.accept(batch.remove(0))?;
    writer.accept(batch.remove(1))?;

    let (bytes, stats) = writer.finish_truncated()?;
    assert_eq!(stats.container_count, 1);

    let report = LogInspector::inspect_bytes(bytes.clone())?;
    assert!(report.truncated);
    assert!(!report.complete);
    assert_eq!(report.event_count, 1);
    assert!(report.to_string().contains("truncated"));

    let reader = LogReader::from_bytes(bytes)?;
    assert!(reader.is_truncated());
    assert!(!reader.is_complete());
    assert_eq!(reader.container_count(), 1);
    Ok(())
}

#[test]
fn test_empty_output_gets_only_a_footer() -> buslog::Result<()> {
    let writer = OrderedWriter::new(Vec::new());
    let (bytes, stats) = writer.finish(0)?;
    assert_eq!(bytes.len(), buslog::format::FOOTER_SIZE);
    assert_eq!(stats, buslog::FileStats::default());

    let reader = LogReader::from_bytes(bytes)?;
    assert!(reader.is_complete());
    assert!(reader.events()?.is_empty());
    Ok(())
}
