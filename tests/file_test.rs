use buslog::{
    BuslogError, Compressor, CompressorRegistry, Event, LogFile, LogInspector, LogReader,
    NoCompression, OpenMode, Result,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CanMessage {
    channel: u16,
    id: u32,
    dlc: u8,
    data: [u8; 8],
}

/// Passes data through unchanged but refuses any container holding the
/// marker, standing in for a codec that fails mid-file.
#[derive(Debug)]
struct PoisonedCompressor;

impl Compressor for PoisonedCompressor {
    fn id(&self) -> u8 {
        7
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if data.windows(6).any(|w| w == b"POISON") {
            return Err(BuslogError::Compression("poisoned container".into()));
        }
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

/// Holds every `compress` call until the gate's sender is dropped, then
/// behaves like [`PoisonedCompressor`].
#[derive(Debug)]
struct GatedCompressor {
    gate: Mutex<Receiver<()>>,
}

impl GatedCompressor {
    fn new() -> (Sender<()>, Self) {
        let (open, gate) = mpsc::channel();
        (
            open,
            Self {
                gate: Mutex::new(gate),
            },
        )
    }
}

impl Compressor for GatedCompressor {
    fn id(&self) -> u8 {
        6
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        // Returns once the sender is gone.
        let _ = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        PoisonedCompressor.compress(data)
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

/// A pipeline that stalls as soon as the first container is sealed: the only
/// worker waits on the gate and the in-flight window admits one container.
fn stalled_file(path: &std::path::Path) -> Result<(Sender<()>, LogFile)> {
    let (open, compressor) = GatedCompressor::new();
    let file = LogFile::builder()
        .queue_size(2)
        .log_container_size(4)
        .uncompressed_buffer_size(4)
        .compression_threads(1)
        .compressor(compressor)
        .open(path, OpenMode::Truncate)?;
    Ok((open, file))
}

fn payload(i: u64) -> Vec<u8> {
    format!("frame-{i:06}").into_bytes()
}

#[test]
fn test_round_trip_preserves_submission_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("trace.blog");

    let file = LogFile::builder()
        .log_container_size(256)
        .compression_threads(3)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..500u64 {
        assert_eq!(file.write(i * 100, payload(i))?, i);
    }
    let summary = file.close()?;
    assert_eq!(summary.stats.event_count, 500);
    assert!(summary.stats.container_count > 1);
    assert_eq!(summary.stats.first_timestamp, 0);
    assert_eq!(summary.stats.last_timestamp, 49_900);
    assert!(!summary.truncated);

    let reader = LogReader::open(&path)?;
    assert!(reader.is_complete());
    assert_eq!(reader.file_size(), summary.file_size);
    assert_eq!(reader.footer().map(|f| f.stats), Some(summary.stats));

    let events = reader.events()?;
    assert_eq!(events.len(), 500);
    for (i, event) in events.iter().enumerate() {
        let i = i as u64;
        assert_eq!(event.sequence_number(), i);
        assert_eq!(event.timestamp(), i * 100);
        assert_eq!(event.payload(), payload(i).as_slice());
    }
    Ok(())
}

#[test]
fn test_small_queue_scenario_yields_two_containers() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("scenario.blog");

    let file = LogFile::builder()
        .queue_size(4)
        .log_container_size(64)
        .compression_threads(2)
        .open(&path, OpenMode::Truncate)?;
    // 3 varint bytes of framing + 7 payload bytes = 10 bytes per event.
    for i in 0..10u64 {
        file.write(i, vec![i as u8; 7])?;
    }
    let summary = file.close()?;
    assert_eq!(summary.stats.container_count, 2);
    assert_eq!(summary.stats.event_count, 10);

    let reader = LogReader::open(&path)?;
    let counts: Vec<u32> = reader.containers().map(|c| c.header().event_count).collect();
    assert_eq!(counts, vec![7, 3]);
    let seqs: Vec<u64> = reader.events()?.iter().map(Event::sequence_number).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_zero_events_produce_a_footer_only_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("empty.blog");

    let summary = LogFile::open(&path, OpenMode::Truncate)?.close()?;
    assert_eq!(summary.stats.container_count, 0);
    assert_eq!(summary.stats.event_count, 0);
    assert_eq!(summary.file_size, buslog::format::FOOTER_SIZE as u64);

    let reader = LogReader::open(&path)?;
    assert!(reader.is_complete());
    assert_eq!(reader.container_count(), 0);
    assert!(reader.events()?.is_empty());
    Ok(())
}

#[test]
fn test_concurrent_producers_keep_their_own_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("concurrent.blog");

    let file = Arc::new(
        LogFile::builder()
            .queue_size(16)
            .log_container_size(512)
            .compression_threads(4)
            .open(&path, OpenMode::Truncate)?,
    );

    let producers: Vec<_> = (0..2u8)
        .map(|producer| {
            let file = Arc::clone(&file);
            thread::spawn(move || -> Result<()> {
                for i in 0..1000u32 {
                    let mut bytes = vec![producer];
                    bytes.extend_from_slice(&i.to_le_bytes());
                    file.write(u64::from(i), bytes)?;
                }
                Ok(())
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked")?;
    }
    let summary = file.close()?;
    assert_eq!(summary.stats.event_count, 2000);

    let events = LogReader::open(&path)?.events()?;
    assert_eq!(events.len(), 2000);
    let seqs: Vec<u64> = events.iter().map(Event::sequence_number).collect();
    assert_eq!(seqs, (0..2000).collect::<Vec<_>>());

    for producer in 0..2u8 {
        let own: Vec<u32> = events
            .iter()
            .filter(|e| e.payload()[0] == producer)
            .map(|e| u32::from_le_bytes(e.payload()[1..5].try_into().expect("4 bytes")))
            .collect();
        assert_eq!(own, (0..1000).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn test_output_does_not_depend_on_thread_count() -> Result<()> {
    let dir = TempDir::new()?;
    let write_with = |threads: usize, name: &str| -> Result<Vec<u8>> {
        let path = dir.path().join(name);
        let file = LogFile::builder()
            .log_container_size(1024)
            .compression_threads(threads)
            .open(&path, OpenMode::Truncate)?;
        for i in 0..5_000u64 {
            file.write(i, payload(i % 97))?;
        }
        file.close()?;
        Ok(std::fs::read(&path)?)
    };

    let single = write_with(1, "single.blog")?;
    let parallel = write_with(4, "parallel.blog")?;
    assert_eq!(single, parallel);
    Ok(())
}

#[test]
fn test_compression_failure_is_fatal_and_leaves_a_prefix() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("poisoned.blog");

    // One event per container, one worker: containers complete in order.
    let file = LogFile::builder()
        .log_container_size(8)
        .compression_threads(1)
        .compressor(PoisonedCompressor)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..5u64 {
        file.write(i, payload(i))?;
    }
    file.flush()?;

    file.write(5, b"POISON".to_vec())?;
    let flushed = file.flush();
    assert!(matches!(flushed, Err(BuslogError::Compression(_))));

    let err = file.write(6, payload(6)).unwrap_err();
    assert!(matches!(err, BuslogError::Compression(_)));
    let err = file.close().unwrap_err();
    assert!(matches!(err, BuslogError::Compression(_)));

    let mut registry = CompressorRegistry::new();
    registry.register(Arc::new(PoisonedCompressor))?;
    let reader = LogReader::open_with_registry(&path, registry)?;
    assert!(reader.footer().is_none());
    assert!(!reader.is_complete());
    assert_eq!(reader.container_count(), 5);
    let timestamps: Vec<u64> = reader.events()?.iter().map(Event::timestamp).collect();
    assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_write_blocks_while_the_pipeline_is_stalled() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("stalled.blog");
    let (open, file) = stalled_file(&path)?;
    let file = Arc::new(file);

    let producer = {
        let file = Arc::clone(&file);
        thread::spawn(move || -> Result<()> {
            for i in 0..10u64 {
                file.write(i, payload(i))?;
            }
            Ok(())
        })
    };

    thread::sleep(Duration::from_millis(200));
    assert!(!producer.is_finished(), "write must block on a full queue");

    drop(open);
    producer.join().expect("producer panicked")?;
    let summary = file.close()?;
    assert_eq!(summary.stats.event_count, 10);

    let mut registry = CompressorRegistry::new();
    registry.register(Arc::new(GatedCompressor::new().1))?;
    let events = LogReader::open_with_registry(&path, registry)?.events()?;
    let seqs: Vec<u64> = events.iter().map(Event::sequence_number).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_blocked_writer_wakes_with_the_pipeline_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("blocked.blog");
    let (open, file) = stalled_file(&path)?;
    let file = Arc::new(file);

    let producer = {
        let file = Arc::clone(&file);
        thread::spawn(move || -> Result<()> {
            file.write(0, b"POISON".to_vec())?;
            for i in 1..100u64 {
                file.write(i, payload(i))?;
            }
            Ok(())
        })
    };

    thread::sleep(Duration::from_millis(200));
    assert!(!producer.is_finished(), "write must block on a full queue");

    // The first container fails as soon as the worker is released.
    drop(open);
    let err = producer
        .join()
        .expect("producer panicked")
        .expect_err("blocked write must report the failure");
    assert!(matches!(err, BuslogError::Compression(_)));
    assert!(err.is_fatal());

    let err = file.close().unwrap_err();
    assert!(matches!(err, BuslogError::Compression(_)));
    Ok(())
}

#[test]
fn test_failure_with_parallel_workers_leaves_a_gap_free_prefix() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("parallel-poison.blog");

    let file = LogFile::builder()
        .log_container_size(8)
        .compression_threads(4)
        .compressor(PoisonedCompressor)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..200u64 {
        file.write(i, payload(i))?;
    }
    file.write(200, b"POISON".to_vec())?;
    for i in 201..400u64 {
        if file.write(i, payload(i)).is_err() {
            break;
        }
    }
    let err = file.close().unwrap_err();
    assert!(matches!(err, BuslogError::Compression(_)));

    let mut registry = CompressorRegistry::new();
    registry.register(Arc::new(PoisonedCompressor))?;
    let reader = LogReader::open_with_registry(&path, registry.clone())?;
    assert!(reader.footer().is_none());
    assert!(reader.container_count() <= 200);
    let seqs: Vec<u64> = reader
        .containers()
        .map(|c| c.header().container_sequence)
        .collect();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
    let events = reader.events()?;
    assert!(events.iter().all(|e| e.payload() != b"POISON"));

    let report = LogInspector::inspect_with_registry(&path, registry)?;
    assert!(!report.complete);
    assert_eq!(report.containers.len(), reader.container_count());
    assert!(report.to_string().contains("unfinished"));
    Ok(())
}

#[test]
fn test_operations_after_close_report_closed() -> Result<()> {
    let dir = TempDir::new()?;
    let file = LogFile::open(dir.path().join("closed.blog"), OpenMode::Truncate)?;
    file.write(1, vec![1])?;
    file.close()?;

    assert!(matches!(file.write(2, vec![2]), Err(BuslogError::Closed)));
    assert!(matches!(file.flush(), Err(BuslogError::Closed)));
    assert!(matches!(file.close(), Err(BuslogError::Closed)));
    assert!(matches!(file.abort(), Err(BuslogError::Closed)));
    Ok(())
}

#[test]
fn test_flush_makes_events_readable_before_close() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("flushed.blog");

    let file = LogFile::builder()
        .log_container_size(64 * 1024)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..10u64 {
        file.write(i, payload(i))?;
    }
    file.flush()?;

    let reader = LogReader::from_bytes(std::fs::read(&path)?)?;
    assert!(reader.footer().is_none());
    assert_eq!(reader.container_count(), 1);
    assert_eq!(reader.events()?.len(), 10);

    file.write(10, payload(10))?;
    let summary = file.close()?;
    assert_eq!(summary.stats.container_count, 2);
    assert_eq!(summary.stats.event_count, 11);
    Ok(())
}

#[test]
fn test_flush_with_nothing_buffered_returns() -> Result<()> {
    let dir = TempDir::new()?;
    let file = LogFile::open(dir.path().join("idle.blog"), OpenMode::Truncate)?;
    file.flush()?;
    file.flush()?;
    assert_eq!(file.close()?.stats.container_count, 0);
    Ok(())
}

#[test]
fn test_append_continues_sequences() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("append.blog");

    // Every event seals its own container.
    let first = LogFile::builder()
        .log_container_size(8)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..3u64 {
        first.write(i, payload(i))?;
    }
    let before = first.close()?;

    let second = LogFile::builder()
        .log_container_size(8)
        .open(&path, OpenMode::Append)?;
    assert_eq!(second.events_submitted(), 3);
    for i in 3..5u64 {
        assert_eq!(second.write(i, payload(i))?, i);
    }
    let after = second.close()?;
    assert_eq!(after.stats.event_count, 5);
    assert_eq!(
        after.stats.container_count,
        before.stats.container_count + 2
    );

    let reader = LogReader::open(&path)?;
    assert!(reader.is_complete());
    let seqs: Vec<u64> = reader.events()?.iter().map(Event::sequence_number).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_append_to_missing_file_creates_it() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("fresh.blog");

    let file = LogFile::open(&path, OpenMode::Append)?;
    file.write(7, payload(7))?;
    file.close()?;

    assert_eq!(LogReader::open(&path)?.events()?.len(), 1);
    Ok(())
}

#[test]
fn test_abort_marks_the_file_truncated() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("aborted.blog");

    let file = LogFile::builder()
        .log_container_size(128)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..1000u64 {
        file.write(i, payload(i))?;
    }
    let summary = file.abort()?;
    assert!(summary.truncated);
    assert!(matches!(file.write(0, vec![0]), Err(BuslogError::Closed)));

    let reader = LogReader::open(&path)?;
    assert!(reader.is_truncated());
    assert!(!reader.is_complete());
    assert_eq!(reader.stats(), summary.stats);
    assert_eq!(reader.events()?.len() as u64, summary.stats.event_count);

    let reopened = LogFile::open(&path, OpenMode::Append);
    assert!(matches!(reopened, Err(BuslogError::Format(_))));
    Ok(())
}

#[test]
fn test_append_rejects_unfinished_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("garbage.blog");
    std::fs::write(&path, vec![0x42; 200])?;

    let result = LogFile::open(&path, OpenMode::Append);
    assert!(matches!(result, Err(BuslogError::Format(_))));
    Ok(())
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let cases = [
        LogFile::builder().queue_size(0).config(),
        LogFile::builder().log_container_size(0).config(),
        LogFile::builder().compression_threads(0).config(),
    ];
    for case in cases {
        let err = case.unwrap_err();
        assert!(matches!(err, BuslogError::Config(_)));
        assert!(!err.is_fatal());
    }

    #[derive(Debug)]
    struct OutOfRange;
    impl Compressor for OutOfRange {
        fn id(&self) -> u8 {
            9
        }
        fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
            Ok(Cow::Borrowed(data))
        }
        fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
            Ok(Cow::Borrowed(data))
        }
    }
    let result = LogFile::builder().compressor(OutOfRange).config();
    assert!(matches!(result, Err(BuslogError::Config(_))));
}

#[test]
fn test_buffer_size_is_raised_to_container_size() -> Result<()> {
    let config = LogFile::builder()
        .log_container_size(4096)
        .uncompressed_buffer_size(10)
        .config()?;
    assert_eq!(config.uncompressed_buffer_size(), 4096);
    Ok(())
}

#[test]
fn test_open_in_missing_directory_is_an_io_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("no/such/dir/trace.blog");
    let result = LogFile::open(path, OpenMode::Truncate);
    assert!(matches!(result, Err(BuslogError::Io(_))));
    Ok(())
}

#[test]
fn test_oversized_event_gets_its_own_container() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("oversized.blog");

    let file = LogFile::builder()
        .log_container_size(1024)
        .uncompressed_buffer_size(1024)
        .open(&path, OpenMode::Truncate)?;
    file.write(0, vec![1; 10])?;
    file.write(1, vec![2; 64 * 1024])?;
    file.write(2, vec![3; 10])?;
    file.close()?;

    let reader = LogReader::open(&path)?;
    let events = reader.events()?;
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].payload().len(), 64 * 1024);
    assert!(
        reader
            .containers()
            .any(|c| c.header().uncompressed_size > 64 * 1024)
    );
    Ok(())
}

#[test]
fn test_uncompressed_files_store_raw_frames() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("raw.blog");

    let file = LogFile::builder()
        .compression(false)
        .open(&path, OpenMode::Truncate)?;
    file.write(1, b"raw-frame".to_vec())?;
    file.close()?;

    let reader = LogReader::open(&path)?;
    let record = reader.containers().next().expect("one container");
    assert_eq!(record.header().meta.compression_method(), NoCompression.id());
    assert_eq!(
        record.header().compressed_size,
        record.header().uncompressed_size
    );
    Ok(())
}

#[test]
fn test_write_serialized_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("can.blog");

    let frames: Vec<CanMessage> = (0..64u32)
        .map(|i| CanMessage {
            channel: (i % 2) as u16,
            id: 0x100 + i,
            dlc: 8,
            data: [i as u8; 8],
        })
        .collect();

    let file = LogFile::open(&path, OpenMode::Truncate)?;
    for (ts, frame) in frames.iter().enumerate() {
        file.write_serialized(ts as u64, frame)?;
    }
    file.close()?;

    let decoded: Vec<CanMessage> = LogReader::open(&path)?
        .events()?
        .iter()
        .map(Event::decode_payload)
        .collect::<Result<_>>()?;
    assert_eq!(decoded, frames);
    Ok(())
}

#[test]
fn test_drop_closes_the_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("dropped.blog");
    {
        let file = LogFile::open(&path, OpenMode::Truncate)?;
        file.write(1, payload(1))?;
    }

    let reader = LogReader::open(&path)?;
    assert!(reader.is_complete());
    assert_eq!(reader.events()?.len(), 1);
    Ok(())
}

#[test]
fn test_inspector_report() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("inspect.blog");

    let file = LogFile::builder()
        .log_container_size(128)
        .open(&path, OpenMode::Truncate)?;
    for i in 0..100u64 {
        file.write(i, payload(i))?;
    }
    let summary = file.close()?;

    let report = LogInspector::inspect(&path)?;
    assert!(report.complete);
    assert!(!report.truncated);
    assert_eq!(report.file_size, summary.file_size);
    assert_eq!(report.event_count, 100);
    assert_eq!(report.containers.len() as u64, summary.stats.container_count);
    assert!(
        report
            .containers
            .iter()
            .enumerate()
            .all(|(i, c)| c.sequence == i as u64)
    );

    let text = report.to_string();
    assert!(text.contains("BUSLOG INSPECTOR REPORT"));
    assert!(text.contains("complete"));
    Ok(())
}

#[test]
fn test_reader_rejects_corrupted_footer() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("corrupt.blog");

    let file = LogFile::open(&path, OpenMode::Truncate)?;
    file.write(1, payload(1))?;
    file.close()?;

    let mut bytes = std::fs::read(&path)?;
    let last = bytes.len() - 10;
    bytes[last] ^= 0xFF;
    let result = LogReader::from_bytes(bytes);
    assert!(matches!(result, Err(BuslogError::Format(_))));
    Ok(())
}
