use std::{
    io::{BufRead, ErrorKind, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub use anyhow::Result;
use anyhow::anyhow;
use log::{debug, info, warn};

use crate::{
    calibration::CalibrationEngine,
    command::Command,
    core::time::SystemClock,
    parameters::{BellframeParams, CalibrationParams},
    pipeline::{DataPipeline, RawFrame},
    telemetry::{MessageSink, MessageStream, StreamError, sink},
    transport::parse_line,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub frames: u64,
    pub rejected: u64,
}

/// Reads text frames from a serial port or a replay file and feeds them to
/// the pipeline.
pub struct FrameReader<R> {
    reader: R,
    line: Vec<u8>,
    pace: bool,
    stats: ReadStats,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            pace: false,
            stats: ReadStats::default(),
        }
    }

    /// Deliver frames at the rate given by their timestamps (for replays)
    pub fn paced(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    /// Blocks until end of input or until `stop` is set. Read timeouts only
    /// re-check the stop flag. Bytes that are not valid UTF-8 are dropped from
    /// the line before parsing.
    pub fn run(&mut self, pipeline: &mut DataPipeline, stop: &AtomicBool) -> Result<ReadStats> {
        let mut origin: Option<(Instant, u64)> = None;

        while !stop.load(Ordering::Relaxed) {
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    info!("End of input");
                    break;
                }
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            // A read timeout keeps the partial line, so `line` is complete here
            let bytes = std::mem::take(&mut self.line);
            let line: String = String::from_utf8_lossy(&bytes)
                .chars()
                .filter(|c| *c != char::REPLACEMENT_CHARACTER)
                .collect();
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line) {
                Ok(frame) => {
                    if self.pace {
                        wait_for_frame(&mut origin, &frame);
                    }

                    if pipeline.ingest(&frame).is_some() {
                        self.stats.frames += 1;
                    } else {
                        self.stats.rejected += 1;
                    }
                }
                Err(e) => {
                    debug!("Rejected frame '{}': {e}", line.trim());
                    pipeline.record_rejected_packet();
                    self.stats.rejected += 1;
                }
            }
        }

        Ok(self.stats)
    }
}

fn wait_for_frame(origin: &mut Option<(Instant, u64)>, frame: &RawFrame) {
    let (start, first_ms) = *origin.get_or_insert((Instant::now(), frame.timestamp_ms));

    let offset = Duration::from_millis(frame.timestamp_ms.saturating_sub(first_ms));
    let due = start + offset;

    let now = Instant::now();
    if due > now {
        thread::sleep(due - now);
    }
}

/// Parses one command line and runs it. Failures are logged and reported on
/// the output stream, never propagated.
pub fn handle_command_line(
    line: &str,
    engine: &CalibrationEngine,
    params: &CalibrationParams,
    sink: &MessageSink,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let result = serde_json::from_str::<Command>(line)
        .map_err(|e| anyhow!("Invalid command '{line}': {e}"))
        .and_then(|cmd| {
            debug!("Command: {cmd:?}");
            cmd.execute(engine, params).map_err(anyhow::Error::from)
        });

    if let Err(e) = result {
        warn!("{e}");
        sink.text(format!("command_rejected: {e}"));
    }
}

/// Reads commands until `input` ends. The thread is detached: a blocked
/// stdin read must not keep the process alive.
pub fn spawn_command_reader(
    input: impl BufRead + Send + 'static,
    engine: CalibrationEngine,
    params: CalibrationParams,
    sink: MessageSink,
) -> Result<()> {
    thread::Builder::new()
        .name("commands".to_string())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => handle_command_line(&line, &engine, &params, &sink),
                    Err(e) => {
                        warn!("Error reading commands: {e}");
                        break;
                    }
                }
            }
            debug!("Command input closed");
        })?;

    Ok(())
}

/// Writes every message as one JSON line until `done` is set and the stream
/// is drained.
pub fn spawn_output_writer(
    stream: MessageStream,
    mut out: impl Write + Send + 'static,
    done: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<()>>> {
    let handle = thread::Builder::new()
        .name("output".to_string())
        .spawn(move || -> Result<()> {
            loop {
                let msg = match stream.recv_timeout(POLL_INTERVAL) {
                    Ok(msg) => msg,
                    Err(StreamError::Empty) if done.load(Ordering::Relaxed) => break,
                    Err(StreamError::Empty) => continue,
                    Err(StreamError::Closed) => break,
                };

                if stream.queue_full_signaled() {
                    warn!(
                        "Output consumer too slow, {} messages dropped so far",
                        stream.dropped()
                    );
                    stream.clear_queue_full_signal();
                }

                serde_json::to_writer(&mut out, &msg)?;
                out.write_all(b"\n")?;
                out.flush()?;
            }

            Ok(())
        })?;

    Ok(handle)
}

/// Wires the calibration engine, the pipeline and the output writer together
pub struct Runner {
    params: BellframeParams,
    engine: CalibrationEngine,
    pipeline: DataPipeline,
    sink: MessageSink,
    stream: MessageStream,
}

impl Runner {
    pub fn new(params: BellframeParams) -> Self {
        let (sink, stream) = sink(params.pipeline.sink_capacity());
        let engine = CalibrationEngine::new(sink.clone());
        let pipeline = DataPipeline::with_clock(
            engine.clone(),
            sink.clone(),
            SystemClock::default(),
            params.pipeline.rate_window(),
        );

        Self {
            params,
            engine,
            pipeline,
            sink,
            stream,
        }
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn sink(&self) -> &MessageSink {
        &self.sink
    }

    pub fn listen_commands(&self, input: impl BufRead + Send + 'static) -> Result<()> {
        spawn_command_reader(
            input,
            self.engine.clone(),
            self.params.calibration.clone(),
            self.sink.clone(),
        )
    }

    /// Runs until the reader stops, then shuts the engine down and drains
    /// the output stream.
    pub fn run_blocking<R: BufRead>(
        self,
        mut reader: FrameReader<R>,
        out: impl Write + Send + 'static,
        stop: Arc<AtomicBool>,
    ) -> Result<ReadStats> {
        let Runner {
            engine,
            mut pipeline,
            stream,
            ..
        } = self;

        let done = Arc::new(AtomicBool::new(false));
        let writer = spawn_output_writer(stream, out, done.clone())?;

        info!("Reading frames");
        let result = reader.run(&mut pipeline, &stop);

        engine.shutdown();
        done.store(true, Ordering::Relaxed);

        match writer.join() {
            Ok(written) => written?,
            Err(_) => return Err(anyhow!("Output writer panicked")),
        }

        let stats = result?;
        info!(
            "Processed {} frames, rejected {}",
            stats.frames, stats.rejected
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        sync::Mutex,
    };

    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;
    use crate::{calibration::Phase, utils::capacity::Capacity};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn json_lines(&self) -> Vec<Value> {
            let data = self.0.lock().unwrap();
            String::from_utf8_lossy(&data)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn pipeline() -> (DataPipeline, MessageStream) {
        let (sink, stream) = sink(Capacity::Unbounded);
        let engine = CalibrationEngine::new(sink.clone());
        (DataPipeline::new(engine, sink), stream)
    }

    const INPUT: &str = "Booting...\n\
        100,0,0,0,1\n\
        \n\
        200,0.0,0.0,0.7071068,0.7071068\n\
        300,0,x,0,1\n\
        400,0,0,0,0\n\
        500,0,0,0,1";

    #[test]
    fn test_frame_reader() {
        let (mut pipeline, stream) = pipeline();
        let stop = AtomicBool::new(false);

        let stats = FrameReader::new(Cursor::new(INPUT))
            .run(&mut pipeline, &stop)
            .unwrap();

        assert_eq!(
            stats,
            ReadStats {
                frames: 3,
                rejected: 3
            }
        );

        let secs: Vec<f64> = std::iter::from_fn(|| stream.try_recv().ok())
            .filter_map(|m| match m {
                crate::telemetry::Message::Data(f) => Some(f.secs),
                _ => None,
            })
            .collect();
        assert_eq!(secs, vec![0.1, 0.2, 0.5]);
    }

    #[test]
    fn test_frame_reader_skips_invalid_utf8() {
        let (mut pipeline, stream) = pipeline();
        let stop = AtomicBool::new(false);

        let input: &[u8] = b"100,0,0,0,1\n\xff\xfe,\n2\xff00,0,0,0,1\n\xfe\n300,0,0,0,1\n";
        let stats = FrameReader::new(Cursor::new(input))
            .run(&mut pipeline, &stop)
            .unwrap();

        assert_eq!(
            stats,
            ReadStats {
                frames: 3,
                rejected: 1
            }
        );

        let secs: Vec<f64> = std::iter::from_fn(|| stream.try_recv().ok())
            .filter_map(|m| match m {
                crate::telemetry::Message::Data(f) => Some(f.secs),
                _ => None,
            })
            .collect();
        assert_eq!(secs, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_frame_reader_stop() {
        let (mut pipeline, _stream) = pipeline();
        let stop = AtomicBool::new(true);

        let stats = FrameReader::new(Cursor::new(INPUT))
            .run(&mut pipeline, &stop)
            .unwrap();

        assert_eq!(stats, ReadStats::default());
    }

    #[test]
    fn test_paced_replay() {
        let (mut pipeline, _stream) = pipeline();
        let stop = AtomicBool::new(false);

        let start = Instant::now();
        FrameReader::new(Cursor::new("1000,0,0,0,1\n1050,0,0,0,1\n"))
            .paced(true)
            .run(&mut pipeline, &stop)
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_command_lines() {
        let (sink, stream) = sink(Capacity::Unbounded);
        let engine = CalibrationEngine::new(sink.clone());
        let params = CalibrationParams::default();

        handle_command_line(r#"{"type": "roll", "deg": 10.0}"#, &engine, &params, &sink);
        assert!(engine.state().roll_offset_rad > 0.0);

        handle_command_line("not json", &engine, &params, &sink);
        handle_command_line(r#"{"type": "cancel"}"#, &engine, &params, &sink);

        let texts: Vec<String> = std::iter::from_fn(|| stream.try_recv().ok())
            .map(|m| serde_json::to_value(&m).unwrap()["status"].to_string())
            .collect();

        assert_eq!(texts.len(), 2);
        assert!(texts.iter().all(|t| t.contains("command_rejected")));
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_run_blocking_writes_json_lines() {
        let runner = Runner::new(BellframeParams::default());
        let out = SharedBuf::default();

        runner
            .listen_commands(Cursor::new(r#"{"type": "roll", "deg": 90.0}"#))
            .unwrap();

        // Wait for the command thread to apply the roll
        let start = Instant::now();
        while runner.engine().state().roll_offset_rad == 0.0 {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }

        let stats = runner
            .run_blocking(
                FrameReader::new(Cursor::new("0,0.7071068,0,0,0.7071068\n")),
                out.clone(),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();

        assert_eq!(stats.frames, 1);

        let lines = out.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "data");
        assert!(lines[0]["roll_deg"].as_f64().unwrap().abs() < 1e-3);
    }
}
