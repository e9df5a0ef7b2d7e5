//! Output interception.
//!
//! [`InterceptingStream`] wraps a writer. Every write is forwarded to the
//! wrapped sink unchanged and first; the text is then classified and handed
//! to the log pipeline as a record. Forwarding and logging for one write
//! happen under a single lock, so the sink and the log stream stay in the
//! same order.
//!
//! On unix, [`StdoutRedirect`] swaps the process's stdout descriptor for a
//! pipe so that everything written to stdout (including `println!`) passes
//! through an `InterceptingStream` before it reaches the real stdout.

use crate::classify::{LevelClassifier, MarkerClassifier};
use crate::record::{LogPipeline, LogRecord, RecordOrigin, Severity};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// How written text turns into log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    /// Log every write call as-is, including empty writes. Otherwise only
    /// complete, non-blank lines are logged.
    pub strict: bool,
    /// Pick the severity from markers in the text
    pub guess_level: bool,
    /// Severity used when not guessing, or when no marker is found
    pub default_severity: Severity,
}

impl CapturePolicy {
    pub fn new(strict: bool, guess_level: bool) -> Self {
        Self {
            strict,
            guess_level,
            default_severity: Severity::Info,
        }
    }
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::new(false, false)
    }
}

/// Classifies text and submits it.
struct Emitter {
    policy: CapturePolicy,
    classifier: Box<dyn LevelClassifier>,
    pipeline: Arc<dyn LogPipeline>,
}

impl Emitter {
    fn severity_for(&self, message: &str) -> Severity {
        if self.policy.guess_level {
            self.classifier
                .classify(message)
                .unwrap_or(self.policy.default_severity)
        } else {
            self.policy.default_severity
        }
    }

    fn emit(&self, text: &str) {
        let message = text.trim_end_matches(&['\r', '\n'][..]);
        if !self.policy.strict && message.trim().is_empty() {
            return;
        }
        let severity = self.severity_for(message);
        self.pipeline
            .submit(LogRecord::new(severity, RecordOrigin::Capture, message));
    }

    fn emit_bytes(&self, bytes: &[u8]) {
        self.emit(&String::from_utf8_lossy(bytes));
    }
}

struct Inner<W> {
    sink: W,
    /// Bytes of the current unfinished line (non-strict mode only)
    pending: Vec<u8>,
}

/// A writer that forwards to `sink` and logs what passes through.
///
/// The pipeline must not write back into this stream; that would deadlock.
pub struct InterceptingStream<W: Write> {
    inner: Mutex<Inner<W>>,
    emitter: Emitter,
}

impl<W: Write> InterceptingStream<W> {
    pub fn new(
        sink: W,
        policy: CapturePolicy,
        classifier: impl LevelClassifier + 'static,
        pipeline: Arc<dyn LogPipeline>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sink,
                pending: Vec::new(),
            }),
            emitter: Emitter {
                policy,
                classifier: Box::new(classifier),
                pipeline,
            },
        }
    }

    /// Stream with the default marker classifier.
    pub fn with_flags(
        sink: W,
        strict: bool,
        guess_level: bool,
        pipeline: Arc<dyn LogPipeline>,
    ) -> Self {
        Self::new(
            sink,
            CapturePolicy::new(strict, guess_level),
            MarkerClassifier::new(),
            pipeline,
        )
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.emitter.policy
    }

    /// Log any unfinished line and return the wrapped sink.
    pub fn into_inner(self) -> W {
        let mut inner = self.inner.into_inner();
        if !inner.pending.is_empty() {
            self.emitter.emit_bytes(&inner.pending);
            inner.pending.clear();
        }
        inner.sink
    }

    fn write_through(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let forwarded = inner.sink.write_all(buf);

        if self.emitter.policy.strict {
            self.emitter.emit_bytes(buf);
        } else {
            inner.pending.extend_from_slice(buf);
            while let Some(pos) = inner.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = inner.pending.drain(..=pos).collect();
                self.emitter.emit_bytes(&line);
            }
        }

        forwarded.map(|_| buf.len())
    }

    fn flush_through(&self) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if !inner.pending.is_empty() {
            let partial = std::mem::take(&mut inner.pending);
            self.emitter.emit_bytes(&partial);
        }
        inner.sink.flush()
    }
}

impl<W: Write> Write for &InterceptingStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_through(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_through()
    }
}

impl<W: Write> Write for InterceptingStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_through(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_through()
    }
}

#[cfg(unix)]
pub use self::redirect::{StdoutCapture, StdoutRedirect};

#[cfg(unix)]
mod redirect {
    use super::{CapturePolicy, InterceptingStream};
    use crate::classify::LevelClassifier;
    use crate::record::LogPipeline;
    use std::fs::File;
    use std::io::{self, BufRead, BufReader, Write};
    use std::os::unix::io::{FromRawFd, RawFd};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    const STDOUT_FD: RawFd = libc::STDOUT_FILENO;

    /// Process stdout swapped for a pipe; nothing reads the pipe yet.
    ///
    /// Dropping it without calling [`StdoutRedirect::start`] restores stdout.
    pub struct StdoutRedirect {
        saved_fd: RawFd,
        read_end: Option<File>,
    }

    impl StdoutRedirect {
        /// Point fd 1 at a new pipe, keeping a duplicate of the original.
        pub fn redirect() -> io::Result<Self> {
            io::stdout().flush()?;

            // SAFETY: plain descriptor calls; every descriptor created here is
            // either closed on the error path or owned by the returned value.
            unsafe {
                let saved_fd = libc::dup(STDOUT_FD);
                if saved_fd < 0 {
                    return Err(io::Error::last_os_error());
                }

                let mut fds: [libc::c_int; 2] = [0; 2];
                if libc::pipe(fds.as_mut_ptr()) != 0 {
                    let err = io::Error::last_os_error();
                    libc::close(saved_fd);
                    return Err(err);
                }

                if libc::dup2(fds[1], STDOUT_FD) < 0 {
                    let err = io::Error::last_os_error();
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                    libc::close(saved_fd);
                    return Err(err);
                }
                libc::close(fds[1]);

                Ok(Self {
                    saved_fd,
                    read_end: Some(File::from_raw_fd(fds[0])),
                })
            }
        }

        /// A writer to the stdout that was in place before the redirect.
        ///
        /// Log handlers that print to the console must use this, or their
        /// output would be captured again.
        pub fn original_stdout(&self) -> io::Result<File> {
            duplicate(self.saved_fd)
        }

        /// Start pumping the pipe through an [`InterceptingStream`] whose sink
        /// is the original stdout.
        pub fn start(
            mut self,
            policy: CapturePolicy,
            classifier: impl LevelClassifier + 'static,
            pipeline: Arc<dyn LogPipeline>,
        ) -> io::Result<StdoutCapture> {
            let sink = self.original_stdout()?;
            let read_end = self
                .read_end
                .take()
                .ok_or_else(|| io::Error::other("stdout capture already started"))?;
            let stream = InterceptingStream::new(sink, policy, classifier, pipeline);

            let saved_fd = self.saved_fd;
            let reader = thread::Builder::new()
                .name("logcatch-stdout".to_string())
                .spawn(move || pump(read_end, stream));

            match reader {
                Ok(handle) => Ok(StdoutCapture {
                    saved_fd,
                    reader: Some(handle),
                }),
                Err(err) => {
                    restore(saved_fd);
                    Err(err)
                }
            }
        }
    }

    impl Drop for StdoutRedirect {
        fn drop(&mut self) {
            if self.read_end.take().is_some() {
                restore(self.saved_fd);
            }
        }
    }

    /// Running stdout capture. Dropping it restores the original stdout and
    /// waits for the remaining output to be logged.
    pub struct StdoutCapture {
        saved_fd: RawFd,
        reader: Option<JoinHandle<()>>,
    }

    impl Drop for StdoutCapture {
        fn drop(&mut self) {
            restore(self.saved_fd);
            // Restoring fd 1 closed the last write end of the pipe (unless a
            // child process inherited it), so the reader sees EOF.
            if let Some(reader) = self.reader.take() {
                let _ = reader.join();
            }
        }
    }

    fn pump(read_end: File, stream: InterceptingStream<File>) {
        let mut reader = BufReader::new(read_end);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let _ = (&stream).write_all(&line);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = (&stream).flush();
    }

    fn duplicate(fd: RawFd) -> io::Result<File> {
        // SAFETY: `fd` is a descriptor owned by the redirect; the duplicate is
        // a new descriptor handed to the returned File.
        unsafe {
            let dup = libc::dup(fd);
            if dup < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(File::from_raw_fd(dup))
        }
    }

    fn restore(saved_fd: RawFd) {
        let _ = io::stdout().flush();
        // SAFETY: `saved_fd` was produced by `dup` in `redirect` and is closed
        // exactly once, here.
        unsafe {
            libc::dup2(saved_fd, STDOUT_FD);
            libc::close(saved_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryPipeline;
    use std::thread;

    fn stream(
        strict: bool,
        guess_level: bool,
    ) -> (InterceptingStream<Vec<u8>>, Arc<MemoryPipeline>) {
        let pipeline = Arc::new(MemoryPipeline::new());
        let stream = InterceptingStream::with_flags(Vec::new(), strict, guess_level, pipeline.clone());
        (stream, pipeline)
    }

    /// A sink that rejects every write.
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_pass_through_unchanged() {
        for (strict, guess) in [(false, false), (false, true), (true, false), (true, true)] {
            let (mut stream, _) = stream(strict, guess);
            stream.write_all(b"ERROR: disk full\n").unwrap();
            stream.write_all(b"").unwrap();
            stream.write_all(b"   \n").unwrap();
            stream.write_all(b"partial").unwrap();
            stream.flush().unwrap();
            assert_eq!(stream.into_inner(), b"ERROR: disk full\n   \npartial".to_vec());
        }
    }

    #[test]
    fn test_strict_logs_every_write() {
        let (mut stream, pipeline) = stream(true, false);
        stream.write_all(b"hello").unwrap();
        stream.write_all(b"\n").unwrap();
        stream.write(b"").unwrap();

        let records = pipeline.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "hello");
        assert_eq!(records[1].message, "");
        assert_eq!(records[2].message, "");
        assert!(records.iter().all(|r| r.severity == Severity::Info));
        assert!(records.iter().all(|r| r.origin == RecordOrigin::Capture));
    }

    #[test]
    fn test_non_strict_skips_blank_writes() {
        let (mut stream, pipeline) = stream(false, false);
        stream.write_all(b"\n").unwrap();
        stream.write_all(b"   \t \n").unwrap();
        stream.write_all(b"").unwrap();
        stream.flush().unwrap();
        assert!(pipeline.records().is_empty());
    }

    #[test]
    fn test_non_strict_joins_pieces_into_lines() {
        let (mut stream, pipeline) = stream(false, false);
        write!(stream, "value = {}\nsecond", 42).unwrap();
        stream.write_all(b" line\r\n").unwrap();

        let messages: Vec<String> = pipeline.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["value = 42", "second line"]);
    }

    #[test]
    fn test_non_strict_flush_emits_partial_line() {
        let (mut stream, pipeline) = stream(false, false);
        stream.write_all(b"progress: 50%").unwrap();
        assert!(pipeline.records().is_empty());
        stream.flush().unwrap();
        assert_eq!(pipeline.records()[0].message, "progress: 50%");
    }

    #[test]
    fn test_into_inner_emits_pending_line() {
        let (mut stream, pipeline) = stream(false, false);
        stream.write_all(b"no newline").unwrap();
        let _ = stream.into_inner();
        assert_eq!(pipeline.records().len(), 1);
    }

    #[test]
    fn test_guess_level() {
        let (mut stream, pipeline) = stream(false, true);
        stream.write_all(b"ERROR: disk full\n").unwrap();
        stream.write_all(b"plain message\n").unwrap();
        stream.write_all(b"[warn] slow\n").unwrap();

        let severities: Vec<Severity> = pipeline.records().iter().map(|r| r.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Error, Severity::Info, Severity::Warning]
        );
    }

    #[test]
    fn test_without_guess_level_uses_default() {
        let (mut stream, pipeline) = stream(false, false);
        stream.write_all(b"ERROR: disk full\n").unwrap();
        assert_eq!(pipeline.records()[0].severity, Severity::Info);
    }

    #[test]
    fn test_custom_default_severity() {
        let pipeline = Arc::new(MemoryPipeline::new());
        let policy = CapturePolicy {
            default_severity: Severity::Debug,
            ..CapturePolicy::new(false, true)
        };
        let mut stream =
            InterceptingStream::new(Vec::new(), policy, MarkerClassifier::new(), pipeline.clone());
        stream.write_all(b"chatter\n").unwrap();
        assert_eq!(pipeline.records()[0].severity, Severity::Debug);
    }

    #[test]
    fn test_sink_failure_still_logs() {
        let pipeline = Arc::new(MemoryPipeline::new());
        let mut stream = InterceptingStream::with_flags(Broken, true, false, pipeline.clone());
        let result = stream.write(b"lost output");
        assert!(result.is_err());
        assert_eq!(pipeline.records()[0].message, "lost output");
    }

    #[test]
    fn test_invalid_utf8_is_logged_lossily() {
        let (mut stream, pipeline) = stream(true, false);
        stream.write_all(&[b'o', b'k', 0xff]).unwrap();
        assert_eq!(pipeline.records()[0].message, "ok\u{fffd}");
    }

    #[test]
    fn test_concurrent_writes_keep_sink_and_log_in_same_order() {
        let (stream, pipeline) = stream(false, false);
        let stream = Arc::new(stream);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let stream = Arc::clone(&stream);
                thread::spawn(move || {
                    for i in 0..50 {
                        let mut writer = &*stream;
                        writer
                            .write_all(format!("thread {t} line {i}\n").as_bytes())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stream = Arc::try_unwrap(stream).ok().unwrap();
        let output = String::from_utf8(stream.into_inner()).unwrap();
        let sink_lines: Vec<&str> = output.lines().collect();
        let logged: Vec<String> = pipeline.records().into_iter().map(|r| r.message).collect();

        assert_eq!(sink_lines.len(), 200);
        assert_eq!(sink_lines, logged);
    }
}
