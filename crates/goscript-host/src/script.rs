//! A running snippet: one child process and the call channel to it.

use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use goscript_wire::{
    read_ready, read_response, write_request, Response, TypeRegistry, Value, WireError,
    READY_TOKEN,
};

use crate::config::ScriptConfig;
use crate::error::{ScriptError, ScriptErrorKind};
use crate::harness::GENERATED_FILE_NAME;
use crate::remap::{remap_diagnostics, RemapContext};
use crate::signature::{extract_signature, ArgDescriptor};
use crate::workdir::WorkDir;

const WORK_DIR_PREFIX: &str = "goscript";

/// Trailing stderr kept for diagnostics.
pub const STDERR_CAP: usize = 256 * 1024;

/// How long a child that closed its pipes gets to finish exiting.
const EXIT_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot<T>(m: &mut Mutex<T>) -> &mut T {
    m.get_mut().unwrap_or_else(PoisonError::into_inner)
}

/// Takes the value out of `m` unless another thread holds the lock.
fn try_take<T>(m: &Mutex<Option<T>>) -> Result<Option<T>, ()> {
    match m.try_lock() {
        Ok(mut guard) => Ok(guard.take()),
        Err(TryLockError::Poisoned(p)) => Ok(p.into_inner().take()),
        Err(TryLockError::WouldBlock) => Err(()),
    }
}

/// A Go snippet compiled into a long-lived child process.
///
/// Construction never fails outright: a snippet that cannot be started yields
/// a `Script` whose every call returns the stored error. Calls are serialized;
/// [`Script::close`] may be called from any thread, including while a call is
/// blocked on the child.
#[derive(Debug)]
pub struct Script {
    err: Option<ScriptError>,
    args: Vec<ArgDescriptor>,
    signature_line: Option<usize>,
    snippet_lines: usize,
    registry: Arc<TypeRegistry>,
    remap: RemapContext,
    source_path: Option<PathBuf>,
    pid: Option<u32>,

    execute_lock: Mutex<()>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    stderr: Option<StderrTail>,
    work_dir: Mutex<Option<WorkDir>>,
    closed: AtomicBool,
}

impl Script {
    pub fn new(snippet: &str, config: &ScriptConfig) -> Script {
        let mut script = Script {
            err: None,
            args: Vec::new(),
            signature_line: None,
            snippet_lines: snippet.lines().count(),
            registry: Arc::clone(&config.registry),
            remap: config.template.remap_context(snippet),
            source_path: None,
            pid: None,
            execute_lock: Mutex::new(()),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            stderr: None,
            work_dir: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        if let Err(err) = script.start(snippet, config) {
            tracing::warn!(kind = %err.kind, "goscript failed to start: {err}");
            script.err = Some(err);
            script.close();
        }
        script
    }

    fn start(&mut self, snippet: &str, config: &ScriptConfig) -> Result<(), ScriptError> {
        let signature = extract_signature(snippet)?;
        self.signature_line = Some(signature.line);
        self.args = signature.args.clone();

        let program = config
            .template
            .render(snippet, &signature, &config.registry)?;
        tracing::trace!(program = program.as_str(), "generated harness");

        let work_dir = WorkDir::new(config.temp_root.as_deref(), WORK_DIR_PREFIX)
            .map_err(|err| ScriptError::from_anyhow(ScriptErrorKind::Generate, err))?;
        let source = work_dir.path().join(GENERATED_FILE_NAME);
        let dir = work_dir.path().to_path_buf();
        *slot(&mut self.work_dir) = Some(work_dir);
        std::fs::write(&source, program)
            .with_context(|| format!("write harness: {}", source.display()))
            .map_err(|err| ScriptError::from_anyhow(ScriptErrorKind::Generate, err))?;
        self.source_path = Some(source.clone());

        let backend = &config.backend;
        let mut child = {
            let mut cmd = backend.command(&source);
            cmd.stdin(Stdio::piped());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.current_dir(&dir);

            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt as _;
                cmd.process_group(0);
            }

            cmd.spawn()
                .with_context(|| format!("spawn {} backend", backend.name()))
                .map_err(|err| ScriptError::from_anyhow(ScriptErrorKind::Spawn, err))?
        };
        let pid = child.id();
        self.pid = Some(pid);
        tracing::debug!(pid, backend = backend.name(), work_dir = %dir.display(), "spawned goscript child");

        let pipes = (|| -> anyhow::Result<_> {
            let stdin = child.stdin.take().context("take stdin")?;
            let stdout = child.stdout.take().context("take stdout")?;
            let stderr = child.stderr.take().context("take stderr")?;
            Ok((stdin, stdout, stderr))
        })();
        *slot(&mut self.child) = Some(child);
        let (stdin, stdout, stderr) =
            pipes.map_err(|err| ScriptError::from_anyhow(ScriptErrorKind::Spawn, err))?;
        self.stderr = Some(StderrTail::spawn(stderr));
        *slot(&mut self.stdin) = Some(stdin);

        let mut stdout = BufReader::new(stdout);
        let handshake = read_ready(&mut stdout);
        *slot(&mut self.stdout) = Some(stdout);
        match handshake {
            Ok(token) if token.as_str() == Some(READY_TOKEN) => {
                tracing::debug!(pid, "goscript ready");
                Ok(())
            }
            Ok(token) => {
                tracing::debug!(pid, got = %token, "unexpected handshake token");
                Err(ScriptError::new(
                    ScriptErrorKind::Startup,
                    "goscript failed to start",
                ))
            }
            Err(err) => {
                let status = self.wait_exit(EXIT_GRACE);
                let raw = self.stderr_since(0);
                let text = remap_diagnostics(&raw, &self.remap);
                let message = if !text.trim().is_empty() {
                    text
                } else {
                    let mut message = match status {
                        Some(status) => format!("goscript exited before the handshake: {status}"),
                        None => format!("goscript failed to start: {err}"),
                    };
                    if !raw.trim().is_empty() {
                        message.push_str(" (diagnostics refer only to generated code; check the goscript signature)");
                    }
                    message
                };
                Err(ScriptError::new(ScriptErrorKind::Startup, message)
                    .with_exit_code(status.and_then(|s| s.code())))
            }
        }
    }

    /// Runs one call and returns the child's envelope as is.
    pub fn call(&self, args: &[Value]) -> Result<Response, ScriptError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScriptError::closed());
        }

        let _round_trip = lock(&self.execute_lock);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScriptError::closed());
        }
        let mark = self.stderr.as_ref().map_or(0, StderrTail::position);
        if let Err(err) = self.send(args) {
            return Err(self.call_failure(err, mark));
        }
        self.receive().map_err(|err| self.call_failure(err, mark))
    }

    /// Runs one call, turning an error carried by the envelope into a
    /// [`ScriptErrorKind::Call`] error.
    pub fn execute(&self, args: &[Value]) -> Result<Value, ScriptError> {
        let response = self.call(args)?;
        match response.error {
            Some(message) => Err(ScriptError::new(ScriptErrorKind::Call, message)),
            None => Ok(response.value),
        }
    }

    fn send(&self, args: &[Value]) -> Result<(), WireError> {
        let mut stdin = lock(&self.stdin);
        let writer = stdin.as_mut().ok_or(WireError::Closed)?;
        write_request(writer, args, &self.registry)
    }

    fn receive(&self) -> Result<Response, WireError> {
        let mut stdout = lock(&self.stdout);
        let reader = stdout.as_mut().ok_or(WireError::Closed)?;
        read_response(reader, &self.registry)
    }

    /// Classifies a failed round trip. `mark` is the stderr position when the
    /// call began; only output after it is reported.
    fn call_failure(&self, err: WireError, mark: u64) -> ScriptError {
        if self.closed.load(Ordering::SeqCst) {
            return ScriptError::closed();
        }
        let status = if err.is_closed() {
            self.wait_exit(EXIT_GRACE)
        } else {
            self.wait_exit(Duration::ZERO)
        };
        match status {
            Some(status) if !status.success() => {
                let text = remap_diagnostics(&self.stderr_since(mark), &self.remap);
                let message = if text.trim().is_empty() {
                    format!("goscript exited: {status}")
                } else {
                    text
                };
                ScriptError::new(ScriptErrorKind::Process, message).with_exit_code(status.code())
            }
            _ => ScriptError::transport(&err),
        }
    }

    /// Polls the child for up to `grace`; `None` while it is still running.
    fn wait_exit(&self, grace: Duration) -> Option<ExitStatus> {
        let mut child = lock(&self.child);
        let child = child.as_mut()?;
        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "try_wait goscript child");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Raw stderr written after `mark`, once the stream ends or the grace runs out.
    fn stderr_since(&self, mark: u64) -> String {
        match &self.stderr {
            Some(tail) => tail.text_since(mark, EXIT_GRACE),
            None => String::new(),
        }
    }

    /// Stops the child and removes the work directory.
    ///
    /// Safe to call more than once and from any thread. Every step is tried
    /// even when an earlier one fails; failures are only logged.
    pub fn close(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);

        // A call blocked writing keeps stdin; it is taken after the kill.
        let stdin_busy = match try_take(&self.stdin) {
            Ok(stdin) => {
                drop(stdin);
                false
            }
            Err(()) => true,
        };

        if let Some(child) = lock(&self.child).as_mut() {
            let exited = matches!(child.try_wait(), Ok(Some(_)));
            if !exited {
                kill_process_group(child);
            }
            if let Err(err) = child.wait() {
                tracing::warn!(pid = child.id(), error = %err, "wait for goscript child");
            }
        }

        if stdin_busy {
            drop(lock(&self.stdin).take());
        }
        // A call still reading keeps stdout until it returns; it is released on drop.
        let _ = try_take(&self.stdout);

        if let Some(dir) = lock(&self.work_dir).take() {
            if let Err(err) = dir.remove() {
                tracing::warn!(error = %format!("{err:#}"), "goscript cleanup");
            }
        }
        if first {
            tracing::debug!(pid = self.pid, "goscript closed");
        }
    }

    /// The construction error, if the script never became ready.
    pub fn error(&self) -> Option<&ScriptError> {
        self.err.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.err.is_none() && !self.closed.load(Ordering::SeqCst)
    }

    /// Parameters of the entry point, in declaration order.
    pub fn args(&self) -> &[ArgDescriptor] {
        &self.args
    }

    /// 1-based snippet line of the entry point declaration.
    pub fn signature_line(&self) -> Option<usize> {
        self.signature_line
    }

    pub fn snippet_lines(&self) -> usize {
        self.snippet_lines
    }

    /// Where the generated program was written. Gone once closed.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        self.close();
    }
}

fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // The child leads its own process group; this reaches whatever it spawned.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

/// The last `cap` bytes of a stream, plus how many bytes were dropped ahead
/// of them.
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    cap: usize,
    dropped: u64,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            cap,
            dropped: 0,
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.bytes.extend(data);
        let excess = self.bytes.len().saturating_sub(self.cap);
        self.bytes.drain(..excess);
        self.dropped += excess as u64;
    }

    /// Bytes seen so far.
    fn position(&self) -> u64 {
        self.dropped + self.bytes.len() as u64
    }

    /// Kept bytes at or after stream position `mark`.
    fn since(&self, mark: u64) -> Vec<u8> {
        let skip = usize::try_from(mark.saturating_sub(self.dropped))
            .unwrap_or(usize::MAX)
            .min(self.bytes.len());
        self.bytes.range(skip..).copied().collect()
    }
}

/// Drains a child's stderr on a background thread, keeping the last
/// [`STDERR_CAP`] bytes.
#[derive(Debug)]
struct StderrTail {
    buf: Arc<Mutex<TailBuffer>>,
    reader: JoinHandle<()>,
}

impl StderrTail {
    fn spawn(stderr: ChildStderr) -> Self {
        let buf = Arc::new(Mutex::new(TailBuffer::new(STDERR_CAP)));
        let sink = Arc::clone(&buf);
        let reader = std::thread::spawn(move || drain(stderr, &sink));
        Self { buf, reader }
    }

    fn position(&self) -> u64 {
        lock(&self.buf).position()
    }

    /// Waits up to `grace` for the stream to end, then returns what was
    /// captured from `mark` on.
    fn text_since(&self, mark: u64, grace: Duration) -> String {
        let deadline = Instant::now() + grace;
        while !self.reader.is_finished() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
        String::from_utf8_lossy(&lock(&self.buf).since(mark)).into_owned()
    }
}

fn drain<R: Read>(mut reader: R, sink: &Mutex<TailBuffer>) {
    let mut tmp = [0u8; 8192];
    loop {
        let n = match reader.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        lock(sink).push(&tmp[..n]);
    }
}
