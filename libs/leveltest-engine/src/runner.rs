// In-sandbox runner program and the wire format spoken with it.
//
// Both backends start the interpreter with RUNNER_SCRIPT. The runner reads one
// JSON payload (from LEVELTEST_PAYLOAD as base64 when set, otherwise from
// stdin) and forks. The child points fds 0, 1 and 2 at /dev/null, moves into
// a private working directory, drops root if it has it, runs the submission
// in a fresh namespace and reports over a private pipe. The parent
// reads that pipe with a byte cap, checks the report against the child's exit
// status and writes the only JSON envelope that reaches the host, as the last
// line of its stdout.

use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionError, StdinLines};

pub const PAYLOAD_ENV: &str = "LEVELTEST_PAYLOAD";

/// Exit code of a process killed with SIGKILL, which is how the container
/// runtime reports an OOM kill.
pub const OOM_EXIT_CODE: i64 = 137;

/// Room for the envelope fields on top of the escaped program output
pub const ENVELOPE_SLACK_BYTES: usize = 64 * 1024;

/// Runner stderr kept for diagnostics; the rest is read and dropped
pub const STDERR_CAPTURE_BYTES: usize = 64 * 1024;

/// Most bytes the host accepts on the runner's stdout. JSON escaping can
/// grow a control character to six bytes.
pub fn stdout_capture_limit(max_output_bytes: usize) -> usize {
    max_output_bytes
        .saturating_mul(6)
        .saturating_add(ENVELOPE_SLACK_BYTES)
}

pub const RUNNER_SCRIPT: &str = r#"
import base64, builtins, io, json, os, shutil, signal, sys, tempfile

_STATUSES = ("ok", "fault", "output_limit", "memory_limit")


class _OutputLimit(BaseException):
    pass


class _Capture(io.TextIOBase):
    def __init__(self, limit):
        self.parts = []
        self.size = 0
        self.limit = limit
        self.exceeded = False

    def writable(self):
        return True

    def write(self, text):
        text = str(text)
        self.size += len(text.encode("utf-8", "replace"))
        if self.size > self.limit:
            self.exceeded = True
            raise _OutputLimit()
        self.parts.append(text)
        return len(text)

    def getvalue(self):
        return "".join(self.parts)


class _Lines:
    def __init__(self, lines):
        self.lines = list(lines)
        self.current = 0

    def readline(self):
        if self.current < len(self.lines):
            line = self.lines[self.current]
            self.current += 1
            return line
        return ""

    def __call__(self, prompt=""):
        return self.readline()


def _prctl(option, value):
    try:
        import ctypes
        ctypes.CDLL(None, use_errno=True).prctl(option, value, 0, 0, 0)
    except Exception:
        pass


def _limit_memory(megabytes):
    if not megabytes:
        return
    try:
        import resource
        limit = megabytes * 1024 * 1024
        resource.setrlimit(resource.RLIMIT_AS, (limit, limit))
    except (ImportError, ValueError, OSError):
        pass


def _drop_privileges(workdir):
    if os.geteuid() != 0:
        return
    try:
        os.chown(workdir, 65534, 65534)
        os.setgroups([])
        os.setgid(65534)
        os.setuid(65534)
    except OSError:
        pass


def _run_submission(payload):
    capture = _Capture(payload["max_output_bytes"])
    line_source = _Lines(payload["stdin"])
    namespace_builtins = builtins.__dict__.copy()
    namespace_builtins["input"] = line_source
    namespace = {"__name__": "__main__", "__builtins__": namespace_builtins, "input": line_source}

    real_stdout = sys.stdout
    sys.stdin = io.StringIO("")
    sys.stdout = capture
    try:
        try:
            exec(compile(payload["code"], "<submission>", "exec"), namespace)
        except SystemExit:
            pass
    except _OutputLimit:
        envelope = {"status": "output_limit"}
    except MemoryError:
        envelope = {"status": "memory_limit"}
    except Exception as e:
        envelope = {"status": "fault", "error": str(e) or type(e).__name__}
    else:
        envelope = {"status": "ok", "stdout": capture.getvalue()}
    finally:
        sys.stdout = real_stdout

    if capture.exceeded:
        envelope = {"status": "output_limit"}
    return envelope


def _child(payload, channel, workdir, parent):
    _prctl(4, 1)
    try:
        os.setpgid(0, 0)
    except OSError:
        pass
    devnull = os.open(os.devnull, os.O_RDWR)
    for fd in (0, 1, 2):
        os.dup2(devnull, fd)
    os.closerange(3, channel)
    os.closerange(channel + 1, 65536)
    _limit_memory(payload.get("memory_limit_mb"))
    os.chdir(workdir)
    _drop_privileges(workdir)
    _prctl(1, signal.SIGKILL)
    if os.getppid() != parent:
        os._exit(0)

    envelope = _run_submission(payload)
    data = memoryview(json.dumps(envelope, ensure_ascii=False).encode("utf-8", "replace"))
    while data:
        data = data[os.write(channel, data):]


def _collect(pid, channel, limit):
    chunks, size = [], 0
    while True:
        chunk = os.read(channel, 65536)
        if not chunk:
            return b"".join(chunks), False
        size += len(chunk)
        if size > limit:
            os.kill(pid, signal.SIGKILL)
            return b"", True
        chunks.append(chunk)


def _verdict(data, status, overflow, max_output_bytes):
    if overflow:
        return {"status": "output_limit"}
    if os.WIFSIGNALED(status):
        signum = os.WTERMSIG(status)
        if signum == signal.SIGKILL:
            return {"status": "memory_limit"}
        return {"status": "fault", "error": "terminated by signal %d" % signum}
    try:
        report = json.loads(data.decode("utf-8"))
    except ValueError:
        report = None
    if not isinstance(report, dict) or report.get("status") not in _STATUSES:
        code = os.WEXITSTATUS(status) if os.WIFEXITED(status) else -1
        return {"status": "fault", "error": "program exited with code %d before finishing" % code}
    if report["status"] == "ok":
        stdout = report.get("stdout")
        if not isinstance(stdout, str):
            return {"status": "fault", "error": "program produced an invalid report"}
        if len(stdout.encode("utf-8", "replace")) > max_output_bytes:
            return {"status": "output_limit"}
        return {"status": "ok", "stdout": stdout}
    if report["status"] == "fault":
        return {"status": "fault", "error": str(report.get("error") or "fault")}
    return {"status": report["status"]}


def _main():
    raw = os.environ.pop("LEVELTEST_PAYLOAD", None)
    if raw:
        payload = json.loads(base64.b64decode(raw).decode("utf-8"))
    else:
        payload = json.loads(sys.stdin.buffer.read().decode("utf-8"))
    max_output_bytes = payload["max_output_bytes"]

    _prctl(4, 0)
    workdir = tempfile.mkdtemp(prefix="leveltest-")
    sys.stdout.flush()
    parent = os.getpid()
    read_fd, write_fd = os.pipe()
    pid = os.fork()
    if pid == 0:
        try:
            os.close(read_fd)
            _child(payload, write_fd, workdir, parent)
        finally:
            os._exit(0)

    os.close(write_fd)
    data, overflow = _collect(pid, read_fd, max_output_bytes * 6 + 4096)
    os.close(read_fd)
    _, status = os.waitpid(pid, 0)
    try:
        os.killpg(pid, signal.SIGKILL)
    except OSError:
        pass
    shutil.rmtree(workdir, ignore_errors=True)

    envelope = _verdict(data, status, overflow, max_output_bytes)
    out = sys.stdout.buffer
    out.write(b"\n" + json.dumps(envelope, ensure_ascii=False).encode("utf-8", "replace") + b"\n")
    out.flush()


_main()
"#;

/// Bytes read from a runner stream, kept up to `limit`. Anything past the
/// limit is dropped and remembered as an overflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if bytes.len() > room {
            self.overflowed = true;
        }
        self.data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// What a finished runner left behind, in either backend
#[derive(Debug)]
pub struct RunnerOutput {
    pub stdout: BoundedBuffer,
    pub stderr: BoundedBuffer,
    pub exit_code: Option<i64>,
}

impl RunnerOutput {
    /// An overflowing stdout is an output-limit violation whatever it holds
    pub fn into_outcome(self, max_output_bytes: usize) -> Result<String, ExecutionError> {
        if self.stdout.overflowed() {
            return Err(ExecutionError::OutputLimit {
                limit_bytes: max_output_bytes,
            });
        }
        interpret(
            &self.stdout.to_string_lossy(),
            &self.stderr.to_string_lossy(),
            self.exit_code,
            max_output_bytes,
        )
    }
}

/// Request sent to the runner.
#[derive(Debug, Serialize)]
pub struct RunnerPayload<'a> {
    pub code: &'a str,
    pub stdin: &'a [String],
    pub max_output_bytes: usize,
    pub memory_limit_mb: Option<u32>,
}

impl<'a> RunnerPayload<'a> {
    pub fn new(code: &'a str, stdin: &'a StdinLines, max_output_bytes: usize) -> Self {
        Self {
            code,
            stdin: stdin.as_slice(),
            max_output_bytes,
            memory_limit_mb: None,
        }
    }

    pub fn with_memory_limit(mut self, memory_limit_mb: u32) -> Self {
        self.memory_limit_mb = Some(memory_limit_mb);
        self
    }
}

/// Reply written by the runner as its last stdout line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunnerEnvelope {
    Ok { stdout: String },
    Fault { error: String },
    OutputLimit,
    MemoryLimit,
}

impl RunnerEnvelope {
    /// Find the envelope on the last non-empty line of the runner's stdout.
    /// Only the supervising runner process can write there.
    pub fn parse(stdout: &str) -> Option<Self> {
        let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
        serde_json::from_str(line.trim()).ok()
    }
}

/// Map whatever the runner process left behind onto the executor contract.
/// Anything except a clean `ok` envelope discards the captured output.
pub fn interpret(
    stdout: &str,
    stderr: &str,
    exit_code: Option<i64>,
    max_output_bytes: usize,
) -> Result<String, ExecutionError> {
    match RunnerEnvelope::parse(stdout) {
        Some(RunnerEnvelope::Ok { stdout }) => Ok(stdout),
        Some(RunnerEnvelope::Fault { error }) => Err(ExecutionError::Fault { message: error }),
        Some(RunnerEnvelope::OutputLimit) => Err(ExecutionError::OutputLimit {
            limit_bytes: max_output_bytes,
        }),
        Some(RunnerEnvelope::MemoryLimit) => Err(ExecutionError::MemoryLimit),
        None if exit_code == Some(OOM_EXIT_CODE) => Err(ExecutionError::MemoryLimit),
        None => {
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| match exit_code {
                    Some(code) => format!("runner exited with code {}", code),
                    None => "runner terminated by signal".to_string(),
                });
            Err(ExecutionError::Fault { message: detail })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_from_last_line() {
        let stdout = "stray\n{\"status\": \"ok\", \"stdout\": \"42\\n\"}\n";
        assert_eq!(
            RunnerEnvelope::parse(stdout),
            Some(RunnerEnvelope::Ok {
                stdout: "42\n".to_string()
            })
        );
        assert_eq!(
            RunnerEnvelope::parse("{\"status\": \"output_limit\"}"),
            Some(RunnerEnvelope::OutputLimit)
        );
        assert_eq!(RunnerEnvelope::parse(""), None);
        assert_eq!(RunnerEnvelope::parse("Traceback ..."), None);
    }

    #[test]
    fn test_interpret_fault_discards_output() {
        let stdout = "{\"status\": \"fault\", \"error\": \"division by zero\"}\n";
        assert_eq!(
            interpret(stdout, "", Some(0), 1024),
            Err(ExecutionError::Fault {
                message: "division by zero".to_string()
            })
        );
    }

    #[test]
    fn test_interpret_without_envelope() {
        assert_eq!(
            interpret("", "", Some(OOM_EXIT_CODE), 1024),
            Err(ExecutionError::MemoryLimit)
        );
        assert_eq!(
            interpret("", "Traceback\nKeyboardInterrupt\n", Some(1), 1024),
            Err(ExecutionError::Fault {
                message: "KeyboardInterrupt".to_string()
            })
        );
        assert_eq!(
            interpret("", "", None, 1024),
            Err(ExecutionError::Fault {
                message: "runner terminated by signal".to_string()
            })
        );
    }

    #[test]
    fn test_interpret_output_limit() {
        assert_eq!(
            interpret("{\"status\": \"output_limit\"}", "", Some(0), 64),
            Err(ExecutionError::OutputLimit { limit_bytes: 64 })
        );
    }

    #[test]
    fn test_bounded_buffer_drops_overflow() {
        let mut buffer = BoundedBuffer::new(4);
        buffer.push(b"ab");
        assert!(!buffer.overflowed());
        buffer.push(b"cdef");
        assert!(buffer.overflowed());
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.to_string_lossy(), "abcd");
    }

    #[test]
    fn test_overflowing_stdout_is_an_output_limit() {
        let mut stdout = BoundedBuffer::new(16);
        stdout.push(b"{\"status\": \"ok\", \"stdout\": \"x\"}");
        let output = RunnerOutput {
            stdout,
            stderr: BoundedBuffer::new(16),
            exit_code: Some(0),
        };
        assert_eq!(
            output.into_outcome(8),
            Err(ExecutionError::OutputLimit { limit_bytes: 8 })
        );
        assert!(stdout_capture_limit(1024) > 1024);
        assert_eq!(stdout_capture_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_payload_shape() {
        let stdin = StdinLines::from_text("1\n2");
        let payload = RunnerPayload::new("print(1)", &stdin, 10).with_memory_limit(64);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["stdin"], serde_json::json!(["1", "2"]));
        assert_eq!(value["memory_limit_mb"], 64);
    }
}
