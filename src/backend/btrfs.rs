//! BtrfsCli — CowBackend поверх утилиты `btrfs`.
//!
//! Команды:
//! - probe:            btrfs subvolume show <path>
//! - create_subvolume: btrfs subvolume create <path>
//! - delete_subvolume: btrfs subvolume delete <path>
//! - snapshot:         btrfs subvolume snapshot [-r] <src> <dst>
//! - send_diff:        btrfs send -q [-p <parent>] <target>   (stdout → out)
//! - receive_diff:     btrfs receive <dst_parent>             (in → stdin)
//!
//! stderr всегда дренируется в отдельном потоке, чтобы полный pipe не
//! блокировал send/receive на больших субволюмах.

use log::debug;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use super::{BackendResult, CowBackend};
use crate::error::BackendError;

#[derive(Debug, Clone)]
pub struct BtrfsCli {
    bin: String,
}

impl Default for BtrfsCli {
    fn default() -> Self {
        Self {
            bin: "btrfs".to_string(),
        }
    }
}

impl BtrfsCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Использовать другой бинарь (например, абсолютный путь или обёртку).
    pub fn with_binary(bin: &str) -> Self {
        Self {
            bin: bin.to_string(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.bin
    }

    /// Выполнить команду без потоков stdin/stdout, собрать stderr.
    fn run(&self, args: Vec<OsString>) -> BackendResult<()> {
        let cmdline = self.render(&args);
        debug!("btrfs: {}", cmdline);
        let out = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackendError::io(format!("spawn `{}`", cmdline), e))?;
        check_status(&cmdline, out.status, &out.stderr)
    }

    fn spawn(&self, args: &[OsString], stdin: Stdio, stdout: Stdio) -> BackendResult<Child> {
        let cmdline = self.render(args);
        debug!("btrfs: {}", cmdline);
        Command::new(&self.bin)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::io(format!("spawn `{}`", cmdline), e))
    }

    fn render(&self, args: &[OsString]) -> String {
        let mut s = self.bin.clone();
        for a in args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }
}

impl CowBackend for BtrfsCli {
    fn name(&self) -> &str {
        "btrfs"
    }

    fn probe(&self, path: &Path) -> BackendResult<()> {
        self.run(show_args(path)).map_err(|e| match e {
            BackendError::Command { .. } => BackendError::Unsupported {
                path: path.to_path_buf(),
            },
            other => other,
        })
    }

    fn create_subvolume(&self, path: &Path) -> BackendResult<()> {
        self.run(create_args(path))
    }

    fn delete_subvolume(&self, path: &Path) -> BackendResult<()> {
        self.run(delete_args(path))
    }

    fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> BackendResult<()> {
        self.run(snapshot_args(src, dst, readonly))
    }

    fn send_diff(
        &self,
        parent: Option<&Path>,
        target: &Path,
        out: &mut dyn Write,
    ) -> BackendResult<()> {
        let args = send_args(parent, target);
        let cmdline = self.render(&args);
        let mut child = self.spawn(&args, Stdio::null(), Stdio::piped())?;
        let stderr = drain_stderr(&mut child);

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, out),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured")),
        };
        let status = child
            .wait()
            .map_err(|e| BackendError::io(format!("wait `{}`", cmdline), e))?;
        let err_bytes = join_stderr(stderr);
        check_status(&cmdline, status, &err_bytes)?;
        let n = copied.map_err(|e| BackendError::io(format!("copy stdout of `{}`", cmdline), e))?;
        debug!("btrfs send: {} bytes", n);
        Ok(())
    }

    fn receive_diff(&self, input: &mut dyn Read, dst_parent: &Path) -> BackendResult<()> {
        let args = receive_args(dst_parent);
        let cmdline = self.render(&args);
        let mut child = self.spawn(&args, Stdio::piped(), Stdio::null())?;
        let stderr = drain_stderr(&mut child);

        let fed = match child.stdin.take() {
            Some(mut stdin) => {
                let r = io::copy(input, &mut stdin);
                // закрываем stdin, иначе receive ждёт EOF вечно
                drop(stdin);
                r
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured")),
        };
        let status = child
            .wait()
            .map_err(|e| BackendError::io(format!("wait `{}`", cmdline), e))?;
        let err_bytes = join_stderr(stderr);
        // статус процесса важнее ошибки записи: при падении receive pipe рвётся
        check_status(&cmdline, status, &err_bytes)?;
        fed.map_err(|e| BackendError::io(format!("feed stdin of `{}`", cmdline), e))?;
        Ok(())
    }
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<Vec<u8>>> {
    child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_stderr(h: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    h.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn check_status(cmdline: &str, status: ExitStatus, stderr: &[u8]) -> BackendResult<()> {
    if status.success() {
        return Ok(());
    }
    Err(BackendError::Command {
        command: cmdline.to_string(),
        status: status.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    })
}

// ---------------- argument builders ----------------

fn os(p: &Path) -> OsString {
    p.as_os_str().to_os_string()
}

pub(crate) fn show_args(path: &Path) -> Vec<OsString> {
    vec!["subvolume".into(), "show".into(), os(path)]
}

pub(crate) fn create_args(path: &Path) -> Vec<OsString> {
    vec!["subvolume".into(), "create".into(), os(path)]
}

pub(crate) fn delete_args(path: &Path) -> Vec<OsString> {
    vec!["subvolume".into(), "delete".into(), os(path)]
}

pub(crate) fn snapshot_args(src: &Path, dst: &Path, readonly: bool) -> Vec<OsString> {
    let mut v: Vec<OsString> = vec!["subvolume".into(), "snapshot".into()];
    if readonly {
        v.push("-r".into());
    }
    v.push(os(src));
    v.push(os(dst));
    v
}

pub(crate) fn send_args(parent: Option<&Path>, target: &Path) -> Vec<OsString> {
    let mut v: Vec<OsString> = vec!["send".into(), "-q".into()];
    if let Some(p) = parent {
        v.push("-p".into());
        v.push(os(p));
    }
    v.push(os(target));
    v
}

pub(crate) fn receive_args(dst_parent: &Path) -> Vec<OsString> {
    vec!["receive".into(), os(dst_parent)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: Vec<OsString>) -> Vec<String> {
        v.into_iter().map(|s| s.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn snapshot_readonly_flag() {
        let ro = strs(snapshot_args(Path::new("/r/vol1"), Path::new("/r/snapshots/1/vol1"), true));
        assert_eq!(ro, ["subvolume", "snapshot", "-r", "/r/vol1", "/r/snapshots/1/vol1"]);

        let rw = strs(snapshot_args(Path::new("/r/snapshots/1/vol1"), Path::new("/r/vol1"), false));
        assert_eq!(rw, ["subvolume", "snapshot", "/r/snapshots/1/vol1", "/r/vol1"]);
    }

    #[test]
    fn send_with_and_without_parent() {
        let inc = strs(send_args(Some(Path::new("/s/1/v")), Path::new("/s/2/v")));
        assert_eq!(inc, ["send", "-q", "-p", "/s/1/v", "/s/2/v"]);
        let full = strs(send_args(None, Path::new("/s/2/v")));
        assert_eq!(full, ["send", "-q", "/s/2/v"]);
    }

    #[test]
    fn missing_binary_is_io_error() {
        let b = BtrfsCli::with_binary("/nonexistent/cowsnap-btrfs-bin");
        match b.create_subvolume(Path::new("/tmp/x")) {
            Err(BackendError::Io { .. }) => {}
            other => panic!("expected Io error, got {:?}", other),
        }
        // probe не превращает ошибку запуска в Unsupported
        assert!(matches!(b.probe(Path::new("/tmp")), Err(BackendError::Io { .. })));
    }
}
