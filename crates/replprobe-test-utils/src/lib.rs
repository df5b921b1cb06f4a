//! Shared test utilities for replprobe integration tests.
//!
//! Provides stub programs under test, written as executable shell scripts
//! into a temporary directory. Each [`StubProgram`] owns its directory and
//! removes it on drop.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Row store used by the end-to-end scenario: `insert <row>` stores a row,
/// `select` prints every stored row, `.exit` acknowledges and exits.
const LINE_DB: &str = r#"rows=""
while IFS= read -r line; do
  case "$line" in
    "insert "*)
      rows="$rows${line#insert }
"
      echo "db > Executed."
      ;;
    select)
      printf '%s' "$rows" | while IFS= read -r row; do
        echo "db > ($row)"
      done
      echo "Executed."
      ;;
    .exit)
      echo "db > bye"
      exit 0
      ;;
    *)
      echo "db > Unrecognized command '$line'."
      ;;
  esac
done
"#;

/// A temporary executable script.
pub struct StubProgram {
    dir: TempDir,
    path: PathBuf,
}

impl StubProgram {
    /// Write `body` as a `/bin/sh` script and make it executable.
    pub fn from_script(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create stub directory");
        let path = dir.path().join("stub.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}"))
            .expect("failed to write stub script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to make stub executable");
        }

        Self { dir, path }
    }

    /// Echoes every stdin line back on stdout. Records its pid.
    pub fn echo() -> Self {
        Self::recording_pid("exec cat\n")
    }

    /// The `insert` / `select` / `.exit` row store.
    pub fn line_db() -> Self {
        Self::from_script(LINE_DB)
    }

    /// Prints `count` numbered lines (`line 1` ...) after stdin closes.
    pub fn chatty(count: usize) -> Self {
        Self::from_script(&format!(
            "cat > /dev/null\ni=1\nwhile [ $i -le {count} ]; do\n  echo \"line $i\"\n  i=$((i + 1))\ndone\n"
        ))
    }

    /// Copies stdin byte-for-byte into [`StubProgram::recording`], then
    /// prints `done` once stdin closes.
    pub fn recorder() -> Self {
        let stub = Self::from_script("");
        stub.rewrite(&format!("cat > '{}'\necho done\n", stub.recording().display()));
        stub
    }

    /// Consumes stdin, then sleeps without ever writing to stdout. Records
    /// its pid.
    pub fn silent() -> Self {
        Self::recording_pid("cat > /dev/null\nexec sleep 30\n")
    }

    /// Writes the shell's pid to [`StubProgram::pid_file`] before running
    /// `body`. `exec` in `body` keeps the same pid.
    fn recording_pid(body: &str) -> Self {
        let stub = Self::from_script("");
        stub.rewrite(&format!("echo $$ > '{}'\n{body}", stub.pid_file().display()));
        stub
    }

    fn rewrite(&self, body: &str) {
        std::fs::write(&self.path, format!("#!/bin/sh\n{body}"))
            .expect("failed to rewrite stub script");
    }

    /// Consumes stdin and exits without writing anything.
    pub fn mute() -> Self {
        Self::from_script("cat > /dev/null\n")
    }

    /// Prints one line and exits without reading stdin.
    pub fn quitter() -> Self {
        Self::from_script("echo gone\nexit 3\n")
    }

    /// Path to the executable script.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File written by [`StubProgram::recorder`].
    pub fn recording(&self) -> PathBuf {
        self.dir.path().join("stdin.bin")
    }

    /// File the pid-recording stubs write their pid to.
    pub fn pid_file(&self) -> PathBuf {
        self.dir.path().join("pid")
    }

    /// Pid recorded by a pid-recording stub, polling briefly until the
    /// child has written it.
    pub fn recorded_pid(&self) -> Option<u32> {
        for _ in 0..200 {
            if let Ok(text) = std::fs::read_to_string(self.pid_file()) {
                if let Ok(pid) = text.trim().parse() {
                    return Some(pid);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        None
    }

    /// Scratch directory owned by this stub.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
