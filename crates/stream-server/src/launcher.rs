use std::io::{self, PipeReader};
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// A launched transcoder together with the read end of its merged
/// stdout/stderr pipe.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub child: Child,
    pub output: PipeReader,
}

/// Seam between the supervisor and the OS, so the supervisor can be driven
/// by a different executable (or none at all) under test.
pub trait ProcessLauncher: Send + Sync + 'static {
    fn launch(&self, program: &Path, args: &[String]) -> io::Result<SpawnedProcess>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> io::Result<SpawnedProcess> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        spawn_merged(cmd)
    }
}

/// Spawns `cmd` with stdout and stderr sharing one pipe, so the reader sees
/// both streams in the order the OS delivered them.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_merged(mut cmd: Command) -> io::Result<SpawnedProcess> {
    let (reader, writer) = std::io::pipe()?;
    let stderr_writer = writer.try_clone()?;

    cmd.stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    // `cmd` still owns our copies of the write end; the reader only sees EOF
    // once they are closed.
    drop(cmd);

    Ok(SpawnedProcess {
        child,
        output: reader,
    })
}
