use std::path::Path;

fn enhanced_path(bin_dir: &Path) -> String {
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    format!("{}{}{}", bin_dir.display(), sep, current)
}

/// Tokio command with the managed bin dir prepended to `PATH` and a UTF-8 Python
/// environment for yt-dlp.
pub fn command<S: AsRef<std::ffi::OsStr>>(program: S, bin_dir: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.env("PATH", enhanced_path(bin_dir));
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.kill_on_drop(true);
    cmd
}
