use mediabot_core::fs_paths::{AppPaths, ServerPaths};

fn setup_environment() {
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");

    let bin_dir = ServerPaths::from_env().bin_dir();
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{}{}{}", bin_dir.display(), sep, current));

    std::env::set_var("PYTHONIOENCODING", "utf-8");
    std::env::set_var("PYTHONUTF8", "1");
}

fn main() -> anyhow::Result<()> {
    setup_environment();
    mediabot_lib::run()
}
