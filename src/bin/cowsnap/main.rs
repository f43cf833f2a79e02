use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod util;
mod cmd_init;
mod cmd_snapshot;
mod cmd_diff;
mod cmd_download;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./cowsnap ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Init { store } =>
            cmd_init::exec(store),

        cli::Cmd::Snapshot { store, id } =>
            cmd_snapshot::exec_create(store, id),

        cli::Cmd::Restore { store, id } =>
            cmd_snapshot::exec_restore(store, id),

        cli::Cmd::List { store, json } =>
            cmd_snapshot::exec_list(store, json),

        cli::Cmd::Diff { store, from, to, out } =>
            cmd_diff::exec_diff(store, from, to, out),

        cli::Cmd::Export { store, id, out } =>
            cmd_diff::exec_export(store, id, out),

        cli::Cmd::Import { store, id, file } =>
            cmd_diff::exec_import(store, id, file),

        cli::Cmd::Download { url, out, block, since, binary } =>
            cmd_download::exec(url, out, block, since, binary),
    }
}
