mod commands;
mod console;
mod event_pump;
mod ipc;
mod state;

use state::AppState;
use tabterm_pty::TabConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tabterm-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("fatal: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let config = TabConfig::from_env();
    log::info!(
        "Starting tabterm (shell: {}, max tabs: {})",
        config.shell_command(),
        config.max_tabs
    );

    let result = runtime.block_on(async {
        let state = AppState::start(config, runtime.handle().clone())?;
        console::run(state).await
    });

    if let Err(e) = result {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}
