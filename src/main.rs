use std::{env, process::ExitCode, sync::Arc};

use log::error;
use mockable::{Clock, DefaultClock};

use task_supervisor::{
    app::{cli, config::Config, store::JsonTaskStore},
    manager::{
        ids::{SequentialIds, TaskFactory},
        lifecycle::TaskLifecycle,
    },
    worker::{log_sink::LogSink, supervisor::ProcessSupervisor},
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("[ERROR]: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from(&env::current_dir()?)?;
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(DefaultClock);

    let log = Arc::new(LogSink::open(&config.log_path, Arc::clone(&clock))?);
    let supervisor = ProcessSupervisor::new(log)
        .with_shell(config.shell.clone())
        .with_stop_timeout(config.stop_timeout())
        .with_poll_interval(config.poll_interval());
    let factory = TaskFactory::new(Arc::new(SequentialIds::new()));
    let lifecycle = TaskLifecycle::new(factory, supervisor, clock);

    let store = JsonTaskStore::new(&config.tasks_dir);
    let loaded = lifecycle.load(store.load_all()?)?;
    println!("Loaded {} task(s) from {:?}", loaded.len(), store.dir());

    cli::run_cli(&lifecycle, &store)?;
    Ok(())
}
