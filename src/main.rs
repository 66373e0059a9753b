use std::fmt::Debug;
use std::fmt::Display;

use mail_fanout::catchup::init_catchup_worker;
use mail_fanout::configuration::get_configuration;
use mail_fanout::fanout::init_auto_resume_worker;
use mail_fanout::startup::Application;
use mail_fanout::telemetry::get_subscriber;
use mail_fanout::telemetry::init_subscriber;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} failed"
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} task failed to complete"
            )
        }
    }
}

/// Initialise telemetry, load config, then race the API against the two
/// background workers; whichever exits first brings the process down.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("mail-fanout", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration().expect("could not read configuration");

    let server = Application::build(cfg.clone()).await?.run_until_stopped();
    let catchup_worker = init_catchup_worker(cfg.clone());
    let auto_resume_worker = init_auto_resume_worker(cfg);

    let server_task = tokio::spawn(server);
    let catchup_task = tokio::spawn(catchup_worker);
    let auto_resume_task = tokio::spawn(auto_resume_worker);

    tokio::select! {
        o = server_task => report_exit("API", o),
        o = catchup_task => report_exit("catch-up scheduler", o),
        o = auto_resume_task => report_exit("auto-resume worker", o),
    }

    Ok(())
}
