//! Orchestrator: bootstrap the browser, authenticate, run the renewal
//! workflow, map the outcome to the process exit code. All the actual logic
//! lives in the library; this file is glue.

use std::io::Write;

use log::{error, info};

use hiden_renew::driver::cdp;
use hiden_renew::{
    ChallengeResolver, RenewConfig, RenewalTicket, RenewalWorkflow, ScreenshotSink, Session,
    SessionAuthenticator, VERSION,
};

#[tokio::main]
async fn main() {
    init_logger();
    let code = run().await;
    std::process::exit(code);
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .init();
}

async fn run() -> i32 {
    info!("hiden-renew {VERSION} starting");

    let config = match RenewConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err}");
            return 1;
        }
    };

    let (browser, page) = match cdp::launch().await {
        Ok(pair) => pair,
        Err(err) => {
            error!("browser bootstrap failed: {err}");
            return 1;
        }
    };

    let resolver = ChallengeResolver::new();
    let sink = ScreenshotSink::new(config.artifact_dir());
    let mut session = Session::from_config(&config);

    let authenticator = SessionAuthenticator::new(&config, &resolver, &sink);
    if let Err(err) = authenticator.authenticate(&page, &mut session).await {
        error!("authentication failed: {err}");
        browser.close().await;
        return 1;
    }

    let workflow = RenewalWorkflow::new(&config, &resolver, &sink);
    let mut ticket = RenewalTicket::new();
    let outcome = workflow.run(&page, &mut ticket).await;

    browser.close().await;

    match outcome {
        Ok(()) => {
            info!("renewal finished, invoice: {}", ticket.invoice_url().unwrap_or("<none>"));
            0
        }
        Err(err) => {
            error!("renewal failed: {err}");
            1
        }
    }
}
