use super::{build_supervisor, load_settings};
use anyhow::Result;
use launcher::supervisor::{BackgroundVerifier, VerifyOutcome, VerifyReport};
use std::path::Path;

pub(crate) async fn cmd_verify(config: Option<&Path>) -> Result<()> {
    let supervisor = build_supervisor(load_settings(config)?);
    let report = BackgroundVerifier::new(supervisor).run().await;

    print_report(&report);

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{failed} service(s) failed to start");
    }
    Ok(())
}

pub(crate) fn print_report(report: &VerifyReport) {
    for (name, outcome) in &report.services {
        match outcome {
            VerifyOutcome::AlreadyRunning => println!("{name}: already running"),
            VerifyOutcome::Started => println!("{name}: started"),
            VerifyOutcome::StartFailed(reason) => println!("{name}: failed to start ({reason})"),
        }
    }
}
