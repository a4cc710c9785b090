use super::Session;
use crate::error::{HxError, Result};
use crate::rotation::RotationCoordinator;
use crate::sync::EnvOutcome;

/// Re-encrypt every environment of the project under a new key
pub fn rotate_key(session: &Session, confirmed: bool) -> Result<()> {
    if !confirmed {
        return Err(HxError::Config(
            "Rotating the key re-encrypts every environment and overwrites local env files. \
             Re-run with --yes to continue"
                .to_string(),
        ));
    }

    let targets = session.targets()?;
    println!("Rotating the secret key for project {}...", session.project()?);

    let sync = session.synchroniser();
    let report = RotationCoordinator::new(&sync).rotate(&targets)?;
    if report.resumed {
        println!("Resumed an interrupted rotation");
    }
    for env in &report.envs {
        match &env.outcome {
            EnvOutcome::Synced { version } => {
                println!("  {}/{}: re-encrypted (version {version})", env.app, env.env)
            }
            EnvOutcome::Skipped(reason) => println!("  {}/{}: skipped ({reason})", env.app, env.env),
            _ => {}
        }
    }

    println!("\nKey rotation complete!");
    println!("New secret key id: {}", report.key_id);
    println!("{} environment(s) re-encrypted", report.rewritten());
    Ok(())
}
