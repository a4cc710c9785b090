use super::{for_each_target, Session};
use crate::error::{HxError, Result};
use crate::sync::{PullOptions, PullSelection};

/// Download and decrypt cloud environments into the workspace
pub fn pull(session: &Session, env: Option<&str>, version: Option<u64>, force: bool) -> Result<()> {
    let selection = match env {
        Some(name) => PullSelection::Single(name.to_string()),
        None if version.is_some() => {
            return Err(HxError::Config(
                "--version requires an environment name".to_string(),
            ))
        }
        None => PullSelection::All,
    };
    let options = PullOptions { force, version };
    for_each_target(session, "pulled", |sync, target| {
        sync.pull(target, &selection, options)
    })
}
