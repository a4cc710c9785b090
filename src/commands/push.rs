use super::{for_each_target, Session};
use crate::error::Result;
use crate::sync::PushSelection;

/// Encrypt and upload local env files for every app of the workspace
pub fn push(session: &Session, env: Option<&str>) -> Result<()> {
    let selection = match env {
        Some(name) => PushSelection::Single(name.to_string()),
        None => PushSelection::AllLocal,
    };
    for_each_target(session, "pushed", |sync, target| sync.push(target, &selection))
}
