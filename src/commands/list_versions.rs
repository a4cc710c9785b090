use super::Session;
use crate::api::models::PageRequest;
use crate::envfile::EnvName;
use crate::error::Result;

/// Print one page of the stored versions of an environment, newest first
pub fn list_versions(session: &Session, env: Option<&str>, page: u32, page_size: u32) -> Result<()> {
    let env = match env {
        Some(name) => EnvName::parse(name)?,
        None => EnvName::Default,
    };
    let org = session.org()?;
    let app = session.config.app_id()?;

    let request = PageRequest {
        page_num: page.max(1),
        page_size: page_size.max(1),
    };
    let versions = session.client.list_env_versions(org, app, &env, request)?;

    if versions.data.is_empty() {
        println!("No versions stored for {env}");
        return Ok(());
    }

    println!("{:<28} {:>8} {:>10} {:>12}  PUBLISHED", "ID", "VERSION", "VARIABLES", "SIZE");
    for payload in &versions.data {
        let published = payload
            .published
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:>8} {:>10} {:>12}  {}",
            payload.id.as_deref().unwrap_or("-"),
            payload.version(),
            payload.count_variables,
            payload.size,
            published
        );
    }
    println!(
        "\nPage {} ({} of {} versions)",
        versions.page_num,
        versions.data.len(),
        versions.total_count
    );
    Ok(())
}
