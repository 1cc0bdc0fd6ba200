//! `metal whoami`

use anyhow::Context;

use crate::client::ApiClient;
use crate::config::CliConfig;

pub async fn run(config: &CliConfig) -> anyhow::Result<()> {
    let client = ApiClient::new(config)?;
    let whoami = client.whoami().await.context("whoami request failed")?;

    println!("team:    {} ({})", whoami.team_name, whoami.team_id);
    println!("token:   {}", whoami.token_id);
    println!("created: {}", whoami.created_at);
    Ok(())
}
