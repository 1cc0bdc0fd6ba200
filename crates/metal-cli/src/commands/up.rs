//! `metal up [path]`

use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::archive;
use crate::client::ApiClient;
use crate::config::{CliConfig, ProjectConfig};

pub async fn run(
    config: &CliConfig,
    path: Option<PathBuf>,
    app_id: Option<String>,
    env_id: Option<String>,
) -> anyhow::Result<()> {
    let dir = match path {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let project = ProjectConfig::load(&dir)
        .with_context(|| format!("reading {}", dir.join("metal.toml").display()))?;
    let Some(app_id) = app_id.or(project.app_id) else {
        bail!("no app_id: pass --app-id or set app_id in metal.toml");
    };
    let Some(env_id) = env_id.or(project.env_id) else {
        bail!("no env_id: pass --env-id or set env_id in metal.toml");
    };

    println!("packing {}", dir.display());
    let archive = archive::pack(&dir).context("packing source tree failed")?;
    println!("uploading {} bytes", archive.len());

    let client = ApiClient::new(config)?;
    let response = client
        .up(&app_id, &env_id, archive)
        .await
        .context("upload failed")?;

    println!("{}", response.message);
    if let Some(build_id) = response.build_id {
        println!("build: {build_id}");
    }
    Ok(())
}
