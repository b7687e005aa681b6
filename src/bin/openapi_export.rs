use std::{fs, path::PathBuf};

use clap::Parser;
use storefront_checkout::openapi::ApiDocV1;
use utoipa::OpenApi;

#[derive(Parser)]
#[command(name = "openapi-export", about = "Write the storefront OpenAPI document to disk")]
struct Cli {
    /// Output file
    #[arg(long, default_value = "openapi/storefront-checkout.v1.json")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let json = serde_json::to_string_pretty(&ApiDocV1::openapi())?;

    if let Some(dir) = cli.out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&cli.out, json)?;

    println!("OpenAPI document written to {}", cli.out.display());
    Ok(())
}
