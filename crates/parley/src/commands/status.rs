//! Status command - shows gateway and backend status.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;
use crate::client::Client;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also check the generation backend
    #[arg(short, long)]
    pub upstream: bool,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    running: bool,
    version: Option<String>,
    server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream: Option<UpstreamOutput>,
}

#[derive(Debug, Serialize)]
struct UpstreamOutput {
    reachable: bool,
    provider: Option<String>,
    version: Option<String>,
    error: Option<String>,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let client = Client::new(&ctx.server_url)?;
    let dim = Style::new().dim();

    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => {
            if ctx.json_output {
                let output = StatusOutput {
                    running: false,
                    version: None,
                    server_url: ctx.server_url.clone(),
                    upstream: None,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!();
                println!("{}", style("Parley Gateway Status").bold());
                println!("{}", dim.apply_to("─".repeat(40)));
                println!();
                println!(
                    "  {} {}",
                    dim.apply_to("Status:"),
                    Style::new().red().apply_to("● not running")
                );
                println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

                if ctx.verbose {
                    println!();
                    println!("  {} {}", dim.apply_to("Error:"), e);
                }

                println!();
                println!("  {}", dim.apply_to("Start the gateway with: parley start"));
                println!();
            }
            return Ok(());
        }
    };

    let upstream = if args.upstream {
        Some(match client.upstream_health().await {
            Ok(info) => UpstreamOutput {
                reachable: true,
                provider: Some(info.provider),
                version: Some(info.version),
                error: None,
            },
            Err(e) => UpstreamOutput {
                reachable: false,
                provider: None,
                version: None,
                error: Some(e.to_string()),
            },
        })
    } else {
        None
    };

    if ctx.json_output {
        let output = StatusOutput {
            running: health.status == "ok",
            version: Some(health.version),
            server_url: ctx.server_url.clone(),
            upstream,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let green = Style::new().green();
    let red = Style::new().red();

    println!();
    println!("{}", style("Parley Gateway Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}",
        dim.apply_to("Status:"),
        green.apply_to("● running")
    );
    println!("  {} {}", dim.apply_to("Version:"), health.version);
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

    if let Some(upstream) = upstream {
        println!();
        println!("{}", dim.apply_to("─".repeat(40)));
        println!();
        if upstream.reachable {
            println!(
                "  {} {} ({})",
                dim.apply_to("Backend:"),
                green.apply_to("● reachable"),
                upstream.provider.unwrap_or_default()
            );
            println!(
                "  {} {}",
                dim.apply_to("Backend version:"),
                upstream.version.unwrap_or_default()
            );
        } else {
            println!(
                "  {} {}",
                dim.apply_to("Backend:"),
                red.apply_to("● unreachable")
            );
            if let Some(error) = upstream.error {
                println!("  {} {}", dim.apply_to("Error:"), error);
            }
        }
    }

    println!();
    Ok(())
}
