// audiodrop CLI - upload M4A files to an audiodrop server and fetch the MP3s

mod client;
mod multipart;

use std::path::{Path, PathBuf};

use audiodrop_core::{has_allowed_extension, Bitrate};
use clap::{Parser, Subcommand};
use colored::Colorize;

use client::Client;

/// audiodrop - M4A to MP3 conversion client
#[derive(Parser)]
#[command(name = "audiodrop")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the audiodrop server
    #[arg(short, long, global = true, default_value = "http://localhost:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an M4A file to MP3
    Convert {
        /// Path to the .m4a file
        file: PathBuf,

        /// Target bitrate, e.g. 128k
        #[arg(short, long, default_value = "192k")]
        bitrate: String,

        /// Download the MP3 right away instead of printing the link
        #[arg(short, long)]
        download: bool,

        /// Directory to save the MP3 into (implies --download)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Check that the server is up
    Health,
}

fn main() {
    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    let result = match cli.command {
        Commands::Convert {
            file,
            bitrate,
            download,
            output_dir,
        } => handle_convert(&client, &file, &bitrate, download, output_dir),
        Commands::Health => handle_health(&client),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn handle_convert(
    client: &Client,
    file: &Path,
    bitrate: &str,
    download: bool,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    // Catch the obvious mistakes before uploading anything.
    if !has_allowed_extension(&file.to_string_lossy(), &["m4a"]) {
        anyhow::bail!("'{}' is not an .m4a file", file.display());
    }
    let bitrate: Bitrate = bitrate.parse()?;

    println!("Uploading {} at {}...", file.display(), bitrate);
    let converted = client.convert(file, &bitrate.as_arg())?;

    println!("{} {}", "✓".green().bold(), "Converted".green());
    println!("  File:     {}", converted.filename);
    println!("  Link:     {}", converted.download_url);
    println!("  Expires:  {}", converted.expires_at);

    if download || output_dir.is_some() {
        let dir = output_dir.unwrap_or_else(|| PathBuf::from("."));
        let saved = client.download(&converted, &dir)?;
        println!("{} Saved to {}", "✓".green().bold(), saved.display());
    }

    Ok(())
}

fn handle_health(client: &Client) -> anyhow::Result<()> {
    let health = client.health()?;
    println!(
        "{} {} is {} ({} pending deletion{})",
        "✓".green().bold(),
        client.base_url(),
        health.status,
        health.pending_deletions,
        if health.pending_deletions == 1 { "" } else { "s" }
    );
    Ok(())
}
