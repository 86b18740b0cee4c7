use anyhow::{Result, bail};
use boorusync_core::destination::{
    DEFAULT_DESTINATION_API, DestinationApi, DestinationClient, DestinationConfig,
};
use boorusync_core::media::JxlDecoder;
use boorusync_core::migrate::{DEFAULT_PAGE_SIZE, MigrationOptions, MigrationReport, run_migration};
use boorusync_core::source::{DEFAULT_SOURCE_API, SourceApi, SourceClient, SourceConfig};
use clap::{CommandFactory, Parser, error::ErrorKind};

#[derive(Debug, Parser)]
#[command(
    name = "boorusync",
    version,
    about = "Mirror tags from a source booru onto a destination booru via reverse image search"
)]
struct Cli {
    #[arg(
        long,
        value_name = "URL",
        env = "BOORUSYNC_DEST_API",
        default_value = DEFAULT_DESTINATION_API
    )]
    dest_api: String,
    #[arg(
        long,
        value_name = "URL",
        env = "BOORUSYNC_SOURCE_API",
        default_value = DEFAULT_SOURCE_API
    )]
    source_api: String,
    #[arg(
        long,
        value_name = "NAME",
        env = "BOORUSYNC_DEST_USERNAME",
        help = "Destination account used for taxonomy writes"
    )]
    dest_username: Option<String>,
    #[arg(
        long,
        value_name = "TOKEN",
        env = "BOORUSYNC_DEST_PASSWORD",
        hide_env_values = true
    )]
    dest_password: Option<String>,
    #[arg(
        long,
        value_name = "VALUE",
        env = "BOORUSYNC_SOURCE_AUTH",
        hide_env_values = true,
        help = "Full Authorization header value for the source service"
    )]
    source_auth_header: Option<String>,
    #[arg(
        long,
        value_name = "N",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    page_size: u32,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    start_page: u32,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 0,
        help = "Stop after scanning this many posts (0 = no limit)"
    )]
    max_posts: usize,
    #[arg(long, help = "Report intended writes without performing them")]
    dry_run: bool,
    #[arg(long, help = "Abort on the first per-post failure")]
    fail_fast: bool,
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 60,
        help = "HTTP timeout per request"
    )]
    timeout: u64,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.dest_username.is_some() != cli.dest_password.is_some() {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--dest-username and --dest-password must be provided together",
            )
            .exit();
    }
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let mode = if cli.dry_run { "dry-run" } else { "live" };
    println!("boorusync starting ({mode})");
    println!("destination: {}", cli.dest_api);
    println!("source: {}", cli.source_api);

    let mut destination = DestinationClient::connect(&DestinationConfig {
        api_base: cli.dest_api.clone(),
        username: cli.dest_username.clone(),
        password: cli.dest_password.clone(),
        timeout_secs: cli.timeout,
    })?;
    let mut source = SourceClient::connect(&SourceConfig {
        api_base: cli.source_api.clone(),
        auth_header: cli.source_auth_header.clone(),
        timeout_secs: cli.timeout,
    })?;
    let transcoder = JxlDecoder::default();

    let options = MigrationOptions {
        page_size: cli.page_size,
        start_page: cli.start_page,
        max_posts: cli.max_posts,
        dry_run: cli.dry_run,
        fail_fast: cli.fail_fast,
    };
    let report = run_migration(&mut destination, &mut source, &transcoder, &options)?;

    print_summary(
        &report,
        destination.request_count(),
        source.request_count(),
    );
    if let Some(reason) = report.aborted {
        bail!("aborted after first failure: {reason}");
    }
    Ok(())
}

fn print_summary(report: &MigrationReport, destination_requests: usize, source_requests: usize) {
    println!("\n=== Migration Summary ===");
    println!("Scanned posts:          {}", report.scanned);
    println!("Processed image posts:  {}", report.processed);
    println!("Skipped by type:        {}", report.skipped_by_type);
    println!("Exact matches found:    {}", report.matched);
    println!("Discovered tags:        {}", report.discovered_tags);
    println!("Added tags to posts:    {}", report.added_tags);
    println!("Failures:               {}", report.failures);
    println!("Destination requests:   {}", destination_requests);
    println!("Source requests:        {}", source_requests);
}
