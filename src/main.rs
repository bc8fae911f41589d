use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let opts = cli::CliOpts::parse();
	opts.run_command().await
}
