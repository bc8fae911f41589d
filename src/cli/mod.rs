mod agent;
mod tracing;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meridian", about = "Meridian agent", version)]
pub struct CliOpts {
	/// Logging verbosity level (-v, -vv, -vvv)
	#[clap(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Commands
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the agent
	Agent(agent::Command),
}

impl CliOpts {
	pub async fn run_command(&self) -> anyhow::Result<()> {
		tracing::setup(self);

		match &self.command {
			Command::Agent(cmd) => cmd.execute(self).await,
		}
	}
}
