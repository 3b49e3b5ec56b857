use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gsm_agent_lib::RunOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory holding config.toml, state snapshots, SteamCMD and servers
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match gsm_agent_lib::run(RunOptions {
        data_dir: args.data_dir,
    })
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Agent failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
