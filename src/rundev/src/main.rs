use clap::Parser;
use rundev::{
    cli::options::{Command, Options},
    client, supervisor, util,
};
use tokio::runtime::Runtime;

fn main() -> eyre::Result<()> {
    let opts = Options::parse();

    // Diagnostics go to stderr; stdout belongs to the aggregated process
    // stream. Priority: RUST_LOG > default (INFO).
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let runtime = Runtime::new()?;
    match opts.command {
        Command::Dev(args) => {
            let overrides = util::env::parse_env(&args.env);
            runtime.block_on(supervisor::run(args.command, overrides))
        }
        Command::Add(args) => {
            let env = util::env::parse_env(&args.env);
            runtime.block_on(client::add(
                args.name,
                args.command,
                env,
                args.chdir,
                args.oneshot,
            ))
        }
    }
}
