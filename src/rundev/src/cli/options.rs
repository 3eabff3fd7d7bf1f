use clap::{Args, Parser, Subcommand};

/// Supervise development processes in one aggregated console
#[derive(Parser)]
#[command(name = "rundev")]
#[command(version)]
#[command(about = "Supervise development processes in one aggregated console")]
#[command(after_help = "Examples:\n  \
    rundev dev make serve\n  \
    rundev dev --env DEBUG=1 ./run-all.sh\n  \
    rundev add web --oneshot -- npm run build")]
#[command(arg_required_else_help = true)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a command inside the development console
    #[command(after_help = "Examples:\n  \
        rundev dev make serve\n  \
        rundev dev --env DEBUG --env PORT=8080 ./run-all.sh")]
    Dev(DevArgs),

    /// Register a process with a running development console
    #[command(after_help = "Examples:\n  \
        rundev add web -- python -m http.server\n  \
        rundev add build --oneshot -- make all")]
    Add(AddArgs),
}

/// Arguments for the development console
#[derive(Args)]
pub struct DevArgs {
    /// Environment overrides in KEY=VALUE format (bare KEY inherits the
    /// current value)
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Initial command to run
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// Arguments for registering a process
#[derive(Args)]
pub struct AddArgs {
    /// Process name
    pub name: String,

    /// Is it normal for this process to exit?
    #[arg(long)]
    pub oneshot: bool,

    /// Environment overrides in KEY=VALUE format (bare KEY inherits the
    /// current value)
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Working directory for the process
    #[arg(long)]
    pub chdir: Option<String>,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}
