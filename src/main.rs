use clap::{Parser, Subcommand};
use fire_cashflow::api::{ProjectArgs, run_http_server, run_projection_command};

#[derive(Parser, Debug)]
#[command(
    name = "fire-cashflow",
    about = "Month-by-month cash balance projection (income, expenses, tax and capital growth)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chart page and the JSON projection API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print one projection as JSON
    Project(ProjectArgs),
}

#[tokio::main]
async fn main() {
    env_logger::init();

    match Cli::parse().command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Project(args) => match run_projection_command(args) {
            Ok(body) => println!("{body}"),
            Err(msg) => {
                eprintln!("{msg}");
                std::process::exit(1);
            }
        },
    }
}
