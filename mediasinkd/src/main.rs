use clap::error::ErrorKind;
use clap::Parser;

#[tokio::main]
async fn main() {
    mediasinkd::init_tracing();

    let cli = match mediasinkd::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    if let Err(err) = mediasinkd::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
