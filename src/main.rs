use feedflow::app::App;
use feedflow::cli::{parse_args, USAGE};
use feedflow::config::Config;
use feedflow::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = match parse_args(&args) {
        Ok(Some(action)) => action,
        Ok(None) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    // Load configuration
    let config = Config::load()?;

    let mut app = App::new(&config).await?;
    let output = app.handle_action(action).await?;
    if !output.is_empty() {
        print!("{}", output);
        if !output.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
