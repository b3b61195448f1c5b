// Entrypoint for the CLI application.
// - Keeps `main` small: load settings, build the context, hand it to the UI loop.
// - Errors escaping the menu are logged once here before exiting.

use monokit_cli::{config::Config, context::AppContext, ui::main_menu};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr at `warn` by default so the menu stays readable;
    // raise with RUST_LOG=monokit_cli=debug.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "monokit_cli=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;
    let ctx = AppContext::from_config(config)?;

    if let Err(e) = main_menu(&ctx) {
        let interrupted = e
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::Interrupted);
        if interrupted {
            println!("\nProgram interrupted by user.");
            return Ok(());
        }
        tracing::error!(error = %e, "unexpected error");
        ctx.activity.record("System Error", false, &format!("{e:#}"));
        eprintln!("An unexpected error occurred: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
