use std::str::FromStr;

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod engines;
mod errors;
mod output;
mod prelude;
mod results;
mod ui;

/// Print the text found in an image, one line per text region.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    help_template = "{name} {version}\n{author-with-newline}{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}",
    after_help = r#"
Environment Variables:
  - RUST_LOG (optional): Override the log filter, e.g. `pp_ocr=debug`.

  These variables may be set in a standard `.env` file.

PaddleOCR models are downloaded on first use and cached. Use --model-dir
and --offline to manage them yourself.
"#
)]
struct Opts {
    #[clap(flatten)]
    extract: cmd::extract::ExtractOpts,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Load environment variables from a `.env` file, if it exists. We need
    // `RUST_LOG` before we can set up tracing.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();

    // Initialize tracing.
    let default_directive = if opts.extract.verbose {
        "warn,pp_ocr=info"
    } else {
        "warn"
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(
            Directive::from_str("warn").expect("built-in directive should be valid"),
        )
        .parse_lossy(
            std::env::var(EnvFilter::DEFAULT_ENV)
                .unwrap_or_else(|_| default_directive.to_owned()),
        );

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui, opts).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui, opts: Opts) -> Result<()> {
    debug!("Parsed options: {:?}", opts);
    cmd::extract::cmd_extract(&ui, &opts.extract).await
}
