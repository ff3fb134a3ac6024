mod cli;
mod clipper;
mod frame;
mod io;
mod logging;
mod outside;
mod result;
mod server;
mod settings;
mod types;

use std::sync::Arc;

use clap::Parser;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, info};

use crate::{
    cli::Args,
    clipper::ClipMerger,
    frame::FrameExtractor,
    outside::{CommandRunner, Ffmpeg, HttpFetcher, MediaFetcher, ProcessRunner},
    server::AppState,
    settings::Settings,
};

fn main() -> Result<()> {
    // Initialize the environment & CLI
    let args = Args::parse();
    logging::init_logging(args.log_level.into())?;

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if let Some(scratch_dir) = &args.scratch_dir {
        settings.scratch_dir = Some(scratch_dir.clone());
    }
    debug!("Settings: {settings:?}");

    // Make sure the scratch directory exists, and use an absolute path
    // as the concat lists must only contain absolute paths
    let scratch_dir = settings.scratch_dir();
    std::fs::create_dir_all(&scratch_dir)
        .into_diagnostic()
        .wrap_err("Could not create scratch directory")?;
    let scratch_dir = scratch_dir
        .canonicalize()
        .into_diagnostic()
        .wrap_err("Could not resolve scratch directory")?;
    info!("Temporary files are created in {}", scratch_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("worker")
        .build()
        .into_diagnostic()
        .wrap_err("Could not start the async runtime")?;

    runtime.block_on(async {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let ffmpeg = Arc::new(Ffmpeg::new(runner, &settings.tools));

        if args.skip_tool_check {
            debug!("Skipping the ffmpeg & ffprobe check");
        } else {
            ffmpeg
                .verify()
                .await
                .wrap_err("ffmpeg and ffprobe must be installed and executable")?;
        }

        let fetcher: Arc<dyn MediaFetcher> = Arc::new(
            HttpFetcher::new(&settings.fetch, &scratch_dir)
                .wrap_err("Could not create the HTTP client")?,
        );

        let state = AppState {
            frames: FrameExtractor::new(fetcher.clone(), ffmpeg.clone()),
            merger: ClipMerger::new(
                fetcher,
                ffmpeg,
                &scratch_dir,
                settings.max_parallel_jobs(),
            ),
        };

        server::serve(settings.bind, state).await
    })?;

    info!("Server stopped");
    Ok(())
}
