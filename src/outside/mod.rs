mod command;
mod fetch;
mod ffmpeg;
#[cfg(test)]
pub mod testing;

pub use command::{CommandError, CommandLine, CommandOutput, CommandRunner, ProcessRunner};
pub use fetch::{HttpFetcher, MediaFetcher};
pub use ffmpeg::{Ffmpeg, VideoProbe};
