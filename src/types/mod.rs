mod extension;
mod media;
mod section;
mod timestamp;

pub use extension::Extension;
pub use media::MediaRole;
pub use section::VideoSection;
pub use timestamp::Timestamp;
