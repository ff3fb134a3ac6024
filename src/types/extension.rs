#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Mp4,
    Txt,
}

impl Extension {
    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            Extension::Mp4 => ".mp4",
            Extension::Txt => ".txt",
        }
    }
}
