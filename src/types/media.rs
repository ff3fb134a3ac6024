use super::Extension;

/// The part a local file plays during a request.
///
/// Decides how the file is named in the scratch storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRole {
    /// A downloaded source video
    Source,
    /// A section cut out of a source video
    Clip,
    /// The list of clips given to the concat demuxer
    Manifest,
    /// The concatenation of all the clips
    Merged,
}

impl MediaRole {
    pub fn extension(self) -> Extension {
        match self {
            MediaRole::Manifest => Extension::Txt,
            _ => Extension::Mp4,
        }
    }

    /// Prefix of the file name, used as is for files not having an identifier
    pub fn stem(self) -> &'static str {
        match self {
            MediaRole::Source => "source",
            MediaRole::Clip => "clip",
            MediaRole::Manifest => "concat_list",
            MediaRole::Merged => "merged",
        }
    }

    /// File name of a file playing this role.
    ///
    /// The identifier is appended to the stem when given, e.g. `clip_3.mp4`.
    pub fn file_name(self, id: Option<i64>) -> String {
        let ext = self.extension().with_dot();
        match id {
            Some(id) => format!("{}_{id}{ext}", self.stem()),
            None => format!("{}{ext}", self.stem()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert_eq!(MediaRole::Clip.file_name(Some(7)), "clip_7.mp4");
        assert_eq!(MediaRole::Clip.file_name(Some(-2)), "clip_-2.mp4");
        assert_eq!(MediaRole::Manifest.file_name(None), "concat_list.txt");
        assert_eq!(MediaRole::Merged.file_name(None), "merged.mp4");
    }
}
