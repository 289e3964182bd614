use std::path::Path;

/// MIME types the file server knows how to label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    TextPlain,
    TextHtml,
    TextCss,
    TextMarkdown,
    ImageJpeg,
    ImagePng,
    ImageGif,
    ImageWebp,
    ImageSvgXml,
    AudioMpeg,
    AudioWav,
    AudioWebm,
    VideoMp4,
    VideoWebm,
    ApplicationJson,
    ApplicationXml,
    ApplicationPdf,
    ApplicationZip,
    ApplicationJavascript,
    ApplicationOctetStream,
}

impl MimeType {
    /// Looks up a file extension, without the leading dot.
    ///
    /// Unknown extensions fall back to `text/plain`.
    ///
    /// # Example
    ///
    /// ```
    /// # use sockline::resource::mime::MimeType;
    /// assert_eq!(MimeType::from_extension("PNG"), MimeType::ImagePng);
    /// assert_eq!(MimeType::from_extension("js").as_str(), "application/javascript");
    /// assert_eq!(MimeType::from_extension("unknown"), MimeType::TextPlain);
    /// ```
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "html" => MimeType::TextHtml,
            "css" => MimeType::TextCss,
            "md" => MimeType::TextMarkdown,
            "jpg" => MimeType::ImageJpeg,
            "png" => MimeType::ImagePng,
            "gif" => MimeType::ImageGif,
            "webp" => MimeType::ImageWebp,
            "svg" => MimeType::ImageSvgXml,
            "mp3" => MimeType::AudioMpeg,
            "wav" => MimeType::AudioWav,
            "weba" => MimeType::AudioWebm,
            "mp4" => MimeType::VideoMp4,
            "webm" => MimeType::VideoWebm,
            "json" => MimeType::ApplicationJson,
            "xml" => MimeType::ApplicationXml,
            "pdf" => MimeType::ApplicationPdf,
            "zip" => MimeType::ApplicationZip,
            "js" => MimeType::ApplicationJavascript,
            _ => MimeType::TextPlain,
        }
    }

    /// Files without an extension are `text/plain`; an extension that is not
    /// valid UTF-8 cannot be looked up and is `application/octet-stream`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            None => MimeType::TextPlain,
            Some(ext) => ext
                .to_str()
                .map(Self::from_extension)
                .unwrap_or(MimeType::ApplicationOctetStream),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::TextPlain => "text/plain",
            MimeType::TextHtml => "text/html",
            MimeType::TextCss => "text/css",
            MimeType::TextMarkdown => "text/markdown",
            MimeType::ImageJpeg => "image/jpeg",
            MimeType::ImagePng => "image/png",
            MimeType::ImageGif => "image/gif",
            MimeType::ImageWebp => "image/webp",
            MimeType::ImageSvgXml => "image/svg+xml",
            MimeType::AudioMpeg => "audio/mpeg",
            MimeType::AudioWav => "audio/wav",
            MimeType::AudioWebm => "audio/webm",
            MimeType::VideoMp4 => "video/mp4",
            MimeType::VideoWebm => "video/webm",
            MimeType::ApplicationJson => "application/json",
            MimeType::ApplicationXml => "application/xml",
            MimeType::ApplicationPdf => "application/pdf",
            MimeType::ApplicationZip => "application/zip",
            MimeType::ApplicationJavascript => "application/javascript",
            MimeType::ApplicationOctetStream => "application/octet-stream",
        }
    }
}
