use crate::error::TransformError;

/// Image formats the service reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Avif,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::WebP),
            "gif" => Some(ImageFormat::Gif),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Guess the format of a source from the extension of its URL path or
    /// file name. Unknown extensions fall back to JPEG.
    pub fn from_source(source: &str) -> Self {
        let path = match reqwest::Url::parse(source) {
            Ok(url) => url.path().to_string(),
            _ => source.split(['?', '#']).next().unwrap_or(source).to_string(),
        };

        path.rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .and_then(|(_, ext)| Self::from_extension(ext))
            .unwrap_or(ImageFormat::Jpeg)
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            ImageFormat::Gif => "gif",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn to_mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Avif => "image/avif",
        }
    }

    /// Resolve the `output` option against the source and the client's
    /// WebP support.
    pub fn resolve_output(
        output: &str,
        source: &str,
        accepts_webp: bool,
    ) -> Result<Self, TransformError> {
        match output.to_lowercase().as_str() {
            "auto" if accepts_webp => Ok(ImageFormat::WebP),
            "auto" | "input" => Ok(Self::from_source(source)),
            other => Self::from_extension(other).ok_or_else(|| {
                TransformError::InvalidOptions(format!("unsupported output format '{}'", output))
            }),
        }
    }
}

/// Whether an `Accept` header value lists WebP.
pub fn accepts_webp(accept: Option<&str>) -> bool {
    accept
        .map(|value| {
            value
                .split(',')
                .any(|part| part.trim().to_lowercase().starts_with("image/webp"))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_source() {
        assert_eq!(
            ImageFormat::from_source("https://cdn.test/a/photo.PNG?v=2"),
            ImageFormat::Png
        );
        assert_eq!(ImageFormat::from_source("/srv/images/anim.gif"), ImageFormat::Gif);
        assert_eq!(ImageFormat::from_source("file:///srv/x.webp"), ImageFormat::WebP);
        assert_eq!(ImageFormat::from_source("https://cdn.test/image"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_source("https://cdn.test/a.tiff"), ImageFormat::Jpeg);
    }

    #[test]
    fn test_resolve_output() {
        let src = "https://cdn.test/a.png";
        assert_eq!(ImageFormat::resolve_output("auto", src, true).unwrap(), ImageFormat::WebP);
        assert_eq!(ImageFormat::resolve_output("auto", src, false).unwrap(), ImageFormat::Png);
        assert_eq!(ImageFormat::resolve_output("input", src, true).unwrap(), ImageFormat::Png);
        assert_eq!(ImageFormat::resolve_output("jpeg", src, true).unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::resolve_output("AVIF", src, false).unwrap(), ImageFormat::Avif);
        assert!(ImageFormat::resolve_output("bmp", src, false).is_err());
    }

    #[test]
    fn test_accepts_webp() {
        assert!(accepts_webp(Some("image/avif,image/webp,*/*;q=0.8")));
        assert!(!accepts_webp(Some("text/html,*/*")));
        assert!(!accepts_webp(None));
    }
}
