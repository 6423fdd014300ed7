//! Storage extension selection for downloaded images.

use reqwest::Url;

/// Image formats the store will name files with. Declaration order is the
/// probe order used when locating an image by fingerprint alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpg,
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 5] = [
        ImageFormat::Jpg,
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::Gif,
        ImageFormat::Webp,
    ];

    /// Used when neither the URL nor the content type identifies the format.
    pub const DEFAULT: ImageFormat = ImageFormat::Jpg;

    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// Match an extension against the allow-list, ignoring ASCII case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    /// Map a declared `Content-Type` to a format. Parameters such as
    /// `; charset=binary` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Extension of the URL's path component, with any query string or
/// fragment removed.
fn url_path_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_string())
}

/// Pick the storage format for a download: the URL's path extension if it
/// is on the allow-list, else the declared content type, else JPEG.
pub fn detect_format(url: &str, content_type: Option<&str>) -> ImageFormat {
    url_path_extension(url)
        .and_then(|ext| ImageFormat::from_extension(&ext))
        .or_else(|| content_type.and_then(ImageFormat::from_content_type))
        .unwrap_or(ImageFormat::DEFAULT)
}
