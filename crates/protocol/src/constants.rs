/// Multipart field carrying the JSON metadata document.
pub const METADATA_FIELD: &str = "entity_content";

/// Multipart field carrying the relayed file bytes.
pub const FILE_FIELD: &str = "VersionData";

/// Metadata key whose value becomes the uploaded filename.
pub const TITLE_KEY: &str = "Title";

/// Error message reported for every download-category failure.
pub const DOWNLOAD_FAILED_MESSAGE: &str = "Failed to download the file";
