pub mod debrid;
pub mod metadata;
pub mod parsed_file;
pub mod playback;
pub mod stream;
pub mod torrent;

pub use debrid::{DebridDownload, DebridFile, DownloadStatus, InstantAvailability};
pub use metadata::SearchMetadata;
pub use parsed_file::ParsedFile;
pub use playback::{PlaybackInfo, PlaybackMetadata};
pub use stream::{
    AddonError, AddonRef, BehaviorHints, ErrorKind, ParsedStream, ServiceRef, StreamError,
    StreamKind, UnprocessedStream,
};
pub use torrent::{InfoHash, SourceKind, UnprocessedTorrent};
