pub mod archive;
pub mod decode;

pub use archive::{
    ArchiveItem, ArchiveItems, ArchiveReader, ExtensionFilter, MAX_MEMBER_BYTES, archive_id,
    discover_archives,
};
pub use decode::decode_image;
